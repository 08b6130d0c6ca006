use strum::{Display, EnumString, IntoStaticStr};

/// Runtime type of a value, spelled the way error messages and guards print it.
///
/// A slot guard records two of these: the declared type and the one bound.
#[derive(
    Debug, Clone, Copy, Display, EnumString, IntoStaticStr, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    #[strum(serialize = "NoneType")]
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Deque,
}

impl Type {
    /// Types the iteration protocol can walk.
    #[must_use]
    pub fn is_iterable(self) -> bool {
        matches!(self, Self::Str | Self::List | Self::Tuple | Self::Dict | Self::Deque)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn names_match_their_repr_spelling() {
        assert_eq!(Type::NoneType.to_string(), "NoneType");
        assert_eq!(Type::Deque.to_string(), "deque");
        let name: &'static str = Type::Dict.into();
        assert_eq!(name, "dict");
        assert_eq!(Type::from_str("float"), Ok(Type::Float));
        assert!(Type::from_str("set").is_err());
    }
}
