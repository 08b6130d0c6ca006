use std::fmt::{self, Write};

use crate::{
    exception::RunResult,
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    value::Value,
};

/// Heap-allocated string.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Str(String);

impl Str {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Allocates `s` as a heap string and returns an owned reference to it.
pub fn allocate_str(heap: &mut Heap<impl ResourceTracker>, s: impl Into<Str>) -> RunResult<Value> {
    let id = heap.allocate(HeapData::Str(s.into()))?;
    Ok(Value::Ref(id))
}

/// Writes a quoted string literal the way `repr()` shows it.
///
/// Single quotes are preferred; double quotes are used when the text contains a
/// single quote but no double quote.
pub fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}
