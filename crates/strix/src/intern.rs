//! String interning for parameter names, keyword names and string literals.
//!
//! Identifiers are stored once in a vector and referenced by `StringId`, so the
//! binding algorithm compares keyword names with a `u32` comparison instead of
//! a string comparison. Names are interned while call sites and signatures are
//! built; during execution the table is read-only and lookups are needed only
//! for `**kwargs` keys and error messages.

use ahash::AHashMap;

/// Handle to an interned string. Equal handles mean equal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mutable interner used while call sites and signatures are being built.
///
/// Interning the same string twice returns the same `StringId`.
#[derive(Debug, Default, Clone)]
pub struct InternerBuilder {
    string_map: AHashMap<String, StringId>,
    /// Indexed by `StringId`.
    strings: Vec<String>,
}

impl InternerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `s`, adding it on first sight.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` distinct strings are interned.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.string_map.get(s) {
            return id;
        }
        let id = StringId(self.strings.len().try_into().expect("StringId overflow"));
        self.strings.push(s.to_owned());
        self.string_map.insert(s.to_owned(), id);
        id
    }

    #[inline]
    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Freezes the builder into a read-only table.
    #[must_use]
    pub fn build(self) -> Interns {
        Interns {
            string_map: self.string_map,
            strings: self.strings,
        }
    }
}

/// Read-only string table consulted during binding and repr.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Interns {
    string_map: AHashMap<String, StringId>,
    strings: Vec<String>,
}

impl Interns {
    /// Text of an interned name.
    ///
    /// # Panics
    /// Panics if `id` was not produced by the builder this table came from.
    #[inline]
    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Reverse lookup. A `**kwargs` key that was never interned cannot name a declared parameter,
    /// so `None` routes it straight to the extra-keyword capture.
    #[must_use]
    pub fn try_get_str_id(&self, s: &str) -> Option<StringId> {
        self.string_map.get(s).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
