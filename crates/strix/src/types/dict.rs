use std::fmt::{self, Write};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    exception::RunResult,
    heap::{DropWithHeap, Heap, HeapData, HeapId, TraceRefs},
    intern::Interns,
    resource::ResourceTracker,
    types::str::string_repr_fmt,
    value::Value,
};

/// Hashable dict key.
///
/// Only strings and integers are supported as keys; a `**kwargs` mapping must
/// contain string keys exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DictKey {
    Str(String),
    Int(i64),
}

impl DictKey {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<i64> for DictKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Insertion-ordered mapping.
///
/// Owns one reference for every `Value::Ref` stored as a value.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Dict {
    map: IndexMap<DictKey, Value>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: IndexMap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.map.get(key)
    }

    /// Looks up a string key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.map.get(&DictKey::Str(key.to_owned()))
    }

    /// Inserts `value` under `key`, releasing any value it replaces.
    pub fn set_item(&mut self, key: DictKey, value: Value, heap: &mut Heap<impl ResourceTracker>) {
        if value.is_ref() {
            heap.mark_potential_cycle();
        }
        if let Some(old) = self.map.insert(key, value) {
            old.drop_with_heap(heap);
        }
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, DictKey, Value> {
        self.map.iter()
    }

    pub fn keys(&self) -> indexmap::map::Keys<'_, DictKey, Value> {
        self.map.keys()
    }

    pub fn values(&self) -> indexmap::map::Values<'_, DictKey, Value> {
        self.map.values()
    }

    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(&DictKey, &Value)> {
        self.map.get_index(index)
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.map.len() * (size_of::<DictKey>() + size_of::<Value>())
            + self.map.keys().filter_map(DictKey::as_str).map(str::len).sum::<usize>()
    }

    /// Releases every stored value, leaving the dict empty.
    pub fn drop_all_entries(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        for (_, value) in self.map.drain(..) {
            value.drop_with_heap(heap);
        }
    }

    pub(crate) fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        heap_ids: &mut AHashSet<HeapId>,
        interns: &Interns,
    ) -> fmt::Result {
        f.write_char('{')?;
        for (i, (key, value)) in self.map.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match key {
                DictKey::Str(s) => string_repr_fmt(s, f)?,
                DictKey::Int(n) => write!(f, "{n}")?,
            }
            f.write_str(": ")?;
            value.py_repr_fmt(f, heap, heap_ids, interns)?;
        }
        f.write_char('}')
    }
}

impl TraceRefs for Dict {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        for value in self.map.values() {
            value.collect_ref_ids(out);
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for Dict {
    fn drop_with_heap(mut self, heap: &mut Heap<T>) {
        self.drop_all_entries(heap);
    }
}

impl IntoIterator for Dict {
    type Item = (DictKey, Value);
    type IntoIter = indexmap::map::IntoIter<DictKey, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

/// Allocates `dict` on the heap and returns an owned reference to it.
pub fn allocate_dict(heap: &mut Heap<impl ResourceTracker>, dict: Dict) -> RunResult<Value> {
    let id = heap.allocate(HeapData::Dict(dict))?;
    Ok(Value::Ref(id))
}
