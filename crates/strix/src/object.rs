use std::fmt::{self, Write};

use ahash::AHashSet;

use crate::{
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::Interns,
    resource::ResourceTracker,
    types::{
        Deque, Dict, DictKey, Str,
        dict::allocate_dict,
        list::allocate_list,
        str::string_repr_fmt,
        tuple::allocate_tuple,
    },
    value::Value,
};

/// A runtime value that owns all its data.
///
/// This is the public-facing form of a [`Value`]: it can be freely cloned,
/// compared, or serialized without a heap. Converting into a `Value` allocates
/// heap objects; converting back copies their contents out.
///
/// `Cycle` is output-only. It stands in for a container that was already being
/// converted further up the same path, e.g. a deque that contains itself.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Self>),
    Tuple(Vec<Self>),
    /// Insertion-ordered entries.
    Dict(Vec<(DictKey, Self)>),
    Deque { items: Vec<Self>, maxlen: Option<usize> },
    /// A container reached again while converting itself, with its
    /// placeholder repr (`[...]`, `(...)` or `{...}`).
    Cycle(HeapId, String),
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            _ => self.repr_fmt(f),
        }
    }
}

impl Object {
    /// Converts a `Value` into an `Object`, releasing the value's reference.
    pub fn new(value: Value, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> Self {
        let object = Self::from_value(&value, heap, interns);
        value.drop_with_heap(heap);
        object
    }

    /// Converts a borrowed value without touching its reference count.
    ///
    /// # Panics
    /// If the value is `Undefined`, which is never a program value.
    pub fn from_value(value: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Self {
        let mut visited = AHashSet::new();
        Self::from_value_inner(value, heap, &mut visited, interns)
    }

    fn from_value_inner(
        value: &Value,
        heap: &Heap<impl ResourceTracker>,
        visited: &mut AHashSet<HeapId>,
        interns: &Interns,
    ) -> Self {
        match value {
            Value::Undefined => panic!("Undefined found while converting to Object"),
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::InternString(id) => Self::String(interns.get_str(*id).to_owned()),
            Value::Ref(id) => {
                if visited.contains(id) {
                    let placeholder = match heap.get(*id) {
                        HeapData::Tuple(_) => "(...)",
                        HeapData::Dict(_) => "{...}",
                        _ => "[...]",
                    };
                    return Self::Cycle(*id, placeholder.to_owned());
                }
                visited.insert(*id);

                let result = match heap.get(*id) {
                    HeapData::Str(s) => Self::String(s.as_str().to_owned()),
                    HeapData::List(list) => Self::List(Self::from_items(list.as_slice().iter(), heap, visited, interns)),
                    HeapData::Tuple(tuple) => {
                        Self::Tuple(Self::from_items(tuple.as_slice().iter(), heap, visited, interns))
                    }
                    HeapData::Dict(dict) => Self::Dict(
                        dict.iter()
                            .map(|(k, v)| (k.clone(), Self::from_value_inner(v, heap, visited, interns)))
                            .collect(),
                    ),
                    HeapData::Deque(deque) => Self::Deque {
                        items: Self::from_items(deque.iter(), heap, visited, interns),
                        maxlen: deque.maxlen(),
                    },
                };

                // Siblings may share this container without forming a cycle.
                visited.remove(id);
                result
            }
        }
    }

    fn from_items<'a>(
        items: impl Iterator<Item = &'a Value>,
        heap: &Heap<impl ResourceTracker>,
        visited: &mut AHashSet<HeapId>,
        interns: &Interns,
    ) -> Vec<Self> {
        items
            .map(|item| Self::from_value_inner(item, heap, visited, interns))
            .collect()
    }

    /// Converts this object into a runtime `Value`, allocating heap objects.
    ///
    /// # Errors
    /// A `TypeError` for the output-only `Cycle` variant, or a `MemoryError`
    /// when an allocation exceeds the heap's resource limits. Anything
    /// allocated before the failure is released.
    pub fn to_value(self, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Value> {
        match self {
            Self::None => Ok(Value::None),
            Self::Bool(b) => Ok(Value::Bool(b)),
            Self::Int(i) => Ok(Value::Int(i)),
            Self::Float(f) => Ok(Value::Float(f)),
            Self::String(s) => match interns.try_get_str_id(&s) {
                Some(id) => Ok(Value::InternString(id)),
                None => Ok(Value::Ref(heap.allocate(HeapData::Str(Str::from(s)))?)),
            },
            Self::List(items) => {
                let values = Self::to_values(items, heap, interns)?;
                allocate_list(heap, values)
            }
            Self::Tuple(items) => {
                let values = Self::to_values(items, heap, interns)?;
                allocate_tuple(heap, values)
            }
            Self::Dict(entries) => {
                let mut dict = Dict::with_capacity(entries.len());
                for (key, item) in entries {
                    match item.to_value(heap, interns) {
                        Ok(value) => dict.set_item(key, value, heap),
                        Err(err) => {
                            dict.drop_all_entries(heap);
                            return Err(err);
                        }
                    }
                }
                allocate_dict(heap, dict)
            }
            Self::Deque { items, maxlen } => {
                let mut deque = Deque::with_maxlen(maxlen);
                for item in items {
                    let pushed = item
                        .to_value(heap, interns)
                        .and_then(|value| deque.push_back(value, heap));
                    if let Err(err) = pushed {
                        deque.drop_with_heap(heap);
                        return Err(err);
                    }
                }
                Ok(Value::Ref(heap.allocate(HeapData::Deque(deque))?))
            }
            Self::Cycle(..) => Err(ExcType::type_error("a cycle placeholder is not a valid input value")),
        }
    }

    fn to_values(items: Vec<Self>, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item.to_value(heap, interns) {
                Ok(value) => values.push(value),
                Err(err) => {
                    values.drop_with_heap(heap);
                    return Err(err);
                }
            }
        }
        Ok(values)
    }

    /// Returns the repr of this object, e.g. `deque([1, 'a'], maxlen=3)`.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = String::new();
        // Writing to a String cannot fail.
        let _ = self.repr_fmt(&mut s);
        s
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::String(s) => string_repr_fmt(s, f),
            Self::List(items) => {
                f.write_char('[')?;
                Self::repr_seq(items, f)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                Self::repr_seq(items, f)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(entries) => {
                f.write_char('{')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match key {
                        DictKey::Str(s) => string_repr_fmt(s, f)?,
                        DictKey::Int(n) => write!(f, "{n}")?,
                    }
                    f.write_str(": ")?;
                    value.repr_fmt(f)?;
                }
                f.write_char('}')
            }
            Self::Deque { items, maxlen } => {
                f.write_str("deque([")?;
                Self::repr_seq(items, f)?;
                match maxlen {
                    Some(maxlen) => write!(f, "], maxlen={maxlen})"),
                    None => f.write_str("])"),
                }
            }
            Self::Cycle(_, placeholder) => f.write_str(placeholder),
        }
    }

    fn repr_seq(items: &[Self], f: &mut impl Write) -> fmt::Result {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            item.repr_fmt(f)?;
        }
        Ok(())
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
