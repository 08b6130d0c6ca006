use std::fmt::{self, Write};

use ahash::AHashSet;

use crate::{
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    resource::ResourceTracker,
    types::{Type, str::string_repr_fmt},
};

/// Maximum nesting followed by structural equality before giving up.
const MAX_EQ_DEPTH: u16 = 200;

/// Primary value type representing runtime objects.
///
/// This enum uses a hybrid design: small immediate values (Int, Bool, None) are stored
/// inline, while heap-allocated values (List, Str, Deque, etc.) are stored in the arena
/// and referenced via `Ref(HeapId)`.
///
/// NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` for heap values
/// or `clone_immediate()` for immediate values only. Direct cloning would bypass
/// reference counting.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// An empty slot. Never visible as a program value; deque blocks and
    /// partially bound argument vectors use it as the "nothing here" marker.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// An interned string literal. The StringId references the string in the Interns table.
    InternString(StringId),
    /// Owned reference to a heap object.
    Ref(HeapId),
}

impl Value {
    #[inline]
    #[must_use]
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    #[inline]
    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Clones a value, incrementing the reference count for heap values.
    pub fn clone_with_heap(&self, heap: &Heap<impl ResourceTracker>) -> Self {
        match self {
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
            other => other.clone_immediate(),
        }
    }

    /// Drops a value, decrementing its heap reference count if applicable.
    ///
    /// For immediate values this is a no-op. For `Ref` this decrements the count
    /// and frees the object (and any children) when nothing keeps it alive.
    #[inline]
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Copies an immediate value without heap interaction.
    ///
    /// # Panics
    /// Panics on `Ref`: heap values must go through `clone_with_heap`.
    #[must_use]
    pub fn clone_immediate(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::None => Self::None,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::InternString(id) => Self::InternString(*id),
            Self::Ref(_) => panic!("Ref clones must go through clone_with_heap to maintain refcounts"),
        }
    }

    /// Returns the runtime type of this value.
    ///
    /// # Panics
    /// Panics on `Undefined`, which never reaches program-visible code.
    pub fn py_type(&self, heap: &Heap<impl ResourceTracker>) -> Type {
        match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::InternString(_) => Type::Str,
            Self::Ref(id) => heap.get(*id).py_type(),
            Self::Undefined => panic!("Value::py_type called on an empty slot"),
        }
    }

    /// Returns the string content for `str` values.
    pub fn as_str<'a>(&self, heap: &'a Heap<impl ResourceTracker>, interns: &'a Interns) -> Option<&'a str> {
        match self {
            Self::InternString(id) => Some(interns.get_str(*id)),
            Self::Ref(id) => match heap.get_if_live(*id) {
                Some(HeapData::Str(s)) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Structural equality with the runtime's comparison rules.
    ///
    /// Numbers compare by value across `bool`, `int` and `float`; strings by
    /// content regardless of interning; sequences element-wise. Identity implies
    /// equality, which keeps self-referencing containers from recursing forever.
    pub fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
        self.eq_depth(other, heap, interns, MAX_EQ_DEPTH)
    }

    fn eq_depth(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: u16) -> bool {
        if depth == 0 {
            return false;
        }
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::None, Self::None) => true,
            (Self::Ref(a), Self::Ref(b)) if a == b => true,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Float(f), other) | (other, Self::Float(f)) => other.as_number().is_some_and(|n| n == *f),
            (Self::Bool(_) | Self::Int(_), Self::Bool(_) | Self::Int(_)) => self.as_int() == other.as_int(),
            (Self::InternString(a), Self::InternString(b)) if a == b => true,
            (Self::Ref(a), Self::Ref(b)) => {
                let (Some(left), Some(right)) = (heap.get_if_live(*a), heap.get_if_live(*b)) else {
                    return false;
                };
                match (left, right) {
                    (HeapData::Str(l), HeapData::Str(r)) => l.as_str() == r.as_str(),
                    (HeapData::List(l), HeapData::List(r)) => {
                        seq_eq(l.as_slice().iter(), r.as_slice().iter(), l.len(), r.len(), heap, interns, depth)
                    }
                    (HeapData::Tuple(l), HeapData::Tuple(r)) => {
                        seq_eq(l.as_slice().iter(), r.as_slice().iter(), l.len(), r.len(), heap, interns, depth)
                    }
                    (HeapData::Deque(l), HeapData::Deque(r)) => {
                        seq_eq(l.iter(), r.iter(), l.len(), r.len(), heap, interns, depth)
                    }
                    (HeapData::Dict(l), HeapData::Dict(r)) => {
                        l.len() == r.len()
                            && l.iter().all(|(key, lv)| {
                                r.get(key)
                                    .is_some_and(|rv| lv.eq_depth(rv, heap, interns, depth - 1))
                            })
                    }
                    _ => false,
                }
            }
            _ => match (self.as_str(heap, interns), other.as_str(heap, interns)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    /// Returns the `repr()` of this value.
    pub fn py_repr(&self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> String {
        let mut s = String::new();
        let mut heap_ids = AHashSet::new();
        // Writing into a String cannot fail.
        let _ = self.py_repr_fmt(&mut s, heap, &mut heap_ids, interns);
        s
    }

    /// Writes the `repr()` of this value into `f`.
    ///
    /// `heap_ids` holds the containers currently being printed, so a container
    /// that reaches itself prints as `[...]` instead of recursing.
    pub fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        heap_ids: &mut AHashSet<HeapId>,
        interns: &Interns,
    ) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("<undefined>"),
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => float_repr_fmt(*v, f),
            Self::InternString(id) => string_repr_fmt(interns.get_str(*id), f),
            Self::Ref(id) => {
                let Some(data) = heap.get_if_live(*id) else {
                    return f.write_str("<borrowed>");
                };
                if let HeapData::Str(s) = data {
                    return string_repr_fmt(s.as_str(), f);
                }
                if !heap_ids.insert(*id) {
                    return match data {
                        HeapData::Tuple(_) => f.write_str("(...)"),
                        HeapData::Dict(_) => f.write_str("{...}"),
                        _ => f.write_str("[...]"),
                    };
                }
                let result = match data {
                    HeapData::Str(_) => Ok(()),
                    HeapData::List(list) => {
                        f.write_char('[')?;
                        repr_items(list.as_slice().iter(), f, heap, heap_ids, interns)?;
                        f.write_char(']')
                    }
                    HeapData::Tuple(tuple) => {
                        f.write_char('(')?;
                        repr_items(tuple.as_slice().iter(), f, heap, heap_ids, interns)?;
                        if tuple.len() == 1 {
                            f.write_char(',')?;
                        }
                        f.write_char(')')
                    }
                    HeapData::Dict(dict) => dict.py_repr_fmt(f, heap, heap_ids, interns),
                    HeapData::Deque(deque) => deque.py_repr_fmt(f, heap, heap_ids, interns),
                };
                heap_ids.remove(id);
                result
            }
        }
    }
}

fn seq_eq<'a>(
    left: impl Iterator<Item = &'a Value>,
    right: impl Iterator<Item = &'a Value>,
    left_len: usize,
    right_len: usize,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    depth: u16,
) -> bool {
    left_len == right_len && left.zip(right).all(|(l, r)| l.eq_depth(r, heap, interns, depth - 1))
}

/// Writes comma-separated reprs of `items`.
pub(crate) fn repr_items<'a>(
    items: impl Iterator<Item = &'a Value>,
    f: &mut impl Write,
    heap: &Heap<impl ResourceTracker>,
    heap_ids: &mut AHashSet<HeapId>,
    interns: &Interns,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.py_repr_fmt(f, heap, heap_ids, interns)?;
    }
    Ok(())
}

fn float_repr_fmt(v: f64, f: &mut impl Write) -> fmt::Result {
    if v.is_nan() {
        f.write_str("nan")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "inf" } else { "-inf" })
    } else if v.fract() == 0.0 && v.abs() < 1e16 {
        write!(f, "{v:.1}")
    } else {
        write!(f, "{v}")
    }
}
