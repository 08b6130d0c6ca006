//! The generic "produce next element or signal exhaustion" protocol.
//!
//! `ValueIter` stores iteration state (indices, byte offsets, a deque cursor)
//! rather than a Rust iterator, so `for_next()` can take `&mut Heap` to clone
//! values and allocate one-character strings between steps.
//!
//! Call-site `*args` expansion and `deque.extend()` both consume iterables
//! through this type.

use crate::{
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    intern::Interns,
    resource::ResourceTracker,
    types::{
        DictKey, Type,
        deque::{DequeIter, DequeRevIter},
        str::allocate_str,
    },
    value::Value,
};

/// Iteration state over any iterable value.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ValueIter {
    /// Position within the iterable, shared across sequence kinds.
    index: usize,
    iter_value: IterValue,
    /// The value being iterated, holding its reference for the iterator's lifetime.
    value: Value,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum IterValue {
    /// List or tuple, read by index. Lists are re-read on every step so
    /// appends made during iteration are seen.
    Seq { heap_id: HeapId },
    /// Characters of a string. The content is copied so the string's
    /// reference can be released up front.
    Str { string: String, byte_offset: usize },
    /// Keys of a dict in insertion order.
    DictKeys { heap_id: HeapId, len: usize },
    /// Deque elements, invalidated by structural mutation.
    Deque(DequeIter),
    /// Deque elements from the right.
    DequeRev(DequeRevIter),
}

impl ValueIter {
    /// Creates an iterator over `value`, taking ownership of it.
    ///
    /// Returns a "not iterable" `TypeError` (and releases `value`) for
    /// non-iterable values.
    pub fn new(value: Value, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Self> {
        let iter_value = match &value {
            Value::InternString(id) => Some(IterValue::Str {
                string: interns.get_str(*id).to_owned(),
                byte_offset: 0,
            }),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::List(_) | HeapData::Tuple(_) => Some(IterValue::Seq { heap_id: *id }),
                HeapData::Str(s) => Some(IterValue::Str {
                    string: s.as_str().to_owned(),
                    byte_offset: 0,
                }),
                HeapData::Dict(dict) => Some(IterValue::DictKeys {
                    heap_id: *id,
                    len: dict.len(),
                }),
                HeapData::Deque(_) => DequeIter::new(*id, heap).ok().map(IterValue::Deque),
            },
            _ => None,
        };
        let Some(iter_value) = iter_value else {
            let err = ExcType::type_error_not_iterable(value.py_type(heap));
            value.drop_with_heap(heap);
            return Err(err);
        };
        // Strings are copied and deque iterators hold their own reference,
        // so the original value is not needed beyond this point.
        let value = if matches!(iter_value, IterValue::Str { .. } | IterValue::Deque(_)) {
            value.drop_with_heap(heap);
            Value::None
        } else {
            value
        };
        Ok(Self {
            index: 0,
            iter_value,
            value,
        })
    }

    /// Creates a back-to-front iterator over the deque at `deque_id`.
    pub fn new_deque_rev(deque_id: HeapId, heap: &Heap<impl ResourceTracker>) -> RunResult<Self> {
        Ok(Self {
            index: 0,
            iter_value: IterValue::DequeRev(DequeRevIter::new(deque_id, heap)?),
            value: Value::None,
        })
    }

    /// Produces the next item, or `None` once the iterable is exhausted.
    pub fn for_next(&mut self, heap: &mut Heap<impl ResourceTracker>, _interns: &Interns) -> RunResult<Option<Value>> {
        match &mut self.iter_value {
            IterValue::Seq { heap_id } => {
                let item = match heap.get(*heap_id) {
                    HeapData::List(list) => list.get(self.index),
                    HeapData::Tuple(tuple) => tuple.get(self.index),
                    _ => None,
                };
                let Some(item) = item else {
                    return Ok(None);
                };
                let item = item.clone_with_heap(heap);
                self.index += 1;
                Ok(Some(item))
            }
            IterValue::Str { string, byte_offset } => {
                let Some(ch) = string[*byte_offset..].chars().next() else {
                    return Ok(None);
                };
                *byte_offset += ch.len_utf8();
                self.index += 1;
                allocate_str(heap, ch.to_string()).map(Some)
            }
            IterValue::DictKeys { heap_id, len } => {
                let HeapData::Dict(dict) = heap.get(*heap_id) else {
                    return Ok(None);
                };
                if dict.len() != *len {
                    return Err(ExcType::runtime_error_mutated_during_iteration(Type::Dict));
                }
                let Some((key, _)) = dict.get_index(self.index) else {
                    return Ok(None);
                };
                self.index += 1;
                match key {
                    DictKey::Int(i) => Ok(Some(Value::Int(*i))),
                    DictKey::Str(s) => {
                        let s = s.clone();
                        allocate_str(heap, s).map(Some)
                    }
                }
            }
            IterValue::Deque(iter) => iter.for_next(heap),
            IterValue::DequeRev(iter) => iter.for_next(heap),
        }
    }

    /// Returns the number of items left, assuming no mutation.
    pub fn size_hint(&self, heap: &Heap<impl ResourceTracker>) -> usize {
        match &self.iter_value {
            IterValue::Seq { heap_id } => {
                let len = match heap.get(*heap_id) {
                    HeapData::List(list) => list.len(),
                    HeapData::Tuple(tuple) => tuple.len(),
                    _ => 0,
                };
                len.saturating_sub(self.index)
            }
            IterValue::Str { string, byte_offset } => string[*byte_offset..].chars().count(),
            IterValue::DictKeys { len, .. } => len.saturating_sub(self.index),
            IterValue::Deque(iter) => iter.remaining(),
            IterValue::DequeRev(iter) => iter.remaining(),
        }
    }

    /// Collects all remaining items.
    ///
    /// On failure the items gathered so far are released.
    pub fn collect(&mut self, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Vec<Value>> {
        let mut items = Vec::with_capacity(self.size_hint(heap));
        loop {
            match self.for_next(heap, interns) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => return Ok(items),
                Err(err) => {
                    items.drop_with_heap(heap);
                    return Err(err);
                }
            }
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for ValueIter {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        match self.iter_value {
            IterValue::Deque(iter) => iter.drop_with_heap(heap),
            IterValue::DequeRev(iter) => iter.drop_with_heap(heap),
            IterValue::Seq { .. } | IterValue::Str { .. } | IterValue::DictKeys { .. } => {}
        }
        self.value.drop_with_heap(heap);
    }
}
