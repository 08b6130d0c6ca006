use crate::{
    exception::RunResult,
    heap::{DropWithHeap, Heap, HeapData},
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    value::Value,
};

/// Immutable sequence of values.
///
/// The extra-positional capture of a bound call is always a tuple.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for Tuple {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.0.drop_with_heap(heap);
    }
}

/// Allocates a tuple holding `items` and returns an owned reference to it.
///
/// On failure the items are released before the error is returned.
pub fn allocate_tuple(heap: &mut Heap<impl ResourceTracker>, items: Vec<Value>) -> RunResult<Value> {
    let estimate = items.len() * size_of::<Value>();
    if estimate > LARGE_RESULT_THRESHOLD
        && let Err(err) = heap.tracker().check_large_result(estimate)
    {
        items.drop_with_heap(heap);
        return Err(err.into());
    }
    let id = heap.allocate(HeapData::Tuple(Tuple::new(items)))?;
    Ok(Value::Ref(id))
}
