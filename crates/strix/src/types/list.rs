use crate::{
    exception::RunResult,
    heap::{DropWithHeap, Heap, HeapData},
    resource::ResourceTracker,
    value::Value,
};

/// Mutable sequence of values.
///
/// Owns one reference for every `Value::Ref` it stores.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct List(Vec<Value>);

impl List {
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

impl<T: ResourceTracker> DropWithHeap<T> for List {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.0.drop_with_heap(heap);
    }
}

/// Allocates a list holding `items` and returns an owned reference to it.
pub fn allocate_list(heap: &mut Heap<impl ResourceTracker>, items: Vec<Value>) -> RunResult<Value> {
    let id = heap.allocate(HeapData::List(List::new(items)))?;
    Ok(Value::Ref(id))
}
