use std::{
    collections::BTreeMap,
    mem::{ManuallyDrop, size_of},
    sync::atomic::{AtomicUsize, Ordering},
    vec,
};

use crate::{
    resource::{ResourceError, ResourceTracker},
    types::{Deque, Dict, List, Str, Tuple, Type},
    value::Value,
};

/// Index of an arena slot. Stale once the slot is freed and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Reports the heap references held by a payload so the collector can trace it.
///
/// Every structure that stores `Value`s (deque blocks, list and tuple items,
/// dict values, bound argument vectors) implements this. The collector never
/// inspects payloads any other way.
pub trait TraceRefs {
    /// Pushes the id of every `Value::Ref` held by `self` onto `out`.
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>);
}

impl TraceRefs for Value {
    #[inline]
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        if let Self::Ref(id) = self {
            out.push(*id);
        }
    }
}

impl<U: TraceRefs> TraceRefs for [U] {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        for item in self {
            item.collect_ref_ids(out);
        }
    }
}

impl<U: TraceRefs> TraceRefs for Vec<U> {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        self.as_slice().collect_ref_ids(out);
    }
}

impl<U: TraceRefs> TraceRefs for Option<U> {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        if let Some(inner) = self {
            inner.collect_ref_ids(out);
        }
    }
}

/// Payload of an arena slot.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub enum HeapData {
    Str(Str),
    List(List),
    Tuple(Tuple),
    /// String-keyed mapping, used for `**kwargs` capture and expansion.
    Dict(Dict),
    Deque(Deque),
}

impl HeapData {
    /// Key used in [`HeapStats::objects_by_type`].
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Tuple(_) => "Tuple",
            Self::Dict(_) => "Dict",
            Self::Deque(_) => "Deque",
        }
    }

    #[must_use]
    pub fn py_type(&self) -> Type {
        match self {
            Self::Str(_) => Type::Str,
            Self::List(_) => Type::List,
            Self::Tuple(_) => Type::Tuple,
            Self::Dict(_) => Type::Dict,
            Self::Deque(_) => Type::Deque,
        }
    }

    /// Approximate memory footprint reported to the resource tracker.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        size_of::<Self>()
            + match self {
                Self::Str(s) => s.as_str().len(),
                Self::List(list) => list.len() * size_of::<Value>(),
                Self::Tuple(tuple) => tuple.len() * size_of::<Value>(),
                Self::Dict(dict) => dict.estimate_size(),
                Self::Deque(deque) => deque.estimate_size(),
            }
    }

    /// Bytes to credit back when the entry is freed.
    ///
    /// Adds whatever the payload charged on its own while it grew, which
    /// [`Self::estimate_size`] leaves out.
    fn freed_size(&self) -> usize {
        self.estimate_size()
            + match self {
                Self::Deque(deque) => deque.extra_block_bytes(),
                _ => 0,
            }
    }

    /// Returns whether this type can hold references to other heap objects.
    ///
    /// Only containers count toward the GC allocation threshold; strings can
    /// never form cycles.
    #[inline]
    pub fn is_gc_tracked(&self) -> bool {
        !matches!(self, Self::Str(_))
    }

    /// Returns whether this heap data currently contains any `Value::Ref`.
    #[must_use]
    pub fn has_refs(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::List(list) => list.as_slice().iter().any(Value::is_ref),
            Self::Tuple(tuple) => tuple.as_slice().iter().any(Value::is_ref),
            Self::Dict(dict) => dict.values().any(Value::is_ref),
            Self::Deque(deque) => deque.iter().any(Value::is_ref),
        }
    }
}

impl TraceRefs for HeapData {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) => {}
            Self::List(list) => list.as_slice().collect_ref_ids(out),
            Self::Tuple(tuple) => tuple.as_slice().collect_ref_ids(out),
            Self::Dict(dict) => dict.collect_ref_ids(out),
            Self::Deque(deque) => deque.collect_ref_ids(out),
        }
    }
}

fn serialize_atomic<S: serde::Serializer>(val: &AtomicUsize, s: S) -> Result<S::Ok, S::Error> {
    serde::Serialize::serialize(&val.load(Ordering::Relaxed), s)
}

fn deserialize_atomic<'de, D: serde::Deserializer<'de>>(d: D) -> Result<AtomicUsize, D::Error> {
    let v = <usize as serde::Deserialize>::deserialize(d)?;
    Ok(AtomicUsize::new(v))
}

/// A single arena slot.
///
/// Two liveness protocols meet here: `refcount` counts owned references held by
/// values and native callers, `pins` counts root registrations made for the
/// tracing collector. The entry is released only once both are zero.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct HeapValue {
    #[serde(serialize_with = "serialize_atomic", deserialize_with = "deserialize_atomic")]
    refcount: AtomicUsize,
    pins: usize,
    /// `None` only while lent out by `with_entry_mut`.
    data: Option<HeapData>,
}

/// Point-in-time counters returned by [`Heap::heap_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Occupied slots.
    pub live_objects: usize,
    /// Slots waiting on the free list.
    pub free_slots: usize,
    pub total_slots: usize,
    /// Live slots with at least one pin.
    pub pinned_objects: usize,
    /// Live slots per payload kind, sorted by name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// `None` unless the tracker counts allocations.
    pub tracker_allocations: Option<usize>,
    pub tracker_memory_bytes: Option<usize>,
}

/// The ownership-token interface shared by the refcount layer and the collector.
///
/// `acquire`/`release` adjust the strong count; `is_gc_reachable` asks the
/// tracing side. Deallocation happens only when both agree.
pub trait Liveness {
    /// Takes an additional owned reference.
    fn acquire(&self, id: HeapId);
    /// Gives up an owned reference, freeing the object once nothing keeps it alive.
    fn release(&mut self, id: HeapId);
    /// Returns true if the object is reachable from a registered GC root.
    fn is_gc_reachable(&self, id: HeapId) -> bool;
}

/// Slot arena holding every heap object.
///
/// Freed slots go on a free list and are handed out again before the arena
/// grows. All allocation accounting is delegated to `T`; with `NoLimitTracker`
/// the checks are empty.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapValue>>,
    free_list: Vec<HeapId>,
    tracker: T,
    /// Set when a container holding a ref is allocated; cleared by a collection.
    may_have_cycles: bool,
    /// Container allocations since the last collection.
    allocations_since_gc: usize,
}

impl<T: ResourceTracker> Heap<T> {
    fn entry(&self, id: HeapId, op: &str) -> &HeapValue {
        match self.entries.get(id.index()) {
            Some(Some(entry)) => entry,
            Some(None) => panic!("Heap::{op}: object {} already freed", id.index()),
            None => panic!("Heap::{op}: no slot {}", id.index()),
        }
    }

    fn entry_mut(&mut self, id: HeapId, op: &str) -> &mut HeapValue {
        match self.entries.get_mut(id.index()) {
            Some(Some(entry)) => entry,
            Some(None) => panic!("Heap::{op}: object {} already freed", id.index()),
            None => panic!("Heap::{op}: no slot {}", id.index()),
        }
    }

    pub fn new(capacity: usize, tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            tracker,
            may_have_cycles: false,
            allocations_since_gc: 0,
        }
    }

    /// Snapshots the heap through postcard. Ids, counts, pins and deque block
    /// layouts carry over, so every `HeapId` names the same object in the copy.
    ///
    /// # Panics
    /// Panics if the round trip fails.
    pub fn deep_clone(&self) -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let bytes = postcard::to_allocvec(self).expect("heap serialization should not fail");
        postcard::from_bytes(&bytes).expect("heap deserialization should not fail")
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Stores `data` in a slot and returns its id with one owned reference.
    ///
    /// # Errors
    /// The tracker's refusal. The payload's own references are released
    /// first, so a refused container does not leak what it was built from.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        if let Err(err) = self.tracker.on_allocate(|| data.estimate_size()) {
            self.release_children(data);
            tracing::debug!(target: "strix::heap", error = %err, "allocation refused");
            return Err(err);
        }
        if data.is_gc_tracked() {
            self.allocations_since_gc = self.allocations_since_gc.wrapping_add(1);
            if data.has_refs() {
                self.may_have_cycles = true;
            }
        }

        let kind = data.variant_name();
        let new_entry = HeapValue {
            refcount: AtomicUsize::new(1),
            pins: 0,
            data: Some(data),
        };

        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(new_entry));
            id
        };
        tracing::trace!(target: "strix::heap", id = id.index(), kind, "allocated");
        Ok(id)
    }

    /// Called by containers that store a `Ref` after their own allocation.
    #[inline]
    pub fn mark_potential_cycle(&mut self) {
        self.may_have_cycles = true;
    }

    /// Adds one owned reference. Takes `&self`: the count is atomic.
    pub fn inc_ref(&self, id: HeapId) {
        self.entry(id, "inc_ref").refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Gives up one owned reference.
    ///
    /// At zero the object is freed and its children released, unless it is
    /// pinned: then it stays with a count of zero until the last pin goes.
    ///
    /// # Panics
    /// Panics on a freed or unknown id.
    pub fn dec_ref(&mut self, id: HeapId) {
        {
            let entry = self.entry_mut(id, "dec_ref");
            let count = entry.refcount.load(Ordering::Relaxed);
            debug_assert!(count > 0, "Heap::dec_ref: refcount already zero");
            if count > 1 {
                entry.refcount.store(count - 1, Ordering::Relaxed);
                return;
            }
            entry.refcount.store(0, Ordering::Relaxed);
            if entry.pins > 0 {
                tracing::trace!(target: "strix::heap", id = id.index(), "released while pinned");
                return;
            }
        }
        self.free_entry(id);
    }

    fn free_entry(&mut self, id: HeapId) {
        let Some(value) = self.entries.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        self.free_list.push(id);

        if let Some(data) = value.data {
            self.tracker.on_free(|| data.freed_size());
            self.release_children(data);
        }
        tracing::trace!(target: "strix::heap", id = id.index(), "freed");
    }

    /// Drops `data` and gives up every reference it held.
    fn release_children(&mut self, data: HeapData) {
        let mut children = Vec::new();
        data.collect_ref_ids(&mut children);
        drop(data);
        children.into_iter().for_each(|child| self.dec_ref(child));
    }

    /// Pins `id` as a collector root. Pins nest; each needs its own `unmark_root`.
    pub fn mark_root(&mut self, id: HeapId) {
        let entry = self.entry_mut(id, "mark_root");
        entry.pins += 1;
        tracing::trace!(target: "strix::heap", id = id.index(), pins = entry.pins, "root pinned");
    }

    /// Drops one root registration for `id`.
    ///
    /// If this was the last pin and the refcount already reached zero, the
    /// object is freed immediately.
    ///
    /// # Panics
    /// Panics if the value ID is invalid, the value has already been freed, or
    /// the object is not pinned.
    pub fn unmark_root(&mut self, id: HeapId) {
        let release = {
            let entry = self.entry_mut(id, "unmark_root");
            assert!(entry.pins > 0, "Heap::unmark_root: object is not pinned");
            entry.pins -= 1;
            tracing::trace!(target: "strix::heap", id = id.index(), pins = entry.pins, "root unpinned");
            entry.pins == 0 && entry.refcount.load(Ordering::Relaxed) == 0
        };
        if release {
            self.free_entry(id);
        }
    }

    /// Returns the number of outstanding root registrations for `id`, or 0 when freed.
    #[must_use]
    pub fn pin_count(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.pins)
    }

    /// Payload of a live slot.
    ///
    /// # Panics
    /// Panics on a freed or unknown id, and inside `with_entry_mut` for the
    /// entry being mutated.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entry(id, "get")
            .data
            .as_ref()
            .expect("Heap::get: data lent out by with_entry_mut")
    }

    /// Returns heap data if the slot is live and not currently borrowed.
    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index())?.as_ref()?.data.as_ref()
    }

    /// Returns true while `id` names a live (not yet freed) entry.
    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        matches!(self.entries.get(id.index()), Some(Some(_)))
    }

    /// Runs `f` on the payload at `id` with the heap still usable, so the
    /// closure can release evicted values or allocate.
    ///
    /// The payload is moved out of its slot for the duration of the call.
    pub fn with_entry_mut<F, R>(&mut self, id: HeapId, f: F) -> R
    where
        F: FnOnce(&mut Self, &mut HeapData) -> R,
    {
        let mut data = self
            .entry_mut(id, "with_entry_mut")
            .data
            .take()
            .expect("Heap::with_entry_mut: reentrant borrow");

        let result = f(self, &mut data);

        self.entry_mut(id, "with_entry_mut").data = Some(data);
        result
    }

    #[must_use]
    pub fn get_refcount(&self, id: HeapId) -> usize {
        self.entry(id, "get_refcount").refcount.load(Ordering::Relaxed)
    }

    /// Occupied slots. Tests use this to check that every failure path released what it took.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|o| o.is_some()).count()
    }

    /// Collects a statistics snapshot of the arena.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        let mut pinned_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            if entry.pins > 0 {
                pinned_objects += 1;
            }
            if let Some(data) = &entry.data {
                *objects_by_type.entry(data.variant_name()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            pinned_objects,
            objects_by_type,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }

    /// True once a cycle is possible and the tracker's interval has elapsed.
    #[inline]
    pub fn should_gc(&self) -> bool {
        self.may_have_cycles && self.allocations_since_gc >= self.tracker.gc_interval()
    }

    /// Marks every entry reachable from `roots` plus every pinned entry.
    ///
    /// Entries whose data is currently borrowed are treated as reachable; the
    /// borrower owns them for the duration of the borrow. With
    /// `count_external`, entries whose refcount exceeds the references held by
    /// other heap payloads are roots too: something outside the heap owns them.
    fn mark(&self, roots: Vec<HeapId>, count_external: bool) -> Vec<bool> {
        let internal = if count_external {
            self.internal_ref_counts()
        } else {
            Vec::new()
        };
        let mut reachable = vec![false; self.entries.len()];
        let mut work_list = roots;
        for (idx, slot) in self.entries.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let held_outside = count_external && entry.refcount.load(Ordering::Relaxed) > internal[idx];
            if entry.pins > 0 || entry.data.is_none() || held_outside {
                work_list.push(HeapId(idx));
            }
        }

        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(entry)) = self.entries.get(idx)
                && let Some(ref data) = entry.data
            {
                data.collect_ref_ids(&mut work_list);
            }
        }
        reachable
    }

    /// Per slot, how many references other live payloads hold to it.
    fn internal_ref_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.entries.len()];
        let mut children = Vec::new();
        for entry in self.entries.iter().flatten() {
            if let Some(data) = &entry.data {
                data.collect_ref_ids(&mut children);
            }
        }
        for child in children {
            if let Some(count) = counts.get_mut(child.index()) {
                *count += 1;
            }
        }
        counts
    }

    /// Mark-sweep from `roots`, every pinned entry and every entry referenced
    /// from outside the heap; returns how many entries were swept.
    ///
    /// Only objects kept alive solely by other unreachable objects are swept.
    /// References that swept objects held into survivors are released, so
    /// survivor counts stay exact.
    pub fn collect_garbage(&mut self, roots: Vec<HeapId>) -> usize {
        let reachable = self.mark(roots, true);

        let mut swept = Vec::new();
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(value) = slot.take() {
                self.free_list.push(HeapId(idx));
                swept.push(value);
            }
        }

        let swept_count = swept.len();
        let mut survivors = Vec::new();
        for value in swept {
            if let Some(data) = value.data {
                self.tracker.on_free(|| data.freed_size());
                data.collect_ref_ids(&mut survivors);
            }
        }
        for child_id in survivors {
            if reachable.get(child_id.index()).copied().unwrap_or(false) && self.is_live(child_id) {
                self.dec_ref(child_id);
            }
        }

        self.may_have_cycles = false;
        self.allocations_since_gc = 0;
        tracing::debug!(target: "strix::heap", swept = swept_count, live = self.live_count(), "gc sweep complete");
        swept_count
    }
}

impl<T: ResourceTracker> Liveness for Heap<T> {
    #[inline]
    fn acquire(&self, id: HeapId) {
        self.inc_ref(id);
    }

    #[inline]
    fn release(&mut self, id: HeapId) {
        self.dec_ref(id);
    }

    fn is_gc_reachable(&self, id: HeapId) -> bool {
        self.is_live(id) && self.mark(Vec::new(), false).get(id.index()).copied().unwrap_or(false)
    }
}

/// Explicit release for values that hold heap references.
///
/// `Drop` has no way to reach the heap, so anything that may own a
/// `Value::Ref` is released through this trait instead. Every exit path has to
/// release: an early `?` that skips it leaks a count. [`HeapGuard`] and
/// [`defer_drop!`] tie the release to scope exit.
pub trait DropWithHeap<T: ResourceTracker> {
    fn drop_with_heap(self, heap: &mut Heap<T>);
}

impl<T: ResourceTracker> DropWithHeap<T> for Value {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        Self::drop_with_heap(self, heap);
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Option<U> {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        if let Some(inner) = self {
            inner.drop_with_heap(heap);
        }
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for Vec<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.into_iter().drop_with_heap(heap);
    }
}

impl<T: ResourceTracker, U: DropWithHeap<T>> DropWithHeap<T> for vec::IntoIter<U> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.for_each(|item| item.drop_with_heap(heap));
    }
}

/// Owns a [`DropWithHeap`] value together with the heap borrow needed to
/// release it, and releases it when the guard goes out of scope.
///
/// [`into_inner`](Self::into_inner) hands the value back without releasing it,
/// which is how a successful path keeps what a failing path would discard.
pub struct HeapGuard<'a, T: ResourceTracker, V: DropWithHeap<T>> {
    // taken by move in `Drop`
    value: ManuallyDrop<V>,
    heap: &'a mut Heap<T>,
}

impl<'a, T: ResourceTracker, V: DropWithHeap<T>> HeapGuard<'a, T, V> {
    #[inline]
    pub fn new(value: V, heap: &'a mut Heap<T>) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            heap,
        }
    }

    /// Disarms the guard and returns the value unreleased.
    #[inline]
    pub fn into_inner(self) -> V {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the value is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.value) }
    }

    /// Shared view of the value plus the heap. Used by [`defer_drop!`].
    #[inline]
    pub fn as_parts(&mut self) -> (&V, &mut Heap<T>) {
        (&self.value, self.heap)
    }

    /// Mutable view of the value plus the heap. Used by [`defer_drop_mut!`].
    #[inline]
    pub fn as_parts_mut(&mut self) -> (&mut V, &mut Heap<T>) {
        (&mut self.value, self.heap)
    }
}

impl<T: ResourceTracker, V: DropWithHeap<T>> Drop for HeapGuard<'_, T, V> {
    fn drop(&mut self) {
        // SAFETY: `into_inner` forgets the guard, so this is the only take.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        value.drop_with_heap(self.heap);
    }
}

/// Moves `$value` into a [`HeapGuard`] and shadows `$value` and `$heap` with
/// borrows from it, so the value is released at the end of the enclosing scope.
///
/// `$heap` is rebound with `let`, so it must be a plain identifier (not `self`).
#[macro_export]
macro_rules! defer_drop {
    ($value:ident, $heap:ident) => {
        let mut _guard = $crate::heap::HeapGuard::new($value, $heap);
        #[allow(clippy::allow_attributes, reason = "callers may use only one of the two parts")]
        #[allow(unused_variables)]
        let ($value, $heap) = _guard.as_parts();
    };
}

/// [`defer_drop!`] with `$value` rebound as `&mut`.
#[macro_export]
macro_rules! defer_drop_mut {
    ($value:ident, $heap:ident) => {
        let mut _guard = $crate::heap::HeapGuard::new($value, $heap);
        #[allow(clippy::allow_attributes, reason = "callers may use only one of the two parts")]
        #[allow(unused_variables)]
        let ($value, $heap) = _guard.as_parts_mut();
    };
}
