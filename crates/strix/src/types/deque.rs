//! Block-structured double-ended queue.
//!
//! Elements live in fixed-capacity blocks linked into a non-circular chain.
//! Push and pop at either end are O(1) amortized: a block is allocated only
//! when an endpoint index runs off its current block, and released only when
//! an endpoint block drains. Indexed access walks from whichever end is nearer.
//!
//! Blocks are kept in a per-deque arena addressed by `BlockId`; links are ids,
//! not pointers. Emptied blocks go to a small cache before their storage is
//! released, so a deque oscillating around a block boundary does not thrash
//! the allocator.
//!
//! Every structural change bumps a mutation counter. Iterators and `remove`
//! snapshot it and fail if it moved, which catches reentrant mutation from a
//! callback without any cross-thread machinery.
//!
//! Operations that need to compare or release values take the heap; the
//! heap-level functions at the bottom of this file operate on a deque that
//! lives in the arena.

use std::{
    fmt::{self, Write},
    mem,
};

use ahash::AHashSet;

use crate::{
    defer_drop_mut,
    exception::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId, TraceRefs},
    intern::Interns,
    resource::{ResourceError, ResourceTracker},
    types::{Type, iter::ValueIter},
    value::{Value, repr_items},
};

/// Number of element slots per block.
pub const DEFAULT_BLOCK_LEN: usize = 62;

/// Upper bound on emptied blocks a deque keeps for reuse.
pub const MAX_FREE_BLOCKS: usize = 16;

const BLOCK_LEN: usize = DEFAULT_BLOCK_LEN;
const CENTER: usize = (BLOCK_LEN - 1) / 2;

/// Bytes charged to the resource tracker per block.
const BLOCK_BYTES: usize = size_of::<Block>() + BLOCK_LEN * size_of::<Value>();

/// Index of a block in the deque's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct BlockId(usize);

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Block {
    /// Always `BLOCK_LEN` long; unoccupied slots hold `Value::Undefined`.
    slots: Vec<Value>,
    left: Option<BlockId>,
    right: Option<BlockId>,
}

impl Block {
    fn new() -> Self {
        Self {
            slots: (0..BLOCK_LEN).map(|_| Value::Undefined).collect(),
            left: None,
            right: None,
        }
    }
}

/// Position of one element inside the block chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cursor {
    block: BlockId,
    index: usize,
}

/// Snapshot of the deque's endpoint bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeLayout {
    /// Slot of the first element within the leftmost block.
    pub left_index: usize,
    /// Slot of the last element within the rightmost block.
    pub right_index: usize,
    pub len: usize,
    /// Number of blocks linked into the chain.
    pub chain_len: usize,
    /// Emptied blocks held for reuse.
    pub cached_blocks: usize,
}

impl DequeLayout {
    /// Returns true if the endpoint indices agree with the length.
    ///
    /// Holds after every operation: `(left_index + len - 1) mod N == right_index`,
    /// and an empty deque sits at the center of a single block.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let wraps = (self.left_index + self.len + BLOCK_LEN - 1) % BLOCK_LEN == self.right_index;
        let span = (self.left_index + self.len).div_ceil(BLOCK_LEN).max(1);
        if self.len == 0 {
            wraps && self.chain_len == 1 && self.left_index == CENTER + 1 && self.right_index == CENTER
        } else {
            wraps && self.chain_len == span
        }
    }
}

/// A double-ended queue of values stored in a chain of fixed-size blocks.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Deque {
    blocks: Vec<Option<Block>>,
    /// Arena slots whose block storage has been released.
    vacant: Vec<BlockId>,
    /// Emptied blocks kept for reuse, at most `MAX_FREE_BLOCKS`.
    free_blocks: Vec<BlockId>,
    left_block: BlockId,
    right_block: BlockId,
    left_index: usize,
    right_index: usize,
    len: usize,
    /// Mutation counter, bumped on every structural change.
    state: u64,
    /// Maximum size for bounded deques.
    ///
    /// When set, appends automatically discard items from the opposite end.
    maxlen: Option<usize>,
}

impl Default for Deque {
    fn default() -> Self {
        Self::new()
    }
}

impl Deque {
    /// Creates a new empty, unbounded deque.
    #[must_use]
    pub fn new() -> Self {
        Self::with_maxlen(None)
    }

    /// Creates a new empty deque, bounded when `maxlen` is set.
    #[must_use]
    pub fn with_maxlen(maxlen: Option<usize>) -> Self {
        Self {
            blocks: vec![Some(Block::new())],
            vacant: Vec::new(),
            free_blocks: Vec::new(),
            left_block: BlockId(0),
            right_block: BlockId(0),
            left_index: CENTER + 1,
            right_index: CENTER,
            len: 0,
            state: 0,
            maxlen,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the configured maximum length, if this deque is bounded.
    #[inline]
    #[must_use]
    pub fn maxlen(&self) -> Option<usize> {
        self.maxlen
    }

    /// Returns the current value of the mutation counter.
    #[inline]
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.state
    }

    #[must_use]
    pub fn layout(&self) -> DequeLayout {
        let mut chain_len = 1;
        let mut block = self.left_block;
        while let Some(next) = self.block(block).right {
            chain_len += 1;
            block = next;
        }
        DequeLayout {
            left_index: self.left_index,
            right_index: self.right_index,
            len: self.len,
            chain_len,
            cached_blocks: self.free_blocks.len(),
        }
    }

    /// Footprint charged when the deque enters the heap: the struct and its
    /// first block. Later blocks are charged one by one as they are created.
    pub(crate) fn estimate_size(&self) -> usize {
        size_of::<Self>() + BLOCK_BYTES
    }

    /// Bytes held by blocks beyond the first, cached spares included.
    pub(crate) fn extra_block_bytes(&self) -> usize {
        self.allocated_blocks().saturating_sub(1) * BLOCK_BYTES
    }

    fn allocated_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    // ------------------------------------------------------------------
    // block arena
    // ------------------------------------------------------------------

    fn block(&self, id: BlockId) -> &Block {
        self.blocks[id.0].as_ref().expect("Deque: block already released")
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks[id.0].as_mut().expect("Deque: block already released")
    }

    fn take_slot(&mut self, block: BlockId, index: usize) -> Value {
        mem::replace(&mut self.block_mut(block).slots[index], Value::Undefined)
    }

    fn put_slot(&mut self, block: BlockId, index: usize, value: Value) {
        let old = mem::replace(&mut self.block_mut(block).slots[index], value);
        debug_assert!(old.is_undefined(), "Deque: overwrote an occupied slot");
    }

    fn new_block(&mut self, heap: &mut Heap<impl ResourceTracker>) -> Result<BlockId, ResourceError> {
        if let Some(id) = self.free_blocks.pop() {
            let block = self.block_mut(id);
            block.left = None;
            block.right = None;
            return Ok(id);
        }
        heap.tracker_mut().on_allocate(|| BLOCK_BYTES)?;
        let block = Block::new();
        let id = if let Some(id) = self.vacant.pop() {
            self.blocks[id.0] = Some(block);
            id
        } else {
            self.blocks.push(Some(block));
            BlockId(self.blocks.len() - 1)
        };
        tracing::trace!(target: "strix::deque", block = id.0, "block allocated");
        Ok(id)
    }

    fn free_block(&mut self, id: BlockId, heap: &mut Heap<impl ResourceTracker>) {
        if self.free_blocks.len() < MAX_FREE_BLOCKS {
            self.free_blocks.push(id);
            return;
        }
        self.blocks[id.0] = None;
        self.vacant.push(id);
        heap.tracker_mut().on_free(|| BLOCK_BYTES);
        tracing::trace!(target: "strix::deque", block = id.0, "block released");
    }

    #[inline]
    fn bump_state(&mut self) {
        self.state = self.state.wrapping_add(1);
    }

    fn needs_trim(&self) -> bool {
        self.maxlen.is_some_and(|maxlen| self.len > maxlen)
    }

    fn recenter(&mut self) {
        debug_assert_eq!(self.left_block, self.right_block);
        self.left_index = CENTER + 1;
        self.right_index = CENTER;
    }

    // ------------------------------------------------------------------
    // cursors
    // ------------------------------------------------------------------

    pub(crate) fn front_cursor(&self) -> Cursor {
        Cursor {
            block: self.left_block,
            index: self.left_index,
        }
    }

    pub(crate) fn back_cursor(&self) -> Cursor {
        Cursor {
            block: self.right_block,
            index: self.right_index,
        }
    }

    pub(crate) fn at(&self, cursor: Cursor) -> &Value {
        &self.block(cursor.block).slots[cursor.index]
    }

    /// Moves a cursor one element to the right. Stepping past the last slot of
    /// the rightmost block leaves the cursor parked; callers bound their walks
    /// by length.
    pub(crate) fn step_right(&self, cursor: Cursor) -> Cursor {
        if cursor.index + 1 < BLOCK_LEN {
            return Cursor {
                block: cursor.block,
                index: cursor.index + 1,
            };
        }
        match self.block(cursor.block).right {
            Some(block) => Cursor { block, index: 0 },
            None => cursor,
        }
    }

    pub(crate) fn step_left(&self, cursor: Cursor) -> Cursor {
        if cursor.index > 0 {
            return Cursor {
                block: cursor.block,
                index: cursor.index - 1,
            };
        }
        match self.block(cursor.block).left {
            Some(block) => Cursor {
                block,
                index: BLOCK_LEN - 1,
            },
            None => cursor,
        }
    }

    /// Finds the slot holding element `index`, walking from the nearer end.
    fn locate(&self, index: usize) -> Cursor {
        debug_assert!(index < self.len);
        let absolute = index + self.left_index;
        let hops = absolute / BLOCK_LEN;
        let slot = absolute % BLOCK_LEN;
        let mut block;
        if index < (self.len >> 1) {
            block = self.left_block;
            for _ in 0..hops {
                block = self.block(block).right.expect("Deque: broken right link");
            }
        } else {
            let back_hops = (self.left_index + self.len - 1) / BLOCK_LEN - hops;
            block = self.right_block;
            for _ in 0..back_hops {
                block = self.block(block).left.expect("Deque: broken left link");
            }
        }
        Cursor { block, index: slot }
    }

    /// Borrowing front-to-back iterator.
    pub fn iter(&self) -> Iter<'_, false> {
        Iter {
            deque: self,
            cursor: self.front_cursor(),
            remaining: self.len,
        }
    }

    /// Borrowing back-to-front iterator.
    pub fn iter_rev(&self) -> Iter<'_, true> {
        Iter {
            deque: self,
            cursor: self.back_cursor(),
            remaining: self.len,
        }
    }

    // ------------------------------------------------------------------
    // endpoint operations
    // ------------------------------------------------------------------

    /// Appends `value` at the right end.
    ///
    /// A bounded deque that grows past `maxlen` evicts from the left.
    pub fn push_back(&mut self, value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        if self.right_index == BLOCK_LEN - 1 {
            let block = match self.new_block(heap) {
                Ok(block) => block,
                Err(err) => {
                    value.drop_with_heap(heap);
                    return Err(err.into());
                }
            };
            let right_block = self.right_block;
            self.block_mut(block).left = Some(right_block);
            self.block_mut(right_block).right = Some(block);
            self.right_block = block;
            self.right_index = 0;
        } else {
            self.right_index += 1;
        }
        if value.is_ref() {
            heap.mark_potential_cycle();
        }
        self.put_slot(self.right_block, self.right_index, value);
        self.len += 1;
        self.bump_state();
        if self.needs_trim()
            && let Some(evicted) = self.pop_front_inner(heap)
        {
            evicted.drop_with_heap(heap);
        }
        Ok(())
    }

    /// Prepends `value` at the left end.
    ///
    /// A bounded deque that grows past `maxlen` evicts from the right.
    pub fn push_front(&mut self, value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        if self.left_index == 0 {
            let block = match self.new_block(heap) {
                Ok(block) => block,
                Err(err) => {
                    value.drop_with_heap(heap);
                    return Err(err.into());
                }
            };
            let left_block = self.left_block;
            self.block_mut(block).right = Some(left_block);
            self.block_mut(left_block).left = Some(block);
            self.left_block = block;
            self.left_index = BLOCK_LEN - 1;
        } else {
            self.left_index -= 1;
        }
        if value.is_ref() {
            heap.mark_potential_cycle();
        }
        self.put_slot(self.left_block, self.left_index, value);
        self.len += 1;
        self.bump_state();
        if self.needs_trim()
            && let Some(evicted) = self.pop_back_inner(heap)
        {
            evicted.drop_with_heap(heap);
        }
        Ok(())
    }

    /// Removes and returns the rightmost element.
    pub fn pop_back(&mut self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
        self.pop_back_inner(heap)
            .ok_or_else(|| ExcType::index_error_pop_empty(Type::Deque))
    }

    /// Removes and returns the leftmost element.
    pub fn pop_front(&mut self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
        self.pop_front_inner(heap)
            .ok_or_else(|| ExcType::index_error_pop_empty(Type::Deque))
    }

    fn pop_back_inner(&mut self, heap: &mut Heap<impl ResourceTracker>) -> Option<Value> {
        if self.len == 0 {
            return None;
        }
        let value = self.take_slot(self.right_block, self.right_index);
        self.len -= 1;
        self.bump_state();
        if self.len == 0 {
            self.recenter();
        } else if self.right_index == 0 {
            let drained = self.right_block;
            let prev = self.block(drained).left.expect("Deque: broken left link");
            self.block_mut(prev).right = None;
            self.right_block = prev;
            self.right_index = BLOCK_LEN - 1;
            self.free_block(drained, heap);
        } else {
            self.right_index -= 1;
        }
        Some(value)
    }

    fn pop_front_inner(&mut self, heap: &mut Heap<impl ResourceTracker>) -> Option<Value> {
        if self.len == 0 {
            return None;
        }
        let value = self.take_slot(self.left_block, self.left_index);
        self.len -= 1;
        self.bump_state();
        if self.len == 0 {
            self.recenter();
        } else if self.left_index == BLOCK_LEN - 1 {
            let drained = self.left_block;
            let next = self.block(drained).right.expect("Deque: broken right link");
            self.block_mut(next).left = None;
            self.left_block = next;
            self.left_index = 0;
            self.free_block(drained, heap);
        } else {
            self.left_index += 1;
        }
        Some(value)
    }

    // ------------------------------------------------------------------
    // indexed access
    // ------------------------------------------------------------------

    /// Returns the element at `index`, counted from the left.
    pub fn get(&self, index: usize) -> RunResult<&Value> {
        if index >= self.len {
            return Err(ExcType::index_error_out_of_range(Type::Deque));
        }
        Ok(self.at(self.locate(index)))
    }

    /// Replaces the element at `index`, releasing the old one.
    ///
    /// Replacing an element is not a structural change, so live iterators
    /// stay valid.
    pub fn set(&mut self, index: usize, value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        if index >= self.len {
            value.drop_with_heap(heap);
            return Err(ExcType::index_error_out_of_range(Type::Deque));
        }
        if value.is_ref() {
            heap.mark_potential_cycle();
        }
        let cursor = self.locate(index);
        let old = mem::replace(&mut self.block_mut(cursor.block).slots[cursor.index], value);
        old.drop_with_heap(heap);
        Ok(())
    }

    /// Removes the element at `index`.
    ///
    /// Rotates the element to the front, pops it, and rotates back.
    pub fn delete(&mut self, index: usize, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        if index >= self.len {
            return Err(ExcType::index_error_out_of_range(Type::Deque));
        }
        let index = to_i64(index);
        self.rotate(-index, heap)?;
        if let Some(item) = self.pop_front_inner(heap) {
            item.drop_with_heap(heap);
        }
        self.rotate(index, heap)
    }

    /// Inserts `value` so that it ends up at position `index`.
    ///
    /// Negative indices count from the right; out-of-range indices clamp to
    /// the nearest end. A bounded deque that is already full refuses the insert.
    pub fn insert(&mut self, index: i64, value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        if self.maxlen == Some(self.len) {
            value.drop_with_heap(heap);
            return Err(ExcType::index_error_full(Type::Deque));
        }
        let n = to_i64(self.len);
        if index >= n {
            return self.push_back(value, heap);
        }
        if index <= -n || index == 0 {
            return self.push_front(value, heap);
        }
        if let Err(err) = self.rotate(-index, heap) {
            value.drop_with_heap(heap);
            return Err(err);
        }
        if index < 0 {
            self.push_back(value, heap)?;
        } else {
            self.push_front(value, heap)?;
        }
        self.rotate(index, heap)
    }

    // ------------------------------------------------------------------
    // whole-deque operations
    // ------------------------------------------------------------------

    /// Rotates right by `n` steps; negative `n` rotates left.
    ///
    /// Work is bounded by `len / 2` element moves, done as block-sized bulk
    /// transfers between the two ends.
    pub fn rotate(&mut self, n: i64, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        let len = to_i64(self.len);
        if len <= 1 {
            return Ok(());
        }
        let halflen = len >> 1;
        let mut n = n;
        if n > halflen || n < -halflen {
            n %= len;
            if n > halflen {
                n -= len;
            } else if n < -halflen {
                n += len;
            }
        }
        debug_assert!(-halflen <= n && n <= halflen);
        if n == 0 {
            return Ok(());
        }
        self.bump_state();

        let block_len = to_i64(BLOCK_LEN);
        let mut left_block = self.left_block;
        let mut right_block = self.right_block;
        let mut left_index = to_i64(self.left_index);
        let mut right_index = to_i64(self.right_index);
        let mut spare: Option<BlockId> = None;
        let mut result = Ok(());

        while n > 0 {
            if left_index == 0 {
                let block = match spare.take().map_or_else(|| self.new_block(heap), Ok) {
                    Ok(block) => block,
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                };
                let fresh = self.block_mut(block);
                fresh.right = Some(left_block);
                fresh.left = None;
                self.block_mut(left_block).left = Some(block);
                left_block = block;
                left_index = block_len;
            }
            let m = n.min(right_index + 1).min(left_index);
            right_index -= m;
            left_index -= m;
            n -= m;
            self.move_slots(right_block, to_usize(right_index + 1), left_block, to_usize(left_index), to_usize(m));
            if right_index < 0 {
                debug_assert_ne!(left_block, right_block);
                spare = Some(right_block);
                let prev = self.block(right_block).left.expect("Deque: broken left link");
                self.block_mut(prev).right = None;
                right_block = prev;
                right_index = block_len - 1;
            }
        }
        while n < 0 {
            if right_index == block_len - 1 {
                let block = match spare.take().map_or_else(|| self.new_block(heap), Ok) {
                    Ok(block) => block,
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                };
                let fresh = self.block_mut(block);
                fresh.left = Some(right_block);
                fresh.right = None;
                self.block_mut(right_block).right = Some(block);
                right_block = block;
                right_index = -1;
            }
            let m = (-n).min(block_len - left_index).min(block_len - 1 - right_index);
            let src = left_index;
            let dest = right_index + 1;
            left_index += m;
            right_index += m;
            n += m;
            self.move_slots(left_block, to_usize(src), right_block, to_usize(dest), to_usize(m));
            if left_index == block_len {
                debug_assert_ne!(left_block, right_block);
                spare = Some(left_block);
                let next = self.block(left_block).right.expect("Deque: broken right link");
                self.block_mut(next).left = None;
                left_block = next;
                left_index = 0;
            }
        }

        if let Some(block) = spare {
            self.free_block(block, heap);
        }
        self.left_block = left_block;
        self.right_block = right_block;
        self.left_index = to_usize(left_index);
        self.right_index = to_usize(right_index);
        result.map_err(RunError::from)
    }

    fn move_slots(&mut self, src: BlockId, src_index: usize, dest: BlockId, dest_index: usize, count: usize) {
        for offset in 0..count {
            let value = self.take_slot(src, src_index + offset);
            self.put_slot(dest, dest_index + offset, value);
        }
    }

    /// Reverses the deque in place.
    ///
    /// Two cursors walk inward from both ends swapping elements until they meet.
    pub fn reverse(&mut self) {
        if self.len < 2 {
            return;
        }
        self.bump_state();
        let mut left = self.front_cursor();
        let mut right = self.back_cursor();
        for _ in 0..self.len / 2 {
            debug_assert!(left.block != right.block || left.index < right.index);
            if left.block == right.block {
                self.block_mut(left.block).slots.swap(left.index, right.index);
            } else {
                let a = self.take_slot(left.block, left.index);
                let b = self.take_slot(right.block, right.index);
                self.put_slot(left.block, left.index, b);
                self.put_slot(right.block, right.index, a);
            }
            left = self.step_right(left);
            right = self.step_left(right);
        }
    }

    /// Removes every element, keeping one block re-centered.
    pub fn clear(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        if self.len == 0 {
            return;
        }
        while let Some(item) = self.pop_front_inner(heap) {
            item.drop_with_heap(heap);
        }
    }

    /// Appends every item to the right end.
    ///
    /// A deque with `maxlen == 0` consumes the items without storing them.
    /// On failure the items not yet stored are released.
    pub fn extend(
        &mut self,
        items: impl IntoIterator<Item = Value>,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> RunResult<()> {
        let mut items = items.into_iter();
        if self.maxlen == Some(0) {
            for item in items {
                item.drop_with_heap(heap);
            }
            return Ok(());
        }
        while let Some(item) = items.next() {
            if let Err(err) = self.push_back(item, heap) {
                for rest in items {
                    rest.drop_with_heap(heap);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Prepends every item to the left end, so the last item ends up first.
    pub fn extend_left(
        &mut self,
        items: impl IntoIterator<Item = Value>,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> RunResult<()> {
        let mut items = items.into_iter();
        if self.maxlen == Some(0) {
            for item in items {
                item.drop_with_heap(heap);
            }
            return Ok(());
        }
        while let Some(item) = items.next() {
            if let Err(err) = self.push_front(item, heap) {
                for rest in items {
                    rest.drop_with_heap(heap);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Removes the first element equal to `value`.
    ///
    /// Comparisons only read the heap here, so the deque cannot change during
    /// the scan. [`deque_remove_by`] takes comparisons that may mutate it.
    pub fn remove(&mut self, value: &Value, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<()> {
        match self.iter().position(|item| item.py_eq(value, heap, interns)) {
            Some(i) => self.delete(i, heap),
            None => Err(ExcType::value_error_not_in(Type::Deque, "remove")),
        }
    }

    /// Returns a shallow copy with the same `maxlen`.
    pub fn copy(&self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Self> {
        let mut copy = Self::with_maxlen(self.maxlen);
        for item in self.iter() {
            let item = item.clone_with_heap(heap);
            if let Err(err) = copy.push_back(item, heap) {
                copy.drop_with_heap(heap);
                return Err(err);
            }
        }
        Ok(copy)
    }

    /// Counts elements equal to `value`.
    pub fn count(&self, value: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> usize {
        self.iter().filter(|item| item.py_eq(value, heap, interns)).count()
    }

    #[must_use]
    pub fn contains(&self, value: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
        self.iter().any(|item| item.py_eq(value, heap, interns))
    }

    /// Returns the position of the first element equal to `value` within
    /// `[start, stop)`.
    ///
    /// Negative bounds count from the right and are clamped to the deque.
    pub fn index(
        &self,
        value: &Value,
        start: Option<i64>,
        stop: Option<i64>,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
    ) -> RunResult<usize> {
        let len = to_i64(self.len);
        let clamp = |bound: i64| -> usize {
            let bound = if bound < 0 { bound + len } else { bound };
            to_usize(bound.clamp(0, len))
        };
        let start = clamp(start.unwrap_or(0));
        let stop = clamp(stop.unwrap_or(len));
        if start >= stop {
            return Err(ExcType::value_error_not_in(Type::Deque, "index"));
        }
        let mut cursor = self.locate(start);
        for i in start..stop {
            if self.at(cursor).py_eq(value, heap, interns) {
                return Ok(i);
            }
            cursor = self.step_right(cursor);
        }
        Err(ExcType::value_error_not_in(Type::Deque, "index"))
    }

    /// Element-wise equality.
    pub fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
        self.len == other.len && self.iter().zip(other.iter()).all(|(a, b)| a.py_eq(b, heap, interns))
    }

    pub fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        heap_ids: &mut AHashSet<HeapId>,
        interns: &Interns,
    ) -> fmt::Result {
        f.write_str("deque([")?;
        repr_items(self.iter(), f, heap, heap_ids, interns)?;
        if let Some(maxlen) = self.maxlen {
            write!(f, "], maxlen={maxlen})")
        } else {
            f.write_str("])")
        }
    }
}

impl TraceRefs for Deque {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        for item in self.iter() {
            item.collect_ref_ids(out);
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for Deque {
    /// Releases every element and reports the blocks beyond the first as freed.
    ///
    /// The first block is part of the deque's own footprint and is accounted
    /// for when the owning heap entry is freed.
    fn drop_with_heap(mut self, heap: &mut Heap<T>) {
        while let Some(item) = self.pop_front_inner(heap) {
            item.drop_with_heap(heap);
        }
        let extra = self.extra_block_bytes();
        heap.tracker_mut().on_free(|| extra);
    }
}

/// Borrowing iterator over a deque; `REVERSE` walks from the right.
#[derive(Debug, Clone)]
pub struct Iter<'a, const REVERSE: bool> {
    deque: &'a Deque,
    cursor: Cursor,
    remaining: usize,
}

impl<'a, const REVERSE: bool> Iterator for Iter<'a, REVERSE> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.deque.at(self.cursor);
        self.cursor = if REVERSE {
            self.deque.step_left(self.cursor)
        } else {
            self.deque.step_right(self.cursor)
        };
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<const REVERSE: bool> ExactSizeIterator for Iter<'_, REVERSE> {}

/// Iterator over a heap-resident deque, following the iteration protocol.
///
/// Holds an owned reference to the deque and a snapshot of its mutation
/// counter. Any structural change observed on a later step fails with
/// "deque mutated during iteration" and ends the traversal.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct DequeIterator<const REVERSE: bool> {
    deque_id: HeapId,
    cursor: Cursor,
    remaining: usize,
    state: u64,
}

/// Front-to-back deque iterator.
pub type DequeIter = DequeIterator<false>;
/// Back-to-front deque iterator.
pub type DequeRevIter = DequeIterator<true>;

impl<const REVERSE: bool> DequeIterator<REVERSE> {
    /// Starts iterating the deque at `deque_id`, taking a reference to it.
    pub fn new(deque_id: HeapId, heap: &Heap<impl ResourceTracker>) -> RunResult<Self> {
        let deque = expect_deque(heap, deque_id)?;
        let cursor = if REVERSE {
            deque.back_cursor()
        } else {
            deque.front_cursor()
        };
        let iter = Self {
            deque_id,
            cursor,
            remaining: deque.len(),
            state: deque.mutation_count(),
        };
        heap.inc_ref(deque_id);
        Ok(iter)
    }

    /// Produces the next element, `None` on exhaustion.
    pub fn for_next(&mut self, heap: &Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
        let deque = expect_deque(heap, self.deque_id)?;
        if deque.mutation_count() != self.state {
            self.remaining = 0;
            return Err(ExcType::runtime_error_mutated_during_iteration(Type::Deque));
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        let item = deque.at(self.cursor).clone_with_heap(heap);
        self.cursor = if REVERSE {
            deque.step_left(self.cursor)
        } else {
            deque.step_right(self.cursor)
        };
        self.remaining -= 1;
        Ok(Some(item))
    }

    /// Number of elements left, assuming no mutation.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<const REVERSE: bool> TraceRefs for DequeIterator<REVERSE> {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        out.push(self.deque_id);
    }
}

impl<T: ResourceTracker, const REVERSE: bool> DropWithHeap<T> for DequeIterator<REVERSE> {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        heap.dec_ref(self.deque_id);
    }
}

#[expect(clippy::cast_possible_wrap, reason = "deque lengths fit in i64")]
fn to_i64(n: usize) -> i64 {
    n as i64
}

#[expect(clippy::cast_sign_loss, clippy::cast_possible_truncation, reason = "callers pass non-negative in-range values")]
fn to_usize(n: i64) -> usize {
    debug_assert!(n >= 0);
    n as usize
}

/// Normalizes a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = to_i64(len);
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then(|| to_usize(index))
}

// ============================================================================
// Heap-level operations
// ============================================================================

fn expect_deque<T: ResourceTracker>(heap: &Heap<T>, id: HeapId) -> RunResult<&Deque> {
    match heap.get_if_live(id) {
        Some(HeapData::Deque(deque)) => Ok(deque),
        Some(_) => Err(RunError::internal("expected a deque")),
        None => Err(RunError::internal("deque is freed or borrowed")),
    }
}

/// Borrows the deque at `id` immutably.
pub fn deque_ref<T: ResourceTracker>(heap: &Heap<T>, id: HeapId) -> RunResult<&Deque> {
    expect_deque(heap, id)
}

/// Runs `f` with the deque at `id` and the heap both mutably borrowed.
pub fn with_deque_mut<T, R, F>(heap: &mut Heap<T>, id: HeapId, f: F) -> RunResult<R>
where
    T: ResourceTracker,
    F: FnOnce(&mut Deque, &mut Heap<T>) -> RunResult<R>,
{
    if !matches!(heap.get_if_live(id), Some(HeapData::Deque(_))) {
        return Err(RunError::internal("expected a live deque"));
    }
    heap.with_entry_mut(id, |heap, data| match data {
        HeapData::Deque(deque) => f(deque, heap),
        _ => Err(RunError::internal("expected a deque")),
    })
}

/// Allocates an empty deque on the heap.
pub fn allocate_deque(heap: &mut Heap<impl ResourceTracker>, maxlen: Option<usize>) -> RunResult<Value> {
    let id = heap.allocate(HeapData::Deque(Deque::with_maxlen(maxlen)))?;
    Ok(Value::Ref(id))
}

/// Returns `deque[index]`, with negative indices counting from the right.
pub fn deque_getitem<T: ResourceTracker>(heap: &Heap<T>, id: HeapId, index: i64) -> RunResult<Value> {
    let deque = expect_deque(heap, id)?;
    let index = normalize_index(index, deque.len()).ok_or_else(|| ExcType::index_error_out_of_range(Type::Deque))?;
    Ok(deque.get(index)?.clone_with_heap(heap))
}

/// Sets `deque[index] = value`, with negative indices counting from the right.
pub fn deque_setitem<T: ResourceTracker>(heap: &mut Heap<T>, id: HeapId, index: i64, value: Value) -> RunResult<()> {
    with_deque_mut(heap, id, |deque, heap| match normalize_index(index, deque.len()) {
        Some(index) => deque.set(index, value, heap),
        None => {
            value.drop_with_heap(heap);
            Err(ExcType::index_error_out_of_range(Type::Deque))
        }
    })
}

/// Deletes `deque[index]`, with negative indices counting from the right.
pub fn deque_delitem<T: ResourceTracker>(heap: &mut Heap<T>, id: HeapId, index: i64) -> RunResult<()> {
    with_deque_mut(heap, id, |deque, heap| {
        let index = normalize_index(index, deque.len()).ok_or_else(|| ExcType::index_error_out_of_range(Type::Deque))?;
        deque.delete(index, heap)
    })
}

/// Rotates the deque at `id`; `None` rotates right by one.
pub fn deque_rotate<T: ResourceTracker>(heap: &mut Heap<T>, id: HeapId, n: Option<i64>) -> RunResult<()> {
    with_deque_mut(heap, id, |deque, heap| deque.rotate(n.unwrap_or(1), heap))
}

/// Removes the first element equal to `value` from the deque at `id`.
pub fn deque_remove<T: ResourceTracker>(heap: &mut Heap<T>, id: HeapId, value: &Value, interns: &Interns) -> RunResult<()> {
    with_deque_mut(heap, id, |deque, heap| deque.remove(value, heap, interns))
}

/// Removes the first element of the deque at `id` for which `matches` holds.
///
/// The deque stays on the heap while `matches` runs with the heap mutably
/// borrowed, as a user-defined comparison would. The scan snapshots the
/// mutation counter and fails if a comparison moved it; the match is then
/// deleted by rotation.
pub fn deque_remove_by<T, F>(heap: &mut Heap<T>, id: HeapId, mut matches: F) -> RunResult<()>
where
    T: ResourceTracker,
    F: FnMut(&Value, &mut Heap<T>) -> RunResult<bool>,
{
    let (start_state, len, mut cursor) = {
        let deque = expect_deque(heap, id)?;
        (deque.state, deque.len, deque.front_cursor())
    };
    for i in 0..len {
        let item = expect_deque(heap, id)?.at(cursor).clone_with_heap(heap);
        let matched = matches(&item, heap);
        item.drop_with_heap(heap);
        let matched = matched?;

        let deque = expect_deque(heap, id)?;
        if deque.state != start_state {
            return Err(ExcType::index_error_mutated_during_remove(Type::Deque));
        }
        if matched {
            return with_deque_mut(heap, id, |deque, heap| deque.delete(i, heap));
        }
        cursor = deque.step_right(cursor);
    }
    Err(ExcType::value_error_not_in(Type::Deque, "remove"))
}

/// Allocates a shallow copy of the deque at `id`.
pub fn deque_copy<T: ResourceTracker>(heap: &mut Heap<T>, id: HeapId) -> RunResult<Value> {
    let copy = with_deque_mut(heap, id, |deque, heap| deque.copy(heap))?;
    let new_id = heap.allocate(HeapData::Deque(copy))?;
    Ok(Value::Ref(new_id))
}

/// Extends the deque at `id` on the right with the items of `iterable`.
pub fn deque_extend<T: ResourceTracker>(
    heap: &mut Heap<T>,
    id: HeapId,
    iterable: Value,
    interns: &Interns,
) -> RunResult<()> {
    extend_from(heap, id, iterable, interns, false)
}

/// Extends the deque at `id` on the left with the items of `iterable`.
pub fn deque_extend_left<T: ResourceTracker>(
    heap: &mut Heap<T>,
    id: HeapId,
    iterable: Value,
    interns: &Interns,
) -> RunResult<()> {
    extend_from(heap, id, iterable, interns, true)
}

fn extend_from<T: ResourceTracker>(
    heap: &mut Heap<T>,
    id: HeapId,
    iterable: Value,
    interns: &Interns,
    left: bool,
) -> RunResult<()> {
    let push = |deque: &mut Deque, item: Value, heap: &mut Heap<T>| {
        if left {
            deque.push_front(item, heap)
        } else {
            deque.push_back(item, heap)
        }
    };

    // Extending a deque with itself would iterate a structure that grows on
    // every step, so work from a snapshot.
    if iterable.ref_id() == Some(id) {
        let snapshot: Vec<Value> = match expect_deque(heap, id) {
            Ok(deque) => deque.iter().map(|item| item.clone_with_heap(heap)).collect(),
            Err(err) => {
                iterable.drop_with_heap(heap);
                return Err(err);
            }
        };
        iterable.drop_with_heap(heap);
        return with_deque_mut(heap, id, |deque, heap| {
            if left {
                deque.extend_left(snapshot, heap)
            } else {
                deque.extend(snapshot, heap)
            }
        });
    }

    let drain_only = match expect_deque(heap, id) {
        Ok(deque) => deque.maxlen() == Some(0),
        Err(err) => {
            iterable.drop_with_heap(heap);
            return Err(err);
        }
    };
    let iter = ValueIter::new(iterable, heap, interns)?;
    defer_drop_mut!(iter, heap);
    while let Some(item) = iter.for_next(heap, interns)? {
        if drain_only {
            item.drop_with_heap(heap);
            continue;
        }
        with_deque_mut(heap, id, |deque, heap| push(deque, item, heap))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    fn heap() -> Heap<NoLimitTracker> {
        Heap::new(16, NoLimitTracker)
    }

    fn ints(deque: &Deque) -> Vec<i64> {
        deque
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                other => panic!("expected int, got {other:?}"),
            })
            .collect()
    }

    fn filled(range: std::ops::Range<i64>, heap: &mut Heap<NoLimitTracker>) -> Deque {
        let mut deque = Deque::new();
        deque.extend(range.map(Value::Int), heap).unwrap();
        deque
    }

    #[test]
    fn new_deque_is_centered() {
        let deque = Deque::new();
        let layout = deque.layout();
        assert_eq!(layout.left_index, CENTER + 1);
        assert_eq!(layout.right_index, CENTER);
        assert_eq!(layout.chain_len, 1);
        assert!(layout.is_consistent());
    }

    #[test]
    fn growth_allocates_blocks_on_both_sides() {
        let mut heap = heap();
        let mut deque = Deque::new();
        for i in 0..200 {
            deque.push_back(Value::Int(i), &mut heap).unwrap();
            deque.push_front(Value::Int(-i - 1), &mut heap).unwrap();
            assert!(deque.layout().is_consistent(), "layout broken after {i} pushes");
        }
        assert_eq!(deque.len(), 400);
        assert_eq!(ints(&deque).first(), Some(&-200));
        assert_eq!(ints(&deque).last(), Some(&199));
        assert!(deque.layout().chain_len >= 400 / BLOCK_LEN);
    }

    #[test]
    fn draining_recenters_single_block() {
        let mut heap = heap();
        let mut deque = filled(0..150, &mut heap);
        while deque.pop_back(&mut heap).is_ok() {
            assert!(deque.layout().is_consistent());
        }
        let layout = deque.layout();
        assert_eq!(layout.chain_len, 1);
        assert_eq!((layout.left_index, layout.right_index), (CENTER + 1, CENTER));
    }

    #[test]
    fn freed_blocks_are_cached_up_to_limit() {
        let mut heap = heap();
        let mut deque = filled(0..(BLOCK_LEN as i64 * 40), &mut heap);
        deque.clear(&mut heap);
        assert_eq!(deque.layout().cached_blocks, MAX_FREE_BLOCKS);
        assert_eq!(deque.allocated_blocks(), MAX_FREE_BLOCKS + 1);
    }

    #[test]
    fn locate_walks_from_either_end() {
        let mut heap = heap();
        let deque = filled(0..500, &mut heap);
        for i in [0, 1, 61, 62, 249, 250, 251, 498, 499] {
            assert!(matches!(deque.get(i).unwrap(), Value::Int(v) if *v == i as i64), "index {i}");
        }
        assert!(deque.get(500).is_err());
    }

    #[test]
    fn rotate_crosses_block_boundaries() {
        let mut heap = heap();
        let mut deque = filled(0..300, &mut heap);
        let expected: Vec<i64> = (0..300).collect();
        for n in [1, 61, 62, 63, 149, 150, -1, -62, -150, 299, -299, 1000] {
            deque.rotate(n, &mut heap).unwrap();
            assert!(deque.layout().is_consistent(), "layout broken after rotate({n})");
            deque.rotate(-n, &mut heap).unwrap();
            assert_eq!(ints(&deque), expected, "rotate({n}) round trip");
        }
    }

    #[test]
    fn rotate_matches_reference() {
        let mut heap = heap();
        let mut deque = filled(0..130, &mut heap);
        let mut reference: std::collections::VecDeque<i64> = (0..130).collect();
        for n in [7, -40, 64, 65, -65, 3] {
            deque.rotate(n, &mut heap).unwrap();
            if n >= 0 {
                reference.rotate_right(n as usize);
            } else {
                reference.rotate_left(n.unsigned_abs() as usize);
            }
            assert_eq!(ints(&deque), reference.iter().copied().collect::<Vec<_>>(), "after rotate({n})");
        }
    }

    #[test]
    fn reverse_odd_and_even_lengths() {
        let mut heap = heap();
        for len in [0_i64, 1, 2, 5, 62, 63, 131] {
            let mut deque = filled(0..len, &mut heap);
            deque.reverse();
            assert_eq!(ints(&deque), (0..len).rev().collect::<Vec<_>>(), "len {len}");
        }
    }

    #[test]
    fn insert_and_delete_in_the_middle() {
        let mut heap = heap();
        let mut deque = filled(0..5, &mut heap);
        deque.insert(2, Value::Int(99), &mut heap).unwrap();
        assert_eq!(ints(&deque), vec![0, 1, 99, 2, 3, 4]);
        deque.insert(-1, Value::Int(77), &mut heap).unwrap();
        assert_eq!(ints(&deque), vec![0, 1, 99, 2, 3, 77, 4]);
        deque.delete(2, &mut heap).unwrap();
        assert_eq!(ints(&deque), vec![0, 1, 2, 3, 77, 4]);
    }

    #[test]
    fn bounded_insert_refuses_when_full() {
        let mut heap = heap();
        let mut deque = Deque::with_maxlen(Some(2));
        deque.extend([Value::Int(1), Value::Int(2)], &mut heap).unwrap();
        let err = deque.insert(0, Value::Int(3), &mut heap).unwrap_err();
        assert_eq!(err.kind(), Some(crate::exception::ErrorKind::ContainerFull));
        assert_eq!(ints(&deque), vec![1, 2]);
    }

    #[test]
    fn zero_maxlen_drains_without_storing() {
        let mut heap = heap();
        let mut deque = Deque::with_maxlen(Some(0));
        deque.extend((0..10).map(Value::Int), &mut heap).unwrap();
        assert!(deque.is_empty());
        assert_eq!(deque.mutation_count(), 0);
    }
}
