/// Tests for the block-structured deque.
///
/// Covers endpoint operations across block boundaries, bounded eviction,
/// rotation, iterator invalidation and the heap-level operations that work on
/// a deque living in the arena.
use std::collections::VecDeque;

use pretty_assertions::assert_eq;
use strix::{
    Deque, ErrorKind, ExcType, Heap, HeapData, InternerBuilder, Interns, LimitedTracker, NoLimitTracker, ResourceLimits,
    Value,
    heap::DropWithHeap,
    types::{
        DequeIter, DequeRevIter, ValueIter,
        deque::{
            DEFAULT_BLOCK_LEN, allocate_deque, deque_copy, deque_delitem, deque_extend, deque_extend_left,
            deque_getitem, deque_ref, deque_remove, deque_remove_by, deque_rotate, deque_setitem, with_deque_mut,
        },
        list::allocate_list,
        str::allocate_str,
    },
};

fn new_heap() -> Heap<NoLimitTracker> {
    Heap::new(16, NoLimitTracker)
}

fn interns() -> Interns {
    InternerBuilder::new().build()
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

fn deque_of(values: impl IntoIterator<Item = i64>, heap: &mut Heap<NoLimitTracker>) -> Deque {
    let mut deque = Deque::new();
    for v in values {
        deque.push_back(Value::Int(v), heap).unwrap();
    }
    deque
}

/// Allocates a heap deque holding `values` and returns its id.
fn heap_deque(values: impl IntoIterator<Item = i64>, heap: &mut Heap<NoLimitTracker>) -> strix::HeapId {
    let Value::Ref(id) = allocate_deque(heap, None).unwrap() else {
        panic!("deque should be heap allocated");
    };
    with_deque_mut(heap, id, |deque, heap| {
        for v in values {
            deque.push_back(Value::Int(v), heap)?;
        }
        Ok(())
    })
    .unwrap();
    id
}

/// Small deterministic generator so the operation mix is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

// === Endpoint operations ===

#[test]
fn bounded_push_back_evicts_from_front() {
    let mut heap = new_heap();
    let mut deque = Deque::with_maxlen(Some(3));
    for v in 1..=4 {
        deque.push_back(Value::Int(v), &mut heap).unwrap();
    }
    assert_eq!(ints(&deque), vec![2, 3, 4]);
}

#[test]
fn bounded_push_front_evicts_from_back() {
    let mut heap = new_heap();
    let mut deque = Deque::with_maxlen(Some(3));
    for v in 1..=5 {
        deque.push_front(Value::Int(v), &mut heap).unwrap();
    }
    assert_eq!(ints(&deque), vec![5, 4, 3]);
}

#[test]
fn bounded_deque_never_exceeds_maxlen() {
    let mut heap = new_heap();
    for k in [1, 2, 7, DEFAULT_BLOCK_LEN, DEFAULT_BLOCK_LEN + 1] {
        let mut deque = Deque::with_maxlen(Some(k));
        for v in 0..300 {
            deque.push_back(Value::Int(v), &mut heap).unwrap();
            assert!(deque.len() <= k);
            assert!(deque.layout().is_consistent());
        }
        let expected: Vec<i64> = (300 - k as i64..300).collect();
        assert_eq!(ints(&deque), expected, "maxlen {k}");
    }
}

#[test]
fn pop_from_empty_fails_without_state_change() {
    let mut heap = new_heap();
    let mut deque = Deque::new();
    let before = deque.layout();
    let count = deque.mutation_count();

    let err = deque.pop_front(&mut heap).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::EmptyContainer));
    assert_eq!(err.exc_type(), Some(ExcType::IndexError));
    assert_eq!(err.message(), Some("pop from an empty deque"));

    let err = deque.pop_back(&mut heap).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::EmptyContainer));

    assert_eq!(deque.layout(), before);
    assert_eq!(deque.mutation_count(), count);
}

#[test]
fn mixed_operations_keep_layout_consistent() {
    let mut heap = new_heap();
    let mut deque = Deque::new();
    let mut model = VecDeque::new();
    let mut rng = Lcg(7);
    let mut pushes = 0usize;
    let mut pops = 0usize;

    for step in 0..5_000i64 {
        match rng.next() % 4 {
            0 => {
                deque.push_back(Value::Int(step), &mut heap).unwrap();
                model.push_back(step);
                pushes += 1;
            }
            1 => {
                deque.push_front(Value::Int(step), &mut heap).unwrap();
                model.push_front(step);
                pushes += 1;
            }
            2 if !model.is_empty() => {
                let Value::Int(v) = deque.pop_back(&mut heap).unwrap() else {
                    panic!("expected int");
                };
                assert_eq!(Some(v), model.pop_back());
                pops += 1;
            }
            3 if !model.is_empty() => {
                let Value::Int(v) = deque.pop_front(&mut heap).unwrap() else {
                    panic!("expected int");
                };
                assert_eq!(Some(v), model.pop_front());
                pops += 1;
            }
            _ => {}
        }
        let layout = deque.layout();
        assert!(layout.is_consistent(), "step {step}: {layout:?}");
        assert_eq!(deque.len(), pushes - pops);
    }
    assert_eq!(ints(&deque), model.into_iter().collect::<Vec<_>>());
}

#[test]
fn endpoints_match_most_recent_pushes() {
    let mut heap = new_heap();
    let mut deque = Deque::new();
    for v in 0..200 {
        if v % 3 == 0 {
            deque.push_front(Value::Int(v), &mut heap).unwrap();
            assert!(matches!(deque.get(0).unwrap(), Value::Int(x) if *x == v));
        } else {
            deque.push_back(Value::Int(v), &mut heap).unwrap();
            assert!(matches!(deque.get(deque.len() - 1).unwrap(), Value::Int(x) if *x == v));
        }
    }
    let err = deque.get(deque.len()).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::IndexOutOfRange));
}

// === Rotation ===

#[test]
fn rotate_small_example() {
    let mut heap = new_heap();
    let mut deque = deque_of(1..=5, &mut heap);
    deque.rotate(2, &mut heap).unwrap();
    assert_eq!(ints(&deque), vec![4, 5, 1, 2, 3]);
    deque.rotate(-2, &mut heap).unwrap();
    assert_eq!(ints(&deque), vec![1, 2, 3, 4, 5]);
}

#[test]
fn rotate_round_trip_restores_order() {
    let mut heap = new_heap();
    for len in [0, 1, 2, 5, DEFAULT_BLOCK_LEN, 3 * DEFAULT_BLOCK_LEN + 7] {
        let mut deque = deque_of(0..len as i64, &mut heap);
        let original = ints(&deque);
        for n in [1, -1, 3, -17, 62, 100, -250, 1_000_001] {
            deque.rotate(n, &mut heap).unwrap();
            deque.rotate(-n, &mut heap).unwrap();
            assert_eq!(ints(&deque), original, "len {len}, n {n}");
            assert!(deque.layout().is_consistent());
        }
    }
}

#[test]
fn rotate_matches_vecdeque() {
    let mut heap = new_heap();
    let len = 2 * DEFAULT_BLOCK_LEN + 11;
    let mut deque = deque_of(0..len as i64, &mut heap);
    let mut model: VecDeque<i64> = (0..len as i64).collect();
    for n in [5i64, -40, 70, -133, 1] {
        deque.rotate(n, &mut heap).unwrap();
        let k = n.rem_euclid(len as i64) as usize;
        model.rotate_right(k);
        assert_eq!(ints(&deque), model.iter().copied().collect::<Vec<_>>(), "n {n}");
    }
}

#[test]
fn rotate_with_one_element_is_noop() {
    let mut heap = new_heap();
    let mut deque = deque_of([9], &mut heap);
    let count = deque.mutation_count();
    deque.rotate(5, &mut heap).unwrap();
    assert_eq!(ints(&deque), vec![9]);
    assert_eq!(deque.mutation_count(), count);
}

// === Whole-deque operations ===

#[test]
fn reverse_across_blocks() {
    let mut heap = new_heap();
    let len = DEFAULT_BLOCK_LEN * 2 + 3;
    let mut deque = deque_of(0..len as i64, &mut heap);
    deque.reverse();
    let expected: Vec<i64> = (0..len as i64).rev().collect();
    assert_eq!(ints(&deque), expected);
}

#[test]
fn insert_and_delete_in_the_middle() {
    let mut heap = new_heap();
    let mut deque = deque_of(0..5, &mut heap);
    deque.insert(2, Value::Int(99), &mut heap).unwrap();
    assert_eq!(ints(&deque), vec![0, 1, 99, 2, 3, 4]);
    deque.insert(-1, Value::Int(77), &mut heap).unwrap();
    assert_eq!(ints(&deque), vec![0, 1, 99, 2, 3, 77, 4]);
    deque.delete(2, &mut heap).unwrap();
    assert_eq!(ints(&deque), vec![0, 1, 2, 3, 77, 4]);
}

#[test]
fn insert_into_full_bounded_deque_fails() {
    let mut heap = new_heap();
    let mut deque = Deque::with_maxlen(Some(2));
    deque.push_back(Value::Int(1), &mut heap).unwrap();
    deque.push_back(Value::Int(2), &mut heap).unwrap();
    let err = deque.insert(0, Value::Int(0), &mut heap).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ContainerFull));
    assert_eq!(ints(&deque), vec![1, 2]);
}

#[test]
fn count_contains_and_index() {
    let mut heap = new_heap();
    let interns = interns();
    let deque = deque_of([1, 2, 1, 3, 1], &mut heap);
    assert_eq!(deque.count(&Value::Int(1), &heap, &interns), 3);
    assert!(deque.contains(&Value::Int(3), &heap, &interns));
    assert!(!deque.contains(&Value::Int(4), &heap, &interns));
    assert_eq!(deque.index(&Value::Int(1), Some(1), None, &heap, &interns).unwrap(), 2);
    assert_eq!(deque.index(&Value::Int(1), Some(-2), None, &heap, &interns).unwrap(), 4);
    let err = deque.index(&Value::Int(3), None, Some(3), &heap, &interns).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ValueNotFound));
}

#[test]
fn clear_releases_heap_values() {
    let mut heap = new_heap();
    let mut deque = Deque::new();
    for i in 0..100 {
        let s = allocate_str(&mut heap, format!("item{i}")).unwrap();
        deque.push_back(s, &mut heap).unwrap();
    }
    assert_eq!(heap.live_count(), 100);
    deque.clear(&mut heap);
    assert_eq!(heap.live_count(), 0);
    assert!(deque.is_empty());
    assert!(deque.layout().is_consistent());
}

#[test]
fn zero_maxlen_drains_extend() {
    let mut heap = new_heap();
    let mut deque = Deque::with_maxlen(Some(0));
    let items: Vec<Value> = (0..3).map(|i| allocate_str(&mut heap, format!("{i}")).unwrap()).collect();
    deque.extend(items, &mut heap).unwrap();
    assert!(deque.is_empty());
    assert_eq!(heap.live_count(), 0);
}

// === Heap-resident deque ===

#[test]
fn iteration_fails_after_structural_mutation() {
    let mut heap = new_heap();
    let id = heap_deque(0..5, &mut heap);
    let mut iter = DequeIter::new(id, &heap).unwrap();

    assert!(matches!(iter.for_next(&heap), Ok(Some(Value::Int(0)))));
    with_deque_mut(&mut heap, id, |deque, heap| deque.push_back(Value::Int(5), heap)).unwrap();

    let err = iter.for_next(&heap).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::MutatedDuringIteration));
    assert_eq!(err.message(), Some("deque mutated during iteration"));
    // the traversal is over once invalidated
    assert_eq!(iter.remaining(), 0);

    iter.drop_with_heap(&mut heap);
    assert_eq!(heap.get_refcount(id), 1);
    heap.dec_ref(id);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn replacing_an_element_does_not_invalidate_iteration() {
    let mut heap = new_heap();
    let id = heap_deque(0..3, &mut heap);
    let mut iter = DequeIter::new(id, &heap).unwrap();
    deque_setitem(&mut heap, id, 1, Value::Int(10)).unwrap();

    let mut seen = Vec::new();
    while let Some(Value::Int(v)) = iter.for_next(&heap).unwrap() {
        seen.push(v);
    }
    assert_eq!(seen, vec![0, 10, 2]);
    iter.drop_with_heap(&mut heap);
    heap.dec_ref(id);
}

#[test]
fn reverse_iteration_mirrors_forward() {
    let mut heap = new_heap();
    let interns = interns();
    let id = heap_deque(0..(DEFAULT_BLOCK_LEN as i64 + 4), &mut heap);

    heap.inc_ref(id);
    let mut forward = ValueIter::new(Value::Ref(id), &mut heap, &interns).unwrap();
    let mut fwd = forward.collect(&mut heap, &interns).unwrap();
    forward.drop_with_heap(&mut heap);

    let mut backward = ValueIter::new_deque_rev(id, &heap).unwrap();
    let rev = backward.collect(&mut heap, &interns).unwrap();
    backward.drop_with_heap(&mut heap);

    fwd.reverse();
    let as_ints = |values: &[Value]| -> Vec<i64> {
        values
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                _ => panic!("expected int"),
            })
            .collect()
    };
    assert_eq!(as_ints(&fwd), as_ints(&rev));

    let mut rev_iter = DequeRevIter::new(id, &heap).unwrap();
    assert!(matches!(rev_iter.for_next(&heap), Ok(Some(Value::Int(65)))));
    rev_iter.drop_with_heap(&mut heap);
    heap.dec_ref(id);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn borrowing_iterators_walk_both_directions() {
    let mut heap = new_heap();
    let deque = deque_of(0..(DEFAULT_BLOCK_LEN as i64 * 2 + 1), &mut heap);

    let backward: Vec<i64> = deque
        .iter_rev()
        .map(|v| match v {
            Value::Int(i) => *i,
            _ => panic!("expected int"),
        })
        .collect();
    let mut forward = ints(&deque);
    forward.reverse();
    assert_eq!(backward, forward);
    assert_eq!(deque.iter_rev().len(), deque.len());

    deque.drop_with_heap(&mut heap);
}

#[test]
fn heap_level_indexing_normalizes_negative_indices() {
    let mut heap = new_heap();
    let id = heap_deque(0..10, &mut heap);

    assert!(matches!(deque_getitem(&heap, id, -1), Ok(Value::Int(9))));
    assert!(matches!(deque_getitem(&heap, id, 0), Ok(Value::Int(0))));
    let err = deque_getitem(&heap, id, -11).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::IndexOutOfRange));
    assert_eq!(err.message(), Some("deque index out of range"));

    deque_setitem(&mut heap, id, -2, Value::Int(80)).unwrap();
    deque_delitem(&mut heap, id, 0).unwrap();
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![1, 2, 3, 4, 5, 6, 7, 80, 9]);

    deque_rotate(&mut heap, id, None).unwrap();
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![9, 1, 2, 3, 4, 5, 6, 7, 80]);
    heap.dec_ref(id);
}

#[test]
fn remove_first_match_or_fail() {
    let mut heap = new_heap();
    let interns = interns();
    let id = heap_deque([3, 1, 4, 1, 5], &mut heap);

    deque_remove(&mut heap, id, &Value::Int(1), &interns).unwrap();
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![3, 4, 1, 5]);

    let err = deque_remove(&mut heap, id, &Value::Int(42), &interns).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ValueNotFound));
    assert_eq!(err.message(), Some("deque.remove(x): x not in deque"));
    heap.dec_ref(id);
}

#[test]
fn comparison_that_mutates_the_deque_aborts_removal() {
    let mut heap = new_heap();
    let id = heap_deque([1, 2, 3], &mut heap);

    let mut comparisons = 0;
    let err = deque_remove_by(&mut heap, id, |_item, heap| {
        comparisons += 1;
        with_deque_mut(heap, id, |d, heap| d.push_back(Value::Int(9), heap))?;
        Ok(false)
    })
    .unwrap_err();
    assert_eq!(comparisons, 1);
    assert_eq!(err.kind(), Some(ErrorKind::MutatedDuringRemoval));
    assert_eq!(err.exc_type(), Some(ExcType::IndexError));
    assert_eq!(err.message(), Some("deque mutated during remove()."));
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![1, 2, 3, 9]);

    deque_remove_by(&mut heap, id, |item, _heap| Ok(matches!(item, Value::Int(2)))).unwrap();
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![1, 3, 9]);
    heap.dec_ref(id);
}

#[test]
fn extend_with_itself_uses_a_snapshot() {
    let mut heap = new_heap();
    let interns = interns();
    let id = heap_deque(1..=3, &mut heap);
    heap.inc_ref(id);
    deque_extend(&mut heap, id, Value::Ref(id), &interns).unwrap();
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![1, 2, 3, 1, 2, 3]);

    heap.inc_ref(id);
    deque_extend_left(&mut heap, id, Value::Ref(id), &interns).unwrap();
    assert_eq!(
        ints(deque_ref(&heap, id).unwrap()),
        vec![3, 2, 1, 3, 2, 1, 1, 2, 3, 1, 2, 3]
    );
    assert_eq!(heap.get_refcount(id), 1);
    heap.dec_ref(id);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn extend_from_list_and_reject_non_iterable() {
    let mut heap = new_heap();
    let interns = interns();
    let id = heap_deque([], &mut heap);
    let list = allocate_list(&mut heap, vec![Value::Int(1), Value::Int(2)]).unwrap();
    deque_extend(&mut heap, id, list, &interns).unwrap();
    assert_eq!(ints(deque_ref(&heap, id).unwrap()), vec![1, 2]);

    let err = deque_extend(&mut heap, id, Value::Int(5), &interns).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotIterable));
    assert_eq!(err.message(), Some("'int' object is not iterable"));

    heap.dec_ref(id);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn copy_shares_elements_and_keeps_maxlen() {
    let mut heap = new_heap();
    let interns = interns();
    let Value::Ref(id) = allocate_deque(&mut heap, Some(4)).unwrap() else {
        panic!("deque should be heap allocated");
    };
    let s = allocate_str(&mut heap, "shared").unwrap();
    let s_id = s.ref_id().unwrap();
    with_deque_mut(&mut heap, id, |deque, heap| deque.push_back(s, heap)).unwrap();

    let copy = deque_copy(&mut heap, id).unwrap();
    assert_eq!(heap.get_refcount(s_id), 2);
    let HeapData::Deque(copied) = heap.get(copy.ref_id().unwrap()) else {
        panic!("copy should be a deque");
    };
    assert_eq!(copied.maxlen(), Some(4));
    assert_eq!(copy.py_repr(&heap, &interns), "deque(['shared'], maxlen=4)");

    copy.drop_with_heap(&mut heap);
    heap.dec_ref(id);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn copy_is_charged_once_and_fully_credited() {
    let mut heap = Heap::new(4, LimitedTracker::new(ResourceLimits::new()));
    let Value::Ref(id) = allocate_deque(&mut heap, None).unwrap() else {
        panic!("deque should be heap allocated");
    };
    with_deque_mut(&mut heap, id, |d, heap| d.extend((0..500).map(Value::Int), heap)).unwrap();
    let original = heap.heap_stats().tracker_memory_bytes.unwrap();

    let copy = deque_copy(&mut heap, id).unwrap();
    assert_eq!(heap.heap_stats().tracker_memory_bytes, Some(2 * original));

    copy.drop_with_heap(&mut heap);
    assert_eq!(heap.heap_stats().tracker_memory_bytes, Some(original));
    heap.dec_ref(id);
    assert_eq!(heap.heap_stats().tracker_memory_bytes, Some(0));
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn repr_of_self_containing_deque() {
    let mut heap = new_heap();
    let interns = interns();
    let id = heap_deque([1], &mut heap);
    heap.inc_ref(id);
    with_deque_mut(&mut heap, id, |deque, heap| deque.push_back(Value::Ref(id), heap)).unwrap();
    assert_eq!(Value::Ref(id).py_repr(&heap, &interns), "deque([1, [...]])");

    // the self reference is a cycle; only the collector can reclaim it
    heap.dec_ref(id);
    assert_eq!(heap.live_count(), 1);
    assert_eq!(heap.collect_garbage(Vec::new()), 1);
    assert_eq!(heap.live_count(), 0);
}
