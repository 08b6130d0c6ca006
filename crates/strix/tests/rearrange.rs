/// Tests for binding call sites to callee signatures.
///
/// Each test builds a call site as an `ArgSpec` plus its flat value vector
/// (`[positional..][keyword values..][*args?][**kwargs?]`) and checks either
/// the bound slots or the exact error a caller would see.
use pretty_assertions::assert_eq;
use strix::{
    ArgSpec, BoundArgs, Callee, DispatchReturn, ErrorKind, ExcType, Heap, InternerBuilder, Interns,
    NoLimitTracker, NoopRecorder, Object, ReturnConvention, RunError, Signature, SlotSource, StringId, Value,
    heap::DropWithHeap,
    rearrange, rearrange_and_call,
    types::{
        Dict, DictKey,
        deque::{allocate_deque, deque_ref, deque_rotate, with_deque_mut},
        dict::allocate_dict,
        list::allocate_list,
        tuple::allocate_tuple,
    },
};

struct Names {
    interns: Interns,
    a: StringId,
    b: StringId,
    c: StringId,
    x: StringId,
    y: StringId,
}

fn names() -> Names {
    let mut builder = InternerBuilder::new();
    let a = builder.intern("a");
    let b = builder.intern("b");
    let c = builder.intern("c");
    let x = builder.intern("x");
    let y = builder.intern("y");
    Names {
        interns: builder.build(),
        a,
        b,
        c,
        x,
        y,
    }
}

fn new_heap() -> Heap<NoLimitTracker> {
    init_tracing();
    Heap::new(16, NoLimitTracker)
}

/// Routes `strix::bind` diagnostics to the test output, filtered by `RUST_LOG`.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = fmt().with_test_writer().with_env_filter(filter).try_init();
}

fn ints(values: &[Value]) -> Vec<i64> {
    values
        .iter()
        .map(|v| match v {
            Value::Int(i) => *i,
            other => panic!("expected int, got {other:?}"),
        })
        .collect()
}

fn int_values(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}

/// `f(a, b, c=10)`
fn abc_callee(n: &Names) -> Callee {
    Callee::new("f", Signature::new(vec![n.a, n.b, n.c], 1), vec![Value::Int(10)])
}

fn expect_err(result: Result<BoundArgs, RunError>) -> RunError {
    match result {
        Ok(bound) => panic!("expected a binding error, got {bound:?}"),
        Err(err) => err,
    }
}

// === Positional and keyword binding ===

#[test]
fn positional_call_fills_defaults() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let bound = rearrange(&callee, &ArgSpec::positional(2), int_values(&[1, 2]), &mut heap, &n.interns).unwrap();
    assert_eq!(ints(bound.slots()), vec![1, 2, 10]);
    assert_eq!(
        bound.sources(),
        &[SlotSource::Positional(0), SlotSource::Positional(1), SlotSource::Default(0)]
    );
}

#[test]
fn missing_middle_argument_is_reported_by_name() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let spec = ArgSpec::new(1, vec![n.c], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 5]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::MissingRequired));
    assert!(err.kind().is_some_and(ErrorKind::is_binding_error));
    assert_eq!(err.message(), Some("f() missing required argument 'b' (pos 2)"));
}

#[test]
fn every_arity_between_required_and_total_binds() {
    let n = names();
    let mut heap = new_heap();
    for num_defaults in 0..=3 {
        let defaults: Vec<Value> = (0..num_defaults).map(|i| Value::Int(100 + i)).collect();
        let callee = Callee::new("f", Signature::new(vec![n.a, n.b, n.c], num_defaults as usize), defaults);
        let required = 3 - num_defaults;
        for k in required..=3 {
            let passed: Vec<i64> = (1..=k).collect();
            let spec = ArgSpec::positional(k as usize);
            let bound = rearrange(&callee, &spec, int_values(&passed), &mut heap, &n.interns).unwrap();

            let mut expected = passed.clone();
            expected.extend((k..3).map(|slot| 100 + slot - required));
            assert_eq!(ints(bound.slots()), expected, "defaults {num_defaults}, k {k}");
        }
        callee.drop_with_heap(&mut heap);
    }
}

#[test]
fn keywords_bind_by_name_in_any_order() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let spec = ArgSpec::new(0, vec![n.c, n.a, n.b], false, false);
    let bound = rearrange(&callee, &spec, int_values(&[3, 1, 2]), &mut heap, &n.interns).unwrap();
    assert_eq!(ints(bound.slots()), vec![1, 2, 3]);
    assert_eq!(
        bound.sources(),
        &[SlotSource::Keyword(1), SlotSource::Keyword(2), SlotSource::Keyword(0)]
    );
}

#[test]
fn too_many_positionals_fail_first() {
    let n = names();
    let mut heap = new_heap();
    let callee = Callee::new("f", Signature::new(vec![n.a, n.b], 0), vec![]);

    // also passes an unknown keyword; arity is still what gets reported
    let spec = ArgSpec::new(3, vec![n.x], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 2, 3, 4]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::TooManyPositional));
    assert_eq!(err.exc_type(), Some(ExcType::TypeError));
    assert_eq!(err.message(), Some("f() takes 2 positional arguments but 3 were given"));
}

// === Conflicts ===

#[test]
fn positional_and_keyword_for_same_slot_conflict() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let spec = ArgSpec::new(2, vec![n.a], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 2, 3]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateArgument));
    assert_eq!(err.message(), Some("f() got multiple values for argument 'a'"));
}

#[test]
fn conflict_wins_over_later_problems() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    // `b` is missing and `y` is unknown, but slot `a` fails first
    let spec = ArgSpec::new(1, vec![n.a, n.y], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 2, 3]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateArgument));
}

#[test]
fn repeated_keyword_in_one_call_is_rejected() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let spec = ArgSpec::new(0, vec![n.a, n.a], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 2]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateKeyword));
    assert_eq!(err.message(), Some("f() got multiple values for keyword argument 'a'"));
}

#[test]
fn keyword_repeated_through_double_star_is_rejected() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let mut dict = Dict::new();
    dict.set_item(DictKey::from("b"), Value::Int(2), &mut heap);
    let kwargs = allocate_dict(&mut heap, dict).unwrap();

    let spec = ArgSpec::new(1, vec![n.b], false, true);
    let values = vec![Value::Int(1), Value::Int(2), kwargs];
    let err = expect_err(rearrange(&callee, &spec, values, &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateKeyword));
    assert_eq!(heap.live_count(), 0);
}

// === Unknown keywords ===

#[test]
fn unexpected_keyword_is_named() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let spec = ArgSpec::new(2, vec![n.y], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 2, 3]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::UnexpectedKeyword));
    assert_eq!(err.message(), Some("f() got an unexpected keyword argument 'y'"));
}

#[test]
fn positional_only_callee_rejects_keywords() {
    let n = names();
    let mut heap = new_heap();
    let callee = Callee::new("len", Signature::positional_only(1, 0), vec![]);

    let spec = ArgSpec::new(1, vec![n.a], false, false);
    let err = expect_err(rearrange(&callee, &spec, int_values(&[1, 2]), &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::NoKeywordsAccepted));
    assert_eq!(err.message(), Some("len() takes no keyword arguments"));
}

// === Captures ===

#[test]
fn captures_keep_order_names_and_values() {
    let n = names();
    let mut heap = new_heap();
    let callee = Callee::new("g", Signature::new(vec![n.a], 0).with_varargs().with_kwargs(), vec![]);

    let spec = ArgSpec::new(3, vec![n.y, n.x], false, false);
    let bound = rearrange(&callee, &spec, int_values(&[1, 2, 3, 5, 4]), &mut heap, &n.interns).unwrap();
    assert_eq!(ints(bound.slots()), vec![1]);

    let var_args = Object::from_value(bound.var_args().unwrap(), &heap, &n.interns);
    assert_eq!(var_args, Object::Tuple(vec![Object::Int(2), Object::Int(3)]));

    let var_kwargs = Object::from_value(bound.var_kwargs().unwrap(), &heap, &n.interns);
    assert_eq!(
        var_kwargs,
        Object::Dict(vec![
            (DictKey::from("y"), Object::Int(5)),
            (DictKey::from("x"), Object::Int(4)),
        ])
    );

    bound.drop_with_heap(&mut heap);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn star_args_expand_lists_and_deques() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let list = allocate_list(&mut heap, int_values(&[2, 3])).unwrap();
    let spec = ArgSpec::new(1, vec![], true, false);
    let bound = rearrange(&callee, &spec, vec![Value::Int(1), list], &mut heap, &n.interns).unwrap();
    assert_eq!(ints(bound.slots()), vec![1, 2, 3]);
    bound.drop_with_heap(&mut heap);

    let deque = allocate_deque(&mut heap, None).unwrap();
    let deque_id = deque.ref_id().unwrap();
    with_deque_mut(&mut heap, deque_id, |d, heap| d.extend(int_values(&[7, 8]), heap)).unwrap();
    let spec = ArgSpec::new(0, vec![], true, false);
    let bound = rearrange(&callee, &spec, vec![deque], &mut heap, &n.interns).unwrap();
    assert_eq!(ints(bound.slots()), vec![7, 8, 10]);
    bound.drop_with_heap(&mut heap);

    assert_eq!(heap.live_count(), 0);
}

#[test]
fn star_args_must_be_iterable() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let spec = ArgSpec::new(0, vec![], true, false);
    let err = expect_err(rearrange(&callee, &spec, vec![Value::Int(4)], &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::NotIterable));
    assert_eq!(err.message(), Some("f() argument after * must be an iterable, not int"));
}

#[test]
fn double_star_must_be_a_string_keyed_mapping() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);
    let spec = ArgSpec::new(0, vec![], false, true);

    let tuple = allocate_tuple(&mut heap, vec![]).unwrap();
    let err = expect_err(rearrange(&callee, &spec, vec![tuple], &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::NotMapping));
    assert_eq!(err.message(), Some("f() argument after ** must be a mapping, not tuple"));

    let mut dict = Dict::new();
    dict.set_item(DictKey::Int(1), Value::Int(2), &mut heap);
    let kwargs = allocate_dict(&mut heap, dict).unwrap();
    let err = expect_err(rearrange(&callee, &spec, vec![kwargs], &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::KeywordNotString));
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn failed_binding_releases_every_argument() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let list = allocate_list(&mut heap, int_values(&[1])).unwrap();
    let tuple = allocate_tuple(&mut heap, int_values(&[2])).unwrap();
    let spec = ArgSpec::new(2, vec![n.a], false, false);
    let values = vec![list, tuple, Value::Int(3)];
    let err = expect_err(rearrange(&callee, &spec, values, &mut heap, &n.interns));
    assert_eq!(err.kind(), Some(ErrorKind::DuplicateArgument));
    assert_eq!(heap.live_count(), 0);
}

// === Continuation dispatch ===

#[test]
fn continuation_receives_bound_slots() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let mut recorder = NoopRecorder;
    let spec = ArgSpec::new(1, vec![n.b], false, false);
    let mut result = rearrange_and_call(
        &callee,
        &spec,
        int_values(&[1, 2]),
        &mut heap,
        &n.interns,
        &mut recorder,
        |bound, _heap, _recorder| {
            let sum: i64 = ints(bound.slots()).iter().sum();
            DispatchReturn::has_value(Value::Int(sum))
        },
    )
    .unwrap();
    assert_eq!(result.convention(), Some(ReturnConvention::HasValue));
    assert!(matches!(result.take_value(), Some(Value::Int(13))));
}

#[test]
fn continuation_is_not_called_when_binding_fails() {
    let n = names();
    let mut heap = new_heap();
    let callee = abc_callee(&n);

    let mut called = false;
    let result = rearrange_and_call(
        &callee,
        &ArgSpec::positional(0),
        vec![],
        &mut heap,
        &n.interns,
        &mut NoopRecorder,
        |bound, heap, _recorder| {
            called = true;
            bound.drop_with_heap(heap);
            DispatchReturn::no_value()
        },
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::MissingRequired));
    assert!(!called);
}

#[test]
fn continuation_result_propagates_unchanged() {
    let n = names();
    let mut heap = new_heap();
    let callee = Callee::new("lookup", Signature::new(vec![n.a], 0), vec![]);

    let result = rearrange_and_call(
        &callee,
        &ArgSpec::positional(1),
        int_values(&[1]),
        &mut heap,
        &n.interns,
        &mut NoopRecorder,
        |bound, heap, _recorder| {
            bound.drop_with_heap(heap);
            DispatchReturn::nullable(None)
        },
    )
    .unwrap();
    // "not found" is not an error under this convention
    assert!(matches!(result.into_result(), Ok(None)));
}

#[test]
fn bound_method_dispatch_on_a_deque() {
    let n = names();
    let mut heap = new_heap();
    let deque = allocate_deque(&mut heap, None).unwrap();
    let deque_id = deque.ref_id().unwrap();
    with_deque_mut(&mut heap, deque_id, |d, heap| d.extend(int_values(&[1, 2, 3, 4, 5]), heap)).unwrap();

    // deque.rotate(n=1)
    let rotate = Callee::new("rotate", Signature::positional_only(1, 1), vec![Value::Int(1)]);
    let call = |values: Vec<Value>, heap: &mut Heap<NoLimitTracker>| {
        let spec = ArgSpec::positional(values.len());
        rearrange_and_call(
            &rotate,
            &spec,
            values,
            heap,
            &n.interns,
            &mut NoopRecorder,
            |bound, heap, _recorder| {
                let steps = match bound.slot(0) {
                    Some(Value::Int(steps)) => *steps,
                    _ => 1,
                };
                bound.drop_with_heap(heap);
                match deque_rotate(heap, deque_id, Some(steps)) {
                    Ok(()) => DispatchReturn::no_value(),
                    Err(err) => DispatchReturn::error(err),
                }
            },
        )
    };

    call(vec![], &mut heap).unwrap().into_result().unwrap();
    call(int_values(&[-3]), &mut heap).unwrap().into_result().unwrap();
    let contents: Vec<Value> = deque_ref(&heap, deque_id)
        .unwrap()
        .iter()
        .map(Value::clone_immediate)
        .collect();
    assert_eq!(ints(&contents), vec![3, 4, 5, 1, 2]);

    let err = call(int_values(&[1, 2]), &mut heap).unwrap_err();
    assert_eq!(err.message(), Some("rotate() takes from 0 to 1 positional arguments but 2 were given"));

    rotate.drop_with_heap(&mut heap);
    deque.drop_with_heap(&mut heap);
    assert_eq!(heap.live_count(), 0);
}
