//! The argument rearranger: bind a call site to a callee, then continue.
//!
//! [`rearrange_and_call`] normalizes the call-site values (expanding `*args`
//! and `**kwargs`), binds them to the callee's [`Signature`], and hands the
//! bound arguments to a continuation. The continuation is the opaque next
//! step: pushing a frame, emitting code, or calling a native function. It
//! commits a [`DispatchReturn`], which is passed back to the caller as-is.
//!
//! While the recorder reports an active session, the rearranger also records
//! the guards this concrete call satisfied, the inline call, and the return
//! convention. With [`NoopRecorder`](crate::recorder::NoopRecorder) those
//! branches compile away.

use crate::{
    args::{ArgSpec, ArgValues},
    convention::DispatchReturn,
    exception::RunResult,
    heap::{DropWithHeap, Heap, HeapData, HeapId, TraceRefs},
    intern::Interns,
    recorder::{Guard, TraceRecorder},
    resource::ResourceTracker,
    signature::{BoundArgs, Signature},
    types::{DictKey, Type},
    value::Value,
};

/// A callable target: its name for error messages, its parameter shape, and
/// the values of its defaulted parameters.
///
/// Owns one reference per default value.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Callee {
    name: String,
    signature: Signature,
    defaults: Vec<Value>,
}

impl Callee {
    /// # Panics
    /// If `defaults` does not hold exactly one value per defaulted parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: Signature, defaults: Vec<Value>) -> Self {
        assert_eq!(
            defaults.len(),
            signature.num_defaults(),
            "Callee: one default value per defaulted parameter"
        );
        Self {
            name: name.into(),
            signature,
            defaults,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[must_use]
    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }
}

impl TraceRefs for Callee {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        self.defaults.collect_ref_ids(out);
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for Callee {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.defaults.drop_with_heap(heap);
    }
}

/// Binds a call site to `callee` without continuing.
///
/// `values` is laid out as described by `spec`:
/// `[positional..][keyword values..][*args?][**kwargs?]`. Takes ownership of
/// every value; on error all of them are released.
pub fn rearrange(
    callee: &Callee,
    spec: &ArgSpec,
    values: Vec<Value>,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<BoundArgs> {
    let args = ArgValues::from_call_site(spec, values, heap, interns, &callee.name)?;
    callee
        .signature
        .bind(args, &callee.defaults, heap, interns, &callee.name)
}

/// Binds a call site to `callee` and invokes `continuation` with the result.
///
/// Binding failures are returned as `Err` before the continuation runs. On
/// success the continuation's [`DispatchReturn`] is returned unchanged; it
/// must be committed.
///
/// # Panics
/// With `debug_assertions`, if the continuation returns an uncommitted result.
pub fn rearrange_and_call<T, R, F>(
    callee: &Callee,
    spec: &ArgSpec,
    values: Vec<Value>,
    heap: &mut Heap<T>,
    interns: &Interns,
    recorder: &mut R,
    continuation: F,
) -> RunResult<DispatchReturn>
where
    T: ResourceTracker,
    R: TraceRecorder,
    F: FnOnce(BoundArgs, &mut Heap<T>, &mut R) -> DispatchReturn,
{
    if recorder.is_recording() {
        record_call_site_guards(spec, &values, heap, interns, recorder);
    }

    let bound = rearrange(callee, spec, values, heap, interns)?;

    if recorder.is_recording() {
        record_bound_call(callee, &bound, heap, recorder);
    }

    let result = continuation(bound, heap, recorder);
    debug_assert!(
        result.is_committed(),
        "{}(): continuation returned without committing a return convention",
        callee.name
    );

    if recorder.is_recording()
        && let Some(convention) = result.peek_convention()
    {
        let ty = result.peek_value().and_then(|value| observed_type(value, heap));
        recorder.record_return(convention, ty);
    }
    Ok(result)
}

/// Records the shape of the call site, including what the `*args` and
/// `**kwargs` values looked like before expansion.
fn record_call_site_guards(
    spec: &ArgSpec,
    values: &[Value],
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    recorder: &mut impl TraceRecorder,
) {
    recorder.record_guard(Guard::ArgShape {
        num_args: spec.num_args(),
        num_keywords: spec.num_keywords(),
        has_starargs: spec.has_starargs(),
        has_kwargs: spec.has_kwargs(),
    });
    if let Some(star) = spec.starargs_index().and_then(|i| values.get(i))
        && let Some(ty) = observed_type(star, heap)
    {
        recorder.record_guard(Guard::StarArgs {
            ty,
            len: sized_len(star, heap, interns),
        });
    }
    if let Some(Value::Ref(id)) = spec.kwargs_index().and_then(|i| values.get(i))
        && let HeapData::Dict(dict) = heap.get(*id)
    {
        let keys = dict
            .keys()
            .map(|key| match key {
                DictKey::Str(s) => s.clone(),
                DictKey::Int(i) => i.to_string(),
            })
            .collect();
        recorder.record_guard(Guard::KwargsKeys(keys));
    }
}

/// Records type guards for guarded slots, then the inline call.
fn record_bound_call(
    callee: &Callee,
    bound: &BoundArgs,
    heap: &Heap<impl ResourceTracker>,
    recorder: &mut impl TraceRecorder,
) {
    for (slot, value) in bound.slots().iter().enumerate() {
        if let Some(expected) = callee.signature.slot_guard(slot)
            && let Some(observed) = observed_type(value, heap)
        {
            recorder.record_guard(Guard::SlotType {
                slot,
                expected,
                observed,
            });
        }
    }
    let var_args = bound.var_args().and_then(|value| match value {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Tuple(tuple) => Some(tuple.len()),
            _ => None,
        },
        _ => None,
    });
    let var_kwargs = bound.var_kwargs().and_then(|value| match value {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Dict(dict) => Some(dict.len()),
            _ => None,
        },
        _ => None,
    });
    recorder.record_call(&callee.name, bound.sources(), var_args, var_kwargs);
}

fn observed_type(value: &Value, heap: &Heap<impl ResourceTracker>) -> Option<Type> {
    (!value.is_undefined()).then(|| value.py_type(heap))
}

fn sized_len(value: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Option<usize> {
    match value {
        Value::InternString(id) => Some(interns.get_str(*id).chars().count()),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Some(s.as_str().chars().count()),
            HeapData::List(list) => Some(list.len()),
            HeapData::Tuple(tuple) => Some(tuple.len()),
            HeapData::Dict(dict) => Some(dict.len()),
            HeapData::Deque(deque) => Some(deque.len()),
        },
        _ => None,
    }
}
