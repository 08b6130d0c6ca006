//! Callee parameter shapes and the argument binding algorithm.
//!
//! A [`Signature`] says how a callee wants its arguments: a count of named
//! slots (the trailing `num_defaults` of which have defaults), and whether it
//! captures extra positional and keyword arguments. Parameter names are
//! optional; a signature without names binds positionally only.
//!
//! Binding walks the slots left to right and reports errors in a fixed order:
//! positional arity first, then each slot, then extra positionals, then extra
//! keywords. The same call always produces the same message.

use std::mem;

use smallvec::SmallVec;

use crate::{
    args::{ArgPosIter, ArgValues, KeywordName},
    defer_drop_mut,
    exception::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapId, TraceRefs},
    intern::{Interns, StringId},
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    types::{Dict, DictKey, Type, dict::allocate_dict, tuple::allocate_tuple},
    value::Value,
};

/// How a callee receives its arguments.
///
/// # Slot Layout
///
/// Bound values are laid out as:
/// ```text
/// [named slots][*args capture?][**kwargs capture?]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature {
    /// Parameter names, one per named slot. `None` for native entry points
    /// that only bind positionally.
    param_names: Option<Vec<StringId>>,
    num_params: usize,
    /// Number of trailing named slots that have default values.
    num_defaults: usize,
    takes_varargs: bool,
    takes_kwargs: bool,
    /// Per-slot type the recorder guards when a trace is being recorded.
    slot_guards: Option<Vec<Option<Type>>>,
    /// How simple the signature is, used for fast path when binding.
    bind_mode: BindMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
enum BindMode {
    /// No defaults and no capture: positional calls must match exactly.
    #[default]
    Simple,
    /// Trailing defaults but no capture: `def f(a, b=1, c=2)`.
    ///
    /// Positional calls fill the leading slots and the defaults fill the rest.
    SimpleWithDefaults,
    Complex,
}

/// Where a bound slot's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SlotSource {
    /// The positional argument at this index.
    Positional(usize),
    /// The keyword argument at this index of the call's keyword list.
    Keyword(usize),
    /// The default at this index of the defaults array.
    Default(usize),
}

impl Signature {
    /// Creates a signature whose slots can be bound by name or by position.
    ///
    /// The last `num_defaults` parameters take their values from the defaults
    /// array when the call leaves them unbound.
    #[must_use]
    pub fn new(param_names: Vec<StringId>, num_defaults: usize) -> Self {
        let num_params = param_names.len();
        Self::build(Some(param_names), num_params, num_defaults)
    }

    /// Creates a signature without parameter names; keywords never match a slot.
    #[must_use]
    pub fn positional_only(num_params: usize, num_defaults: usize) -> Self {
        Self::build(None, num_params, num_defaults)
    }

    fn build(param_names: Option<Vec<StringId>>, num_params: usize, num_defaults: usize) -> Self {
        assert!(
            num_defaults <= num_params,
            "Signature: {num_defaults} defaults for {num_params} parameters"
        );
        let mut sig = Self {
            param_names,
            num_params,
            num_defaults,
            ..Self::default()
        };
        sig.refresh_bind_mode();
        sig
    }

    /// Collects extra positional arguments into a tuple.
    #[must_use]
    pub fn with_varargs(mut self) -> Self {
        self.takes_varargs = true;
        self.refresh_bind_mode();
        self
    }

    /// Collects unmatched keyword arguments into a dict.
    #[must_use]
    pub fn with_kwargs(mut self) -> Self {
        self.takes_kwargs = true;
        self.refresh_bind_mode();
        self
    }

    /// Sets the type each slot is expected to hold, guarded while recording.
    #[must_use]
    pub fn with_slot_guards(mut self, guards: Vec<Option<Type>>) -> Self {
        assert_eq!(guards.len(), self.num_params, "Signature: one guard entry per slot");
        self.slot_guards = Some(guards);
        self
    }

    fn refresh_bind_mode(&mut self) {
        self.bind_mode = if self.takes_varargs || self.takes_kwargs {
            BindMode::Complex
        } else if self.num_defaults > 0 {
            BindMode::SimpleWithDefaults
        } else {
            BindMode::Simple
        };
    }

    #[must_use]
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    #[must_use]
    pub fn num_defaults(&self) -> usize {
        self.num_defaults
    }

    #[must_use]
    pub fn required_count(&self) -> usize {
        self.num_params - self.num_defaults
    }

    #[must_use]
    pub fn takes_varargs(&self) -> bool {
        self.takes_varargs
    }

    #[must_use]
    pub fn takes_kwargs(&self) -> bool {
        self.takes_kwargs
    }

    #[must_use]
    pub fn param_names(&self) -> Option<&[StringId]> {
        self.param_names.as_deref()
    }

    #[must_use]
    pub fn slot_guard(&self, slot: usize) -> Option<Type> {
        self.slot_guards.as_ref().and_then(|guards| guards.get(slot).copied().flatten())
    }

    /// Number of values a successful bind produces, captures included.
    #[must_use]
    pub fn total_received(&self) -> usize {
        self.num_params + usize::from(self.takes_varargs) + usize::from(self.takes_kwargs)
    }

    #[must_use]
    pub fn varargs_index(&self) -> Option<usize> {
        self.takes_varargs.then_some(self.num_params)
    }

    #[must_use]
    pub fn kwargs_index(&self) -> Option<usize> {
        self.takes_kwargs
            .then(|| self.num_params + usize::from(self.takes_varargs))
    }

    fn param_name<'a>(&self, slot: usize, interns: &'a Interns) -> Option<&'a str> {
        self.param_names
            .as_ref()
            .and_then(|names| names.get(slot))
            .map(|&id| interns.get_str(id))
    }

    /// Binds call arguments to this signature's slots.
    ///
    /// 1. Too many positionals for a callee without `*args` capture fail first.
    /// 2. Each slot is bound from a same-named keyword (conflicting with a
    ///    positional at that slot is an error), else from its positional,
    ///    else from its default; otherwise it is reported missing.
    /// 3. Extra positionals go to the `*args` tuple.
    /// 4. Unmatched keywords go to the `**kwargs` dict, or are reported.
    ///
    /// `defaults` holds one value per defaulted slot. Takes ownership of `args`;
    /// on error every argument value is released.
    pub fn bind(
        &self,
        args: ArgValues,
        defaults: &[Value],
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
        func_name: &str,
    ) -> RunResult<BoundArgs> {
        debug_assert_eq!(defaults.len(), self.num_defaults, "Signature::bind: defaults length mismatch");

        let result = if self.bind_mode != BindMode::Complex
            && args.keyword_count() == 0
            && (self.required_count()..=self.num_params).contains(&args.count())
        {
            Ok(self.bind_positional_fast(args, defaults, heap))
        } else {
            tracing::trace!(target: "strix::bind", func = func_name, "full binding");
            self.bind_full(args, defaults, heap, interns, func_name)
        };

        match result {
            Ok(bound) => {
                let estimate = bound.slots.len() * size_of::<Value>();
                if estimate > LARGE_RESULT_THRESHOLD
                    && let Err(err) = heap.tracker().check_large_result(estimate)
                {
                    bound.drop_with_heap(heap);
                    return Err(err.into());
                }
                Ok(bound)
            }
            Err(err) => {
                tracing::debug!(target: "strix::bind", func = func_name, error = %err, "binding failed");
                Err(err)
            }
        }
    }

    /// Positional-only calls that fit the named slots, on a signature
    /// without captures.
    fn bind_positional_fast(&self, args: ArgValues, defaults: &[Value], heap: &Heap<impl ResourceTracker>) -> BoundArgs {
        let (pos_iter, _) = args.into_parts();
        let mut slots = Vec::with_capacity(self.num_params);
        let mut sources = SmallVec::with_capacity(self.num_params);
        for (i, value) in pos_iter.enumerate() {
            slots.push(value);
            sources.push(SlotSource::Positional(i));
        }
        let first_default = self.required_count();
        for slot in slots.len()..self.num_params {
            let index = slot - first_default;
            slots.push(defaults[index].clone_with_heap(heap));
            sources.push(SlotSource::Default(index));
        }
        BoundArgs {
            slots,
            sources,
            var_args: None,
            var_kwargs: None,
        }
    }

    fn bind_full(
        &self,
        args: ArgValues,
        defaults: &[Value],
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
        func_name: &str,
    ) -> RunResult<BoundArgs> {
        let (positional, kwargs) = args.into_parts();
        let num_positional = positional.len();
        let keywords: Vec<Option<(KeywordName, Value)>> = kwargs.into_iter().map(Some).collect();
        let state = BindState {
            slots: Vec::with_capacity(self.num_params),
            positional,
            keywords,
        };
        defer_drop_mut!(state, heap);

        // 1. gross arity
        if !self.takes_varargs && num_positional > self.num_params {
            return Err(ExcType::type_error_too_many_positional(
                func_name,
                self.required_count(),
                self.num_params,
                num_positional,
            ));
        }

        // Which keyword (by call index) names each slot.
        let mut slot_keyword: SmallVec<[Option<usize>; 8]> = SmallVec::from_elem(None, self.num_params);
        if let Some(names) = &self.param_names {
            for (k, entry) in state.keywords.iter().enumerate() {
                let Some((name, _)) = entry else { continue };
                if let Some(slot) = names.iter().position(|&param| name.matches(param, interns)) {
                    if slot_keyword[slot].is_some() {
                        return Err(ExcType::type_error_multiple_values(func_name, name.as_str(interns)));
                    }
                    slot_keyword[slot] = Some(k);
                }
            }
        }

        // 2. named slots, left to right
        let mut sources = SmallVec::with_capacity(self.num_params);
        let first_default = self.required_count();
        for slot in 0..self.num_params {
            let positional = if slot < num_positional {
                state.positional.next()
            } else {
                None
            };
            let (value, source) = match (slot_keyword[slot], positional) {
                (Some(_), Some(positional)) => {
                    positional.drop_with_heap(heap);
                    let param = self.param_name(slot, interns).unwrap_or("?");
                    return Err(ExcType::type_error_duplicate_arg(func_name, param));
                }
                (Some(k), None) => {
                    let (_, value) = state.keywords[k]
                        .take()
                        .ok_or_else(|| RunError::internal("keyword bound twice"))?;
                    (value, SlotSource::Keyword(k))
                }
                (None, Some(positional)) => (positional, SlotSource::Positional(slot)),
                (None, None) if slot >= first_default => {
                    let index = slot - first_default;
                    (defaults[index].clone_with_heap(heap), SlotSource::Default(index))
                }
                (None, None) => {
                    return Err(match self.param_name(slot, interns) {
                        Some(param) => ExcType::type_error_missing_required(func_name, param, slot + 1),
                        None => ExcType::type_error_at_least(func_name, first_default, num_positional),
                    });
                }
            };
            state.slots.push(value);
            sources.push(source);
        }

        // 3. extra positionals
        let var_args = if self.takes_varargs {
            let extra: Vec<Value> = mem::replace(&mut state.positional, ArgPosIter::Empty).collect();
            Some(allocate_tuple(heap, extra)?)
        } else {
            None
        };
        let var_args = VarArgs(var_args);
        defer_drop_mut!(var_args, heap);

        // 4. extra keywords
        let var_kwargs = if self.takes_kwargs {
            let mut captured = Dict::new();
            for (name, value) in state.keywords.iter_mut().filter_map(Option::take) {
                captured.set_item(DictKey::Str(name.as_str(interns).to_owned()), value, heap);
            }
            Some(allocate_dict(heap, captured)?)
        } else {
            if let Some((name, _)) = state.keywords.iter().flatten().next() {
                return Err(if self.param_names.is_some() {
                    ExcType::type_error_unexpected_keyword(func_name, name.as_str(interns))
                } else {
                    ExcType::type_error_no_kwargs(func_name)
                });
            }
            None
        };

        Ok(BoundArgs {
            slots: mem::take(&mut state.slots),
            sources,
            var_args: var_args.0.take(),
            var_kwargs,
        })
    }
}

/// Partially bound call, released as a whole if binding fails.
struct BindState {
    slots: Vec<Value>,
    positional: ArgPosIter,
    keywords: Vec<Option<(KeywordName, Value)>>,
}

impl<T: ResourceTracker> DropWithHeap<T> for BindState {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.slots.drop_with_heap(heap);
        self.positional.drop_with_heap(heap);
        for (_, value) in self.keywords.into_iter().flatten() {
            value.drop_with_heap(heap);
        }
    }
}

/// The `*args` tuple while the keyword capture is still being built.
struct VarArgs(Option<Value>);

impl<T: ResourceTracker> DropWithHeap<T> for VarArgs {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.0.drop_with_heap(heap);
    }
}

/// A call bound to its callee's slots.
///
/// Owns one reference per value held, released by `drop_with_heap`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct BoundArgs {
    slots: Vec<Value>,
    sources: SmallVec<[SlotSource; 8]>,
    /// The `*args` tuple, when the callee captures extra positionals.
    var_args: Option<Value>,
    /// The `**kwargs` dict, when the callee captures extra keywords.
    var_kwargs: Option<Value>,
}

impl BoundArgs {
    /// Values of the named slots, in slot order.
    #[must_use]
    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&Value> {
        self.slots.get(index)
    }

    /// Where each named slot's value came from.
    #[must_use]
    pub fn sources(&self) -> &[SlotSource] {
        &self.sources
    }

    #[must_use]
    pub fn var_args(&self) -> Option<&Value> {
        self.var_args.as_ref()
    }

    #[must_use]
    pub fn var_kwargs(&self) -> Option<&Value> {
        self.var_kwargs.as_ref()
    }

    /// Number of values received, captures included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() + usize::from(self.var_args.is_some()) + usize::from(self.var_kwargs.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into `[named slots][*args?][**kwargs?]`.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        let mut values = self.slots;
        values.extend(self.var_args);
        values.extend(self.var_kwargs);
        values
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<Value>, Option<Value>, Option<Value>) {
        (self.slots, self.var_args, self.var_kwargs)
    }
}

impl TraceRefs for BoundArgs {
    fn collect_ref_ids(&self, out: &mut Vec<HeapId>) {
        self.slots.collect_ref_ids(out);
        self.var_args.collect_ref_ids(out);
        self.var_kwargs.collect_ref_ids(out);
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for BoundArgs {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.slots.drop_with_heap(heap);
        self.var_args.drop_with_heap(heap);
        self.var_kwargs.drop_with_heap(heap);
    }
}
