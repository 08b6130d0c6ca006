//! Call-site argument shapes and the values they carry.
//!
//! A call site is described by an [`ArgSpec`] and a flat value vector laid out
//! as `[positional..][keyword values..][*args?][**kwargs?]`.
//! [`ArgValues::from_call_site`] expands the `*args` and `**kwargs` entries and
//! yields the normalized positional list plus keyword pairs that the binder
//! consumes.

use std::vec::IntoIter;

use crate::{
    exception::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapGuard},
    intern::{Interns, StringId},
    resource::ResourceTracker,
    types::{DictKey, ValueIter},
    value::Value,
};

/// How a call site supplied its arguments.
///
/// Keyword names are interned, so matching them against parameter names is
/// an integer comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArgSpec {
    num_args: usize,
    keyword_names: Vec<StringId>,
    has_starargs: bool,
    has_kwargs: bool,
}

impl ArgSpec {
    #[must_use]
    pub fn new(num_args: usize, keyword_names: Vec<StringId>, has_starargs: bool, has_kwargs: bool) -> Self {
        Self {
            num_args,
            keyword_names,
            has_starargs,
            has_kwargs,
        }
    }

    /// Shape of a plain `f(a, b, ...)` call.
    #[must_use]
    pub fn positional(num_args: usize) -> Self {
        Self::new(num_args, Vec::new(), false, false)
    }

    #[must_use]
    pub fn num_args(&self) -> usize {
        self.num_args
    }

    #[must_use]
    pub fn keyword_names(&self) -> &[StringId] {
        &self.keyword_names
    }

    #[must_use]
    pub fn num_keywords(&self) -> usize {
        self.keyword_names.len()
    }

    #[must_use]
    pub fn has_starargs(&self) -> bool {
        self.has_starargs
    }

    #[must_use]
    pub fn has_kwargs(&self) -> bool {
        self.has_kwargs
    }

    /// Length of the value vector this call site passes.
    #[must_use]
    pub fn total_passed(&self) -> usize {
        self.num_args + self.keyword_names.len() + usize::from(self.has_starargs) + usize::from(self.has_kwargs)
    }

    /// Position of the `*args` value in the passed vector.
    #[must_use]
    pub fn starargs_index(&self) -> Option<usize> {
        self.has_starargs.then(|| self.num_args + self.keyword_names.len())
    }

    /// Position of the `**kwargs` value in the passed vector.
    #[must_use]
    pub fn kwargs_index(&self) -> Option<usize> {
        self.has_kwargs
            .then(|| self.num_args + self.keyword_names.len() + usize::from(self.has_starargs))
    }
}

/// A keyword name as it arrived at the call.
///
/// Inline keywords are interned; keys taken from a `**kwargs` dict may name
/// strings the interner has never seen.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KeywordName {
    Interned(StringId),
    Owned(String),
}

impl KeywordName {
    #[must_use]
    pub fn as_str<'a>(&'a self, interns: &'a Interns) -> &'a str {
        match self {
            Self::Interned(id) => interns.get_str(*id),
            Self::Owned(s) => s,
        }
    }

    /// Returns true if this keyword names the parameter `param`.
    #[must_use]
    pub fn matches(&self, param: StringId, interns: &Interns) -> bool {
        match self {
            Self::Interned(id) => *id == param,
            Self::Owned(s) => s == interns.get_str(param),
        }
    }

    /// Interns the name when possible so later comparisons stay integer-only.
    fn from_key(key: &str, interns: &Interns) -> Self {
        match interns.try_get_str_id(key) {
            Some(id) => Self::Interned(id),
            None => Self::Owned(key.to_owned()),
        }
    }
}

/// Keyword arguments of a call, in call order.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub enum KwargsValues {
    #[default]
    Empty,
    Inline(Vec<(KeywordName, Value)>),
}

impl KwargsValues {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Inline(kvs) => kvs.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the first keyword name that appears more than once.
    fn find_duplicate<'a>(&'a self, interns: &'a Interns) -> Option<&'a str> {
        let Self::Inline(kvs) = self else {
            return None;
        };
        kvs.iter().enumerate().find_map(|(i, (name, _))| {
            let name = name.as_str(interns);
            kvs[..i]
                .iter()
                .any(|(earlier, _)| earlier.as_str(interns) == name)
                .then_some(name)
        })
    }

    fn push(&mut self, name: KeywordName, value: Value) {
        match self {
            Self::Empty => *self = Self::Inline(vec![(name, value)]),
            Self::Inline(kvs) => kvs.push((name, value)),
        }
    }
}

impl IntoIterator for KwargsValues {
    type Item = (KeywordName, Value);
    type IntoIter = IntoIter<(KeywordName, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Empty => Vec::new().into_iter(),
            Self::Inline(kvs) => kvs.into_iter(),
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for KwargsValues {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for (_, value) in self {
            value.drop_with_heap(heap);
        }
    }
}

/// Normalized arguments of one call.
///
/// Uses specific variants for common cases (0-2 positional arguments, no
/// keywords), which covers the vast majority of calls without a Vec.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub enum ArgValues {
    Empty,
    One(Value),
    Two(Value, Value),
    Kwargs(KwargsValues),
    ArgsKargs { args: Vec<Value>, kwargs: KwargsValues },
}

impl ArgValues {
    /// Builds the smallest variant that holds `args` and `kwargs`.
    #[must_use]
    pub fn new(args: Vec<Value>, kwargs: KwargsValues) -> Self {
        if !kwargs.is_empty() {
            return if args.is_empty() {
                Self::Kwargs(kwargs)
            } else {
                Self::ArgsKargs { args, kwargs }
            };
        }
        match args.len() {
            0 => Self::Empty,
            1 | 2 => {
                let mut iter = args.into_iter();
                match (iter.next(), iter.next()) {
                    (Some(a), None) => Self::One(a),
                    (Some(a), Some(b)) => Self::Two(a, b),
                    _ => Self::Empty,
                }
            }
            _ => Self::ArgsKargs {
                args,
                kwargs: KwargsValues::Empty,
            },
        }
    }

    /// Positional-only arguments.
    #[must_use]
    pub fn positional(args: Vec<Value>) -> Self {
        Self::new(args, KwargsValues::Empty)
    }

    /// Normalizes the flat value vector of a call site.
    ///
    /// `*args` is expanded through the iteration protocol and appended to the
    /// positional arguments; `**kwargs` must be a dict with string keys, whose
    /// entries follow the inline keywords. A keyword name supplied twice fails
    /// with a "multiple values for keyword argument" error.
    ///
    /// Takes ownership of `values`; on error every value is released.
    pub fn from_call_site(
        spec: &ArgSpec,
        values: Vec<Value>,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
        func_name: &str,
    ) -> RunResult<Self> {
        if values.len() != spec.total_passed() {
            let err = RunError::internal(format!(
                "call site for {func_name}() passed {} values but its shape needs {}",
                values.len(),
                spec.total_passed()
            ));
            values.drop_with_heap(heap);
            return Err(err);
        }

        let mut values = values.into_iter();
        let args: Vec<Value> = values.by_ref().take(spec.num_args).collect();
        let kwargs = if spec.keyword_names.is_empty() {
            KwargsValues::Empty
        } else {
            KwargsValues::Inline(
                spec.keyword_names
                    .iter()
                    .map(|&id| KeywordName::Interned(id))
                    .zip(values.by_ref())
                    .collect(),
            )
        };
        let star = if spec.has_starargs { values.next() } else { None };
        let double_star = if spec.has_kwargs { values.next() } else { None };

        let mut guard = HeapGuard::new(CallParts { args, kwargs, star, double_star }, heap);
        let (parts, heap) = guard.as_parts_mut();

        if let Some(name) = parts.kwargs.find_duplicate(interns) {
            return Err(ExcType::type_error_multiple_values(func_name, name));
        }
        if let Some(star) = parts.star.take() {
            let items = expand_starargs(star, heap, interns, func_name)?;
            parts.args.extend(items);
        }
        if let Some(double_star) = parts.double_star.take() {
            expand_kwargs(double_star, &mut parts.kwargs, heap, interns, func_name)?;
        }

        let CallParts { args, kwargs, .. } = guard.into_inner();
        Ok(Self::new(args, kwargs))
    }

    /// Splits into positional iterator and keyword values.
    #[must_use]
    pub fn into_parts(self) -> (ArgPosIter, KwargsValues) {
        match self {
            Self::Empty => (ArgPosIter::Empty, KwargsValues::Empty),
            Self::One(v) => (ArgPosIter::One(Some(v)), KwargsValues::Empty),
            Self::Two(v1, v2) => (ArgPosIter::Two(Some(v1), Some(v2)), KwargsValues::Empty),
            Self::Kwargs(kwargs) => (ArgPosIter::Empty, kwargs),
            Self::ArgsKargs { args, kwargs } => (ArgPosIter::Vec(args.into_iter()), kwargs),
        }
    }

    /// Returns the number of positional arguments.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Empty | Self::Kwargs(_) => 0,
            Self::One(_) => 1,
            Self::Two(_, _) => 2,
            Self::ArgsKargs { args, .. } => args.len(),
        }
    }

    /// Returns the number of keyword arguments.
    #[must_use]
    pub fn keyword_count(&self) -> usize {
        match self {
            Self::Kwargs(kwargs) | Self::ArgsKargs { kwargs, .. } => kwargs.len(),
            _ => 0,
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for ArgValues {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        match self {
            Self::Empty => {}
            Self::One(v) => v.drop_with_heap(heap),
            Self::Two(v1, v2) => {
                v1.drop_with_heap(heap);
                v2.drop_with_heap(heap);
            }
            Self::Kwargs(kwargs) => kwargs.drop_with_heap(heap),
            Self::ArgsKargs { args, kwargs } => {
                args.drop_with_heap(heap);
                kwargs.drop_with_heap(heap);
            }
        }
    }
}

/// Pieces of a call site while `*args` and `**kwargs` are being expanded.
struct CallParts {
    args: Vec<Value>,
    kwargs: KwargsValues,
    star: Option<Value>,
    double_star: Option<Value>,
}

impl<T: ResourceTracker> DropWithHeap<T> for CallParts {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.args.drop_with_heap(heap);
        self.kwargs.drop_with_heap(heap);
        self.star.drop_with_heap(heap);
        self.double_star.drop_with_heap(heap);
    }
}

fn expand_starargs(
    star: Value,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
    func_name: &str,
) -> RunResult<Vec<Value>> {
    let ty = star.py_type(heap);
    if !ty.is_iterable() {
        star.drop_with_heap(heap);
        return Err(ExcType::type_error_star_args_not_iterable(func_name, ty));
    }
    let mut iter = ValueIter::new(star, heap, interns)?;
    let items = iter.collect(heap, interns);
    iter.drop_with_heap(heap);
    items
}

fn expand_kwargs(
    mapping: Value,
    kwargs: &mut KwargsValues,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
    func_name: &str,
) -> RunResult<()> {
    let result = match &mapping {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Dict(dict) => {
                let mut entries = Vec::with_capacity(dict.len());
                let mut failure = None;
                for (key, value) in dict.iter() {
                    let DictKey::Str(key) = key else {
                        failure = Some(ExcType::type_error_kwargs_nonstring_key(func_name));
                        break;
                    };
                    let name = KeywordName::from_key(key, interns);
                    let clash = match &*kwargs {
                        KwargsValues::Empty => false,
                        KwargsValues::Inline(kvs) => kvs.iter().any(|(existing, _)| existing.as_str(interns) == key),
                    };
                    if clash {
                        failure = Some(ExcType::type_error_multiple_values(func_name, key));
                        break;
                    }
                    entries.push((name, value.clone_with_heap(heap)));
                }
                match failure {
                    Some(err) => {
                        for (_, value) in entries {
                            value.drop_with_heap(heap);
                        }
                        Err(err)
                    }
                    None => Ok(entries),
                }
            }
            other => Err(ExcType::type_error_kwargs_not_mapping(func_name, other.py_type())),
        },
        other => Err(ExcType::type_error_kwargs_not_mapping(func_name, other.py_type(heap))),
    };
    mapping.drop_with_heap(heap);
    for (name, value) in result? {
        kwargs.push(name, value);
    }
    Ok(())
}

/// Iterator over positional arguments without allocation.
///
/// Yields values by ownership transfer. Whatever is not consumed must be
/// released with `drop_with_heap()`.
#[derive(Debug)]
pub enum ArgPosIter {
    Empty,
    One(Option<Value>),
    Two(Option<Value>, Option<Value>),
    Vec(IntoIter<Value>),
}

impl Iterator for ArgPosIter {
    type Item = Value;

    #[inline]
    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Empty => None,
            Self::One(v) => v.take(),
            Self::Two(v1, v2) => v1.take().or_else(|| v2.take()),
            Self::Vec(iter) => iter.next(),
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Empty => (0, Some(0)),
            Self::One(v) => {
                let n = usize::from(v.is_some());
                (n, Some(n))
            }
            Self::Two(v1, v2) => {
                let n = usize::from(v1.is_some()) + usize::from(v2.is_some());
                (n, Some(n))
            }
            Self::Vec(iter) => iter.size_hint(),
        }
    }
}

impl ExactSizeIterator for ArgPosIter {}

impl<T: ResourceTracker> DropWithHeap<T> for ArgPosIter {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}
