//! Return conventions for dispatch results.
//!
//! Every dispatch path commits to exactly one [`ReturnConvention`] before its
//! result is consumed. The convention says what an absent value means: a bug,
//! an intentional "nothing", a pending error, or a "try the next strategy"
//! signal. Consumers must look at the convention before reading the value.
//!
//! Committing twice without a [`DispatchReturn::reset`], or reading a value
//! whose convention was never checked, is a contract violation in the code
//! producing or consuming the result, not a runtime error. Both panic when
//! `debug_assertions` are enabled.

use std::fmt;

use crate::{
    exception::{RunError, RunResult},
    heap::{DropWithHeap, Heap},
    resource::ResourceTracker,
    value::Value,
};

/// What an absent dispatch result means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReturnConvention {
    /// A definite result, no pending error.
    HasValue,
    /// Intentionally no result. Not an error.
    NoValue,
    /// An absent result implies an error was recorded; a present one means success.
    NullableWithError,
    /// An absent result with no error is itself meaningful, e.g. "attribute
    /// not found, try the next lookup strategy".
    NullableNoError,
}

impl fmt::Display for ReturnConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HasValue => "HAS_VALUE",
            Self::NoValue => "NO_VALUE",
            Self::NullableWithError => "NULLABLE_WITH_ERROR",
            Self::NullableNoError => "NULLABLE_NO_ERROR",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum State {
    #[default]
    Unset,
    Committed(ReturnConvention),
}

/// The outcome of one dispatch attempt.
///
/// Starts out uncommitted. A producer commits it once with
/// [`set_return`](Self::set_return) or [`set_error`](Self::set_error) (or builds
/// it committed with one of the constructors); a consumer calls
/// [`convention`](Self::convention) and only then reads the value.
///
/// Owns one reference to the result value, so it must be released with
/// [`DropWithHeap::drop_with_heap`] or consumed with [`into_result`](Self::into_result).
#[derive(Debug, Default)]
pub struct DispatchReturn {
    state: State,
    value: Option<Value>,
    error: Option<RunError>,
    /// Whether the consumer has looked at the convention since the last commit.
    checked: bool,
}

impl DispatchReturn {
    /// Creates an uncommitted result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A committed `HasValue` result.
    #[must_use]
    pub fn has_value(value: Value) -> Self {
        Self::committed(ReturnConvention::HasValue, Some(value), None)
    }

    /// A committed `NoValue` result.
    #[must_use]
    pub fn no_value() -> Self {
        Self::committed(ReturnConvention::NoValue, None, None)
    }

    /// A committed `NullableNoError` result; `None` means "not found".
    #[must_use]
    pub fn nullable(value: Option<Value>) -> Self {
        Self::committed(ReturnConvention::NullableNoError, value, None)
    }

    /// A committed `NullableWithError` result carrying a pending error.
    #[must_use]
    pub fn error(error: RunError) -> Self {
        Self::committed(ReturnConvention::NullableWithError, None, Some(error))
    }

    fn committed(convention: ReturnConvention, value: Option<Value>, error: Option<RunError>) -> Self {
        Self {
            state: State::Committed(convention),
            value,
            error,
            checked: false,
        }
    }

    /// Commits this result under `convention`.
    ///
    /// `HasValue` requires a value and `NoValue` forbids one. A
    /// `NullableWithError` commit without a value and without a later error
    /// reads back as an internal error.
    ///
    /// # Panics
    /// With `debug_assertions`, if the result is already committed or the
    /// value does not fit the convention. Without them, a second commit
    /// replaces the first and releases its value.
    pub fn set_return(
        &mut self,
        convention: ReturnConvention,
        value: Option<Value>,
        heap: &mut Heap<impl ResourceTracker>,
    ) {
        debug_assert!(
            !self.is_committed(),
            "return convention committed twice (already {:?}, now {convention:?})",
            self.state
        );
        debug_assert!(
            match convention {
                ReturnConvention::HasValue => value.is_some(),
                ReturnConvention::NoValue => value.is_none(),
                ReturnConvention::NullableWithError | ReturnConvention::NullableNoError => true,
            },
            "{convention} committed with an ill-fitting value"
        );
        self.clear(heap);
        self.state = State::Committed(convention);
        self.value = value;
    }

    /// Commits this result as `NullableWithError` with a pending error.
    ///
    /// # Panics
    /// With `debug_assertions`, if the result is already committed.
    pub fn set_error(&mut self, error: RunError, heap: &mut Heap<impl ResourceTracker>) {
        debug_assert!(
            !self.is_committed(),
            "return convention committed twice (already {:?}, now error)",
            self.state
        );
        self.clear(heap);
        self.state = State::Committed(ReturnConvention::NullableWithError);
        self.error = Some(error);
    }

    /// Returns the result to the uncommitted state for a fresh attempt.
    pub fn reset(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        self.clear(heap);
    }

    fn clear(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        self.value.take().drop_with_heap(heap);
        self.error = None;
        self.state = State::Unset;
        self.checked = false;
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self.state, State::Committed(_))
    }

    /// Returns the committed convention and marks it as checked.
    ///
    /// Returns `None` while uncommitted.
    pub fn convention(&mut self) -> Option<ReturnConvention> {
        match self.state {
            State::Committed(convention) => {
                self.checked = true;
                Some(convention)
            }
            State::Unset => None,
        }
    }

    /// The committed convention, without marking it checked.
    ///
    /// For observers such as trace recorders that never read the value.
    #[must_use]
    pub fn peek_convention(&self) -> Option<ReturnConvention> {
        match self.state {
            State::Committed(convention) => Some(convention),
            State::Unset => None,
        }
    }

    /// Borrows the value without checking or consuming it.
    #[must_use]
    pub(crate) fn peek_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Takes the result value.
    ///
    /// # Panics
    /// With `debug_assertions`, if the result is uncommitted or its convention
    /// was not checked with [`convention`](Self::convention) first.
    pub fn take_value(&mut self) -> Option<Value> {
        debug_assert!(self.is_committed(), "dispatch result read before it was committed");
        debug_assert!(
            self.checked,
            "dispatch result read without checking its return convention"
        );
        self.value.take()
    }

    /// Takes the pending error, if any.
    pub fn take_error(&mut self) -> Option<RunError> {
        self.error.take()
    }

    /// Interprets the result under its convention.
    ///
    /// `Ok(None)` means "no value" for `NoValue` and "not found" for
    /// `NullableNoError`. A `NullableWithError` result without a value yields
    /// its pending error. Reading an uncommitted result is an internal error
    /// (and a panic with `debug_assertions`).
    pub fn into_result(mut self) -> RunResult<Option<Value>> {
        let Some(convention) = self.convention() else {
            if cfg!(debug_assertions) {
                panic!("dispatch result read before it was committed");
            }
            return Err(RunError::internal("dispatch result read before it was committed"));
        };
        match (convention, self.value.take()) {
            (ReturnConvention::HasValue, Some(value)) => Ok(Some(value)),
            (ReturnConvention::HasValue, None) => Err(RunError::internal("HAS_VALUE result carried no value")),
            (ReturnConvention::NoValue | ReturnConvention::NullableNoError, value) => Ok(value),
            (ReturnConvention::NullableWithError, Some(value)) => Ok(Some(value)),
            (ReturnConvention::NullableWithError, None) => Err(self
                .error
                .take()
                .unwrap_or_else(|| RunError::internal("null result without a pending error"))),
        }
    }
}

impl From<RunResult<Value>> for DispatchReturn {
    /// Commits a fallible result as `NullableWithError`.
    fn from(result: RunResult<Value>) -> Self {
        match result {
            Ok(value) => Self::committed(ReturnConvention::NullableWithError, Some(value), None),
            Err(error) => Self::error(error),
        }
    }
}

impl<T: ResourceTracker> DropWithHeap<T> for DispatchReturn {
    fn drop_with_heap(self, heap: &mut Heap<T>) {
        self.value.drop_with_heap(heap);
    }
}
