use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::types::Type;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Exception classes raised by the runtime core.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// primary exception class - matches any exception in isinstance checks.
    Exception,

    // --- LookupError hierarchy ---
    /// Intermediate class for lookup errors.
    LookupError,
    /// Subclass of LookupError.
    IndexError,
    /// Subclass of LookupError.
    KeyError,

    RuntimeError,
    TypeError,
    ValueError,
    MemoryError,
}

impl ExcType {
    /// Checks if this exception type would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::Exception => true,
            Self::LookupError => matches!(self, Self::IndexError | Self::KeyError),
            _ => false,
        }
    }
}

/// Fine-grained classification of a runtime failure.
///
/// `ExcType` says which exception class a caller would catch; `ErrorKind` says
/// which precondition was violated, so callers that try an alternate overload
/// can tell an arity mismatch from an unknown keyword without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    // --- binding errors ---
    TooManyPositional,
    DuplicateArgument,
    DuplicateKeyword,
    MissingRequired,
    UnexpectedKeyword,
    NoKeywordsAccepted,
    KeywordNotString,
    NotIterable,
    NotMapping,

    // --- container errors ---
    EmptyContainer,
    IndexOutOfRange,
    MutatedDuringIteration,
    MutatedDuringRemoval,
    ValueNotFound,
    ContainerFull,

    ResourceExhausted,
    Other,
}

impl ErrorKind {
    /// Returns true for failures produced while binding call arguments.
    #[must_use]
    pub fn is_binding_error(self) -> bool {
        matches!(
            self,
            Self::TooManyPositional
                | Self::DuplicateArgument
                | Self::DuplicateKeyword
                | Self::MissingRequired
                | Self::UnexpectedKeyword
                | Self::NoKeywordsAccepted
                | Self::KeywordNotString
                | Self::NotIterable
                | Self::NotMapping
        )
    }

    /// Returns true for failures produced by container operations.
    #[must_use]
    pub fn is_container_error(self) -> bool {
        matches!(
            self,
            Self::EmptyContainer
                | Self::IndexOutOfRange
                | Self::MutatedDuringIteration
                | Self::MutatedDuringRemoval
                | Self::ValueNotFound
                | Self::ContainerFull
        )
    }
}

impl ExcType {
    #[must_use]
    pub(crate) fn type_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    /// Creates a TypeError for too many positional arguments.
    ///
    /// Matches CPython's format: `{name}() takes {max} positional argument(s) but {actual} were given`,
    /// or `takes from {min} to {max} positional arguments` when trailing parameters have defaults.
    #[must_use]
    pub(crate) fn type_error_too_many_positional(name: &str, min: usize, max: usize, actual: usize) -> RunError {
        let given_word = if actual == 1 { "was" } else { "were" };
        let takes = if min == max {
            let takes_word = if max == 1 { "argument" } else { "arguments" };
            format!("{max} positional {takes_word}")
        } else {
            format!("from {min} to {max} positional arguments")
        };
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::TooManyPositional,
            format!("{name}() takes {takes} but {actual} {given_word} given"),
        )
        .into()
    }

    /// Creates a TypeError for an argument given both by position and by name.
    ///
    /// Matches CPython's format: `{name}() got multiple values for argument '{param}'`
    #[must_use]
    pub(crate) fn type_error_duplicate_arg(name: &str, param: &str) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::DuplicateArgument,
            format!("{name}() got multiple values for argument '{param}'"),
        )
        .into()
    }

    /// Creates a TypeError for the same keyword supplied twice in one call.
    ///
    /// Matches CPython's format: `{name}() got multiple values for keyword argument '{key}'`
    #[must_use]
    pub(crate) fn type_error_multiple_values(name: &str, key: &str) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::DuplicateKeyword,
            format!("{name}() got multiple values for keyword argument '{key}'"),
        )
        .into()
    }

    /// Creates a TypeError for a required parameter left unbound.
    ///
    /// Matches CPython's builtin format: `{name}() missing required argument '{param}' (pos {pos})`
    /// where `pos` is 1-based.
    #[must_use]
    pub(crate) fn type_error_missing_required(name: &str, param: &str, pos: usize) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::MissingRequired,
            format!("{name}() missing required argument '{param}' (pos {pos})"),
        )
        .into()
    }

    /// Creates a TypeError for a positional-only callee missing arguments.
    ///
    /// Matches CPython's format: `{name}() takes at least {min} positional argument(s) ({actual} given)`
    #[must_use]
    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        let word = if min == 1 { "argument" } else { "arguments" };
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::MissingRequired,
            format!("{name}() takes at least {min} positional {word} ({actual} given)"),
        )
        .into()
    }

    /// Creates a TypeError for unexpected keyword argument.
    ///
    /// Matches CPython's format: `{name}() got an unexpected keyword argument '{key}'`
    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::UnexpectedKeyword,
            format!("{name}() got an unexpected keyword argument '{key}'"),
        )
        .into()
    }

    /// Creates a TypeError for keywords passed to a positional-only entry point.
    ///
    /// Matches CPython's format: `{name}() takes no keyword arguments`
    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::NoKeywordsAccepted,
            format!("{name}() takes no keyword arguments"),
        )
        .into()
    }

    /// Creates a TypeError for `**kwargs` with non-string keys.
    #[must_use]
    pub(crate) fn type_error_kwargs_nonstring_key(name: &str) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::KeywordNotString,
            format!("{name}() keywords must be strings"),
        )
        .into()
    }

    /// Creates a TypeError for a `**` argument that is not a mapping.
    ///
    /// Matches CPython's format: `{name}() argument after ** must be a mapping, not {type_}`
    #[must_use]
    pub(crate) fn type_error_kwargs_not_mapping(name: &str, type_: Type) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::NotMapping,
            format!("{name}() argument after ** must be a mapping, not {type_}"),
        )
        .into()
    }

    /// Creates a TypeError for a `*` argument that is not iterable.
    ///
    /// Matches CPython's format: `{name}() argument after * must be an iterable, not {type_}`
    #[must_use]
    pub(crate) fn type_error_star_args_not_iterable(name: &str, type_: Type) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::NotIterable,
            format!("{name}() argument after * must be an iterable, not {type_}"),
        )
        .into()
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(type_: Type) -> RunError {
        SimpleException::new_kind(
            Self::TypeError,
            ErrorKind::NotIterable,
            format!("'{type_}' object is not iterable"),
        )
        .into()
    }

    /// Creates an IndexError for popping from an empty container.
    ///
    /// Matches CPython's format: `IndexError: pop from an empty deque`
    #[must_use]
    pub(crate) fn index_error_pop_empty(container: Type) -> RunError {
        SimpleException::new_kind(
            Self::IndexError,
            ErrorKind::EmptyContainer,
            format!("pop from an empty {container}"),
        )
        .into()
    }

    /// Creates an IndexError for an out-of-range index.
    ///
    /// Matches CPython's format: `IndexError: deque index out of range`
    #[must_use]
    pub(crate) fn index_error_out_of_range(container: Type) -> RunError {
        SimpleException::new_kind(
            Self::IndexError,
            ErrorKind::IndexOutOfRange,
            format!("{container} index out of range"),
        )
        .into()
    }

    /// Creates an IndexError for inserting into a bounded container that is full.
    #[must_use]
    pub(crate) fn index_error_full(container: Type) -> RunError {
        SimpleException::new_kind(
            Self::IndexError,
            ErrorKind::ContainerFull,
            format!("{container} already at its maximum size"),
        )
        .into()
    }

    /// Creates a RuntimeError for a container changed while an iterator was live.
    ///
    /// Matches CPython's format: `RuntimeError: deque mutated during iteration`
    #[must_use]
    pub(crate) fn runtime_error_mutated_during_iteration(container: Type) -> RunError {
        SimpleException::new_kind(
            Self::RuntimeError,
            ErrorKind::MutatedDuringIteration,
            format!("{container} mutated during iteration"),
        )
        .into()
    }

    /// Creates an IndexError for a container changed while `remove()` scanned it.
    ///
    /// Matches CPython's format: `IndexError: deque mutated during remove().`
    #[must_use]
    pub(crate) fn index_error_mutated_during_remove(container: Type) -> RunError {
        SimpleException::new_kind(
            Self::IndexError,
            ErrorKind::MutatedDuringRemoval,
            format!("{container} mutated during remove()."),
        )
        .into()
    }

    /// Creates a ValueError for `remove(x)` / `index(x)` when x is absent.
    ///
    /// Matches CPython's format: `ValueError: deque.remove(x): x not in deque`
    #[must_use]
    pub(crate) fn value_error_not_in(container: Type, method: &str) -> RunError {
        SimpleException::new_kind(
            Self::ValueError,
            ErrorKind::ValueNotFound,
            format!("{container}.{method}(x): x not in {container}"),
        )
        .into()
    }
}

/// Simple lightweight representation of an exception.
///
/// Exception messages use `String` for owned storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleException {
    exc_type: ExcType,
    kind: ErrorKind,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_str: &'static str = self.exc_type.into();
        match &self.arg {
            Some(arg) => write!(f, "{type_str}: {arg}"),
            None => f.write_str(type_str),
        }
    }
}

impl SimpleException {
    /// Creates a new exception with the given type and optional argument message.
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self {
            exc_type,
            kind: ErrorKind::Other,
            arg,
        }
    }

    /// Creates a new exception with the given type and argument message.
    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl Display) -> Self {
        Self::new(exc_type, Some(arg.to_string()))
    }

    /// Creates a new exception carrying a fine-grained [`ErrorKind`].
    #[must_use]
    pub fn new_kind(exc_type: ExcType, kind: ErrorKind, arg: impl Display) -> Self {
        Self {
            exc_type,
            kind,
            arg: Some(arg.to_string()),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

/// Runtime error types that can occur during execution.
///
/// Three variants:
/// - `Internal`: Bug in the runtime implementation (static message)
/// - `Exc`: exception that a caller may catch and handle (e.g. to try an alternate overload)
/// - `UncatchableExc`: exception from resource limits that must propagate
#[derive(Debug, Serialize, Deserialize)]
pub enum RunError {
    /// Internal runtime error - indicates a bug, not a user error.
    Internal(Cow<'static, str>),
    /// Catchable exception (e.g., ValueError, TypeError).
    Exc(Box<SimpleException>),
    /// Uncatchable exception from resource limits (MemoryError).
    UncatchableExc(Box<SimpleException>),
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal error in strix: {msg}"),
            Self::Exc(exc) | Self::UncatchableExc(exc) => exc.fmt(f),
        }
    }
}

impl std::error::Error for RunError {}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the underlying exception, or `None` for internal errors.
    #[must_use]
    pub fn exception(&self) -> Option<&SimpleException> {
        match self {
            Self::Exc(exc) | Self::UncatchableExc(exc) => Some(exc),
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> Option<ExcType> {
        self.exception().map(SimpleException::exc_type)
    }

    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.exception().map(SimpleException::kind)
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.exception().and_then(SimpleException::arg)
    }

    /// Returns true if this error is a catchable exception of `exc_type`.
    #[must_use]
    pub fn is_exception_type(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(exc) => exc.exc_type().is_subclass_of(exc_type),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn lookup_errors_are_caught_by_their_base() {
        assert!(ExcType::IndexError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::TypeError.is_subclass_of(ExcType::LookupError));
        assert_eq!(ExcType::from_str("MemoryError"), Ok(ExcType::MemoryError));
        // exhausted iterators return `None`; there is no exception class for it
        assert!(ExcType::from_str("StopIteration").is_err());
    }
}
