//! Trace recording hooks for the argument rearranger.
//!
//! When a recording session is active, every decision the rearranger makes on
//! a concrete call is mirrored into a trace: guards asserting the shape the
//! call had (argument counts, `*args` length, `**kwargs` keys, slot types), the
//! materialized call with the source of every bound slot, and the return
//! convention the continuation committed to. A consumer can later replay the
//! trace behind its guards.
//!
//! Only what actually happened is recorded. The rearranger never speculates
//! about paths it did not take.
//!
//! # Architecture
//!
//! The rearranger is generic over `R: TraceRecorder`, so the hook calls are
//! monomorphized per recorder type:
//!
//! | Recorder              | Overhead    | Use case                      |
//! |-----------------------|-------------|-------------------------------|
//! | `NoopRecorder`        | Zero        | Production (default)          |
//! | `StderrRecorder`      | High        | Interactive debugging         |
//! | `RecordingRecorder`   | Medium      | Trace capture for replay      |
//!
//! With `NoopRecorder`, `is_recording()` is a constant `false` and every hook
//! body is empty, so the recording branches fold away entirely.

use std::fmt;

use crate::{convention::ReturnConvention, signature::SlotSource, types::Type};

/// A guard condition recorded into a trace.
///
/// Each guard asserts a fact about the concrete call that was observed while
/// recording. Replaying the trace is only valid while every guard holds.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Guard {
    /// The call-site shape.
    ArgShape {
        /// Inline positional arguments.
        num_args: usize,
        /// Inline keyword arguments.
        num_keywords: usize,
        has_starargs: bool,
        has_kwargs: bool,
    },
    /// The type (and length, for sized iterables) of the `*args` value.
    StarArgs { ty: Type, len: Option<usize> },
    /// The keys of the `**kwargs` mapping, in iteration order.
    KwargsKeys(Vec<String>),
    /// The type of the value bound to a guarded slot.
    SlotType {
        slot: usize,
        /// The type the callee declared for this slot.
        expected: Type,
        /// The type actually bound. A trace whose `observed` differs from
        /// `expected` is specialized to a call the callee did not anticipate.
        observed: Type,
    },
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgShape {
                num_args,
                num_keywords,
                has_starargs,
                has_kwargs,
            } => {
                write!(f, "args={num_args} kwargs={num_keywords}")?;
                if *has_starargs {
                    f.write_str(" *")?;
                }
                if *has_kwargs {
                    f.write_str(" **")?;
                }
                Ok(())
            }
            Self::StarArgs { ty, len: Some(len) } => write!(f, "*args is {ty} of len {len}"),
            Self::StarArgs { ty, len: None } => write!(f, "*args is {ty}"),
            Self::KwargsKeys(keys) => write!(f, "**kwargs keys {keys:?}"),
            Self::SlotType {
                slot,
                expected,
                observed,
            } => write!(f, "slot {slot} is {observed} (declared {expected})"),
        }
    }
}

/// A recorded trace operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TraceOp {
    Guard(Guard),
    /// The inline call to the bound continuation.
    Call {
        /// Name of the callee.
        target: String,
        /// Where each named slot's value came from.
        sources: Vec<SlotSource>,
        /// Length of the `*args` capture, if the callee has one.
        var_args: Option<usize>,
        /// Number of entries in the `**kwargs` capture, if the callee has one.
        var_kwargs: Option<usize>,
    },
    /// The return convention the continuation committed to, and the type of
    /// its value when one was present.
    Return {
        convention: ReturnConvention,
        ty: Option<Type>,
    },
}

/// Hooks called by the rearranger while a recording session is active.
///
/// All methods have default no-op implementations, so implementors only
/// override the hooks they care about. `is_recording` is the context flag:
/// the rearranger calls the other hooks only while it returns `true`.
pub trait TraceRecorder: fmt::Debug {
    /// Whether a recording session is active.
    #[inline(always)]
    fn is_recording(&self) -> bool {
        false
    }

    /// Called for each guard the current call requires.
    ///
    /// # Arguments
    /// * `guard` - The condition that held on this call
    #[inline(always)]
    fn record_guard(&mut self, _guard: Guard) {}

    /// Called once binding has succeeded, just before the continuation runs.
    ///
    /// # Arguments
    /// * `target` - Callee name
    /// * `sources` - Origin of every named slot, in slot order
    /// * `var_args` - Length of the `*args` capture, if any
    /// * `var_kwargs` - Size of the `**kwargs` capture, if any
    #[inline(always)]
    fn record_call(
        &mut self,
        _target: &str,
        _sources: &[SlotSource],
        _var_args: Option<usize>,
        _var_kwargs: Option<usize>,
    ) {
    }

    /// Called after the continuation has committed its result.
    ///
    /// # Arguments
    /// * `convention` - The committed return convention
    /// * `ty` - Type of the returned value, if one is present
    #[inline(always)]
    fn record_return(&mut self, _convention: ReturnConvention, _ty: Option<Type>) {}
}

// ============================================================================
// NoopRecorder: zero-cost production default
// ============================================================================

/// A recorder that never records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl TraceRecorder for NoopRecorder {}

// ============================================================================
// StderrRecorder: human-readable trace log
// ============================================================================

/// Recorder that prints every trace operation to stderr.
///
/// Output format:
/// ```text
///   ??? GUARD args=2 kwargs=1
///   ??? GUARD slot 0 is int (declared int)
///   >>> CALL f  sources=[Positional(0), Positional(1), Keyword(0)]
///   <<< RETURN HAS_VALUE int
/// ```
#[derive(Debug)]
pub struct StderrRecorder {
    /// Maximum number of operations to print before going quiet. None = unlimited.
    ///
    /// Hooks called directly, without checking `is_recording`, are also silenced.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            count: 0,
            stopped: false,
        }
    }

    /// Creates a stderr recorder that stops after `limit` operations.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
            stopped: false,
        }
    }

    fn tick(&mut self) {
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} operations) ---");
            self.stopped = true;
        }
    }
}

impl Default for StderrRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder for StderrRecorder {
    fn is_recording(&self) -> bool {
        !self.stopped
    }

    fn record_guard(&mut self, guard: Guard) {
        if self.stopped {
            return;
        }
        eprintln!("  ??? GUARD {guard}");
        self.tick();
    }

    fn record_call(&mut self, target: &str, sources: &[SlotSource], var_args: Option<usize>, var_kwargs: Option<usize>) {
        if self.stopped {
            return;
        }
        eprint!("  >>> CALL {target}  sources={sources:?}");
        if let Some(n) = var_args {
            eprint!("  *args={n}");
        }
        if let Some(n) = var_kwargs {
            eprint!("  **kwargs={n}");
        }
        eprintln!();
        self.tick();
    }

    fn record_return(&mut self, convention: ReturnConvention, ty: Option<Type>) {
        if self.stopped {
            return;
        }
        match ty {
            Some(ty) => eprintln!("  <<< RETURN {convention} {ty}"),
            None => eprintln!("  <<< RETURN {convention}"),
        }
        self.tick();
    }
}

// ============================================================================
// RecordingRecorder: trace capture for replay
// ============================================================================

/// Recorder that collects trace operations into a [`RecordedTrace`].
///
/// Recording starts active. Once `max_ops` operations have been captured the
/// session aborts: `is_recording()` turns false and the trace is marked
/// aborted, since a truncated trace cannot be replayed.
///
/// # Usage
///
/// ```
/// use strix::recorder::{RecordingRecorder, TraceRecorder};
///
/// let mut recorder = RecordingRecorder::new();
/// assert!(recorder.is_recording());
/// let trace = recorder.finish();
/// assert!(trace.ops().is_empty());
/// ```
#[derive(Debug)]
pub struct RecordingRecorder {
    ops: Vec<TraceOp>,
    max_ops: Option<usize>,
    active: bool,
    aborted: bool,
}

impl RecordingRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            max_ops: None,
            active: true,
            aborted: false,
        }
    }

    /// Creates a recorder that aborts after `max_ops` operations.
    #[must_use]
    pub fn with_limit(max_ops: usize) -> Self {
        Self {
            max_ops: Some(max_ops),
            ..Self::new()
        }
    }

    /// Pauses recording without discarding what has been captured.
    pub fn pause(&mut self) {
        self.active = false;
    }

    /// Resumes a paused session. Has no effect once aborted.
    pub fn resume(&mut self) {
        self.active = !self.aborted;
    }

    #[must_use]
    pub fn ops(&self) -> &[TraceOp] {
        &self.ops
    }

    /// Ends the session and returns the captured trace.
    #[must_use]
    pub fn finish(self) -> RecordedTrace {
        RecordedTrace {
            ops: self.ops,
            aborted: self.aborted,
        }
    }

    fn push(&mut self, op: TraceOp) {
        if self.aborted {
            return;
        }
        self.ops.push(op);
        if let Some(max) = self.max_ops
            && self.ops.len() >= max
        {
            self.active = false;
            self.aborted = true;
        }
    }
}

impl Default for RecordingRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder for RecordingRecorder {
    #[inline]
    fn is_recording(&self) -> bool {
        self.active
    }

    fn record_guard(&mut self, guard: Guard) {
        self.push(TraceOp::Guard(guard));
    }

    fn record_call(&mut self, target: &str, sources: &[SlotSource], var_args: Option<usize>, var_kwargs: Option<usize>) {
        self.push(TraceOp::Call {
            target: target.to_owned(),
            sources: sources.to_vec(),
            var_args,
            var_kwargs,
        });
    }

    fn record_return(&mut self, convention: ReturnConvention, ty: Option<Type>) {
        self.push(TraceOp::Return { convention, ty });
    }
}

/// A captured trace.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordedTrace {
    ops: Vec<TraceOp>,
    /// Whether recording hit its operation limit before the trace was finished.
    aborted: bool,
}

impl RecordedTrace {
    #[must_use]
    pub fn ops(&self) -> &[TraceOp] {
        &self.ops
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// The guards in recording order.
    pub fn guards(&self) -> impl Iterator<Item = &Guard> {
        self.ops.iter().filter_map(|op| match op {
            TraceOp::Guard(guard) => Some(guard),
            _ => None,
        })
    }

    /// Serializes the trace to a compact binary form.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a trace from bytes produced by [`dump`](Self::dump).
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid trace.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_recorder_stays_quiet_past_its_limit() {
        let mut recorder = StderrRecorder::with_limit(1);
        recorder.record_guard(Guard::KwargsKeys(vec!["a".to_owned()]));
        assert!(!recorder.is_recording());

        recorder.record_guard(Guard::KwargsKeys(vec![]));
        recorder.record_call("f", &[], None, None);
        recorder.record_return(ReturnConvention::NoValue, None);
        assert_eq!(recorder.count, 1);
    }
}
