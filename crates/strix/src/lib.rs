#![doc = include_str!("../../../README.md")]

// first to include defer_drop macro
pub mod heap;

pub mod args;
pub mod convention;
pub mod exception;
pub mod intern;
pub mod object;
pub mod rearrange;
pub mod recorder;
pub mod resource;
pub mod signature;
pub mod types;
pub mod value;

pub use crate::{
    args::{ArgSpec, ArgValues, KeywordName, KwargsValues},
    convention::{DispatchReturn, ReturnConvention},
    exception::{ErrorKind, ExcType, RunError, RunResult, SimpleException},
    heap::{DropWithHeap, Heap, HeapData, HeapGuard, HeapId, HeapStats, Liveness, TraceRefs},
    intern::{InternerBuilder, Interns, StringId},
    object::Object,
    rearrange::{Callee, rearrange, rearrange_and_call},
    recorder::{Guard, NoopRecorder, RecordedTrace, RecordingRecorder, StderrRecorder, TraceOp, TraceRecorder},
    resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    signature::{BoundArgs, Signature, SlotSource},
    types::{Deque, DequeLayout, Type},
    value::Value,
};
