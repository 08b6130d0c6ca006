use std::fmt;

use crate::exception::{ErrorKind, ExcType, RunError, SimpleException};

/// Size in bytes past which bulk builders (the `*args` tuple, a deque
/// snapshot for self-extension) ask [`ResourceTracker::check_large_result`]
/// before allocating anything.
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

pub const DEFAULT_GC_INTERVAL: usize = 10_000;

/// A tracker refused an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// `count` would be the allocation past `limit`.
    Allocation { limit: usize, count: usize },
    /// `used` bytes would exceed `limit`.
    Memory { limit: usize, used: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Exhaustion is not catchable by the code that triggered it.
impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc = SimpleException::new_kind(ExcType::MemoryError, ErrorKind::ResourceExhausted, err.to_string());
        Self::UncatchableExc(Box::new(exc))
    }
}

/// Accounting seam between the heap and whoever sets its limits.
///
/// Every slot allocation and every deque block goes through `on_allocate`.
/// Sizes are passed lazily so trackers that do not count bytes never compute
/// them.
pub trait ResourceTracker: fmt::Debug {
    /// Approves or refuses one allocation.
    ///
    /// # Errors
    /// Returns the limit that would be crossed.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Pre-flight for a result of roughly `estimated_bytes`.
    ///
    /// # Errors
    /// Returns the limit that would be crossed.
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError>;

    /// Container allocations between collections.
    fn gc_interval(&self) -> usize {
        DEFAULT_GC_INTERVAL
    }

    /// Allocations approved so far, for trackers that count them.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Bytes currently accounted, for trackers that count them.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Approves everything and counts nothing.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_large_result(&self, _estimated_bytes: usize) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Limits enforced by [`LimitedTracker`]. `None` leaves a dimension unbounded.
///
/// ```
/// use strix::ResourceLimits;
///
/// let limits = ResourceLimits::new().max_allocations(64).max_memory(1 << 20);
/// assert_eq!(limits.gc_interval, None);
/// ```
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub max_allocations: Option<usize>,
    /// Approximate, as reported by payload size estimates.
    pub max_memory: Option<usize>,
    pub gc_interval: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_allocations(self, limit: usize) -> Self {
        Self {
            max_allocations: Some(limit),
            ..self
        }
    }

    #[must_use]
    pub fn max_memory(self, bytes: usize) -> Self {
        Self {
            max_memory: Some(bytes),
            ..self
        }
    }

    #[must_use]
    pub fn gc_interval(self, allocations: usize) -> Self {
        Self {
            gc_interval: Some(allocations),
            ..self
        }
    }
}

/// Counts approved allocations and live bytes against a [`ResourceLimits`].
///
/// The allocation count only grows; freeing gives back bytes, not allocations.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    allocations: usize,
    bytes: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocations: 0,
            bytes: 0,
        }
    }

    fn check_bytes(&self, extra: usize) -> Result<usize, ResourceError> {
        let used = self.bytes.saturating_add(extra);
        match self.limits.max_memory {
            Some(limit) if used > limit => Err(ResourceError::Memory { limit, used }),
            _ => Ok(used),
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_allocations
            && self.allocations >= limit
        {
            return Err(ResourceError::Allocation {
                limit,
                count: self.allocations + 1,
            });
        }
        self.bytes = self.check_bytes(get_size())?;
        self.allocations += 1;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.bytes = self.bytes.saturating_sub(get_size());
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        self.check_bytes(estimated_bytes).map(drop)
    }

    fn gc_interval(&self) -> usize {
        self.limits.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL)
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocations)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.bytes)
    }
}
