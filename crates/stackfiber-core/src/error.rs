//! Error types for the stackfiber runtime
//!
//! Errors come in two kinds. Recoverable ones (stack mapping, config)
//! are returned to the caller. Fatal ones mean a machine context or a
//! fiber's bookkeeping can no longer be trusted; the runtime logs them
//! and aborts the process instead of returning.

use core::fmt;
use crate::id::FiberId;
use crate::state::FiberState;

/// Result type for fiber operations
pub type FiberResult<T> = Result<T, FiberError>;

/// Errors that can occur in fiber operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberError {
    /// Operation not legal in the fiber's current state
    IllegalStateTransition {
        id: FiberId,
        op: &'static str,
        state: FiberState,
    },

    /// Saved machine context cannot be transferred to
    ContextTransferFailure {
        id: FiberId,
        reason: &'static str,
    },

    /// A task panicked; unwinding cannot cross a context switch
    TaskPanicked { id: FiberId },

    /// Main fiber construction re-entered itself
    RegistryReentered,

    /// Stack mapping failed
    MemoryError(MemoryError),

    /// Invalid configuration
    InvalidConfig(&'static str),
}

impl FiberError {
    /// Whether this error must abort the process
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            FiberError::IllegalStateTransition { .. }
                | FiberError::ContextTransferFailure { .. }
                | FiberError::TaskPanicked { .. }
                | FiberError::RegistryReentered
        )
    }
}

impl fmt::Display for FiberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberError::IllegalStateTransition { id, op, state } => {
                write!(f, "illegal {} on fiber {} in state {}", op, id, state)
            }
            FiberError::ContextTransferFailure { id, reason } => {
                write!(f, "context transfer to fiber {} failed: {}", id, reason)
            }
            FiberError::TaskPanicked { id } => write!(f, "task of fiber {} panicked", id),
            FiberError::RegistryReentered => write!(f, "fiber registry initialization re-entered"),
            FiberError::MemoryError(e) => write!(f, "memory error: {}", e),
            FiberError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for FiberError {}

/// Stack memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// munmap failed
    ReleaseFailed,

    /// Requested size overflows when rounded to pages
    SizeOverflow,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::ReleaseFailed => write!(f, "stack release failed"),
            MemoryError::SizeOverflow => write!(f, "stack size overflow"),
        }
    }
}

impl From<MemoryError> for FiberError {
    fn from(e: MemoryError) -> Self {
        FiberError::MemoryError(e)
    }
}

/// Semaphore construction errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreError {
    /// Initial count was below zero
    NegativeCount(i64),
}

impl fmt::Display for SemaphoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemaphoreError::NegativeCount(n) => {
                write!(f, "semaphore count must be non-negative, got {}", n)
            }
        }
    }
}

impl std::error::Error for SemaphoreError {}
