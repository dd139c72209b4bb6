//! Fiber state machine
//!
//! ```text
//!   Ready --resume--> Running --(task returns)--> Term
//!     ^                  |                          |
//!     +------yield-------+                          |
//!     +-------------------------reset---------------+
//! ```
//!
//! No other transition is legal. The runtime treats an illegal request
//! as fatal rather than ignoring it.

use core::fmt;

/// State of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Created or yielded, may be resumed
    Ready = 0,

    /// Currently executing on its thread
    Running = 1,

    /// Task returned; terminal until reset
    Term = 2,
}

impl FiberState {
    /// `resume()` is only legal from Ready
    #[inline]
    pub const fn can_resume(&self) -> bool {
        matches!(self, FiberState::Ready)
    }

    /// `yield()` is legal while running, and once more after the task returns
    #[inline]
    pub const fn can_yield(&self) -> bool {
        matches!(self, FiberState::Running | FiberState::Term)
    }

    /// `reset()` is only legal from Term
    #[inline]
    pub const fn can_reset(&self) -> bool {
        matches!(self, FiberState::Term)
    }

    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, FiberState::Term)
    }

    /// State a fiber is left in after yielding away
    #[inline]
    pub const fn after_yield(self) -> FiberState {
        match self {
            FiberState::Running => FiberState::Ready,
            other => other,
        }
    }
}

impl From<FiberState> for u8 {
    fn from(state: FiberState) -> u8 {
        state as u8
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberState::Ready => write!(f, "READY"),
            FiberState::Running => write!(f, "RUNNING"),
            FiberState::Term => write!(f, "TERM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(FiberState::Ready.can_resume());
        assert!(!FiberState::Running.can_resume());
        assert!(!FiberState::Term.can_resume());

        assert!(FiberState::Running.can_yield());
        assert!(FiberState::Term.can_yield());
        assert!(!FiberState::Ready.can_yield());

        assert!(FiberState::Term.can_reset());
        assert!(!FiberState::Ready.can_reset());
        assert!(!FiberState::Running.can_reset());
    }

    #[test]
    fn test_after_yield() {
        assert_eq!(FiberState::Running.after_yield(), FiberState::Ready);
        assert_eq!(FiberState::Term.after_yield(), FiberState::Term);
        assert!(FiberState::Term.after_yield().is_terminated());
        assert!(!FiberState::Running.after_yield().is_terminated());
    }

    #[test]
    fn test_display() {
        assert_eq!(FiberState::Term.to_string(), "TERM");
        assert_eq!(u8::from(FiberState::Running), 1);
    }
}
