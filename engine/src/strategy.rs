//! Read strategies.
//!
//! The active strategy is a per-thread context entered through a guard:
//!
//! ```
//! use transfer_engine::strategy::{self, Strategy};
//!
//! {
//!     let _guard = strategy::enter(Strategy::incremental());
//!     assert_eq!(strategy::current(), Strategy::incremental());
//! }
//! assert_eq!(strategy::current(), Strategy::Snapshot);
//! ```
//!
//! Dropping the guard restores the previous strategy, on unwinding too.
//! Transfers read the strategy once, when a run starts.

use serde::Deserialize;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

use crate::error::{EngineError, Result};

/// How a run relates to previous runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    /// Every run handles everything it sees
    #[default]
    Snapshot,
    /// Skip what the watermark already covers
    Incremental {
        #[serde(default)]
        offset: Option<i64>,
    },
    /// Incremental in fixed-size steps (column watermarks only)
    BatchIncremental {
        step: u64,
        #[serde(default)]
        offset: Option<i64>,
    },
}

impl Strategy {
    /// Incremental strategy without offset.
    pub fn incremental() -> Self {
        Strategy::Incremental { offset: None }
    }

    pub fn is_incremental(&self) -> bool {
        !matches!(self, Strategy::Snapshot)
    }

    /// Check that file watermarks can be used under this strategy.
    ///
    /// # Errors
    /// Returns `EngineError::Strategy` for snapshot and batch strategies and
    /// for an incremental strategy with an offset.
    pub fn check_file_hwm_support(&self) -> Result<()> {
        match self {
            Strategy::Snapshot => Err(EngineError::Strategy(
                "watermark kind cannot be used in snapshot strategy".to_string(),
            )),
            Strategy::Incremental { offset: Some(_) } => Err(EngineError::Strategy(
                "if a watermark kind is passed you can't specify an offset".to_string(),
            )),
            Strategy::Incremental { offset: None } => Ok(()),
            Strategy::BatchIncremental { .. } => Err(EngineError::Strategy(
                "watermark kind cannot be used in batch strategy".to_string(),
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Snapshot => write!(f, "SnapshotStrategy"),
            Strategy::Incremental { offset: None } => write!(f, "IncrementalStrategy"),
            Strategy::Incremental { offset: Some(o) } => {
                write!(f, "IncrementalStrategy(offset={})", o)
            }
            Strategy::BatchIncremental { step, .. } => {
                write!(f, "IncrementalBatchStrategy(step={})", step)
            }
        }
    }
}

thread_local! {
    static STACK: RefCell<Vec<Strategy>> = const { RefCell::new(Vec::new()) };
}

/// Strategy active on this thread.
pub fn current() -> Strategy {
    STACK.with(|stack| stack.borrow().last().copied().unwrap_or_default())
}

/// Make `strategy` the active one until the guard is dropped.
pub fn enter(strategy: Strategy) -> StrategyGuard {
    let depth = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(strategy);
        stack.len()
    });
    tracing::debug!("Entered {}", strategy);
    StrategyGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// Run `f` with `strategy` active.
pub fn with_strategy<T>(strategy: Strategy, f: impl FnOnce() -> T) -> T {
    let _guard = enter(strategy);
    f()
}

/// Restores the previous strategy when dropped.
///
/// Bound to the thread that created it.
#[must_use = "the strategy is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct StrategyGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for StrategyGuard {
    fn drop(&mut self) {
        // Truncating instead of popping also unwinds guards leaked by mem::forget
        STACK.with(|stack| stack.borrow_mut().truncate(self.depth - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_snapshot() {
        assert_eq!(current(), Strategy::Snapshot);
    }

    #[test]
    fn test_nested_guards_restore_previous() {
        let outer = enter(Strategy::incremental());
        {
            let _inner = enter(Strategy::BatchIncremental {
                step: 10,
                offset: None,
            });
            assert!(matches!(current(), Strategy::BatchIncremental { .. }));
        }
        assert_eq!(current(), Strategy::incremental());
        drop(outer);
        assert_eq!(current(), Strategy::Snapshot);
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            with_strategy(Strategy::incremental(), || panic!("boom"));
        });
        assert!(result.is_err());
        assert_eq!(current(), Strategy::Snapshot);
    }

    #[test]
    fn test_file_hwm_support() {
        assert!(Strategy::incremental().check_file_hwm_support().is_ok());
        assert!(Strategy::Snapshot.check_file_hwm_support().is_err());
        assert!(Strategy::Incremental { offset: Some(1) }
            .check_file_hwm_support()
            .is_err());
        assert!(Strategy::BatchIncremental {
            step: 1,
            offset: None
        }
        .check_file_hwm_support()
        .is_err());
    }

    #[test]
    fn test_strategy_is_per_thread() {
        let _guard = enter(Strategy::incremental());
        let other = std::thread::spawn(current).join().expect("Failed to join thread");
        assert_eq!(other, Strategy::Snapshot);
    }
}
