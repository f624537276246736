//! Apply callbacks and cancellation
//!
//! These traits allow the engine to report progress and ask for
//! confirmation without depending on a particular terminal UI.

use crate::types::{ExecuteSummary, OperationKind, OperationResult};
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for execution operations
///
/// All calls are made from the coordinating thread, in the order in which
/// operations start and finish.
pub trait ProgressCallback: Send {
    /// Called once before any operation starts
    fn on_apply_start(&mut self, total: usize);

    /// Called when an operation is handed to a worker
    fn on_operation_start(&mut self, name: &str, operation: OperationKind);

    /// Called when an operation reaches a terminal state, including skips
    fn on_operation_complete(&mut self, result: &OperationResult);

    /// Called after every operation is terminal
    fn on_apply_complete(&mut self, summary: &ExecuteSummary);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_apply_start(&mut self, _total: usize) {}
    fn on_operation_start(&mut self, _name: &str, _operation: OperationKind) {}
    fn on_operation_complete(&mut self, _result: &OperationResult) {}
    fn on_apply_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Shared flag that stops the executor from starting new operations.
///
/// In-flight operations still run to completion and are committed.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_signal_shared_between_clones() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_aborted());
        signal.abort();
        assert!(clone.is_aborted());
    }

    #[test]
    fn test_confirm_callbacks() {
        assert!(AutoConfirm.confirm("Apply?").unwrap());
        assert!(!AutoDecline.confirm("Apply?").unwrap());
    }
}
