use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};

/// Cooperative cancellation shared between a sync task and its owner.
///
/// Push and pull check the flag between chunk transfers; work already
/// committed stays committed.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`SyncError::Cancelled`] once the flag is set.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
