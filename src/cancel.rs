//! Cooperative cancellation for long-running stages.
//!
//! Metadata generation, transformation and AAG generation are the stages long enough to
//! warrant mid-flight cancellation (§5). Each checks a [`CancellationToken`] at row
//! boundaries (generation, transformation) or per-node boundaries (AAG generation) and
//! returns [`crate::error::CoreError::Cancelled`] as soon as it is observed, discarding
//! whatever partial output it had accumulated for the current unit of work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// A cheaply-cloneable, thread-safe flag an embedding application can flip to ask a
/// running stage to stop at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(CoreError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
