//! Cancellation Manager (C3): set/clear/check the cancellation flag, typed
//! over the Coordination Store.

use crate::error::Result;
use crate::store::{CancelInfo, CoordinationStore};
use std::sync::Arc;

pub struct CancellationManager {
    store: Arc<CoordinationStore>,
}

impl CancellationManager {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    /// Returns `false` on store failure — availability over correctness
    /// (§4.3): the user will see the task continue and can click again.
    pub async fn is_cancelled(&self, task_id: &str) -> bool {
        self.store.is_cancelled(task_id).await
    }

    pub async fn info(&self, task_id: &str) -> Result<Option<CancelInfo>> {
        self.store.cancel_info(task_id).await
    }

    /// Idempotent.
    pub async fn clear(&self, task_id: &str) -> Result<()> {
        self.store.clear_cancelled(task_id).await
    }

    /// Called by the cancel-button handler in the intake process. Fatal on
    /// store failure — the write path must reliably land.
    pub async fn request_cancel(
        &self,
        task_id: &str,
        cancelled_by: &str,
        cancelled_by_id: &str,
    ) -> Result<()> {
        let info = CancelInfo {
            cancelled_by: cancelled_by.to_string(),
            cancelled_by_id: cancelled_by_id.to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.store.set_cancelled(task_id, &info).await
    }
}
