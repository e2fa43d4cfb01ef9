//! Fire-and-forget background task execution.
//!
//! Refresh tasks are scheduled and never joined: a failure in one must never
//! surface to the foreground call that scheduled it. `spawn` is the one
//! place that boundary is enforced — every background task funnels through
//! it, and every error it catches is logged, never propagated.

use std::future::Future;

use tracing::error;

/// Run `task` to completion on the async runtime without the caller
/// awaiting it. Errors are logged via `tracing` and otherwise dropped.
pub fn spawn<F>(label: &'static str, task: F)
where
    F: Future<Output = crate::error::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = task.await {
            error!(task = label, error = %err, "background refresh task failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn spawned_task_runs_to_completion() {
        let notify = Arc::new(Notify::new());
        let notify2 = notify.clone();
        spawn("test-ok", async move {
            notify2.notify_one();
            Ok(())
        });
        notify.notified().await;
    }

    #[tokio::test]
    async fn spawned_task_failure_is_swallowed() {
        let notify = Arc::new(Notify::new());
        let notify2 = notify.clone();
        spawn("test-err", async move {
            notify2.notify_one();
            Err(crate::error::CacheError::StoreWriteError("boom".into()))
        });
        // the call above must not panic or propagate; reaching this point is the assertion
        notify.notified().await;
    }
}
