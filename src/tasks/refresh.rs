//! Stale Refresh Task
//!
//! Handle for the background reload scheduled by a stale read. Dropping the
//! handle detaches the task; it keeps running to completion.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::{CacheError, Result};

#[derive(Debug)]
pub struct RefreshTask {
    id: u64,
    key: String,
    handle: JoinHandle<Result<()>>,
}

impl RefreshTask {
    pub(crate) fn spawn<F>(id: u64, key: String, refresh: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id,
            key,
            handle: tokio::spawn(refresh),
        }
    }

    /// Unique per cache instance, increasing in scheduling order.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the refresh and returns its outcome. A loader failure is
    /// reported here; the stale value stays in place either way.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(CacheError::Internal(format!(
                "refresh task for '{}' did not complete: {}",
                self.key, err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_returns_outcome() {
        let ok = RefreshTask::spawn(1, "a".to_string(), async { Ok(()) });
        assert_eq!(ok.id(), 1);
        assert_eq!(ok.key(), "a");
        assert!(ok.join().await.is_ok());

        let failed = RefreshTask::spawn(2, "b".to_string(), async {
            Err(CacheError::NotFound("b".to_string()))
        });
        assert!(matches!(failed.join().await, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_panicking_refresh_is_reported() {
        let task = RefreshTask::spawn(3, "c".to_string(), async { panic!("loader blew up") });
        assert!(matches!(task.join().await, Err(CacheError::Internal(_))));
    }
}
