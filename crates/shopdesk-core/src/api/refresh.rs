//! Single-flight token refresh.
//!
//! Requests that hit a 401 at the same time all await one shared refresh
//! future instead of each calling the refresh endpoint.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use super::ApiError;

pub(crate) type RefreshResult = Result<(), Arc<ApiError>>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    inflight: Mutex<Option<SharedRefresh>>,
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the refresh in flight, or start one with `start` if there is none.
    pub(crate) async fn run<F>(&self, start: F) -> RefreshResult
    where
        F: FnOnce() -> BoxFuture<'static, RefreshResult>,
    {
        let shared = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    let refresh = start().shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = shared.clone().await;

        // Only the refresh we awaited may be removed; a newer one stays
        let mut slot = self.inflight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
            *slot = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_runs_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .run(move || {
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(())
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_runs_refresh_again() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            coordinator
                .run(move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let coordinator = RefreshCoordinator::new();
        let result = coordinator
            .run(|| async { Err(Arc::new(ApiError::AuthenticationRequired)) }.boxed())
            .await;
        assert!(matches!(
            result.as_ref().map_err(|e| e.as_ref()),
            Err(ApiError::AuthenticationRequired)
        ));
    }
}
