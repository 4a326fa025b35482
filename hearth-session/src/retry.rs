use std::future::Future;

use hearth_shared::AppResult;

use crate::config::BootstrapConfig;

/// Bounded lookup: one initial attempt plus `retry_limit` retries, each
/// capped at the attempt timeout, with linearly growing backoff between
/// attempts (1x, 2x, 3x the step).
///
/// An empty result is a legitimate answer and returns immediately;
/// exhausting the retries degrades to `None` instead of surfacing an
/// error, so callers treat "not found" as a state, not an exception.
pub(crate) async fn fetch_with_retry<T, F, Fut>(
    what: &str,
    cfg: &BootstrapConfig,
    mut call: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<Option<T>>>,
{
    let total = cfg.retry_limit + 1;
    for attempt in 1..=total {
        match tokio::time::timeout(cfg.attempt_timeout(), call()).await {
            Ok(Ok(found)) => return found,
            Ok(Err(e)) => {
                tracing::warn!(what, attempt, error = %e, "lookup attempt failed");
            }
            Err(_) => {
                tracing::warn!(what, attempt, "lookup attempt timed out");
            }
        }
        if attempt < total {
            tokio::time::sleep(cfg.backoff_step() * attempt).await;
        }
    }
    tracing::warn!(what, "lookup retries exhausted; treating as not found");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use hearth_shared::{AppError, ErrorCode};

    fn fast() -> BootstrapConfig {
        BootstrapConfig {
            attempt_timeout_ms: 100,
            ready_ceiling_ms: 1_000,
            retry_limit: 3,
            backoff_step_ms: 5,
        }
    }

    #[tokio::test]
    async fn persistent_failure_makes_exactly_four_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result: Option<()> = fetch_with_retry("probe", &fast(), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(AppError::new(ErrorCode::ServiceUnavailable, "boom"))
            }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_result_returns_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result: Option<()> = fetch_with_retry("probe", &fast(), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result = fetch_with_retry("probe", &fast(), move || {
            let counted = counted.clone();
            async move {
                if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::new(ErrorCode::Timeout, "slow"))
                } else {
                    Ok(Some(42u32))
                }
            }
        })
        .await;

        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hanging_call_counts_as_a_failed_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result = fetch_with_retry("probe", &fast(), move || {
            let counted = counted.clone();
            async move {
                if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
                Ok(Some(7u32))
            }
        })
        .await;

        assert_eq!(result, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
