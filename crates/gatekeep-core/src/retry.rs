//! Caller-side retry on unit contention.
//!
//! The engine never retries internally. Callers that expect contention wrap an
//! operation in [`retry_on_conflict`], which re-runs it (re-reading the unit each
//! time) while it fails with [`ConstraintError::Conflict`].

use std::future::Future;
use std::time::Duration;

use crate::error::ConstraintError;

/// Base delay between conflict retries, doubled on each attempt.
pub const BASE_CONFLICT_BACKOFF_MS: u64 = 10;

/// Maximum delay between conflict retries.
pub const MAX_CONFLICT_BACKOFF_MS: u64 = 1000;

/// Backoff in milliseconds before retry number `attempt` (exponential with cap).
pub fn conflict_backoff_ms(attempt: u32) -> u64 {
    2_u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(BASE_CONFLICT_BACKOFF_MS))
        .map_or(MAX_CONFLICT_BACKOFF_MS, |ms| ms.min(MAX_CONFLICT_BACKOFF_MS))
}

/// Run `op` until it succeeds, fails with anything other than a conflict, or has
/// been retried `max_retries` times.
pub async fn retry_on_conflict<T, F, Fut>(
    max_retries: u32,
    mut op: F,
) -> Result<T, ConstraintError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConstraintError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < max_retries => {
                let backoff_ms = conflict_backoff_ms(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_retries,
                    backoff_ms,
                    "Conflict on unit, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> ConstraintError {
        ConstraintError::Conflict(RegistryError::Conflict {
            constraint_id: "deploys".into(),
            unit: "infra-1".into(),
            expected: 0,
        })
    }

    #[test]
    fn backoff_exponential_then_capped() {
        assert_eq!(conflict_backoff_ms(0), 10);
        assert_eq!(conflict_backoff_ms(1), 20);
        assert_eq!(conflict_backoff_ms(6), 640);
        assert_eq!(conflict_backoff_ms(7), MAX_CONFLICT_BACKOFF_MS);
        assert_eq!(conflict_backoff_ms(64), MAX_CONFLICT_BACKOFF_MS);
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = &AtomicU32::new(0);
        let result = retry_on_conflict(5, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(2, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ConstraintError::InvalidPermits {
                permits: 0,
                limits: 1,
            })
        })
        .await;
        assert!(matches!(result, Err(ConstraintError::InvalidPermits { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
