// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::DispatcherError;

const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Calls `f` until it succeeds or `max_attempts` is exhausted.
///
/// On error, sleeps `attempt * BASE_BACKOFF` capped at `MAX_BACKOFF`, then
/// retries. Cancellation is honored before every attempt, including the
/// first. On total exhaustion, returns the last underlying error verbatim
/// (not a retry-exhausted wrapper).
pub async fn retry<F, Fut, T>(
    cancel: &CancellationToken,
    max_attempts: u32,
    mut f: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(DispatcherError::Cancellation.into());
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e);
                }
                let backoff = BASE_BACKOFF.saturating_mul(attempt).min(MAX_BACKOFF);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DispatcherError::Cancellation.into()),
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = retry(&cancel, 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry(&cancel, 2, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("fail"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn succeeds_on_nth_attempt() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = retry(&cancel, 3, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(anyhow::anyhow!("not yet"))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry(&cancel, 5, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("fail"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
