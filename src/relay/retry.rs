//! Rate-limit aware retry around a single transport call.

use std::future::Future;

use tracing::warn;

use crate::error::TransportError;
use crate::transport::{ChatId, TransportResult};

/// How many times a rate-limited call is re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    /// Give up after this many retries.
    Limited(usize),
    /// Keep re-issuing until the call stops being rate limited.
    Unbounded,
}

impl RetryBudget {
    fn allows(self, retries: usize) -> bool {
        match self {
            RetryBudget::Limited(max) => retries < max,
            RetryBudget::Unbounded => true,
        }
    }
}

/// Run `request`, sleeping for the platform's `retry_after` and re-issuing
/// it while it reports a rate limit and the budget allows.
///
/// Any other outcome is returned as-is.
pub async fn with_rate_limit_retry<T, F, Fut>(
    operation: &'static str,
    chat_id: ChatId,
    budget: RetryBudget,
    mut request: F,
) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    let mut retries = 0usize;

    loop {
        match request().await {
            Err(TransportError::RateLimited { retry_after }) if budget.allows(retries) => {
                retries += 1;
                warn!(
                    chat_id,
                    operation,
                    retries,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limited, waiting before retry"
                );
                tokio::time::sleep(retry_after).await;
            }
            Err(err @ TransportError::RateLimited { .. }) => {
                warn!(
                    chat_id,
                    operation,
                    retries,
                    "Rate limit persisted after retries"
                );
                return Err(err);
            }
            other => return other,
        }
    }
}
