use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::errors::{AppError, AppResult};

/// Runs `operation` until it stops reporting a rate limit, sleeping `wait`
/// between attempts. There is no attempt ceiling; any other error is
/// returned straight away.
pub async fn with_rate_limit_retry<T, F, Fut>(wait: Duration, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Err(err) if err.is_rate_limited() => {
                warn!(attempt, wait_secs = wait.as_secs_f64(), %err, "rate limited; sleeping before retry");
                sleep(wait).await;
            }
            outcome => return outcome,
        }
    }
}

/// Rate-limit retry plus an optional outer deadline, applied to every
/// remote call the ingest pipeline makes.
#[derive(Debug, Clone, Copy)]
pub struct RemotePolicy {
    pub wait: Duration,
    pub deadline: Option<Duration>,
}

impl RemotePolicy {
    pub fn new(wait: Duration, deadline: Option<Duration>) -> Self {
        Self { wait, deadline }
    }

    pub async fn call<T, F, Fut>(&self, operation_name: &str, operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let retried = with_rate_limit_retry(self.wait, operation);
        match self.deadline {
            None => retried.await,
            Some(limit) => timeout(limit, retried)
                .await
                .map_err(|_| AppError::DeadlineExceeded {
                    operation: operation_name.to_string(),
                    seconds: limit.as_secs(),
                })?,
        }
    }
}
