//! Racing futures against cancellation and deadlines

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{CommonError, CommonResult};

/// Run `fut` until it completes, `cancel` fires, or `timeout` elapses.
///
/// Cancellation wins ties and is reported as
/// [`CommonError::TaskCancelled`]; an elapsed deadline is reported as
/// [`CommonError::Timeout`]. The losing future is dropped.
pub async fn race_cancellation_and_timeout<F, T>(
    operation: &str,
    fut: F,
    cancel: &CancellationToken,
    timeout: Duration,
) -> CommonResult<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(CommonError::task_cancelled_with_reason(operation, "cancelled by caller"))
        }
        result = tokio::time::timeout(timeout, fut) => {
            result.map_err(|_| CommonError::timeout(operation, timeout))
        }
    }
}
