//! Follow-up work scheduled from synchronous listeners

use std::future::Future;

use credcache_common::CommonError;
use credcache_domain::CredCacheError;
use tracing::warn;

/// Spawn `fut` onto the current tokio runtime.
///
/// Listeners run synchronously inside `Emitter::fire`; anything they need to
/// await is handed off here. Outside a runtime the work is dropped with a
/// warning.
pub(crate) fn spawn_follow_up<F>(task: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => warn!(task, "no async runtime available; follow-up dropped"),
    }
}

/// Map a runtime-primitive error onto the domain error.
pub(crate) fn into_domain_error(err: CommonError) -> CredCacheError {
    match err {
        CommonError::TaskCancelled { .. } => CredCacheError::Cancelled(err.to_string()),
        CommonError::Timeout { .. } => CredCacheError::Timeout(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cancellation_and_timeout_stay_distinct() {
        let cancelled = into_domain_error(CommonError::task_cancelled("sign_in"));
        let timed_out = into_domain_error(CommonError::timeout("sign_in", Duration::from_secs(1)));
        assert!(cancelled.is_cancellation());
        assert!(matches!(timed_out, CredCacheError::Timeout(_)));
        assert!(!timed_out.is_cancellation());
    }
}
