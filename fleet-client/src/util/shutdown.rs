//! Process-wide interrupt signal.

use once_cell::sync::Lazy;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Cancelled on Ctrl+C; long-running commands race their work against it.
pub static SHUTDOWN: Lazy<CancellationToken> = Lazy::new(CancellationToken::new);

/// Await `fut` unless `shutdown` fires first, in which case `fut` is dropped
/// and `None` is returned.
pub async fn until_shutdown<T>(
    shutdown: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        res = fut => Some(res),
    }
}
