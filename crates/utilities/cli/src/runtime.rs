//! The async entrypoint of marlin binaries.

use std::future::Future;
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Creates a multi-thread tokio [`Runtime`] with all drivers enabled.
pub fn tokio_runtime() -> Result<Runtime, std::io::Error> {
    Builder::new_multi_thread().enable_all().build()
}

/// Runs `fut` to completion on a new runtime, cancelling `cancel` on ctrl-c.
///
/// `fut` observes the token and winds down on its own, so pending work is flushed before this
/// returns.
pub fn run_until_ctrl_c<F, T>(cancel: CancellationToken, fut: F) -> Result<T, std::io::Error>
where
    F: Future<Output = T>,
{
    let rt = tokio_runtime()?;
    Ok(rt.block_on(async move {
        let signal = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        info!(target: "marlin", "Received ctrl-c, shutting down");
                        signal.cancel();
                    }
                }
                _ = signal.cancelled() => {}
            }
        });
        let out = fut.await;
        cancel.cancel();
        out
    }))
}
