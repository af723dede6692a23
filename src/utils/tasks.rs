use log::{debug, error};
use std::future::Future;
use tokio::task::JoinHandle;

/// Spawns `future` and a watcher that logs its error or panic.
///
/// The returned handle belongs to the watcher; aborting it leaves the work
/// itself running.
pub fn spawn_logged<F>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let task = tokio::spawn(future);
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} failed: {:#}", name, e),
            Err(e) if e.is_cancelled() => debug!("{} cancelled", name),
            Err(e) => error!("{} panicked: {}", name, e),
        }
    })
}
