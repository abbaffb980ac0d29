use std::fmt;

use futures::Future;
use tokio::task::{self, JoinHandle};

/// Spawns a background task of the simulator. Its error is logged under
/// `name` instead of being dropped with the handle.
pub fn spawn_logged<Fut, E>(name: &'static str, future: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + fmt::Debug + Send + 'static,
{
    task::spawn(async move {
        match future.await {
            Ok(()) => log::debug!("{} task finished", name),
            Err(e) => {
                log::error!("{} task failed: {}", name, e);
                log::debug!("{} task details: {:?}", name, e);
            }
        }
    })
}
