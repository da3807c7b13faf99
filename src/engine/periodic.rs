use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Background loop that runs a job every `interval` until its token is
/// cancelled. The first run happens one interval after the start.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
}

impl PeriodicTask {
    pub fn new(name: &'static str, interval: Duration, token: CancellationToken) -> Self {
        Self {
            name,
            interval,
            token,
        }
    }

    pub async fn run<F, Fut>(self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!(task = self.name, "periodic task cancelled");
                    break;
                }
                _ = ticker.tick() => job().await,
            }
        }
    }

    pub fn spawn<F, Fut>(self, job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(job))
    }
}

/// Waits for background tasks after their token was cancelled. A task that
/// panicked or was aborted is logged. Returns the number of such tasks.
pub async fn join_tasks(tasks: Vec<(&'static str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (task, handle) in tasks {
        if let Err(err) = handle.await {
            failed += 1;
            error!(task, "Background task failed: {}", err);
        }
    }
    failed
}
