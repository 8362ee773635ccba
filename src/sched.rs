// Cron-style job runner for the reconciler schedules
//
// One detached task per job: sleep until the next fire time, run the job to
// completion, then compute the next fire time. Because the next fire is
// computed after the run finishes, a tick that arrives while the previous
// run is still going is skipped rather than stacked.

use chrono::Local;
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use tokio::task::JoinHandle;

/// Daily at local midnight (sec min hour dom mon dow).
pub const STATUS_TICK: &str = "0 0 0 * * *";

/// Daily at 10:00 local.
pub const INDEX_REFRESH_TICK: &str = "0 0 10 * * *";

#[derive(Default)]
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job on a cron expression. The job factory is called once
    /// per fire.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, expr: &str, job: F) -> anyhow::Result<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = Schedule::from_str(expr)?;
        tracing::info!("scheduled job {name} on '{expr}'");

        self.handles.push(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Local).next() else {
                    tracing::warn!("job {name} has no further fire times");
                    return;
                };
                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                tracing::info!("job {name} firing");
                job().await;
            }
        }));
        Ok(())
    }

    /// Cancel every job task.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
