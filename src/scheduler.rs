//! Fixed-interval background job runner.
//!
//! Each job gets its own tokio task: it runs immediately, then re-fires
//! an interval after the *end* of the previous run (not wall-clock
//! aligned). A failing tick is logged and retried on the next tick; one
//! job's failures never affect another's timer.
//!
//! Cancellation is cooperative: shutdown is observed at the next sleep
//! boundary, never mid-run. [`BackgroundScheduler::shutdown`] signals
//! every loop, waits up to the grace period for in-flight runs to
//! return, and only then aborts stragglers.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs a fixed set of named periodic jobs until shutdown.
pub struct BackgroundScheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    grace: Duration,
}

impl BackgroundScheduler {
    /// Create a scheduler whose shutdown waits up to `grace` per job for
    /// in-flight work to finish.
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
            grace,
        }
    }

    /// Register and start a named periodic job.
    ///
    /// The job factory is called once per tick; the first tick starts
    /// immediately. Tick errors are logged and do not stop the timer.
    pub fn spawn_job<F, Fut>(&mut self, name: &str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let job_name = name.to_string();

        let handle = tokio::spawn({
            let job_name = job_name.clone();
            async move {
                loop {
                    debug!(job = %job_name, "job tick");
                    if let Err(e) = job().await {
                        error!(job = %job_name, "job tick failed: {:#}", e);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown_rx.changed() => {
                            info!(job = %job_name, "job cancelled");
                            break;
                        }
                    }
                }
            }
        });

        self.tasks.push((job_name, handle));
    }

    /// Number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every job and wait for in-flight runs.
    ///
    /// Jobs sleeping between ticks stop immediately; a job mid-run gets
    /// up to the grace period to return before its task is aborted.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.tasks {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.grace, handle).await {
                Ok(_) => debug!(job = %name, "job stopped"),
                Err(_) => {
                    warn!(job = %name, "job did not stop within grace period; aborting");
                    abort.abort();
                }
            }
        }
    }
}
