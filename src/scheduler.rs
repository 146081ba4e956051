//! Tagged recurring tasks
//!
//! Every recurring concern (sweeps, settlement, monitors) runs as its own
//! tokio task with an independent interval. A failing run is logged and the
//! task keeps its schedule. `stop()` only prevents future runs; a run that is
//! already executing finishes normally.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::metrics;

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Run `task` every `period`. With `run_immediately` the first run starts
    /// right away, otherwise after one period.
    pub fn every<F, Fut>(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        run_immediately: bool,
        mut task: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let start = if run_immediately {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        if let Err(e) = task().await {
                            warn!(task = %task_name, error = %e, "Scheduled task failed");
                            metrics::record_task_failure(&task_name);
                        }
                    }
                }
            }

            debug!(task = %task_name, "Scheduled task stopped");
        });

        self.tasks.push((name, handle));
    }

    /// Signal every task to stop after its current run
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait for every task to exit. Call after `stop()`.
    pub async fn join(&mut self) {
        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Scheduled task panicked");
            }
        }
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>, fail: bool) -> impl FnMut() -> futures::future::Ready<eyre::Result<()>> {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(if fail {
                Err(eyre::eyre!("boom"))
            } else {
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.every("tick", Duration::from_secs(10), true, counting(&runs, false));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        scheduler.stop();
        scheduler.join().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_start() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.every("later", Duration::from_secs(10), false, counting(&runs, false));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let failing = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.every("failing", Duration::from_secs(1), true, counting(&failing, true));
        scheduler.every("healthy", Duration::from_secs(1), true, counting(&healthy, false));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(failing.load(Ordering::SeqCst), 4);
        assert_eq!(healthy.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.task_names(), vec!["failing", "healthy"]);

        scheduler.stop();
        scheduler.join().await;
        assert!(scheduler.is_stopped());
    }
}
