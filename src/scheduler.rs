//! Periodic trigger of the backup.
//!
//! The first run starts right away, later ones follow every `interval`. Runs never
//! overlap: ticks which fall into a long run are skipped, and a manual trigger while a
//! run is in progress is rejected.

use crate::backup::BackupJob;
use crate::backup::report::BackupReport;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub struct Scheduler {
    job: Arc<dyn BackupJob>,
    interval: Duration,
    busy: AtomicBool,
}

/// Clears the busy flag once a run ends, even if it panicked.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    pub fn new(job: Arc<dyn BackupJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            busy: AtomicBool::new(false),
        }
    }

    /// Runs the backup now unless one is already in progress.
    ///
    /// Returns `None` if the trigger was rejected.
    pub async fn trigger(&self) -> Option<BackupReport> {
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::warn!("A backup is still in progress, skipping this trigger");
            return None;
        }
        let _guard = RunGuard(&self.busy);

        Some(self.job.run(Utc::now()).await)
    }

    /// Triggers the backup every interval until `shutdown` resolves.
    ///
    /// A run in progress when `shutdown` resolves is completed first.
    pub async fn run_periodically<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting backup scheduler"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Stopping backup scheduler");
                    return;
                }
                _ = ticker.tick() => {
                    let _ = self.trigger().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
        active: AtomicUsize,
        overlapped: AtomicBool,
        duration: Duration,
        started: Notify,
    }

    #[async_trait]
    impl BackupJob for CountingJob {
        async fn run(&self, _now: DateTime<Utc>) -> BackupReport {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let _ = self.runs.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();

            tokio::time::sleep(self.duration).await;
            let _ = self.active.fetch_sub(1, Ordering::SeqCst);

            BackupReport::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_interval() {
        let job = Arc::new(CountingJob::default());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(60));

        scheduler
            .run_periodically(tokio::time::sleep(Duration::from_secs(150)))
            .await;

        // Immediately, after 60s and after 120s.
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn long_runs_swallow_missed_ticks() {
        let job = Arc::new(CountingJob {
            duration: Duration::from_secs(150),
            ..Default::default()
        });
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(60));

        scheduler
            .run_periodically(tokio::time::sleep(Duration::from_secs(200)))
            .await;

        // The missed tick starts the second run right after the first one, the shutdown
        // request arriving meanwhile takes effect once it completed.
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        assert!(!job.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_triggers_are_rejected() {
        let job = Arc::new(CountingJob {
            duration: Duration::from_secs(10),
            ..Default::default()
        });
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(60));

        let (first, second) = tokio::join!(scheduler.trigger(), async {
            job.started.notified().await;
            scheduler.trigger().await
        });

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        // Once finished, the next trigger is accepted again.
        assert!(scheduler.trigger().await.is_some());
    }
}
