use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::job::AggregationJob;
use crate::config::ShutdownPolicy;

struct ScheduledJob {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs registered aggregation jobs on fixed intervals
///
/// - At most one loop per job name; scheduling an existing name replaces it
/// - Each loop awaits its run inline, so runs never overlap and late ticks are skipped
/// - The first run happens one full interval after scheduling
pub struct AggregationScheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    policy: ShutdownPolicy,
}

impl AggregationScheduler {
    pub fn new(policy: ShutdownPolicy) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Register `job` to run every `period`, replacing any job with the same name
    pub async fn schedule(&self, job: AggregationJob, period: Duration) {
        let name = job.name().to_string();
        let mut jobs = self.jobs.lock().await;

        if let Some(previous) = jobs.remove(&name) {
            tracing::info!(job = %name, "Replacing existing aggregation schedule");
            self.stop_job(&name, previous).await;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::new(job), period, stop_rx));
        jobs.insert(name.clone(), ScheduledJob { stop, handle });

        tracing::info!(
            job = %name,
            interval_secs = period.as_secs(),
            "Aggregation job scheduled"
        );
    }

    pub async fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every loop according to the shutdown policy
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (name, job) in jobs.drain() {
            self.stop_job(&name, job).await;
        }
        tracing::info!("Aggregation scheduler stopped");
    }

    async fn stop_job(&self, name: &str, job: ScheduledJob) {
        let _ = job.stop.send(true);

        if self.policy == ShutdownPolicy::Abort {
            job.handle.abort();
        }

        match job.handle.await {
            Ok(()) => tracing::debug!(job = %name, "Aggregation loop stopped"),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(job = %name, "Aggregation loop aborted")
            }
            Err(e) => tracing::error!(job = %name, error = %e, "Aggregation loop failed"),
        }
    }
}

async fn run_loop(job: Arc<AggregationJob>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = interval.tick() => {}
        }

        run_once(&job).await;
    }
}

async fn run_once(job: &AggregationJob) {
    tracing::info!(job = %job.name(), "Starting log aggregation");

    match job.run().await {
        Ok(report) => {
            crate::metrics::record_aggregation_run("success");
            tracing::info!(
                job = %job.name(),
                window_start = %report.window_start,
                window_end = %report.window_end,
                records = report.records_scanned,
                summaries = report.summaries_written,
                "Log aggregation completed"
            );
        }
        Err(e) => {
            crate::metrics::record_aggregation_run("failure");
            tracing::error!(job = %job.name(), error = %e, "Log aggregation failed");
        }
    }
}
