use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::traits::JobCallback;

struct ScheduledJob {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Process-wide scheduler for recurring jobs keyed by id.
///
/// Created and shut down by the entry point, shared by reference. Each job
/// runs on its own tokio task; the first run happens one `interval` after
/// arming. Runs of the same job never overlap.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Arm `callback` to run every `interval`, replacing any job with the same id.
    pub fn schedule_recurring(&self, id: &str, interval: Duration, callback: JobCallback) {
        let token = self.root.child_token();
        let job_token = token.clone();
        let job_id = id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = job_token.cancelled() => break,
                    _ = ticker.tick() => {
                        tracing::trace!(job = %job_id, "running scheduled job");
                        callback(job_token.clone()).await;
                    }
                }
            }
            tracing::debug!(job = %job_id, "scheduled job stopped");
        });

        let previous = self.jobs.lock().insert(
            id.to_string(),
            ScheduledJob {
                token,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::debug!(job = id, "replaced armed job");
        }
        tracing::info!(job = id, interval_secs = interval.as_secs(), "job armed");
    }

    /// Disarm a job. Returns whether one was armed; an unknown id is not an error.
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.lock().remove(id) {
            Some(job) => {
                job.token.cancel();
                tracing::info!(job = id, "job cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.jobs.lock().contains_key(id)
    }

    /// Ids of all armed jobs, sorted.
    pub fn armed_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel every job and wait for their tasks to wind down.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let jobs: Vec<ScheduledJob> = self.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in jobs {
            if let Err(e) = job.handle.await {
                tracing::warn!("scheduled job ended abnormally: {e}");
            }
        }
        tracing::info!("scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
