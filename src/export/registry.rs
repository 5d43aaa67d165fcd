//! Process-wide table of export jobs, polled by the status endpoint.

use crate::clock::{Clock, SystemClock};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: String,
    pub dataset: String,
    pub state: JobState,
    /// 0 to 100, never decreasing while running.
    pub percent_complete: u8,
    pub error: Option<String>,
    /// Only set once the job is complete.
    pub artifact: Option<PathBuf>,
    finished_at: Option<Instant>,
}

impl ExportJob {
    pub fn new(id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dataset: dataset.into(),
            state: JobState::Running,
            percent_complete: 0,
            error: None,
            artifact: None,
            finished_at: None,
        }
    }
}

pub struct ExportJobRegistry {
    jobs: RwLock<HashMap<String, ExportJob>>,
    clock: Arc<dyn Clock>,
}

impl Default for ExportJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportJobRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn register(&self, job: ExportJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::Internal(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<ExportJob> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn update_progress(&self, id: &str, percent: u8) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            if job.state == JobState::Running {
                job.percent_complete = job.percent_complete.max(percent.min(100));
            }
        }
    }

    pub async fn mark_complete(&self, id: &str, artifact: PathBuf) {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            job.state = JobState::Complete;
            job.percent_complete = 100;
            job.artifact = Some(artifact);
            job.finished_at = Some(now);
        }
    }

    pub async fn mark_failed(&self, id: &str, message: impl Into<String>) {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            job.state = JobState::Failed;
            job.error = Some(message.into());
            job.artifact = None;
            job.finished_at = Some(now);
        }
    }

    /// Forgets complete and failed jobs that finished more than `retention` ago.
    pub async fn prune_finished(&self, retention: Duration) -> usize {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished) => now.saturating_duration_since(finished) <= retention,
            None => true,
        });
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
