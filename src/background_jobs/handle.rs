use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::server_store::{JobRun, ServerStore};
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// A registered job as reported by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobScheduleInfo {
    pub interval_secs: u64,
    pub on_startup: bool,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        Self {
            interval_secs: schedule.interval.as_secs(),
            on_startup: schedule.on_startup,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        Self {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Registered jobs and the subset currently running.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    running: HashSet<String>,
}

impl JobRegistry {
    pub fn register(&mut self, job: Arc<dyn BackgroundJob>) {
        self.jobs.insert(job.id().to_string(), job);
    }

    pub fn count(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<dyn BackgroundJob>> {
        self.jobs.get(job_id).cloned()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.contains(job_id)
    }

    pub fn set_running(&mut self, job_id: &str, running: bool) {
        if running {
            self.running.insert(job_id.to_string());
        } else {
            self.running.remove(job_id);
        }
    }

    /// Registered jobs that are not currently running.
    pub fn idle(&self) -> impl Iterator<Item = (&str, &Arc<dyn BackgroundJob>)> {
        self.jobs
            .iter()
            .filter(|(id, _)| !self.running.contains(*id))
            .map(|(id, job)| (id.as_str(), job))
    }
}

/// Cloneable view of the scheduler for the admin API.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    registry: Arc<RwLock<JobRegistry>>,
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        registry: Arc<RwLock<JobRegistry>>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            registry,
            server_store,
        }
    }

    fn describe(&self, job: &dyn BackgroundJob, is_running: bool) -> Result<JobInfo> {
        let job_id = job.id();
        Ok(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            is_running,
            last_run: self.server_store.get_last_run(job_id)?.map(JobRunInfo::from),
            next_run_at: self
                .server_store
                .get_schedule_state(job_id)?
                .map(|s| s.next_run_at.to_rfc3339()),
        })
    }

    /// All registered jobs, sorted by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let registry = self.registry.read().await;
        let mut jobs = registry
            .jobs
            .values()
            .map(|job| self.describe(job.as_ref(), registry.is_running(job.id())))
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let registry = self.registry.read().await;
        registry
            .get(job_id)
            .map(|job| self.describe(job.as_ref(), registry.is_running(job_id)))
            .transpose()
    }

    /// Asks the scheduler loop to start `job_id` now.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunInfo>> {
        let history = self.server_store.get_job_history(job_id, limit)?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.registry.read().await.is_running(job_id)
    }

    pub async fn job_exists(&self, job_id: &str) -> bool {
        self.registry.read().await.get(job_id).is_some()
    }
}
