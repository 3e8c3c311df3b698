use super::context::JobContext;
use super::handle::{JobRegistry, SchedulerCommand, SchedulerHandle};
use super::job::{BackgroundJob, JobError, STARTUP_TRIGGER};
use crate::server::metrics;
use crate::server_store::{JobRunStatus, JobScheduleState, ServerStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps without re-checking schedules.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// How long shutdown waits for each running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct RunningJob {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Starts registered jobs when they are due, at startup, or on request, and
/// records every run in the server store.
pub struct JobScheduler {
    registry: Arc<RwLock<JobRegistry>>,
    running: HashMap<String, RunningJob>,
    server_store: Arc<dyn ServerStore>,
    commands: mpsc::Receiver<SchedulerCommand>,
    shutdown_token: CancellationToken,
    /// Each run gets a copy with a child cancellation token.
    job_context: JobContext,
}

impl JobScheduler {
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        info!("Registering job: {} - {}", job.id(), job.description());
        self.registry.write().await.register(job);
    }

    pub async fn job_count(&self) -> usize {
        self.registry.read().await.count()
    }

    /// Main loop. Returns once the shutdown token is cancelled and running
    /// jobs have stopped or outlived the grace period.
    pub async fn run(&mut self) {
        info!(
            "Starting job scheduler with {} registered jobs",
            self.job_count().await
        );

        match self.server_store.mark_stale_jobs_failed() {
            Ok(0) => {}
            Ok(count) => info!("Marked {} runs interrupted by the last shutdown as failed", count),
            Err(e) => error!("Failed to mark stale jobs: {}", e),
        }

        self.start_startup_jobs().await;

        loop {
            self.reap_finished_jobs().await;
            let wait = self.start_due_jobs().await;
            debug!("Scheduler idle for up to {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Some(cmd) = self.commands.recv() => self.handle_command(cmd).await,
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        {
            let registry = self.registry.read().await;
            if registry.get(job_id).is_none() {
                return Err(JobError::NotFound);
            }
            if registry.is_running(job_id) {
                return Err(JobError::AlreadyRunning);
            }
        }
        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    async fn start_startup_jobs(&mut self) {
        let startup: Vec<String> = self
            .registry
            .read()
            .await
            .idle()
            .filter(|(_, job)| job.schedule().on_startup)
            .map(|(job_id, _)| job_id.to_string())
            .collect();

        for job_id in startup {
            self.spawn_job(&job_id, STARTUP_TRIGGER).await;
        }
    }

    /// Starts every idle job whose next run is due and returns the time until
    /// the earliest remaining one, capped at `MAX_IDLE`.
    async fn start_due_jobs(&mut self) -> Duration {
        let now = Utc::now();
        let mut due = Vec::new();
        let mut wait = MAX_IDLE;

        {
            let registry = self.registry.read().await;
            for (job_id, _) in registry.idle() {
                let Some(next_run_at) = self.next_run_at(job_id) else {
                    continue;
                };
                match (next_run_at - now).to_std() {
                    Ok(until) if !until.is_zero() => wait = wait.min(until),
                    _ => due.push(job_id.to_string()),
                }
            }
        }

        for job_id in due {
            self.spawn_job(&job_id, "schedule").await;
        }
        wait
    }

    /// A job that has never been scheduled is due now.
    fn next_run_at(&self, job_id: &str) -> Option<DateTime<Utc>> {
        match self.server_store.get_schedule_state(job_id) {
            Ok(state) => Some(state.map_or_else(Utc::now, |s| s.next_run_at)),
            Err(e) => {
                warn!("Failed to read schedule state for {}: {}", job_id, e);
                None
            }
        }
    }

    fn schedule_next_run(
        &self,
        job_id: &str,
        interval: Duration,
        last_run_at: Option<DateTime<Utc>>,
    ) {
        let Some(next_run_at) = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|interval| Utc::now().checked_add_signed(interval))
        else {
            error!("Interval {:?} of job {} is out of range", interval, job_id);
            return;
        };
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at,
            last_run_at,
        };
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            error!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let Some(job) = self.registry.read().await.get(job_id) else {
            error!("Attempted to spawn unknown job: {}", job_id);
            return;
        };

        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return;
            }
        };
        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );
        self.registry.write().await.set_running(job_id, true);

        // Not due again while this run is in progress
        let last_run_at = self
            .server_store
            .get_schedule_state(job_id)
            .ok()
            .flatten()
            .and_then(|s| s.last_run_at);
        self.schedule_next_run(job_id, job.schedule().interval, last_run_at);
        metrics::set_background_job_running(job_id, true);

        let cancel = self.job_context.cancellation_token.child_token();
        let ctx = self.job_context.with_token(cancel.clone());
        let server_store = Arc::clone(&self.server_store);
        let registry = Arc::clone(&self.registry);
        let id = job_id.to_string();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = started.elapsed();

            let (status, error_message, label) = run_outcome(&id, result, elapsed);
            metrics::record_background_job_execution(&id, label, elapsed);
            metrics::set_background_job_running(&id, false);

            if let Err(e) = server_store.record_job_finish(run_id, status, error_message) {
                error!("Failed to record job finish for {}: {}", id, e);
            }
            registry.write().await.set_running(&id, false);
        });

        self.running
            .insert(job_id.to_string(), RunningJob { task, cancel });
    }

    async fn reap_finished_jobs(&mut self) {
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, run)| run.task.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in finished {
            if let Some(run) = self.running.remove(&job_id) {
                let _ = run.task.await;
            }
            let job = self.registry.read().await.get(&job_id);
            if let Some(job) = job {
                self.schedule_next_run(&job_id, job.schedule().interval, Some(Utc::now()));
            }
        }
    }

    async fn shutdown(&mut self) {
        info!(
            "Shutting down scheduler with {} running jobs",
            self.running.len()
        );

        for (job_id, run) in &self.running {
            debug!("Cancelling job: {}", job_id);
            run.cancel.cancel();
        }

        for (job_id, run) in self.running.drain() {
            if tokio::time::timeout(SHUTDOWN_GRACE, run.task).await.is_err() {
                warn!("Job {} did not finish within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// Stored status, error message and metrics label of a finished run.
fn run_outcome(
    job_id: &str,
    result: Result<Result<(), JobError>, JoinError>,
    elapsed: Duration,
) -> (JobRunStatus, Option<String>, &'static str) {
    match result {
        Ok(Ok(())) => {
            info!("Job {} completed successfully in {:?}", job_id, elapsed);
            (JobRunStatus::Completed, None, "success")
        }
        Ok(Err(JobError::Cancelled)) => {
            info!("Job {} was cancelled after {:?}", job_id, elapsed);
            (JobRunStatus::Failed, Some("Cancelled".to_string()), "cancelled")
        }
        Ok(Err(e)) => {
            error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
            (JobRunStatus::Failed, Some(e.to_string()), "failed")
        }
        Err(e) => {
            error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
            (JobRunStatus::Failed, Some(format!("Task panic: {}", e)), "panic")
        }
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, commands) = mpsc::channel(100);
    let registry = Arc::new(RwLock::new(JobRegistry::default()));

    let scheduler = JobScheduler {
        registry: Arc::clone(&registry),
        running: HashMap::new(),
        server_store: server_store.clone(),
        commands,
        shutdown_token,
        job_context,
    };
    let handle = SchedulerHandle::new(command_tx, registry, server_store);

    (scheduler, handle)
}
