//! The sequential job queue.
//!
//! One worker task owns execution: jobs run strictly in submission order and
//! at most one is `Running` at any time. Callers never block inside the
//! core; they observe job state snapshots or await the per-job notify.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::report::RunReport;
use crate::job::request::RunRequest;
use crate::job::runner::{JobContext, JobRunner};
use crate::job::JobState;

struct JobEntry {
    id: String,
    request: RunRequest,
    state: std::sync::RwLock<JobState>,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicUsize>,
    report: std::sync::RwLock<Option<RunReport>>,
    notify: Notify,
}

impl JobEntry {
    fn new(id: String, request: RunRequest) -> Self {
        Self {
            id,
            request,
            state: std::sync::RwLock::new(JobState::Pending),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(AtomicUsize::new(0)),
            report: std::sync::RwLock::new(None),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> JobState {
        *self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: JobState) {
        *self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        self.notify.notify_waiters();
    }

    fn report(&self) -> Option<RunReport> {
        self.report
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Strictly sequential job queue.
pub struct JobQueue {
    runner: Arc<JobRunner>,
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    order: RwLock<Vec<String>>,
    tx: mpsc::UnboundedSender<Arc<JobEntry>>,
}

impl JobQueue {
    /// Create the queue and spawn its worker task on the current runtime.
    pub fn start(runner: Arc<JobRunner>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<JobEntry>>();
        let queue = Arc::new(Self {
            runner: runner.clone(),
            jobs: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            tx,
        });

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let ctx = JobContext {
                    id: job.id.clone(),
                    request: job.request.clone(),
                    cancel: job.cancel.clone(),
                    progress: job.progress.clone(),
                };
                if !job.cancel.load(Ordering::SeqCst) {
                    job.set_state(JobState::Running);
                }
                let report = runner.run(&ctx).await;
                let final_state = report.state;
                {
                    let mut slot = job
                        .report
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    *slot = Some(report);
                }
                job.set_state(final_state);
            }
        });
        queue
    }

    /// Append a request to the queue. Always succeeds for a valid request
    /// and never mutates other jobs.
    pub async fn enqueue(&self, request: RunRequest) -> Result<String> {
        request.validate(self.runner.catalog())?;
        let id = Uuid::new_v4().to_string();
        let entry = Arc::new(JobEntry::new(id.clone(), request));

        self.jobs.write().await.insert(id.clone(), entry.clone());
        self.order.write().await.push(id.clone());
        self.runner.record_pending(&entry.id, &entry.request);

        self.tx
            .send(entry)
            .map_err(|_| Error::Execution("job queue worker is not running".into()))?;
        log::info!("Job {id} enqueued");
        Ok(id)
    }

    /// Request cancellation. Safe from any thread while the job is
    /// `Pending` or `Running`; observed at the next unit boundary.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let Some(entry) = self.jobs.read().await.get(job_id).cloned() else {
            return false;
        };
        if entry.state().is_terminal() {
            return false;
        }
        entry.cancel.store(true, Ordering::SeqCst);
        log::info!("Job {job_id} cancellation requested");
        true
    }

    pub async fn state(&self, job_id: &str) -> Option<JobState> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.state())
    }

    /// (completed units, total units) for a job.
    pub async fn progress(&self, job_id: &str) -> Option<(usize, usize)> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| {
            (
                entry.progress.load(Ordering::SeqCst),
                entry.request.units.len(),
            )
        })
    }

    pub async fn report(&self, job_id: &str) -> Option<RunReport> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).and_then(|entry| entry.report())
    }

    /// Await a job's terminal report.
    pub async fn wait(&self, job_id: &str) -> Result<RunReport> {
        let entry = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id)
                .cloned()
                .ok_or_else(|| Error::Validation(format!("unknown job '{job_id}'")))?
        };
        loop {
            let notified = entry.notify.notified();
            if entry.state().is_terminal() {
                if let Some(report) = entry.report() {
                    return Ok(report);
                }
            }
            notified.await;
        }
    }

    /// All jobs in submission order.
    pub async fn jobs(&self) -> Vec<(String, JobState)> {
        let order = self.order.read().await;
        let jobs = self.jobs.read().await;
        order
            .iter()
            .filter_map(|id| jobs.get(id).map(|entry| (id.clone(), entry.state())))
            .collect()
    }
}
