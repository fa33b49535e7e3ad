//! Document ingestion.
//!
//! Uploaded files are handed to an external ingestion process that parses
//! them and writes the resulting documents into the index. Ingestion runs
//! off the request path: [`IngestQueue::submit`] records a `pending` job and
//! returns at once, a fixed pool of worker tasks drains the queue, and the
//! job's progress is readable through [`IngestQueue::status`].
//!
//! A failed or timed-out ingestion only marks its own job `failed`; it never
//! affects the table it was submitted for. Submission never waits for queue
//! space: a full queue fails the job immediately. Finished jobs are forgotten
//! once they are older than the retention window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One file to ingest into one owner's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTask {
    pub file_path: String,
    pub file_name: String,
    pub owner_id: String,
    pub table_id: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no ingestion script configured")]
    NotConfigured,

    #[error("failed to start ingestion process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ingestion exited with {status}: {output}")]
    Failed { status: String, output: String },

    #[error("ingestion timed out after {0:?}")]
    Timeout(Duration),

    #[error("ingestion queue is full")]
    QueueFull,

    #[error("ingestion queue is closed")]
    QueueClosed,
}

#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(&self, task: &IngestTask) -> Result<(), IngestError>;
}

/// Runs `<interpreter> <script> <file_path> <file_name> <owner_id> <table_id>`.
///
/// The child is killed if it outlives the timeout.
pub struct ScriptIngestor {
    interpreter: String,
    script: Option<PathBuf>,
    timeout: Duration,
}

impl ScriptIngestor {
    pub fn new(interpreter: impl Into<String>, script: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            script,
            timeout,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        if config.script.is_none() {
            warn!("ingest.script is not set; attached documents will not be ingested");
        }
        Self::new(
            config.interpreter.clone(),
            config.script.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Ingestor for ScriptIngestor {
    async fn ingest(&self, task: &IngestTask) -> Result<(), IngestError> {
        let script = self.script.as_ref().ok_or(IngestError::NotConfigured)?;

        let child = Command::new(&self.interpreter)
            .arg(script)
            .arg(&task.file_path)
            .arg(&task.file_name)
            .arg(&task.owner_id)
            .arg(&task.table_id)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| IngestError::Timeout(self.timeout))??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(IngestError::Failed {
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        debug!(file = %task.file_path, output = %combined.trim(), "ingestion output");
        Ok(())
    }
}

/// Observable state of one submitted document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestJob {
    pub job_id: String,
    pub table_id: String,
    pub file_name: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub owner_id: String,
}

type JobTable = Arc<RwLock<HashMap<String, IngestJob>>>;
type QueuedJob = (String, IngestTask);

/// Bounded background queue of ingestion jobs.
///
/// Cloning is cheap; clones submit to the same workers.
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<QueuedJob>,
    jobs: JobTable,
    retention: Duration,
}

impl IngestQueue {
    /// Spawns `workers` tasks on the current tokio runtime. Finished jobs
    /// stay readable for `retention`.
    pub fn start(
        ingestor: Arc<dyn Ingestor>,
        workers: usize,
        capacity: usize,
        retention: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let jobs: JobTable = Arc::new(RwLock::new(HashMap::new()));

        for worker in 0..workers.max(1) {
            let receiver = receiver.clone();
            let jobs = jobs.clone();
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some((job_id, task)) = next else {
                        debug!(worker, "ingest queue closed");
                        break;
                    };
                    run_job(&jobs, ingestor.as_ref(), &job_id, &task, retention).await;
                }
            });
        }

        Self {
            sender,
            jobs,
            retention,
        }
    }

    /// Records a `pending` job and queues it without waiting. If the queue
    /// is full or gone the job is returned already `failed`.
    pub async fn submit(&self, task: IngestTask) -> IngestJob {
        let job = IngestJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            table_id: task.table_id.clone(),
            file_name: task.file_name.clone(),
            status: JobStatus::Pending,
            message: None,
            submitted_at: Utc::now(),
            finished_at: None,
            owner_id: task.owner_id.clone(),
        };
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());

        if let Err(e) = self.sender.try_send((job.job_id.clone(), task)) {
            let reason = match e {
                TrySendError::Full(_) => IngestError::QueueFull,
                TrySendError::Closed(_) => IngestError::QueueClosed,
            };
            warn!(job_id = %job.job_id, error = %reason, "job not scheduled");
            let job_id = job.job_id.clone();
            return finish(&self.jobs, &job_id, Err(&reason), self.retention)
                .await
                .unwrap_or(job);
        }
        job
    }

    pub async fn status(&self, job_id: &str) -> Option<IngestJob> {
        self.jobs.read().await.get(job_id).cloned()
    }
}

async fn run_job(
    jobs: &JobTable,
    ingestor: &dyn Ingestor,
    job_id: &str,
    task: &IngestTask,
    retention: Duration,
) {
    if let Some(job) = jobs.write().await.get_mut(job_id) {
        job.status = JobStatus::Running;
    }

    let result = ingestor.ingest(task).await;
    match &result {
        Ok(()) => info!(job_id, file = %task.file_path, table_id = %task.table_id, "ingested document"),
        Err(e) => warn!(job_id, file = %task.file_path, error = %e, "ingestion failed, skipping document"),
    }
    finish(jobs, job_id, result.as_ref().map(|_| ()), retention).await;
}

/// Marks a job terminal, sweeps expired jobs, and returns the marked job.
async fn finish(
    jobs: &JobTable,
    job_id: &str,
    result: Result<(), &IngestError>,
    retention: Duration,
) -> Option<IngestJob> {
    let mut jobs = jobs.write().await;
    let finished = jobs.get_mut(job_id).map(|job| {
        match result {
            Ok(()) => job.status = JobStatus::Succeeded,
            Err(e) => {
                job.status = JobStatus::Failed;
                job.message = Some(e.to_string());
            }
        }
        job.finished_at = Some(Utc::now());
        job.clone()
    });
    evict_expired(&mut jobs, retention);
    finished
}

fn evict_expired(jobs: &mut HashMap<String, IngestJob>, retention: Duration) {
    let Some(cutoff) = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|r| Utc::now().checked_sub_signed(r))
    else {
        return;
    };

    let before = jobs.len();
    jobs.retain(|_, job| job.finished_at.map_or(true, |at| at > cutoff));
    let evicted = before - jobs.len();
    if evicted > 0 {
        debug!(evicted, "evicted finished ingest jobs");
    }
}
