use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Fetch,
    Normalize,
    Synthesize,
    Compose,
    Caption,
    Metadata,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preflight => "preflight",
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Synthesize => "synthesize",
            Stage::Compose => "compose",
            Stage::Caption => "caption",
            Stage::Metadata => "metadata",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
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

/// An intermediate file and the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub stage: Stage,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub stage: Stage,
    pub reason: String,
}

/// One conversion request, owned by the orchestrator from submission until a
/// terminal status is reached.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub source_url: String,
    pub workdir: PathBuf,
    pub stage: Stage,
    pub status: JobStatus,
    pub artifacts: Vec<Artifact>,
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source_url: impl Into<String>, work_root: &Path) -> Self {
        let id = Uuid::new_v4();
        let workdir = work_root.join(format!("job-{}", id.simple()));
        Self {
            id,
            source_url: source_url.into(),
            workdir,
            stage: Stage::Preflight,
            status: JobStatus::Pending,
            artifacts: Vec::new(),
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        debug!(job = %self.id, %stage, "entering stage");
        self.status = JobStatus::Running;
        self.stage = stage;
    }

    pub fn track(&mut self, path: impl Into<PathBuf>, stage: Stage) {
        let path = path.into();
        if !self.artifacts.iter().any(|a| a.path == path) {
            self.artifacts.push(Artifact { path, stage });
        }
    }

    /// Drops an artifact from the ledger once the consuming stage deleted it.
    pub fn release(&mut self, path: &Path) {
        self.artifacts.retain(|a| a.path != path);
    }

    pub fn succeed(&mut self) {
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failure = Some(JobFailure {
            stage,
            reason: reason.into(),
        });
        self.finished_at = Some(Utc::now());
    }

    /// Deletes every tracked intermediate and the working directory.
    pub async fn cleanup(&mut self) {
        for artifact in self.artifacts.drain(..) {
            match fs::remove_file(&artifact.path).await {
                Ok(()) => debug!(path = %artifact.path.display(), "removed intermediate"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %artifact.path.display(), error = %err, "failed to remove intermediate")
                }
            }
        }
        if let Err(err) = fs::remove_dir_all(&self.workdir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.workdir.display(), error = %err, "failed to clean working directory");
            }
        }
    }
}
