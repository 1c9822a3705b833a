//! Domain types shared by the gateway, workers and the fleet controller.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// ── Identifiers ────────────────────────────────────────────────

/// Per-request job identifier, `{stem}-{uuid}`.
///
/// The stem keeps ids readable in logs and blob listings; the uuid suffix
/// keeps two callers uploading `cat.png` at the same time apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mint a fresh id for the given stem.
    pub fn generate(stem: &str) -> Self {
        Self(format!("{stem}-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derive the caller-visible name of an upload: the filename without
/// directory components and without its extension.
///
/// `"uploads/cat.png"` → `"cat"`, `"face.v2.jpg"` → `"face"`.
pub fn file_stem(filename: &str) -> CoreResult<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    let stem = base.split('.').next().unwrap_or_default();
    if stem.is_empty() {
        return Err(CoreError::InvalidFilename(filename.to_string()));
    }
    Ok(stem.to_string())
}

// ── Messages ───────────────────────────────────────────────────

/// A unit of classification work. The image lives in the `inputs` bucket
/// under `source_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Stem of the uploaded filename.
    pub name: String,
    pub source_key: String,
    /// Epoch millis after which no gateway is waiting for this job.
    /// Zero means the job never expires.
    #[serde(default)]
    pub expires_at_ms: u64,
}

impl Job {
    pub fn new(id: JobId, name: impl Into<String>, ttl: Duration) -> Self {
        let source_key = id.to_string();
        Self {
            id,
            name: name.into(),
            source_key,
            expires_at_ms: epoch_ms().saturating_add(ttl.as_millis() as u64),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }
}

/// What the classifier made of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Classified { label: String },
    /// The classifier ran but has no label for this image.
    Unrecognized,
}

impl Outcome {
    pub fn label(&self) -> Option<&str> {
        match self {
            Outcome::Classified { label } => Some(label),
            Outcome::Unrecognized => None,
        }
    }
}

/// Completion record published by a worker, correlated to a [`Job`] by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub job_id: JobId,
    pub name: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub expires_at_ms: u64,
}

impl ClassificationResult {
    pub fn for_job(job: &Job, outcome: Outcome) -> Self {
        Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            outcome,
            expires_at_ms: job.expires_at_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }

    /// The `name:label` line returned to HTTP callers.
    pub fn display_line(&self) -> Option<String> {
        self.outcome
            .label()
            .map(|label| format!("{}:{label}", self.name))
    }
}

// ── Fleet ──────────────────────────────────────────────────────

/// A live compute instance running a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    /// Name tag generated at launch, `worker-{uuid}`.
    pub id: String,
    /// Identifier assigned by the compute provider.
    pub instance_id: String,
    pub launched_at_ms: u64,
    /// Launch sequence number; breaks ties between equal launch times.
    pub seq: u64,
}

impl WorkerHandle {
    /// Ordering key for oldest-first retirement.
    pub fn age_key(&self) -> (u64, u64) {
        (self.launched_at_ms, self.seq)
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
