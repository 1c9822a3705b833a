//! External program classifier.
//!
//! The image is written to `scratch_dir/<job_id>` and the program runs as
//! `program args... <path>`. Its trimmed stdout is the label.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pixgrid_core::{Job, Outcome};
use tokio::process::Command;
use tracing::{debug, warn};

use super::Classifier;
use crate::error::{WorkerError, WorkerResult};

pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(program: &str, args: Vec<String>, scratch_dir: &Path, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            scratch_dir: scratch_dir.to_path_buf(),
            timeout,
        }
    }

    async fn run(&self, path: &Path) -> WorkerResult<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| WorkerError::ClassifierTimeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::Classifier(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let label = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if label.is_empty() {
            return Err(WorkerError::Classifier(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(label)
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn classify(&self, job: &Job, image: &[u8]) -> WorkerResult<Outcome> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.scratch_dir.join(job.id.as_str());
        tokio::fs::write(&path, image).await?;

        let result = self.run(&path).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(?path, error = %e, "failed to remove scratch file");
        }

        let label = result?;
        debug!(job_id = %job.id, %label, "classified");
        Ok(Outcome::Classified { label })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use pixgrid_core::JobId;

    use super::*;

    fn job() -> Job {
        Job::new(JobId::generate("cat"), "cat", Duration::from_secs(60))
    }

    fn shell(script: &str, scratch: &Path) -> CommandClassifier {
        CommandClassifier::new(
            "sh",
            vec!["-c".into(), script.into(), "classify".into()],
            scratch,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn stdout_is_the_label() {
        let dir = tempfile::tempdir().unwrap();
        // $1 is the image path; only answer if the image landed there.
        let classifier = shell(r#"test -s "$1" && echo '  feline  '"#, dir.path());

        let outcome = classifier.classify(&job(), b"\x89PNG").await.unwrap();
        assert_eq!(outcome, Outcome::Classified { label: "feline".into() });
    }

    #[tokio::test]
    async fn scratch_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = shell("echo feline", dir.path());
        classifier.classify(&job(), b"png").await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = shell("echo boom >&2; exit 3", dir.path());
        let err = classifier.classify(&job(), b"png").await.unwrap_err();
        assert!(matches!(err, WorkerError::Classifier(ref m) if m.contains("boom")));
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = shell("true", dir.path());
        assert!(classifier.classify(&job(), b"png").await.is_err());
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = CommandClassifier::new(
            "sh",
            vec!["-c".into(), "sleep 5".into()],
            dir.path(),
            Duration::from_millis(50),
        );
        let err = classifier.classify(&job(), b"png").await.unwrap_err();
        assert!(matches!(err, WorkerError::ClassifierTimeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = CommandClassifier::new(
            "/nonexistent/classifier",
            Vec::new(),
            dir.path(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            classifier.classify(&job(), b"png").await,
            Err(WorkerError::Io(_))
        ));
    }
}
