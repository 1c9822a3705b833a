//! Dataset lookup — labels come from a `name,label` CSV keyed by stem.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use pixgrid_core::{Job, Outcome};
use tracing::{debug, info};

use super::Classifier;
use crate::error::{WorkerError, WorkerResult};

pub struct LookupClassifier {
    labels: HashMap<String, String>,
}

impl LookupClassifier {
    pub fn from_path(path: &Path) -> WorkerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let classifier = Self::from_csv(&content)?;
        info!(?path, entries = classifier.len(), "lookup dataset loaded");
        Ok(classifier)
    }

    /// Parse `name,label` records. Fields may be quoted, extra columns are
    /// ignored, and a leading `Image,...` header is skipped.
    pub fn from_csv(content: &str) -> WorkerResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut labels = HashMap::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(|e| WorkerError::Dataset {
                line: e.position().map_or(index + 1, |p| p.line() as usize),
                message: e.to_string(),
            })?;
            let line = record.position().map_or(index + 1, |p| p.line() as usize);

            let (Some(name), Some(label)) = (record.get(0), record.get(1)) else {
                return Err(WorkerError::Dataset {
                    line,
                    message: format!("expected name,label but got {record:?}"),
                });
            };
            if index == 0 && name.eq_ignore_ascii_case("image") {
                continue;
            }
            if name.is_empty() || label.is_empty() {
                return Err(WorkerError::Dataset {
                    line,
                    message: "empty name or label".to_string(),
                });
            }
            labels.insert(name.to_string(), label.to_string());
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[async_trait]
impl Classifier for LookupClassifier {
    async fn classify(&self, job: &Job, _image: &[u8]) -> WorkerResult<Outcome> {
        let outcome = match self.labels.get(&job.name) {
            Some(label) => Outcome::Classified {
                label: label.clone(),
            },
            None => Outcome::Unrecognized,
        };
        debug!(job_id = %job.id, name = %job.name, ?outcome, "dataset lookup");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pixgrid_core::JobId;

    use super::*;

    fn job(name: &str) -> Job {
        Job::new(JobId::generate(name), name, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn looks_up_by_stem() {
        let classifier = LookupClassifier::from_csv("Image,Results\ncat,feline\ndog , canine\n").unwrap();
        assert_eq!(classifier.len(), 2);

        let outcome = classifier.classify(&job("cat"), b"").await.unwrap();
        assert_eq!(outcome, Outcome::Classified { label: "feline".into() });
        let outcome = classifier.classify(&job("dog"), b"").await.unwrap();
        assert_eq!(outcome.label(), Some("canine"));
    }

    #[tokio::test]
    async fn unknown_stem_is_unrecognized() {
        let classifier = LookupClassifier::from_csv("cat,feline").unwrap();
        let outcome = classifier.classify(&job("horse"), b"").await.unwrap();
        assert_eq!(outcome, Outcome::Unrecognized);
    }

    #[test]
    fn headerless_dataset_keeps_first_row() {
        let classifier = LookupClassifier::from_csv("cat,feline\n\n").unwrap();
        assert_eq!(classifier.len(), 1);
    }

    #[tokio::test]
    async fn quoted_fields_are_unquoted() {
        let classifier = LookupClassifier::from_csv(
            "\"Image\",\"Results\"\n\"cat\",\"feline\"\n\"dog\",\"canine, domestic\"\n",
        )
        .unwrap();
        assert_eq!(classifier.len(), 2);

        let outcome = classifier.classify(&job("cat"), b"").await.unwrap();
        assert_eq!(outcome.label(), Some("feline"));
        let outcome = classifier.classify(&job("dog"), b"").await.unwrap();
        assert_eq!(outcome.label(), Some("canine, domestic"));
    }

    #[test]
    fn extra_columns_are_ignored() {
        let classifier = LookupClassifier::from_csv("cat,feline,0.97\n").unwrap();
        assert_eq!(classifier.len(), 1);
    }

    #[test]
    fn malformed_row_reports_line() {
        let err = LookupClassifier::from_csv("Image,Results\ncat,feline\nbroken\n").err().unwrap();
        assert!(matches!(err, WorkerError::Dataset { line: 3, .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, "Image,Results\ncat,feline\n").unwrap();
        assert_eq!(LookupClassifier::from_path(&path).unwrap().len(), 1);
    }
}
