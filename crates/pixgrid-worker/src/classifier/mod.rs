//! Classifiers turn an image into an [`Outcome`].

mod command;
mod lookup;

use std::sync::Arc;

use async_trait::async_trait;
use pixgrid_core::config::{ClassifierConfig, ClassifierKind, WorkerConfig};
use pixgrid_core::{Job, Outcome};

use crate::error::WorkerResult;

pub use command::CommandClassifier;
pub use lookup::LookupClassifier;

/// Labels one image. An error leaves the job for redelivery; use
/// [`Outcome::Unrecognized`] for images the classifier ran on but cannot label.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, job: &Job, image: &[u8]) -> WorkerResult<Outcome>;
}

/// Build the classifier selected by configuration.
pub fn from_config(
    classifier: &ClassifierConfig,
    worker: &WorkerConfig,
) -> WorkerResult<Arc<dyn Classifier>> {
    match classifier.kind {
        ClassifierKind::Command => Ok(Arc::new(CommandClassifier::new(
            &classifier.program,
            classifier.args.clone(),
            &worker.scratch_dir,
            classifier.timeout,
        ))),
        ClassifierKind::Lookup => {
            let path = classifier.dataset.as_deref().ok_or_else(|| {
                pixgrid_core::CoreError::InvalidConfig("classifier.dataset is not set".into())
            })?;
            Ok(Arc::new(LookupClassifier::from_path(path)?))
        }
    }
}
