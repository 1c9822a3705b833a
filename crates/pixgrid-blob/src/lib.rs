//! pixgrid-blob — object storage for uploaded images and results.
//!
//! Three buckets are used by the pipeline:
//!
//! | Bucket | Writer | Contents |
//! |---|---|---|
//! | `inputs` | gateway | uploaded image bytes, keyed by job id |
//! | `outputs` | worker | classifier label, keyed by job id |
//! | `results` | gateway | label persisted once the caller's result arrives |

pub mod error;
pub mod store;

use std::sync::Arc;

pub use error::{BlobError, BlobResult};
pub use store::{BlobDb, BlobStore, RedbBucket};

pub const INPUTS: &str = "inputs";
pub const OUTPUTS: &str = "outputs";
pub const RESULTS: &str = "results";

/// The pipeline's buckets, shareable across tasks.
#[derive(Clone)]
pub struct Buckets {
    pub inputs: Arc<dyn BlobStore>,
    pub outputs: Arc<dyn BlobStore>,
    pub results: Arc<dyn BlobStore>,
}

impl Buckets {
    pub fn from_db(db: &BlobDb) -> BlobResult<Self> {
        Ok(Self {
            inputs: Arc::new(db.bucket(INPUTS)?),
            outputs: Arc::new(db.bucket(OUTPUTS)?),
            results: Arc::new(db.bucket(RESULTS)?),
        })
    }

    pub fn in_memory() -> BlobResult<Self> {
        Self::from_db(&BlobDb::open_in_memory()?)
    }
}
