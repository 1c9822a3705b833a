//! Compute provider contract — where worker instances come from.

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Parameters for launching one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_id: String,
    pub tags: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// The generated `Name` tag, unique per launch.
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

/// Creates and destroys the compute instances that run workers.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Launch an instance. Returns the provider's instance id.
    async fn launch(&self, request: LaunchRequest) -> anyhow::Result<String>;

    async fn terminate(&self, instance_id: &str) -> anyhow::Result<()>;
}
