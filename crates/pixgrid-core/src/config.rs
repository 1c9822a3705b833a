//! pixgrid.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Durations are written in humantime form, such as
//! `"20s"`, `"500ms"` or `"2m"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PixgridConfig {
    pub gateway: GatewayConfig,
    pub fleet: FleetConfig,
    pub worker: WorkerConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Total time a caller waits for its result.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Long-poll wait per receive on the result channel.
    #[serde(with = "humantime_serde")]
    pub receive_wait: Duration,
    /// How long a foreign result stays hidden after this gateway looked at it.
    #[serde(with = "humantime_serde")]
    pub result_visibility_timeout: Duration,
    /// Cap on receive rounds per request.
    pub max_rounds: u32,
    pub max_messages: usize,
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            receive_wait: Duration::from_secs(20),
            result_visibility_timeout: Duration::from_secs(5),
            max_rounds: 64,
            max_messages: 1,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Launch when `backlog / live` reaches this.
    pub scale_out_threshold: f64,
    /// Retire when `backlog` falls to this.
    pub scale_in_threshold: f64,
    /// Period of the control loop.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Image handed to the compute provider on launch.
    pub image_id: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            min_instances: 0,
            max_instances: 20,
            scale_out_threshold: 1.0,
            scale_in_threshold: 0.0,
            interval: Duration::from_secs(10),
            image_id: "pixgrid-worker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(with = "humantime_serde")]
    pub receive_wait: Duration,
    /// Must cover download + classify + publish.
    #[serde(with = "humantime_serde")]
    pub visibility_timeout: Duration,
    /// Where the command classifier writes images before invoking the program.
    pub scratch_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            receive_wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
            scratch_dir: std::env::temp_dir().join("pixgrid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Run an external program on the image file.
    Command,
    /// Look the stem up in a CSV dataset.
    Lookup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub program: String,
    pub args: Vec<String>,
    pub dataset: Option<PathBuf>,
    /// Kill the classifier program after this long.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Command,
            program: "python3".to_string(),
            args: vec!["face_recognition.py".to_string()],
            dataset: None,
            timeout: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Keep blobs and channels in memory only.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/pixgrid"),
            in_memory: false,
        }
    }
}

impl PixgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PixgridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> CoreResult<()> {
        let fleet = &self.fleet;
        if fleet.max_instances == 0 {
            return Err(CoreError::InvalidConfig("fleet.max_instances must be at least 1".into()));
        }
        if fleet.min_instances > fleet.max_instances {
            return Err(CoreError::InvalidConfig(format!(
                "fleet.min_instances ({}) exceeds fleet.max_instances ({})",
                fleet.min_instances, fleet.max_instances
            )));
        }
        for (key, value) in [
            ("fleet.scale_out_threshold", fleet.scale_out_threshold),
            ("fleet.scale_in_threshold", fleet.scale_in_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "{key} must be a non-negative number"
                )));
            }
        }
        if fleet.scale_out_threshold == 0.0 {
            return Err(CoreError::InvalidConfig(
                "fleet.scale_out_threshold must be greater than zero".into(),
            ));
        }
        if self.gateway.max_rounds == 0 {
            return Err(CoreError::InvalidConfig("gateway.max_rounds must be at least 1".into()));
        }
        if self.gateway.max_messages == 0 {
            return Err(CoreError::InvalidConfig("gateway.max_messages must be at least 1".into()));
        }
        if self.classifier.kind == ClassifierKind::Lookup && self.classifier.dataset.is_none() {
            return Err(CoreError::InvalidConfig(
                "classifier.dataset is required for the lookup classifier".into(),
            ));
        }
        for (key, value) in [
            ("gateway.request_timeout", self.gateway.request_timeout),
            ("fleet.interval", self.fleet.interval),
            ("worker.visibility_timeout", self.worker.visibility_timeout),
            ("classifier.timeout", self.classifier.timeout),
        ] {
            if value.is_zero() {
                return Err(CoreError::InvalidConfig(format!("{key} must be non-zero")));
            }
        }
        Ok(())
    }
}
