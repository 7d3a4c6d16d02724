/// Updater configuration that can be tested independently
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/articxdev/espota/main/version.json";

/// What to do when a manifest publishes no SHA-256.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntegrityPolicy {
    /// Refuse releases without a hash.
    RequireHash,
    /// Accept them, relying on the content length alone. Reported as `TrustLevel::SizeOnly`.
    AllowSizeOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdaterConfig {
    pub manifest_url: String,

    // Scheduling
    pub check_interval_secs: u32,
    pub quiet_period_secs: u32,
    pub max_backoff_secs: u32,

    // Transfers
    pub manifest_timeout_secs: u32,
    pub download_timeout_secs: u32,
    pub chunk_size: usize,

    pub integrity: IntegrityPolicy,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            check_interval_secs: 3600,
            quiet_period_secs: 30,
            max_backoff_secs: 6 * 3600,
            manifest_timeout_secs: 10,
            download_timeout_secs: 30,
            chunk_size: 512,
            integrity: IntegrityPolicy::AllowSizeOnly,
        }
    }
}

impl UpdaterConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs as u64)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs as u64)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs as u64)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs as u64)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.manifest_url.trim().is_empty() {
            return Err("manifest_url is empty".into());
        }
        if self.check_interval_secs == 0 {
            return Err("check_interval_secs must be positive".into());
        }
        if self.chunk_size == 0 || self.chunk_size > 16 * 1024 {
            return Err(format!("chunk_size {} outside 1..=16384", self.chunk_size));
        }
        if self.manifest_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err("timeouts must be positive".into());
        }
        Ok(())
    }
}
