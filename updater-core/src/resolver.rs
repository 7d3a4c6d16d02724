// Version resolver - fetches the release manifest and decides whether it is an update.
//
// One bounded request per call, no retries. Retry cadence belongs to the scheduler.

use crate::config::{IntegrityPolicy, UpdaterConfig};
use crate::error::FetchError;
use crate::http::{read_capped, HttpTransport, RequestOptions};
use crate::manifest::FirmwareManifest;

/// Manifests are tiny; anything larger is not ours.
const MAX_MANIFEST_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    UpToDate { version: String },
    UpdateAvailable(FirmwareManifest),
    /// Newer than what runs, but this device already rolled back from it.
    Skipped { version: String },
}

pub struct VersionResolver {
    manifest_url: String,
    running_version: String,
    skipped_version: Option<String>,
    options: RequestOptions,
    integrity: IntegrityPolicy,
}

impl VersionResolver {
    pub fn new(config: &UpdaterConfig, running_version: impl Into<String>) -> Self {
        Self {
            manifest_url: config.manifest_url.clone(),
            running_version: running_version.into(),
            skipped_version: None,
            options: RequestOptions::new(config.manifest_timeout()),
            integrity: config.integrity,
        }
    }

    /// Never offer `version` again. It stays skipped until the manifest names another release.
    pub fn skipping(mut self, version: Option<String>) -> Self {
        self.skipped_version = version;
        self
    }

    pub fn running_version(&self) -> &str {
        &self.running_version
    }

    pub fn resolve<T: HttpTransport>(&self, transport: &mut T) -> Result<Resolution, FetchError> {
        log::info!("Fetching version info from: {}", self.manifest_url);

        let mut response = transport
            .get(&self.manifest_url, &self.options)
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        if response.status != 200 {
            return Err(FetchError::Unreachable(format!("HTTP {}", response.status)));
        }

        let body = read_capped(&mut response.body, MAX_MANIFEST_BYTES)
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;
        if body.len() > MAX_MANIFEST_BYTES {
            return Err(FetchError::InvalidManifest(format!(
                "manifest exceeds {} bytes",
                MAX_MANIFEST_BYTES
            )));
        }
        log::debug!("Manifest: {}", String::from_utf8_lossy(&body));

        let manifest = FirmwareManifest::parse(&body)?;

        log::info!(
            "Latest version: {} (running {})",
            manifest.version,
            self.running_version
        );

        if !manifest.is_newer_than(&self.running_version) {
            return Ok(Resolution::UpToDate {
                version: manifest.version,
            });
        }

        if self.skipped_version.as_deref() == Some(manifest.version.as_str()) {
            return Ok(Resolution::Skipped {
                version: manifest.version,
            });
        }

        if manifest.integrity_hash.is_none() && self.integrity == IntegrityPolicy::RequireHash {
            return Err(FetchError::InvalidManifest(
                "release publishes no sha256 and the integrity policy requires one".into(),
            ));
        }

        Ok(Resolution::UpdateAvailable(manifest))
    }
}
