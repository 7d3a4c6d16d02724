// Remote manifest describing the newest firmware release.
//
// Wire format (version.json next to the release):
//   { "version": "2.0.0", "download_url": "https://.../fw.bin",
//     "sha256": "<64 hex digits>", "file_size": 1234567 }

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityHash([u8; 32]);

impl IntegrityHash {
    /// Parses a SHA-256 digest written as 64 hex digits (either case).
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim().as_bytes();
        if hex.len() != 64 {
            return None;
        }

        let mut out = [0u8; 32];
        for (byte, pair) in out.iter_mut().zip(hex.chunks_exact(2)) {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            *byte = (hi * 16 + lo) as u8;
        }
        Some(Self(out))
    }

    pub fn of(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Finalizes an incremental hash computed while streaming.
    pub fn from_hasher(hasher: Sha256) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for IntegrityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Raw document as published. Everything optional so missing fields map to
/// `InvalidManifest` with a useful message instead of a serde error.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    version: Option<String>,
    #[serde(alias = "downloadUrl", alias = "url")]
    download_url: Option<String>,
    sha256: Option<String>,
    #[serde(alias = "fileSize", alias = "size")]
    file_size: Option<u64>,
}

/// Parsed, validated manifest. Discarded after a single update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareManifest {
    pub version: String,
    pub download_url: String,
    pub integrity_hash: Option<IntegrityHash>,
    pub declared_size: Option<u64>,
}

impl FirmwareManifest {
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        let doc: ManifestDocument = serde_json::from_slice(body)
            .map_err(|e| FetchError::InvalidManifest(format!("JSON parse error: {}", e)))?;

        let version = doc
            .version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| FetchError::InvalidManifest("missing version".into()))?;

        let download_url = doc
            .download_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| FetchError::InvalidManifest("missing download_url".into()))?;

        if !(download_url.starts_with("http://") || download_url.starts_with("https://")) {
            return Err(FetchError::InvalidManifest(format!(
                "download_url is not http(s): {}",
                download_url
            )));
        }

        // An empty sha256 means "not published", same as omitting it.
        let integrity_hash = match doc.sha256.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(hex) => Some(IntegrityHash::parse(hex).ok_or_else(|| {
                FetchError::InvalidManifest(format!("sha256 is not a SHA-256 digest: {}", hex))
            })?),
        };

        if doc.file_size == Some(0) {
            return Err(FetchError::InvalidManifest("file_size is zero".into()));
        }

        Ok(Self {
            version,
            download_url,
            integrity_hash,
            declared_size: doc.file_size,
        })
    }

    pub fn is_newer_than(&self, running_version: &str) -> bool {
        // Plain inequality: any published version other than ours is a candidate,
        // which also lets a release be pulled by re-publishing the previous one.
        self.version != running_version
    }
}
