// Error taxonomy for the update pipeline.
//
// None of these are fatal to the running device: they are all raised before
// the inactive slot is activated, so the scheduler logs them and retries later.

use std::fmt;

/// Failure while resolving the remote manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure, timeout, or a non-200 answer.
    Unreachable(String),
    /// Body fetched but missing a required field or not parseable.
    InvalidManifest(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Unreachable(reason) => write!(f, "manifest unreachable: {}", reason),
            FetchError::InvalidManifest(reason) => write!(f, "invalid manifest: {}", reason),
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    /// Firmware URL could not be opened or did not answer with 2xx.
    Transport(String),
    /// Remote did not report a positive content length.
    UnknownSize,
    /// Manifest `file_size` and the reported content length disagree.
    SizeMismatch { declared: u64, reported: u64 },
    /// Inactive slot cannot hold the image.
    NoSpace { required: u64, available: u64 },
    /// Stream ended (or timed out) before `expected` bytes arrived.
    Incomplete { written: u64, expected: u64 },
    IntegrityMismatch { expected: String, actual: String },
    WriteError(String),
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::Transport(reason) => write!(f, "firmware download failed: {}", reason),
            InstallError::UnknownSize => write!(f, "firmware size unknown (no content length)"),
            InstallError::SizeMismatch { declared, reported } => write!(
                f,
                "manifest declares {} bytes but server reports {}",
                declared, reported
            ),
            InstallError::NoSpace { required, available } => write!(
                f,
                "not enough space: need {} bytes, slot holds {}",
                required, available
            ),
            InstallError::Incomplete { written, expected } => {
                write!(f, "download incomplete: {}/{} bytes", written, expected)
            }
            InstallError::IntegrityMismatch { expected, actual } => write!(
                f,
                "sha256 mismatch: expected {}, got {}",
                expected, actual
            ),
            InstallError::WriteError(reason) => write!(f, "flash write failed: {}", reason),
        }
    }
}

impl std::error::Error for InstallError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    PartitionQueryFailed(String),
    MarkValidFailed(String),
    RollbackUnavailable(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::PartitionQueryFailed(reason) => {
                write!(f, "could not query running partition: {}", reason)
            }
            ValidationError::MarkValidFailed(reason) => {
                write!(f, "could not mark running partition valid: {}", reason)
            }
            ValidationError::RollbackUnavailable(reason) => {
                write!(f, "rollback not possible: {}", reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}
