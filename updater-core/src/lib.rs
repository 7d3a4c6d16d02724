//! Updater Core - Hardware-independent OTA update logic
//!
//! Manifest resolution, streamed installation into the inactive slot, boot
//! validation and the update scheduler. Flash, HTTP and the network link are
//! reached through the traits in `partition`, `http` and `platform`, so the
//! whole pipeline runs and is tested on the host.

pub mod config;
pub mod error;
pub mod http;
pub mod image;
pub mod installer;
pub mod manifest;
pub mod partition;
pub mod platform;
pub mod resolver;
pub mod scheduler;
pub mod status;
pub mod validator;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

pub use config::{IntegrityPolicy, UpdaterConfig};
pub use error::{FetchError, InstallError, ValidationError};
pub use image::AppDescriptor;
pub use installer::{InstallReport, UpdateInstaller};
pub use manifest::{FirmwareManifest, IntegrityHash};
pub use resolver::{Resolution, VersionResolver};
pub use scheduler::{PollOutcome, UpdateContext, UpdateScheduler};
pub use status::{CheckOutcome, SchedulerPhase, StatusSnapshot, TrustLevel, UpdateStatus};
pub use validator::{BootValidator, ValidationOutcome};
