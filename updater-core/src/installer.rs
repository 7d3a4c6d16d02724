// Update installer - streams a firmware image into the inactive slot.
//
// Update flow:
// 1. Open the download and require a positive content length
// 2. Reserve that many bytes in the inactive slot (fails before any write)
// 3. Copy fixed-size chunks straight to flash, yielding after each one
// 4. Verify byte count and, when published, the SHA-256
// 5. Commit (slot becomes boot target, pending verification) and restart
//
// Every failure before step 5 aborts the session; the running slot is never touched.

use sha2::{Digest, Sha256};

use crate::config::UpdaterConfig;
use crate::error::InstallError;
use crate::http::{BodyReader, HttpTransport, RequestOptions};
use crate::manifest::{FirmwareManifest, IntegrityHash};
use crate::partition::{PartitionError, PartitionHandle, PartitionTable};
use crate::platform::Device;
use crate::status::{TrustLevel, UpdateStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallState {
    Connecting,
    Writing,
    Verifying,
    Aborted,
}

/// One update attempt. Never persisted; dropped on completion, abort or restart.
struct InstallSession<H> {
    handle: H,
    bytes_written: u64,
    expected_size: u64,
    state: InstallState,
    hasher: Sha256,
}

impl<H: PartitionHandle> InstallSession<H> {
    fn new(handle: H, expected_size: u64) -> Self {
        Self {
            handle,
            bytes_written: 0,
            expected_size,
            state: InstallState::Connecting,
            hasher: Sha256::new(),
        }
    }

    fn target(&self) -> &str {
        self.handle.label()
    }

    fn progress(&self) -> u8 {
        if self.expected_size == 0 {
            return 0;
        }
        (self.bytes_written.saturating_mul(100) / self.expected_size).min(100) as u8
    }

    fn is_complete(&self) -> bool {
        self.bytes_written == self.expected_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub version: String,
    pub target: String,
    pub bytes_written: u64,
    pub trust: TrustLevel,
}

pub struct UpdateInstaller {
    options: RequestOptions,
    buffer: Vec<u8>,
}

impl UpdateInstaller {
    pub fn new(config: &UpdaterConfig) -> Self {
        Self {
            options: RequestOptions::new(config.download_timeout()).follow_redirects(),
            // One chunk-sized buffer for the lifetime of the installer; the image never sits in RAM.
            buffer: vec![0u8; config.chunk_size.max(1)],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.buffer.len()
    }

    /// Downloads, verifies and commits `manifest`'s image, then restarts the device.
    ///
    /// On hardware the restart does not return. Fakes return `Ok` so callers can
    /// observe the committed state.
    pub fn install<T, P, D>(
        &mut self,
        manifest: FirmwareManifest,
        transport: &mut T,
        partitions: &mut P,
        device: &mut D,
        status: &UpdateStatus,
    ) -> Result<InstallReport, InstallError>
    where
        T: HttpTransport,
        P: PartitionTable,
        D: Device,
    {
        log::info!("Starting OTA update to {} from {}", manifest.version, manifest.download_url);
        status.set_progress(0);

        let mut response = transport
            .get(&manifest.download_url, &self.options)
            .map_err(|e| InstallError::Transport(e.to_string()))?;

        log::info!("HTTP response code: {}", response.status);
        if !(200..300).contains(&response.status) {
            return Err(InstallError::Transport(format!("HTTP {}", response.status)));
        }

        let expected_size = match response.content_length {
            Some(len) if len > 0 => len,
            _ => return Err(InstallError::UnknownSize),
        };
        if let Some(declared) = manifest.declared_size {
            if declared != expected_size {
                return Err(InstallError::SizeMismatch {
                    declared,
                    reported: expected_size,
                });
            }
        }
        log::info!("Firmware size: {} bytes", expected_size);

        let handle = partitions.begin_write(expected_size).map_err(|e| match e {
            PartitionError::NoSpace { required, available } => InstallError::NoSpace { required, available },
            other => InstallError::WriteError(other.to_string()),
        })?;

        let mut session = InstallSession::new(handle, expected_size);
        log::info!("Writing to partition {}", session.target());

        if let Err(err) = self.transfer(&mut response.body, partitions, &mut session, device, status) {
            return Err(Self::abandon(partitions, session, err));
        }

        session.state = InstallState::Verifying;
        let trust = match &manifest.integrity_hash {
            Some(expected) => {
                let actual = IntegrityHash::from_hasher(session.hasher.clone());
                if actual != *expected {
                    let err = InstallError::IntegrityMismatch {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    };
                    return Err(Self::abandon(partitions, session, err));
                }
                log::info!("SHA-256 verified: {}", actual);
                TrustLevel::HashVerified
            }
            None => {
                log::warn!(
                    "Release {} publishes no SHA-256; image checked by size only",
                    manifest.version
                );
                TrustLevel::SizeOnly
            }
        };

        let report = InstallReport {
            version: manifest.version,
            target: session.target().to_string(),
            bytes_written: session.bytes_written,
            trust,
        };

        partitions
            .commit(session.handle)
            .map_err(|e| InstallError::WriteError(e.to_string()))?;
        status.set_progress(100);

        log::info!(
            "OTA update written to {} ({} bytes), restarting into {}",
            report.target,
            report.bytes_written,
            report.version
        );
        device.restart();

        Ok(report)
    }

    fn transfer<B, P, D>(
        &mut self,
        body: &mut B,
        partitions: &mut P,
        session: &mut InstallSession<P::Handle>,
        device: &mut D,
        status: &UpdateStatus,
    ) -> Result<(), InstallError>
    where
        B: BodyReader,
        P: PartitionTable,
        D: Device,
    {
        session.state = InstallState::Writing;
        let mut last_logged = 0u8;

        while !session.is_complete() {
            let remaining = session.expected_size - session.bytes_written;
            let want = (self.buffer.len() as u64).min(remaining) as usize;

            let n = match body.read(&mut self.buffer[..want]) {
                Ok(0) => {
                    log::warn!(
                        "Connection closed at {}/{} bytes",
                        session.bytes_written,
                        session.expected_size
                    );
                    0
                }
                Ok(n) => n,
                Err(e) => {
                    log::warn!("Download failed at {} bytes: {}", session.bytes_written, e);
                    0
                }
            };
            if n == 0 {
                return Err(InstallError::Incomplete {
                    written: session.bytes_written,
                    expected: session.expected_size,
                });
            }

            let chunk = &self.buffer[..n];
            partitions
                .write_chunk(&mut session.handle, chunk)
                .map_err(|e| InstallError::WriteError(e.to_string()))?;
            session.hasher.update(chunk);
            session.bytes_written += n as u64;

            let progress = session.progress();
            status.set_progress(progress);
            if progress / 10 > last_logged / 10 {
                log::info!(
                    "Downloaded: {}% ({}/{})",
                    progress,
                    session.bytes_written,
                    session.expected_size
                );
                last_logged = progress;
            }

            device.yield_now();
        }

        Ok(())
    }

    fn abandon<P: PartitionTable>(
        partitions: &mut P,
        mut session: InstallSession<P::Handle>,
        err: InstallError,
    ) -> InstallError {
        log::error!(
            "OTA update aborted while {:?} after {}/{} bytes: {}",
            session.state,
            session.bytes_written,
            session.expected_size,
            err
        );
        session.state = InstallState::Aborted;
        partitions.abort(session.handle);
        err
    }
}
