// Host-side implementations of the updater seams: reqwest for HTTP, RAM for the slot.

use indicatif::ProgressBar;
use reqwest::redirect::Policy;
use std::io::{ErrorKind, Read};
use updater_core::http::{BodyReader, HttpResponse, HttpTransport, RequestOptions, TransportError};
use updater_core::partition::{
    PartitionError, PartitionHandle, PartitionSlot, PartitionTable, SlotRole, VerificationState,
};
use updater_core::platform::Device;
use updater_core::UpdateStatus;

pub struct ReqwestTransport;

pub struct ReqwestBody {
    response: reqwest::blocking::Response,
}

impl BodyReader for ReqwestBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.response.read(buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    type Body = ReqwestBody;

    fn get(
        &mut self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse<ReqwestBody>, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .redirect(if options.follow_redirects {
                Policy::limited(10)
            } else {
                Policy::none()
            })
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let response = client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: ReqwestBody { response },
        })
    }
}

pub struct RamWrite;

impl PartitionHandle for RamWrite {
    fn label(&self) -> &str {
        "ram"
    }
}

/// Stand-in for the inactive slot, sized like the device's app partitions.
pub struct RamSlot {
    capacity: u64,
    image: Vec<u8>,
    open: bool,
    committed: bool,
}

impl RamSlot {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            image: Vec::new(),
            open: false,
            committed: false,
        }
    }

    /// Committed image, if the install got that far.
    pub fn image(&self) -> Option<&[u8]> {
        self.committed.then_some(self.image.as_slice())
    }
}

impl PartitionTable for RamSlot {
    type Handle = RamWrite;

    fn begin_write(&mut self, expected_size: u64) -> Result<RamWrite, PartitionError> {
        if self.open {
            return Err(PartitionError::SessionOpen);
        }
        if expected_size > self.capacity {
            return Err(PartitionError::NoSpace {
                required: expected_size,
                available: self.capacity,
            });
        }
        self.image.clear();
        self.image.reserve(expected_size as usize);
        self.open = true;
        self.committed = false;
        Ok(RamWrite)
    }

    fn write_chunk(&mut self, _: &mut RamWrite, bytes: &[u8]) -> Result<(), PartitionError> {
        if self.image.len() as u64 + bytes.len() as u64 > self.capacity {
            return Err(PartitionError::Write("write past end of slot".into()));
        }
        self.image.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self, _: RamWrite) -> Result<(), PartitionError> {
        self.open = false;
        self.committed = true;
        Ok(())
    }

    fn abort(&mut self, _: RamWrite) {
        self.open = false;
        self.image.clear();
    }

    fn active_slot(&self) -> Result<PartitionSlot, PartitionError> {
        Ok(PartitionSlot {
            label: "host".into(),
            role: SlotRole::Active,
            verification: VerificationState::Untracked,
        })
    }

    fn mark_valid(&mut self) -> Result<(), PartitionError> {
        Ok(())
    }

    fn force_rollback(&mut self) -> Result<(), PartitionError> {
        Err(PartitionError::RollbackUnavailable("host has no previous image".into()))
    }

    fn abandoned_version(&self) -> Result<Option<String>, PartitionError> {
        Ok(None)
    }
}

/// Mirrors install progress onto a terminal bar.
pub struct ProgressDevice {
    status: UpdateStatus,
    bar: ProgressBar,
    pub restart_requested: bool,
}

impl ProgressDevice {
    pub fn new(status: UpdateStatus, bar: ProgressBar) -> Self {
        Self {
            status,
            bar,
            restart_requested: false,
        }
    }
}

impl Device for ProgressDevice {
    fn yield_now(&mut self) {
        self.bar.set_position(self.status.progress() as u64);
    }

    fn restart(&mut self) {
        self.bar.set_position(100);
        self.restart_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_slot_commit_and_abort() {
        let mut slot = RamSlot::new(8);
        let mut handle = slot.begin_write(4).unwrap();
        slot.write_chunk(&mut handle, b"abcd").unwrap();
        assert!(slot.image().is_none());
        slot.commit(handle).unwrap();
        assert_eq!(slot.image(), Some(&b"abcd"[..]));

        let mut handle = slot.begin_write(4).unwrap();
        slot.write_chunk(&mut handle, b"xy").unwrap();
        slot.abort(handle);
        assert!(slot.image().is_none());
    }

    #[test]
    fn test_ram_slot_capacity() {
        let mut slot = RamSlot::new(4);
        assert_eq!(
            slot.begin_write(5).err(),
            Some(PartitionError::NoSpace { required: 5, available: 4 })
        );

        let mut handle = slot.begin_write(4).unwrap();
        assert!(slot.write_chunk(&mut handle, b"12345").is_err());
        assert_eq!(slot.begin_write(1).err(), Some(PartitionError::SessionOpen));
    }
}
