// Two-slot partition model and the platform partition API.
//
// The application never touches partition bits directly: installs go through
// `begin_write`/`write_chunk`/`commit`, the boot validator through
// `mark_valid`/`force_rollback`.

use serde::Serialize;
use std::fmt;

use crate::image::AppDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SlotIndex {
    Ota0,
    Ota1,
}

impl SlotIndex {
    pub const ALL: [SlotIndex; 2] = [SlotIndex::Ota0, SlotIndex::Ota1];

    pub fn other(self) -> Self {
        match self {
            SlotIndex::Ota0 => SlotIndex::Ota1,
            SlotIndex::Ota1 => SlotIndex::Ota0,
        }
    }

    pub fn index(self) -> usize {
        match self {
            SlotIndex::Ota0 => 0,
            SlotIndex::Ota1 => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SlotIndex::Ota0 => "ota_0",
            SlotIndex::Ota1 => "ota_1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotRole {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationState {
    /// Freshly installed, waiting for the first successful boot to confirm it.
    PendingVerify,
    Valid,
    Aborted,
    /// No rollback metadata (factory image, or rollback disabled in the boot loader).
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSlot {
    pub label: String,
    pub role: SlotRole,
    pub verification: VerificationState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    NoSpace { required: u64, available: u64 },
    /// A write session is already open; installs are serialized.
    SessionOpen,
    Write(String),
    Query(String),
    RollbackUnavailable(String),
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::NoSpace { required, available } => {
                write!(f, "need {} bytes, slot holds {}", required, available)
            }
            PartitionError::SessionOpen => write!(f, "write session already open"),
            PartitionError::Write(reason) => write!(f, "write failed: {}", reason),
            PartitionError::Query(reason) => write!(f, "query failed: {}", reason),
            PartitionError::RollbackUnavailable(reason) => write!(f, "no rollback target: {}", reason),
        }
    }
}

impl std::error::Error for PartitionError {}

pub trait PartitionHandle {
    /// Label of the slot being written.
    fn label(&self) -> &str;
}

/// Platform partition API. Writes only ever target the inactive slot.
pub trait PartitionTable {
    type Handle: PartitionHandle;

    /// Erases the inactive slot and reserves `expected_size` bytes.
    /// Fails with `NoSpace` before anything is written.
    fn begin_write(&mut self, expected_size: u64) -> Result<Self::Handle, PartitionError>;

    fn write_chunk(&mut self, handle: &mut Self::Handle, bytes: &[u8]) -> Result<(), PartitionError>;

    /// Finalizes the image, makes it the next boot target and leaves it pending verification.
    fn commit(&mut self, handle: Self::Handle) -> Result<(), PartitionError>;

    /// Drops the session. The inactive slot is left unbootable; the active slot is untouched.
    fn abort(&mut self, handle: Self::Handle);

    fn active_slot(&self) -> Result<PartitionSlot, PartitionError>;

    fn active_state(&self) -> Result<VerificationState, PartitionError> {
        Ok(self.active_slot()?.verification)
    }

    /// Confirms the running slot. No-op if it is already valid.
    fn mark_valid(&mut self) -> Result<(), PartitionError>;

    /// Invalidates the running slot so the next boot selects the other one.
    fn force_rollback(&mut self) -> Result<(), PartitionError>;

    /// Version of the image the device rolled back from, either by the boot
    /// loader or by `force_rollback`. `None` when no slot holds an abandoned
    /// image, or when its version cannot be read.
    fn abandoned_version(&self) -> Result<Option<String>, PartitionError>;
}

#[derive(Debug, Clone)]
struct SlotRecord {
    generation: u32,
    state: VerificationState,
    bootable: bool,
    trial_booted: bool,
    image: Vec<u8>,
}

impl SlotRecord {
    fn empty() -> Self {
        Self {
            generation: 0,
            state: VerificationState::Untracked,
            bootable: false,
            trial_booted: false,
            image: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct DualSlotWrite {
    target: SlotIndex,
    expected: u64,
    written: u64,
}

impl PartitionHandle for DualSlotWrite {
    fn label(&self) -> &str {
        self.target.label()
    }
}

/// In-memory arena of two slots with ESP-IDF style generation numbers.
///
/// Also plays the boot loader: `reboot` picks the highest-generation bootable
/// slot and reverts a slot that is still `PendingVerify` on its second boot.
#[derive(Debug, Clone)]
pub struct DualSlotTable {
    slots: [SlotRecord; 2],
    active: SlotIndex,
    capacity: u64,
    session_open: bool,
    fail_writes_after: Option<u64>,
}

impl DualSlotTable {
    /// Factory layout: `ota_0` runs a valid image, `ota_1` is blank.
    pub fn new(slot_capacity: u64) -> Self {
        let mut running = SlotRecord::empty();
        running.generation = 1;
        running.state = VerificationState::Valid;
        running.bootable = true;
        running.image = b"factory".to_vec();

        Self {
            slots: [running, SlotRecord::empty()],
            active: SlotIndex::Ota0,
            capacity: slot_capacity,
            session_open: false,
            fail_writes_after: None,
        }
    }

    pub fn active_index(&self) -> SlotIndex {
        self.active
    }

    pub fn slot(&self, index: SlotIndex) -> PartitionSlot {
        PartitionSlot {
            label: index.label().to_string(),
            role: if index == self.active {
                SlotRole::Active
            } else {
                SlotRole::Inactive
            },
            verification: self.slots[index.index()].state,
        }
    }

    pub fn slots(&self) -> [PartitionSlot; 2] {
        [self.slot(SlotIndex::Ota0), self.slot(SlotIndex::Ota1)]
    }

    pub fn image(&self, index: SlotIndex) -> &[u8] {
        &self.slots[index.index()].image
    }

    pub fn is_bootable(&self, index: SlotIndex) -> bool {
        self.slots[index.index()].bootable
    }

    pub fn session_open(&self) -> bool {
        self.session_open
    }

    /// Fault injection: the flash rejects writes once this many bytes are in.
    pub fn fail_writes_after(&mut self, bytes: u64) {
        self.fail_writes_after = Some(bytes);
    }

    /// Forces the verification state of a slot, e.g. to boot straight into `PendingVerify`.
    pub fn set_state(&mut self, index: SlotIndex, state: VerificationState) {
        self.slots[index.index()].state = state;
    }

    /// Simulates a power cycle and returns the slot the boot loader selected.
    pub fn reboot(&mut self) -> SlotIndex {
        self.session_open = false;

        let mut order = SlotIndex::ALL;
        order.sort_by_key(|s| std::cmp::Reverse(self.slots[s.index()].generation));

        for candidate in order {
            let slot = &mut self.slots[candidate.index()];
            if !slot.bootable || slot.state == VerificationState::Aborted {
                continue;
            }
            if slot.state == VerificationState::PendingVerify {
                if slot.trial_booted {
                    log::warn!("Boot loader: {} never confirmed, reverting", candidate.label());
                    slot.state = VerificationState::Aborted;
                    continue;
                }
                slot.trial_booted = true;
            }
            self.active = candidate;
            return candidate;
        }

        // Nothing bootable left; stay on whatever ran last.
        self.active
    }
}

impl PartitionTable for DualSlotTable {
    type Handle = DualSlotWrite;

    fn begin_write(&mut self, expected_size: u64) -> Result<DualSlotWrite, PartitionError> {
        if self.session_open {
            return Err(PartitionError::SessionOpen);
        }
        if expected_size > self.capacity {
            return Err(PartitionError::NoSpace {
                required: expected_size,
                available: self.capacity,
            });
        }

        let target = self.active.other();
        let slot = &mut self.slots[target.index()];
        slot.image.clear();
        slot.bootable = false;
        slot.trial_booted = false;
        self.session_open = true;

        Ok(DualSlotWrite {
            target,
            expected: expected_size,
            written: 0,
        })
    }

    fn write_chunk(&mut self, handle: &mut DualSlotWrite, bytes: &[u8]) -> Result<(), PartitionError> {
        let after = handle.written + bytes.len() as u64;
        if after > handle.expected {
            return Err(PartitionError::Write(format!(
                "write past reserved size ({} > {})",
                after, handle.expected
            )));
        }
        if let Some(limit) = self.fail_writes_after {
            if after > limit {
                return Err(PartitionError::Write(format!("flash error at offset {}", handle.written)));
            }
        }

        self.slots[handle.target.index()].image.extend_from_slice(bytes);
        handle.written = after;
        Ok(())
    }

    fn commit(&mut self, handle: DualSlotWrite) -> Result<(), PartitionError> {
        self.session_open = false;
        if handle.written != handle.expected {
            return Err(PartitionError::Write(format!(
                "image truncated: {}/{} bytes",
                handle.written, handle.expected
            )));
        }

        let next_generation = self.slots.iter().map(|s| s.generation).max().unwrap_or(0) + 1;
        let slot = &mut self.slots[handle.target.index()];
        slot.generation = next_generation;
        slot.state = VerificationState::PendingVerify;
        slot.bootable = true;
        Ok(())
    }

    fn abort(&mut self, handle: DualSlotWrite) {
        self.session_open = false;
        let slot = &mut self.slots[handle.target.index()];
        slot.image.clear();
        slot.bootable = false;
    }

    fn active_slot(&self) -> Result<PartitionSlot, PartitionError> {
        Ok(self.slot(self.active))
    }

    fn mark_valid(&mut self) -> Result<(), PartitionError> {
        let slot = &mut self.slots[self.active.index()];
        if slot.state == VerificationState::PendingVerify {
            slot.state = VerificationState::Valid;
        }
        Ok(())
    }

    fn force_rollback(&mut self) -> Result<(), PartitionError> {
        let other = self.active.other();
        let target = &self.slots[other.index()];
        let usable = target.bootable
            && matches!(
                target.state,
                VerificationState::Valid | VerificationState::Untracked
            );
        if !usable {
            return Err(PartitionError::RollbackUnavailable(format!(
                "{} holds no confirmed image",
                other.label()
            )));
        }

        self.slots[self.active.index()].state = VerificationState::Aborted;
        Ok(())
    }

    fn abandoned_version(&self) -> Result<Option<String>, PartitionError> {
        let other = &self.slots[self.active.other().index()];
        if other.state != VerificationState::Aborted {
            return Ok(None);
        }
        Ok(AppDescriptor::parse(&other.image).map(|desc| desc.version))
    }
}
