// Boot validator - confirms a freshly installed image once it has booted.
//
// Runs once, early in boot, before networking. Reaching it at all is the proof
// that the new image works, so a `PendingVerify` slot is marked `Valid`.
// Automatic revert of an image that never gets here is the boot loader's job.

use serde::Serialize;

use crate::error::ValidationError;
use crate::partition::{PartitionError, PartitionTable, VerificationState};
use crate::platform::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationOutcome {
    /// First boot of a new image; it is now valid and rollback is cancelled.
    Confirmed,
    AlreadyValid,
    /// Slot carries no rollback metadata.
    Untracked,
    /// Running from a slot the boot loader already gave up on. Left alone.
    RunningAborted,
}

#[derive(Debug, Default)]
pub struct BootValidator {
    last_outcome: Option<ValidationOutcome>,
}

impl BootValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_outcome(&self) -> Option<ValidationOutcome> {
        self.last_outcome
    }

    /// Safe to call more than once; a second call reports `AlreadyValid`.
    pub fn validate<P: PartitionTable>(
        &mut self,
        partitions: &mut P,
    ) -> Result<ValidationOutcome, ValidationError> {
        let slot = partitions
            .active_slot()
            .map_err(|e| ValidationError::PartitionQueryFailed(e.to_string()))?;
        log::info!("Running partition: {} ({:?})", slot.label, slot.verification);

        let outcome = match slot.verification {
            VerificationState::PendingVerify => {
                partitions
                    .mark_valid()
                    .map_err(|e| ValidationError::MarkValidFailed(e.to_string()))?;
                log::info!("New firmware booted successfully, {} marked valid", slot.label);
                ValidationOutcome::Confirmed
            }
            VerificationState::Valid => ValidationOutcome::AlreadyValid,
            VerificationState::Untracked => {
                log::debug!("{} has no rollback state", slot.label);
                ValidationOutcome::Untracked
            }
            VerificationState::Aborted => {
                log::warn!("Running from {} which is marked aborted", slot.label);
                ValidationOutcome::RunningAborted
            }
        };

        self.last_outcome = Some(outcome);
        Ok(outcome)
    }

    /// Release this device rolled back from, so the scheduler can refuse to
    /// reinstall it. A slot that cannot be read counts as none.
    pub fn rolled_back_version<P: PartitionTable>(&self, partitions: &P) -> Option<String> {
        match partitions.abandoned_version() {
            Ok(Some(version)) => {
                log::warn!("Rolled back from firmware {}, it will not be reinstalled", version);
                Some(version)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Could not read the rolled-back slot: {}", e);
                None
            }
        }
    }

    /// Operator-triggered rollback: invalidate the running image and restart into the other slot.
    pub fn force_rollback<P: PartitionTable, D: Device>(
        &mut self,
        partitions: &mut P,
        device: &mut D,
    ) -> Result<(), ValidationError> {
        log::warn!("Rolling back to previous firmware...");

        partitions.force_rollback().map_err(|e| match e {
            PartitionError::RollbackUnavailable(reason) => ValidationError::RollbackUnavailable(reason),
            other => ValidationError::PartitionQueryFailed(other.to_string()),
        })?;

        device.restart();
        Ok(())
    }
}
