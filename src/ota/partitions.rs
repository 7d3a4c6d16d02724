// ESP-IDF partition adapter - the otadata/app-slot side of the updater

use core::ffi::{c_void, CStr};
use core::ptr;
use esp_idf_sys::{
    esp_app_desc_t, esp_err_t, esp_ota_abort, esp_ota_begin, esp_ota_check_rollback_is_possible,
    esp_ota_end, esp_ota_get_last_invalid_partition, esp_ota_get_next_update_partition,
    esp_ota_get_partition_description, esp_ota_get_running_partition, esp_ota_get_state_partition,
    esp_ota_handle_t, esp_ota_img_states_t, esp_ota_img_states_t_ESP_OTA_IMG_ABORTED,
    esp_ota_img_states_t_ESP_OTA_IMG_INVALID, esp_ota_img_states_t_ESP_OTA_IMG_NEW,
    esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY, esp_ota_img_states_t_ESP_OTA_IMG_VALID,
    esp_ota_mark_app_invalid_rollback_and_reboot, esp_ota_mark_app_valid_cancel_rollback,
    esp_ota_set_boot_partition, esp_ota_write, esp_partition_t, EspError, ESP_ERR_NOT_FOUND,
    ESP_ERR_NOT_SUPPORTED,
};
use updater_core::partition::{
    PartitionError, PartitionHandle, PartitionSlot, PartitionTable, SlotRole, VerificationState,
};

/// An open write into the inactive slot. Ended by `commit` or `abort`.
pub struct OtaWrite {
    partition: *const esp_partition_t,
    handle: esp_ota_handle_t,
    label: String,
}

impl PartitionHandle for OtaWrite {
    fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Default)]
pub struct EspPartitions {
    session_open: bool,
}

impl EspPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw state of the running slot, `None` when otadata has no entry for it.
    fn running_state(
        running: *const esp_partition_t,
    ) -> Result<Option<esp_ota_img_states_t>, PartitionError> {
        let mut state: esp_ota_img_states_t = 0;
        match EspError::from(unsafe { esp_ota_get_state_partition(running, &mut state) }) {
            None => Ok(Some(state)),
            Some(e) if is_code(&e, ESP_ERR_NOT_FOUND) || is_code(&e, ESP_ERR_NOT_SUPPORTED) => {
                Ok(None)
            }
            Some(e) => Err(PartitionError::Query(e.to_string())),
        }
    }
}

impl PartitionTable for EspPartitions {
    type Handle = OtaWrite;

    fn begin_write(&mut self, expected_size: u64) -> Result<OtaWrite, PartitionError> {
        if self.session_open {
            return Err(PartitionError::SessionOpen);
        }

        let partition = unsafe { esp_ota_get_next_update_partition(ptr::null()) };
        if partition.is_null() {
            return Err(PartitionError::Query("no OTA update partition".into()));
        }

        let available = unsafe { (*partition).size } as u64;
        if expected_size > available {
            return Err(PartitionError::NoSpace {
                required: expected_size,
                available,
            });
        }

        // Erases only the sectors the image needs
        let mut handle: esp_ota_handle_t = 0;
        esp_result(unsafe { esp_ota_begin(partition, expected_size as _, &mut handle) })
            .map_err(|e| PartitionError::Write(format!("esp_ota_begin: {}", e)))?;

        self.session_open = true;
        Ok(OtaWrite {
            partition,
            handle,
            label: label_of(partition),
        })
    }

    fn write_chunk(&mut self, handle: &mut OtaWrite, bytes: &[u8]) -> Result<(), PartitionError> {
        esp_result(unsafe {
            esp_ota_write(handle.handle, bytes.as_ptr() as *const c_void, bytes.len() as _)
        })
        .map_err(|e| PartitionError::Write(format!("esp_ota_write: {}", e)))
    }

    fn commit(&mut self, handle: OtaWrite) -> Result<(), PartitionError> {
        self.session_open = false;

        // Validates the app image header and checksum
        esp_result(unsafe { esp_ota_end(handle.handle) })
            .map_err(|e| PartitionError::Write(format!("esp_ota_end: {}", e)))?;

        esp_result(unsafe { esp_ota_set_boot_partition(handle.partition) })
            .map_err(|e| PartitionError::Write(format!("esp_ota_set_boot_partition: {}", e)))?;

        log::info!("Boot partition set to {}", handle.label);
        Ok(())
    }

    fn abort(&mut self, handle: OtaWrite) {
        self.session_open = false;
        if let Err(e) = esp_result(unsafe { esp_ota_abort(handle.handle) }) {
            log::error!("Aborting the OTA write to {} failed: {}", handle.label, e);
        }
    }

    fn active_slot(&self) -> Result<PartitionSlot, PartitionError> {
        let running = unsafe { esp_ota_get_running_partition() };
        if running.is_null() {
            return Err(PartitionError::Query("running partition unknown".into()));
        }

        let verification = match Self::running_state(running)? {
            Some(esp_ota_img_states_t_ESP_OTA_IMG_NEW)
            | Some(esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY) => VerificationState::PendingVerify,
            Some(esp_ota_img_states_t_ESP_OTA_IMG_VALID) => VerificationState::Valid,
            Some(esp_ota_img_states_t_ESP_OTA_IMG_INVALID)
            | Some(esp_ota_img_states_t_ESP_OTA_IMG_ABORTED) => VerificationState::Aborted,
            _ => VerificationState::Untracked,
        };

        Ok(PartitionSlot {
            label: label_of(running),
            role: SlotRole::Active,
            verification,
        })
    }

    fn mark_valid(&mut self) -> Result<(), PartitionError> {
        esp_result(unsafe { esp_ota_mark_app_valid_cancel_rollback() })
            .map_err(|e| PartitionError::Write(format!("mark valid: {}", e)))
    }

    fn force_rollback(&mut self) -> Result<(), PartitionError> {
        if !unsafe { esp_ota_check_rollback_is_possible() } {
            return Err(PartitionError::RollbackUnavailable(
                "no other valid image in flash".into(),
            ));
        }

        // Only returns on failure; success reboots into the previous slot
        let code = unsafe { esp_ota_mark_app_invalid_rollback_and_reboot() };
        Err(PartitionError::RollbackUnavailable(match EspError::from(code) {
            Some(e) => e.to_string(),
            None => "rollback returned without rebooting".into(),
        }))
    }

    fn abandoned_version(&self) -> Result<Option<String>, PartitionError> {
        // Slot the boot loader or a forced rollback marked invalid/aborted
        let invalid = unsafe { esp_ota_get_last_invalid_partition() };
        if invalid.is_null() {
            return Ok(None);
        }

        let mut desc: esp_app_desc_t = Default::default();
        match EspError::from(unsafe { esp_ota_get_partition_description(invalid, &mut desc) }) {
            None => {
                let version = unsafe { CStr::from_ptr(desc.version.as_ptr()) }
                    .to_string_lossy()
                    .into_owned();
                Ok((!version.is_empty()).then_some(version))
            }
            // Erased or overwritten since; nothing left to name
            Some(e) if is_code(&e, ESP_ERR_NOT_FOUND) => Ok(None),
            Some(e) => Err(PartitionError::Query(format!("{}: {}", label_of(invalid), e))),
        }
    }
}

fn esp_result(code: esp_err_t) -> Result<(), EspError> {
    EspError::convert(code)
}

fn is_code(err: &EspError, code: impl TryInto<esp_err_t>) -> bool {
    code.try_into().map(|c| err.code() == c).unwrap_or(false)
}

fn label_of(partition: *const esp_partition_t) -> String {
    unsafe { CStr::from_ptr((*partition).label.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}
