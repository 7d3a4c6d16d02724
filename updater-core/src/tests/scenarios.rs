use std::time::{Duration, Instant};

use proptest::prelude::*;

use crate::config::UpdaterConfig;
use crate::error::{FetchError, InstallError};
use crate::manifest::IntegrityHash;
use crate::partition::{DualSlotTable, PartitionTable, SlotIndex, VerificationState};
use crate::scheduler::{PollOutcome, UpdateContext, UpdateScheduler};
use crate::status::{CheckOutcome, SchedulerPhase, TrustLevel, UpdateStatus};
use crate::testing::{app_image, firmware_image, FakeDevice, FakeLink, Script, ScriptedTransport};
use crate::validator::{BootValidator, ValidationOutcome};

const MANIFEST_URL: &str = "https://x/version.json";
const FW_URL: &str = "https://x/fw.bin";

type Ctx = UpdateContext<ScriptedTransport, DualSlotTable, FakeDevice, FakeLink>;

struct Board {
    scheduler: UpdateScheduler,
    ctx: Ctx,
    now: Instant,
}

fn board_config() -> UpdaterConfig {
    UpdaterConfig {
        manifest_url: MANIFEST_URL.into(),
        chunk_size: 256,
        ..Default::default()
    }
}

impl Board {
    fn boot(running_version: &str) -> Self {
        Self::boot_with(DualSlotTable::new(128 * 1024), running_version, None)
    }

    /// Power-on over existing flash, skipping `skipped` the way the firmware
    /// does after it rolled back from that release.
    fn boot_with(partitions: DualSlotTable, running_version: &str, skipped: Option<String>) -> Self {
        let config = board_config();
        let now = Instant::now();
        let scheduler = UpdateScheduler::new(&config, running_version, now, UpdateStatus::new())
            .skipping(skipped);
        Self {
            scheduler,
            ctx: UpdateContext {
                transport: ScriptedTransport::new(),
                partitions,
                device: FakeDevice::default(),
                link: FakeLink { connected: true },
            },
            now: now + config.quiet_period(),
        }
    }

    /// Checks for and installs `version`, leaving the board about to restart.
    fn install(&mut self, version: &str, image: Vec<u8>) {
        self.ctx
            .transport
            .push(MANIFEST_URL, Script::ok(manifest_json(version, Some(FW_URL), None)));
        self.ctx.transport.push(FW_URL, Script::ok(image));
        assert_eq!(self.poll(), PollOutcome::UpdateFound { version: version.into() });
        assert!(matches!(self.poll(), PollOutcome::Restarting(_)));
    }

    fn poll(&mut self) -> PollOutcome {
        let outcome = self.scheduler.poll(&mut self.ctx, self.now);
        self.now += Duration::from_secs(1);
        outcome
    }
}

fn manifest_json(version: &str, url: Option<&str>, sha256: Option<&IntegrityHash>) -> Vec<u8> {
    let mut fields = vec![format!(r#""version":"{}""#, version)];
    if let Some(url) = url {
        fields.push(format!(r#""download_url":"{}""#, url));
    }
    if let Some(hash) = sha256 {
        fields.push(format!(r#""sha256":"{}""#, hash));
    }
    format!("{{{}}}", fields.join(",")).into_bytes()
}

#[test]
fn scenario_a_verified_update_restarts_into_pending_slot() {
    let image = firmware_image(10_000);
    let hash = IntegrityHash::of(&image);
    let mut dev = Board::boot("1.0.0");
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), Some(&hash))));
    dev.ctx.transport.push(FW_URL, Script::ok(image.clone()));

    assert_eq!(dev.poll(), PollOutcome::UpdateFound { version: "2.0.0".into() });
    let report = match dev.poll() {
        PollOutcome::Restarting(report) => report,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(report.trust, TrustLevel::HashVerified);
    assert_eq!(report.target, "ota_1");
    assert_eq!(dev.ctx.device.restarts, 1);
    assert_eq!(dev.scheduler.status().progress(), 100);
    assert_eq!(
        dev.scheduler.status().snapshot().last_outcome,
        Some(CheckOutcome::Installed { version: "2.0.0".into(), trust: TrustLevel::HashVerified })
    );

    assert_eq!(dev.ctx.partitions.reboot(), SlotIndex::Ota1);
    assert_eq!(dev.ctx.partitions.active_state().unwrap(), VerificationState::PendingVerify);
    assert_eq!(dev.ctx.partitions.image(SlotIndex::Ota1), &image[..]);
    // Previous image stays bootable until the new one confirms.
    assert_eq!(dev.ctx.partitions.slot(SlotIndex::Ota0).verification, VerificationState::Valid);
}

#[test]
fn scenario_b_dropped_connection_keeps_running_firmware() {
    let image = firmware_image(10_000);
    let mut dev = Board::boot("1.0.0");
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), None)));
    dev.ctx.transport.push(FW_URL, Script::ok(image).close_after(6_000));
    let before = dev.ctx.partitions.active_slot().unwrap();

    dev.poll();
    assert_eq!(
        dev.poll(),
        PollOutcome::InstallFailed(InstallError::Incomplete { written: 6_000, expected: 10_000 })
    );

    assert_eq!(dev.scheduler.state().phase(), SchedulerPhase::Idle);
    assert_eq!(dev.ctx.partitions.active_slot().unwrap(), before);
    assert!(!dev.ctx.partitions.session_open());
    assert_eq!(dev.ctx.device.restarts, 0);
    assert_eq!(dev.ctx.partitions.reboot(), SlotIndex::Ota0);
}

#[test]
fn scenario_c_manifest_without_url_fetches_no_firmware() {
    let mut dev = Board::boot("1.0.0");
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", None, None)));

    assert!(matches!(
        dev.poll(),
        PollOutcome::CheckFailed(FetchError::InvalidManifest(_))
    ));
    assert_eq!(dev.scheduler.state().phase(), SchedulerPhase::Idle);
    assert_eq!(dev.ctx.transport.requests().len(), 1);
    assert_eq!(dev.ctx.transport.requested(FW_URL), 0);
}

#[test]
fn scenario_d_boot_validator_confirms_once() {
    let image = firmware_image(2_000);
    let mut dev = Board::boot("1.0.0");
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), None)));
    dev.ctx.transport.push(FW_URL, Script::ok(image));
    dev.poll();
    assert!(matches!(dev.poll(), PollOutcome::Restarting(_)));

    let mut table = dev.ctx.partitions;
    assert_eq!(table.reboot(), SlotIndex::Ota1);

    let mut validator = BootValidator::new();
    assert_eq!(validator.validate(&mut table), Ok(ValidationOutcome::Confirmed));
    assert_eq!(table.active_state().unwrap(), VerificationState::Valid);

    // Second boot of the same slot.
    assert_eq!(table.reboot(), SlotIndex::Ota1);
    let slots = table.slots();
    assert_eq!(
        BootValidator::new().validate(&mut table),
        Ok(ValidationOutcome::AlreadyValid)
    );
    assert_eq!(table.slots(), slots);
}

#[test]
fn unconfirmed_image_is_reverted_by_boot_loader() {
    let mut dev = Board::boot("1.0.0");
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), None)));
    dev.ctx.transport.push(FW_URL, Script::ok(firmware_image(1_500)));
    dev.poll();
    dev.poll();

    let mut table = dev.ctx.partitions;
    // New image crashes before the validator runs, twice.
    assert_eq!(table.reboot(), SlotIndex::Ota1);
    assert_eq!(table.reboot(), SlotIndex::Ota0);
    assert_eq!(table.slot(SlotIndex::Ota1).verification, VerificationState::Aborted);

    assert_eq!(
        BootValidator::new().validate(&mut table),
        Ok(ValidationOutcome::AlreadyValid)
    );
}

#[test]
fn operator_rollback_is_not_undone_by_the_next_check() {
    let mut dev = Board::boot("1.0.0");
    dev.install("2.0.0", app_image("2.0.0", 8_000));

    // 2.0.0 boots and confirms, then the operator asks for 1.0.0 back.
    let mut table = dev.ctx.partitions;
    assert_eq!(table.reboot(), SlotIndex::Ota1);
    let mut validator = BootValidator::new();
    assert_eq!(validator.validate(&mut table), Ok(ValidationOutcome::Confirmed));
    validator
        .force_rollback(&mut table, &mut FakeDevice::default())
        .unwrap();
    assert_eq!(table.reboot(), SlotIndex::Ota0);

    let skipped = BootValidator::new().rolled_back_version(&table);
    assert_eq!(skipped.as_deref(), Some("2.0.0"));

    let mut dev = Board::boot_with(table, "1.0.0", skipped);
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), None)));

    assert_eq!(dev.poll(), PollOutcome::Skipped { version: "2.0.0".into() });
    assert_eq!(dev.ctx.transport.requested(FW_URL), 0);
    assert_eq!(dev.ctx.device.restarts, 0);
    assert_eq!(dev.ctx.partitions.reboot(), SlotIndex::Ota0);
}

#[test]
fn reverted_release_is_skipped_until_the_manifest_moves_on() {
    let mut dev = Board::boot("1.0.0");
    dev.install("2.0.0", app_image("2.0.0", 3_000));

    // 2.0.0 crashes before confirming; the boot loader goes back to 1.0.0.
    let mut table = dev.ctx.partitions;
    assert_eq!(table.reboot(), SlotIndex::Ota1);
    assert_eq!(table.reboot(), SlotIndex::Ota0);
    assert_eq!(
        BootValidator::new().validate(&mut table),
        Ok(ValidationOutcome::AlreadyValid)
    );
    let skipped = BootValidator::new().rolled_back_version(&table);
    assert_eq!(skipped.as_deref(), Some("2.0.0"));

    let mut dev = Board::boot_with(table, "1.0.0", skipped);
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), None)));
    assert_eq!(dev.poll(), PollOutcome::Skipped { version: "2.0.0".into() });
    assert_eq!(dev.scheduler.state().consecutive_failures(), 0);
    assert_eq!(dev.ctx.transport.requested(FW_URL), 0);

    // A fixed release is installed over the abandoned one.
    dev.now += board_config().check_interval();
    let fixed = app_image("2.0.1", 3_000);
    dev.install("2.0.1", fixed.clone());
    assert_eq!(dev.ctx.device.restarts, 1);
    assert_eq!(dev.ctx.partitions.image(SlotIndex::Ota1), &fixed[..]);
    assert_eq!(dev.ctx.partitions.reboot(), SlotIndex::Ota1);
}

#[test]
fn integrity_mismatch_leaves_active_slot_untouched() {
    let image = firmware_image(4_096);
    let wrong = IntegrityHash::of(b"something else");
    let mut dev = Board::boot("1.0.0");
    dev.ctx
        .transport
        .push(MANIFEST_URL, Script::ok(manifest_json("2.0.0", Some(FW_URL), Some(&wrong))));
    dev.ctx.transport.push(FW_URL, Script::ok(image));
    let before = dev.ctx.partitions.slots();

    dev.poll();
    assert!(matches!(
        dev.poll(),
        PollOutcome::InstallFailed(InstallError::IntegrityMismatch { .. })
    ));
    assert_eq!(dev.ctx.partitions.slots()[0], before[0]);
    assert_eq!(dev.ctx.partitions.reboot(), SlotIndex::Ota0);
    assert_eq!(dev.ctx.device.restarts, 0);
}

proptest! {
    #[test]
    fn same_version_never_downloads(
        major in 0u8..20,
        minor in 0u8..20,
        patch in 0u8..50,
        polls in 1usize..6,
    ) {
        let version = format!("{}.{}.{}", major, minor, patch);
        let mut dev = Board::boot(&version);
        dev.ctx
            .transport
            .push(MANIFEST_URL, Script::ok(manifest_json(&version, Some(FW_URL), None)));

        prop_assert_eq!(dev.poll(), PollOutcome::UpToDate);
        for _ in 0..polls {
            prop_assert_eq!(dev.poll(), PollOutcome::Waiting);
        }
        prop_assert_eq!(dev.scheduler.state().phase(), SchedulerPhase::Idle);
        prop_assert_eq!(dev.ctx.transport.requested(FW_URL), 0);
        prop_assert!(!dev.ctx.partitions.session_open());
    }
}
