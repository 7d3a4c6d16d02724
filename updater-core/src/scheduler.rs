// Update scheduler - cooperative Idle -> Checking -> UpdateAvailable -> Installing loop.
//
// Driven by `poll(now)` from the firmware main loop. Each poll performs at most one
// transition, so an install never starts in the same slice as the check that found it.
// Failures back off exponentially from the check interval; nothing is retried immediately.

use std::time::{Duration, Instant};

use crate::config::UpdaterConfig;
use crate::error::{FetchError, InstallError};
use crate::http::HttpTransport;
use crate::installer::{InstallReport, UpdateInstaller};
use crate::manifest::FirmwareManifest;
use crate::partition::PartitionTable;
use crate::platform::{Connectivity, Device};
use crate::resolver::{Resolution, VersionResolver};
use crate::status::{CheckOutcome, SchedulerPhase, UpdateStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            base: config.check_interval(),
            max: config.max_backoff(),
        }
    }

    /// Delay before the next check after `consecutive_failures` failures in a row.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let cap = self.max.max(self.base);
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(cap)
            .min(cap)
    }
}

/// Collaborators handed to every step. The scheduler owns none of them.
pub struct UpdateContext<T, P, D, C> {
    pub transport: T,
    pub partitions: P,
    pub device: D,
    pub link: C,
}

#[derive(Debug)]
pub struct SchedulerState {
    phase: SchedulerPhase,
    next_check_at: Instant,
    consecutive_failures: u32,
    pending: Option<FirmwareManifest>,
    last_error: Option<String>,
    offline_reported: bool,
}

impl SchedulerState {
    fn new(first_check_at: Instant) -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            next_check_at: first_check_at,
            consecutive_failures: 0,
            pending: None,
            last_error: None,
            offline_reported: false,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn next_check_at(&self) -> Instant {
        self.next_check_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    /// Not due yet (quiet period or interval).
    Waiting,
    Offline,
    UpToDate,
    UpdateFound { version: String },
    Skipped { version: String },
    CheckFailed(FetchError),
    InstallFailed(InstallError),
    Restarting(InstallReport),
    /// An install already committed; waiting for the restart to land.
    AwaitingRestart,
}

pub struct UpdateScheduler {
    resolver: VersionResolver,
    installer: UpdateInstaller,
    backoff: BackoffPolicy,
    interval: Duration,
    state: SchedulerState,
    status: UpdateStatus,
}

impl UpdateScheduler {
    pub fn new(
        config: &UpdaterConfig,
        running_version: &str,
        boot_at: Instant,
        status: UpdateStatus,
    ) -> Self {
        status.set_phase(SchedulerPhase::Idle);
        Self {
            resolver: VersionResolver::new(config, running_version),
            installer: UpdateInstaller::new(config),
            backoff: BackoffPolicy::from_config(config),
            interval: config.check_interval(),
            state: SchedulerState::new(boot_at + config.quiet_period()),
            status,
        }
    }

    /// Release to leave alone, normally the one the device last rolled back from.
    pub fn skipping(mut self, version: Option<String>) -> Self {
        if let Some(version) = &version {
            log::info!("Release {} will not be reinstalled", version);
        }
        self.resolver = self.resolver.skipping(version);
        self
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn status(&self) -> &UpdateStatus {
        &self.status
    }

    pub fn poll<T, P, D, C>(&mut self, ctx: &mut UpdateContext<T, P, D, C>, now: Instant) -> PollOutcome
    where
        T: HttpTransport,
        P: PartitionTable,
        D: Device,
        C: Connectivity,
    {
        match self.state.phase {
            SchedulerPhase::Idle => self.check(ctx, now),
            SchedulerPhase::UpdateAvailable => self.install(ctx, now),
            SchedulerPhase::Restarting => PollOutcome::AwaitingRestart,
            // Transient phases only exist inside a single poll.
            SchedulerPhase::Checking | SchedulerPhase::Installing => {
                self.enter(SchedulerPhase::Idle);
                PollOutcome::Waiting
            }
        }
    }

    fn check<T, P, D, C>(&mut self, ctx: &mut UpdateContext<T, P, D, C>, now: Instant) -> PollOutcome
    where
        T: HttpTransport,
        C: Connectivity,
    {
        if now < self.state.next_check_at {
            return PollOutcome::Waiting;
        }

        // Offline polls do not use up the slot; check as soon as the link returns.
        if !ctx.link.is_connected() {
            if !self.state.offline_reported {
                log::warn!("WiFi not connected, skipping OTA check");
                self.state.offline_reported = true;
            }
            return PollOutcome::Offline;
        }
        self.state.offline_reported = false;

        log::info!("Checking for firmware updates...");
        self.enter(SchedulerPhase::Checking);

        match self.resolver.resolve(&mut ctx.transport) {
            Ok(Resolution::UpToDate { version }) => {
                log::info!("Firmware is up to date ({})", version);
                self.succeed(now);
                self.status.record(CheckOutcome::UpToDate, None);
                self.enter(SchedulerPhase::Idle);
                PollOutcome::UpToDate
            }
            Ok(Resolution::Skipped { version }) => {
                log::warn!("Release {} was rolled back on this device, not reinstalling", version);
                self.succeed(now);
                self.status.record(CheckOutcome::Skipped { version: version.clone() }, None);
                self.enter(SchedulerPhase::Idle);
                PollOutcome::Skipped { version }
            }
            Ok(Resolution::UpdateAvailable(manifest)) => {
                log::info!("New firmware available: {}", manifest.version);
                let version = manifest.version.clone();
                self.state.pending = Some(manifest);
                self.enter(SchedulerPhase::UpdateAvailable);
                PollOutcome::UpdateFound { version }
            }
            Err(err) => {
                log::warn!("Update check failed: {}", err);
                self.fail(now, err.to_string());
                self.enter(SchedulerPhase::Idle);
                PollOutcome::CheckFailed(err)
            }
        }
    }

    fn install<T, P, D, C>(&mut self, ctx: &mut UpdateContext<T, P, D, C>, now: Instant) -> PollOutcome
    where
        T: HttpTransport,
        P: PartitionTable,
        D: Device,
    {
        let Some(manifest) = self.state.pending.take() else {
            self.enter(SchedulerPhase::Idle);
            return PollOutcome::Waiting;
        };

        self.enter(SchedulerPhase::Installing);
        let result = self.installer.install(
            manifest,
            &mut ctx.transport,
            &mut ctx.partitions,
            &mut ctx.device,
            &self.status,
        );

        match result {
            Ok(report) => {
                self.status.record(
                    CheckOutcome::Installed {
                        version: report.version.clone(),
                        trust: report.trust,
                    },
                    None,
                );
                self.enter(SchedulerPhase::Restarting);
                PollOutcome::Restarting(report)
            }
            Err(err) => {
                log::error!("OTA update failed: {}", err);
                self.fail(now, err.to_string());
                self.enter(SchedulerPhase::Idle);
                PollOutcome::InstallFailed(err)
            }
        }
    }

    fn enter(&mut self, phase: SchedulerPhase) {
        self.state.phase = phase;
        self.status.set_phase(phase);
    }

    fn succeed(&mut self, now: Instant) {
        self.state.consecutive_failures = 0;
        self.state.next_check_at = now + self.interval;
    }

    fn fail(&mut self, now: Instant, error: String) {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        let delay = self.backoff.delay(self.state.consecutive_failures);
        self.state.next_check_at = now + delay;
        log::info!("Next update check in {}s", delay.as_secs());

        self.status.record(CheckOutcome::Failed, Some(error.clone()));
        self.state.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{DualSlotTable, SlotIndex};
    use crate::testing::{firmware_image, FakeDevice, FakeLink, Script, ScriptedTransport};

    const MANIFEST_URL: &str = "https://example.com/version.json";
    const FW_URL: &str = "https://example.com/fw.bin";

    type Ctx = UpdateContext<ScriptedTransport, DualSlotTable, FakeDevice, FakeLink>;

    fn setup() -> (UpdateScheduler, Ctx, Instant) {
        let config = UpdaterConfig {
            manifest_url: MANIFEST_URL.into(),
            check_interval_secs: 100,
            quiet_period_secs: 30,
            max_backoff_secs: 350,
            ..Default::default()
        };
        let boot = Instant::now();
        let scheduler = UpdateScheduler::new(&config, "1.0.0", boot, UpdateStatus::new());
        let ctx = UpdateContext {
            transport: ScriptedTransport::new(),
            partitions: DualSlotTable::new(64 * 1024),
            device: FakeDevice::default(),
            link: FakeLink { connected: true },
        };
        (scheduler, ctx, boot)
    }

    fn manifest(version: &str) -> Script {
        Script::ok(
            format!(r#"{{"version":"{}","download_url":"{}"}}"#, version, FW_URL).into_bytes(),
        )
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy { base: secs(100), max: secs(350) };
        assert_eq!(policy.delay(0), secs(100));
        assert_eq!(policy.delay(1), secs(100));
        assert_eq!(policy.delay(2), secs(200));
        assert_eq!(policy.delay(3), secs(350));
        assert_eq!(policy.delay(u32::MAX), secs(350));
    }

    #[test]
    fn test_quiet_period_after_boot() {
        let (mut scheduler, mut ctx, boot) = setup();
        ctx.transport.push(MANIFEST_URL, manifest("1.0.0"));

        assert_eq!(scheduler.poll(&mut ctx, boot + secs(29)), PollOutcome::Waiting);
        assert_eq!(ctx.transport.requests().len(), 0);
        assert_eq!(scheduler.poll(&mut ctx, boot + secs(30)), PollOutcome::UpToDate);
    }

    #[test]
    fn test_offline_does_not_consume_the_slot() {
        let (mut scheduler, mut ctx, boot) = setup();
        ctx.transport.push(MANIFEST_URL, manifest("1.0.0"));
        ctx.link.connected = false;

        assert_eq!(scheduler.poll(&mut ctx, boot + secs(40)), PollOutcome::Offline);
        assert_eq!(scheduler.poll(&mut ctx, boot + secs(41)), PollOutcome::Offline);
        assert_eq!(ctx.transport.requests().len(), 0);

        ctx.link.connected = true;
        assert_eq!(scheduler.poll(&mut ctx, boot + secs(42)), PollOutcome::UpToDate);
    }

    #[test]
    fn test_up_to_date_waits_a_full_interval() {
        let (mut scheduler, mut ctx, boot) = setup();
        ctx.transport.push(MANIFEST_URL, manifest("1.0.0"));
        ctx.transport.push(MANIFEST_URL, manifest("1.0.0"));

        let t0 = boot + secs(30);
        assert_eq!(scheduler.poll(&mut ctx, t0), PollOutcome::UpToDate);
        assert_eq!(scheduler.state().phase(), SchedulerPhase::Idle);
        assert_eq!(scheduler.poll(&mut ctx, t0 + secs(99)), PollOutcome::Waiting);
        assert_eq!(scheduler.poll(&mut ctx, t0 + secs(100)), PollOutcome::UpToDate);
        assert_eq!(ctx.transport.requested(FW_URL), 0);
    }

    #[test]
    fn test_check_failures_back_off() {
        let (mut scheduler, mut ctx, boot) = setup();
        for _ in 0..3 {
            ctx.transport.push(MANIFEST_URL, Script::status(500));
        }

        let t0 = boot + secs(30);
        assert!(matches!(scheduler.poll(&mut ctx, t0), PollOutcome::CheckFailed(_)));
        assert_eq!(scheduler.state().next_check_at(), t0 + secs(100));

        let t1 = t0 + secs(100);
        assert!(matches!(scheduler.poll(&mut ctx, t1), PollOutcome::CheckFailed(_)));
        assert_eq!(scheduler.state().next_check_at(), t1 + secs(200));
        assert_eq!(scheduler.state().consecutive_failures(), 2);
        assert_eq!(scheduler.state().last_error(), Some("manifest unreachable: HTTP 500"));
        assert_eq!(
            scheduler.status().last_error().as_deref(),
            Some("manifest unreachable: HTTP 500")
        );
    }

    #[test]
    fn test_success_resets_backoff() {
        let (mut scheduler, mut ctx, boot) = setup();
        ctx.transport.push(MANIFEST_URL, Script::status(503));
        ctx.transport.push(MANIFEST_URL, manifest("1.0.0"));

        let t0 = boot + secs(30);
        scheduler.poll(&mut ctx, t0);
        let t1 = t0 + secs(100);
        assert_eq!(scheduler.poll(&mut ctx, t1), PollOutcome::UpToDate);
        assert_eq!(scheduler.state().consecutive_failures(), 0);
        assert_eq!(scheduler.state().next_check_at(), t1 + secs(100));
    }

    #[test]
    fn test_update_installs_on_the_following_poll() {
        let (mut scheduler, mut ctx, boot) = setup();
        let image = firmware_image(3000);
        ctx.transport.push(MANIFEST_URL, manifest("2.0.0"));
        ctx.transport.push(FW_URL, Script::ok(image));

        let t0 = boot + secs(30);
        assert_eq!(
            scheduler.poll(&mut ctx, t0),
            PollOutcome::UpdateFound { version: "2.0.0".into() }
        );
        assert_eq!(scheduler.state().phase(), SchedulerPhase::UpdateAvailable);
        assert_eq!(ctx.transport.requested(FW_URL), 0);

        match scheduler.poll(&mut ctx, t0 + secs(1)) {
            PollOutcome::Restarting(report) => assert_eq!(report.version, "2.0.0"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(scheduler.status().phase(), SchedulerPhase::Restarting);
        assert_eq!(ctx.device.restarts, 1);

        // Nothing else runs after a committed install.
        assert_eq!(scheduler.poll(&mut ctx, t0 + secs(500)), PollOutcome::AwaitingRestart);
        assert_eq!(ctx.transport.requested(MANIFEST_URL), 1);
    }

    #[test]
    fn test_rolled_back_release_waits_a_full_interval() {
        let (scheduler, mut ctx, boot) = setup();
        let mut scheduler = scheduler.skipping(Some("2.0.0".into()));
        ctx.transport.push(MANIFEST_URL, manifest("2.0.0"));
        ctx.transport.push(MANIFEST_URL, manifest("2.0.0"));

        let t0 = boot + secs(30);
        assert_eq!(
            scheduler.poll(&mut ctx, t0),
            PollOutcome::Skipped { version: "2.0.0".into() }
        );
        assert_eq!(scheduler.state().phase(), SchedulerPhase::Idle);
        assert_eq!(scheduler.state().consecutive_failures(), 0);
        assert_eq!(scheduler.state().next_check_at(), t0 + secs(100));
        assert_eq!(
            scheduler.status().snapshot().last_outcome,
            Some(CheckOutcome::Skipped { version: "2.0.0".into() })
        );

        assert_eq!(scheduler.poll(&mut ctx, t0 + secs(1)), PollOutcome::Waiting);
        assert_eq!(
            scheduler.poll(&mut ctx, t0 + secs(100)),
            PollOutcome::Skipped { version: "2.0.0".into() }
        );
        assert_eq!(ctx.transport.requested(FW_URL), 0);
        assert_eq!(ctx.device.restarts, 0);
    }

    #[test]
    fn test_failed_install_retries_next_period_only() {
        let (mut scheduler, mut ctx, boot) = setup();
        ctx.transport.push(MANIFEST_URL, manifest("2.0.0"));
        ctx.transport
            .push(FW_URL, Script::ok(firmware_image(1000)).close_after(400));

        let t0 = boot + secs(30);
        scheduler.poll(&mut ctx, t0);
        let outcome = scheduler.poll(&mut ctx, t0);
        assert_eq!(
            outcome,
            PollOutcome::InstallFailed(InstallError::Incomplete { written: 400, expected: 1000 })
        );
        assert_eq!(scheduler.state().phase(), SchedulerPhase::Idle);
        assert_eq!(ctx.partitions.active_index(), SlotIndex::Ota0);

        // No immediate retry.
        assert_eq!(scheduler.poll(&mut ctx, t0 + secs(1)), PollOutcome::Waiting);
        assert_eq!(ctx.transport.requested(FW_URL), 1);
    }
}
