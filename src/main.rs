// Portable modules (config, logging, version) also build on the host for tests
#![cfg_attr(not(target_os = "espidf"), allow(dead_code))]

#[cfg(target_os = "espidf")]
use esp_idf_sys as _; // Binstart

// Generate ESP-IDF app descriptor
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod version;

#[cfg(target_os = "espidf")]
mod network;
#[cfg(target_os = "espidf")]
mod ota;
#[cfg(target_os = "espidf")]
mod system;

use std::time::Duration;
use updater_core::UpdaterConfig;

const LOOP_DELAY_MS: u32 = 1000;
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(300);

/// Watchdog must outlast the longest blocking network call of the update loop.
fn watchdog_timeout_ms(updater: &UpdaterConfig) -> u32 {
    let longest = updater.download_timeout().max(updater.manifest_timeout());
    (longest + Duration::from_secs(15)).as_millis().min(u32::MAX as u128) as u32
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::AnyOutputPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
    use log::{info, warn};
    use std::time::Instant;
    use updater_core::{
        BootValidator, PollOutcome, UpdateContext, UpdateScheduler, UpdateStatus, ValidationOutcome,
    };

    use crate::config::ConfigStore;
    use crate::network::{EspTransport, WifiLink, WifiManager};
    use crate::ota::EspPartitions;
    use crate::system::{EspDevice, Heartbeat};

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    let boot_at = Instant::now();

    logging::init_logger()?;
    info!("{}", version::full_version());
    info!("Boot reason: {}", system::reset::get_reset_reason());
    system::info::log_startup_info();

    let nvs = EspDefaultNvsPartition::take()?;
    let mut store = ConfigStore::new(nvs.clone())?;
    let mut device_config = store.load_or_default();
    if !logging::set_max_level_from_str(&device_config.log_level) {
        warn!("Unknown log level '{}', staying at info", device_config.log_level);
    }

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;

    let heartbeat = match Heartbeat::new(AnyOutputPin::from(peripherals.pins.gpio23)) {
        Ok(led) => Some(led),
        Err(e) => {
            warn!("Status LED unavailable: {:?}", e);
            None
        }
    };

    let mut partitions = EspPartitions::new();
    let mut device = EspDevice::with_watchdog(watchdog_timeout_ms(&device_config.updater))
        .with_status_led(heartbeat);

    // Reaching this point is the health check for a freshly installed image
    let mut validator = BootValidator::new();
    match validator.validate(&mut partitions) {
        Ok(ValidationOutcome::Confirmed) => {
            info!("Firmware {} confirmed, rollback cancelled", version::FIRMWARE_VERSION)
        }
        Ok(outcome) => info!("Boot validation: {:?}", outcome),
        Err(e) => log::error!("Boot validation failed: {}", e),
    }
    if system::reset::was_abnormal_reset() {
        warn!("Previous run ended abnormally");
    }

    // Covers both boot loader reverts and earlier forced rollbacks
    if let Some(abandoned) = validator.rolled_back_version(&partitions) {
        if device_config.skip_release(&abandoned) {
            if let Err(e) = store.save(&device_config) {
                warn!("Could not persist skipped release {}: {:?}", abandoned, e);
            }
        }
    }

    if device_config.rollback_requested {
        // Cleared first: a rollback that keeps failing must not run on every boot
        device_config.rollback_requested = false;
        device_config.skip_release(version::FIRMWARE_VERSION);
        match store.save(&device_config) {
            Ok(()) => {
                if let Err(e) = validator.force_rollback(&mut partitions, &mut device) {
                    warn!("Rollback not possible: {}", e);
                }
            }
            Err(e) => warn!("Skipping rollback, could not clear the request: {:?}", e),
        }
    }

    let mut wifi = WifiManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        device_config.wifi_ssid.clone(),
        device_config.wifi_password.clone(),
    )?;
    if let Err(e) = wifi.connect() {
        warn!("Initial WiFi connection failed: {:?}, will keep retrying", e);
    }

    let status = UpdateStatus::new();
    let mut scheduler = UpdateScheduler::new(
        &device_config.updater,
        version::FIRMWARE_VERSION,
        boot_at,
        status.clone(),
    )
    .skipping(device_config.skipped_version.clone());
    let mut ctx = UpdateContext {
        transport: EspTransport,
        partitions,
        device,
        link: WifiLink,
    };

    info!(
        "Entering main loop, checking {} every {}s",
        device_config.updater.manifest_url, device_config.updater.check_interval_secs
    );
    let mut last_status_log = Instant::now();

    loop {
        wifi.maintain(&ctx.link);

        if let PollOutcome::Restarting(report) = scheduler.poll(&mut ctx, Instant::now()) {
            info!("Installed {} into {}", report.version, report.target);
        }

        if last_status_log.elapsed() >= STATUS_LOG_INTERVAL {
            last_status_log = Instant::now();
            let snap = status.snapshot();
            info!(
                "Updater: {} ({} checks), last error: {}",
                snap.phase.as_str(),
                snap.checks,
                snap.last_error.as_deref().unwrap_or("none")
            );
        }

        ctx.device.heartbeat();
        ctx.device.feed_watchdog();
        FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    let _ = logging::init_logger();
    log::info!("{}", version::full_version());
    log::warn!("This firmware runs on ESP-IDF targets; host builds only carry the tests");
}
