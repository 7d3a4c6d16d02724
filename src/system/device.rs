use esp_idf_hal::delay::FreeRtos;
use updater_core::platform::Device;

use super::Heartbeat;

// Five quick blinks announce a restart into new firmware
const RESTART_BLINKS: u32 = 5;
const RESTART_BLINK_MS: u32 = 100;

/// Scheduler/installer view of the chip: cooperative yield and restart.
pub struct EspDevice {
    watchdog: bool,
    led: Option<Heartbeat>,
}

impl EspDevice {
    /// Puts the calling task under the task watchdog with the given timeout.
    pub fn with_watchdog(timeout_ms: u32) -> Self {
        let watchdog = unsafe {
            // First deinit if already initialized
            let _ = esp_idf_sys::esp_task_wdt_deinit();

            let wdt_config = esp_idf_sys::esp_task_wdt_config_t {
                timeout_ms,
                idle_core_mask: 0,
                trigger_panic: false,
            };
            esp_idf_sys::esp_task_wdt_init(&wdt_config) == esp_idf_sys::ESP_OK
                && esp_idf_sys::esp_task_wdt_add(core::ptr::null_mut()) == esp_idf_sys::ESP_OK
        };

        if watchdog {
            log::info!("Watchdog timeout set to {} ms", timeout_ms);
        } else {
            log::warn!("Task watchdog unavailable, continuing without it");
        }
        Self { watchdog, led: None }
    }

    pub fn with_status_led(mut self, led: Option<Heartbeat>) -> Self {
        self.led = led;
        self
    }

    /// Toggles the status LED, if there is one.
    pub fn heartbeat(&mut self) {
        if let Some(led) = self.led.as_mut() {
            led.tick();
        }
    }

    pub fn feed_watchdog(&self) {
        if self.watchdog {
            unsafe {
                esp_idf_sys::esp_task_wdt_reset();
            }
        }
    }
}

impl Device for EspDevice {
    fn yield_now(&mut self) {
        self.feed_watchdog();
        // One tick lets WiFi and the idle task run between flash chunks
        FreeRtos::delay_ms(1);
    }

    fn restart(&mut self) {
        log::info!("Restarting...");
        log::logger().flush();

        if let Some(led) = self.led.as_mut() {
            led.blink(RESTART_BLINKS, RESTART_BLINK_MS);
        }

        // Give some time for final log output
        FreeRtos::delay_ms(1000);

        unsafe {
            esp_idf_sys::esp_restart();
        }
    }
}
