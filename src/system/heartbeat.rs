use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

/// Status LED toggled by the main loop so a hung loop is visible on the board.
pub struct Heartbeat {
    led: PinDriver<'static, AnyOutputPin, Output>,
    on: bool,
}

impl Heartbeat {
    pub fn new(pin: AnyOutputPin) -> Result<Self> {
        let mut led = PinDriver::output(pin)?;
        led.set_low()?;
        Ok(Self { led, on: false })
    }

    pub fn tick(&mut self) {
        self.set(!self.on);
    }

    /// Blocking on/off blink, `times` cycles of `period_ms` each half. Ends with the LED off.
    pub fn blink(&mut self, times: u32, period_ms: u32) {
        for _ in 0..times {
            self.set(true);
            FreeRtos::delay_ms(period_ms);
            self.set(false);
            FreeRtos::delay_ms(period_ms);
        }
    }

    fn set(&mut self, on: bool) {
        self.on = on;
        let result = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
        if let Err(e) = result {
            log::debug!("Heartbeat LED write failed: {:?}", e);
        }
    }
}
