/// Device services the updater needs from the firmware.
pub trait Device {
    /// Hands control back to the platform's background work (network stack,
    /// idle task, watchdog). Called after every flash chunk.
    fn yield_now(&mut self);

    /// Controlled restart. On hardware this does not return.
    fn restart(&mut self);
}

/// Network link state. Provisioning and credentials live elsewhere.
pub trait Connectivity {
    fn is_connected(&self) -> bool;
}
