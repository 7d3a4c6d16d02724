pub mod device;
pub mod heartbeat;
pub mod info;
pub mod reset;

pub use device::EspDevice;
pub use heartbeat::Heartbeat;
