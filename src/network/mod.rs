pub mod http_client;
pub mod wifi;

pub use http_client::EspTransport;
pub use wifi::{WifiLink, WifiManager};
