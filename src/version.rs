// Centralized version information

// Cargo package version from Cargo.toml. This is what the manifest is compared against,
// so bump it for every published image.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const FIRMWARE_NAME: &str = env!("CARGO_PKG_NAME");

// Full version string for the boot banner
pub fn full_version() -> String {
    format!("{} v{}", FIRMWARE_NAME, FIRMWARE_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_contains_cargo_version() {
        assert!(full_version().ends_with(FIRMWARE_VERSION));
        assert!(full_version().starts_with("esp32-ota-updater"));
    }
}
