use anyhow::Result;
use serde::{Deserialize, Serialize};
use updater_core::UpdaterConfig;

#[cfg(target_os = "espidf")]
pub use self::nvs::ConfigStore;

const CONFIG_NAMESPACE: &str = "ota_status";
const CONFIG_KEY: &str = "config";
const MAX_CONFIG_BYTES: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // Update policy
    pub updater: UpdaterConfig,

    /// Operator request to go back to the previous image on next boot.
    pub rollback_requested: bool,

    /// Release this device rolled back from; the updater will not install it again.
    pub skipped_version: Option<String>,

    /// Console log level (off, error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        // Get WiFi credentials from environment variables set by build.rs
        // These come from wifi_config.h which should NOT be committed to git
        Self {
            wifi_ssid: env!("WIFI_SSID").to_string(),
            wifi_password: env!("WIFI_PASSWORD").to_string(),
            updater: UpdaterConfig::default(),
            rollback_requested: false,
            skipped_version: None,
            log_level: "info".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let mut config: DeviceConfig = serde_json::from_slice(data)?;

        if let Err(reason) = config.updater.validate() {
            log::warn!("Stored updater settings rejected ({}), using defaults", reason);
            config.updater = UpdaterConfig::default();
        }

        // If stored WiFi credentials are empty, use the compiled-in ones
        if config.wifi_ssid.is_empty() {
            let compiled = DeviceConfig::default();
            config.wifi_ssid = compiled.wifi_ssid;
            config.wifi_password = compiled.wifi_password;
        }

        Ok(config)
    }

    /// Records `version` as rolled back from. Returns true if that changed anything.
    pub fn skip_release(&mut self, version: &str) -> bool {
        if self.skipped_version.as_deref() == Some(version) {
            return false;
        }
        self.skipped_version = Some(version.to_string());
        true
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_CONFIG_BYTES {
            anyhow::bail!("config is {} bytes, NVS slot holds {}", json.len(), MAX_CONFIG_BYTES);
        }
        Ok(json)
    }
}

#[cfg(target_os = "espidf")]
mod nvs {
    use super::*;
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

    /// Device configuration persisted as one JSON blob in NVS.
    pub struct ConfigStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl ConfigStore {
        pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
            let nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)?;
            Ok(Self { nvs })
        }

        pub fn load_or_default(&mut self) -> DeviceConfig {
            match self.load() {
                Ok(config) => {
                    log::info!("Loaded configuration from NVS");
                    config
                }
                Err(e) => {
                    log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
                    let config = DeviceConfig::default();

                    // Try to save default config to NVS for next time
                    if let Err(save_err) = self.save(&config) {
                        log::warn!("Failed to save default config to NVS: {:?}", save_err);
                    }
                    config
                }
            }
        }

        pub fn save(&mut self, config: &DeviceConfig) -> Result<()> {
            let json = config.to_json()?;
            self.nvs.set_blob(CONFIG_KEY, &json)?;
            log::info!("Configuration saved to NVS");
            Ok(())
        }

        fn load(&self) -> Result<DeviceConfig> {
            let mut buf = vec![0u8; MAX_CONFIG_BYTES];
            let data = self
                .nvs
                .get_blob(CONFIG_KEY, &mut buf)?
                .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

            DeviceConfig::from_json(data)
        }
    }
}
