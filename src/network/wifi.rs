use anyhow::{bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use std::time::{Duration, Instant};
use updater_core::platform::Connectivity;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

pub struct WifiManager {
    wifi: BlockingWifi<EspWifi<'static>>,
    pub ssid: String,
    last_reconnect: Option<Instant>,
}

impl WifiManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
    ) -> Result<Self> {
        log::info!("Initializing WiFi manager for SSID: '{}'", ssid);

        if ssid.is_empty() {
            log::error!("WiFi SSID is empty! Check wifi_config.h");
            bail!("WiFi SSID cannot be empty");
        }

        let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;

        let cfg = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid SSID format: {}", ssid))?,
            password: password
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid password format"))?,
            auth_method: if password.is_empty() {
                log::warn!("WiFi password is empty, using open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        esp_wifi.set_configuration(&cfg)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        Ok(Self {
            wifi,
            ssid,
            last_reconnect: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        log::info!("Starting WiFi...");
        self.wifi.start()?;

        log::info!("Connecting to {}...", self.ssid);
        self.wifi.connect()?;

        log::info!("Waiting for DHCP...");
        self.wifi.wait_netif_up()?;

        log::info!("WiFi connected, IP: {}", self.get_ip().unwrap_or_default());

        // Power save drops long downloads on some access points
        unsafe {
            use esp_idf_sys::*;
            if esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE) != ESP_OK {
                log::warn!("Failed to disable WiFi power save");
            }
        }

        Ok(())
    }

    /// Retries the association at most every few seconds while the link is down.
    pub fn maintain(&mut self, link: &WifiLink) {
        if link.is_connected() {
            return;
        }
        if self
            .last_reconnect
            .is_some_and(|at| at.elapsed() < RECONNECT_INTERVAL)
        {
            return;
        }
        self.last_reconnect = Some(Instant::now());

        log::warn!("WiFi disconnected! Attempting to reconnect...");
        let result = if self.wifi.is_started().unwrap_or(false) {
            self.wifi
                .connect()
                .and_then(|_| self.wifi.wait_netif_up())
                .map_err(anyhow::Error::from)
        } else {
            self.connect()
        };

        match result {
            Ok(()) => log::info!("WiFi reconnected, IP: {}", self.get_ip().unwrap_or_default()),
            Err(e) => log::warn!("WiFi reconnect failed: {:?}", e),
        }
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|ip_info| format!("{}", ip_info.ip))
    }
}

/// Connectivity as the updater sees it: the station interface holds an address.
#[derive(Clone, Copy, Default)]
pub struct WifiLink;

impl Connectivity for WifiLink {
    fn is_connected(&self) -> bool {
        unsafe {
            let mut ip_info: esp_idf_sys::esp_netif_ip_info_t = std::mem::zeroed();
            let netif = esp_idf_sys::esp_netif_get_handle_from_ifkey(
                b"WIFI_STA_DEF\0".as_ptr() as *const ::core::ffi::c_char,
            );
            !netif.is_null()
                && esp_idf_sys::esp_netif_get_ip_info(netif, &mut ip_info) == esp_idf_sys::ESP_OK
                && ip_info.ip.addr != 0
        }
    }
}
