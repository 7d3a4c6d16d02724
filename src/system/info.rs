use esp_idf_sys::{
    esp_chip_info, esp_chip_info_t, esp_chip_model_t_CHIP_ESP32, esp_chip_model_t_CHIP_ESP32C2,
    esp_chip_model_t_CHIP_ESP32C3, esp_chip_model_t_CHIP_ESP32C6, esp_chip_model_t_CHIP_ESP32H2,
    esp_chip_model_t_CHIP_ESP32S2, esp_chip_model_t_CHIP_ESP32S3, esp_flash_get_size,
    esp_get_free_heap_size, ESP_OK,
};

pub fn chip_model() -> (&'static str, u8, u16) {
    let mut info: esp_chip_info_t = Default::default();
    unsafe { esp_chip_info(&mut info) };

    let model = match info.model {
        esp_chip_model_t_CHIP_ESP32 => "ESP32",
        esp_chip_model_t_CHIP_ESP32S2 => "ESP32-S2",
        esp_chip_model_t_CHIP_ESP32S3 => "ESP32-S3",
        esp_chip_model_t_CHIP_ESP32C3 => "ESP32-C3",
        esp_chip_model_t_CHIP_ESP32C2 => "ESP32-C2",
        esp_chip_model_t_CHIP_ESP32C6 => "ESP32-C6",
        esp_chip_model_t_CHIP_ESP32H2 => "ESP32-H2",
        _ => "unknown ESP chip",
    };
    (model, info.cores, info.revision)
}

/// Size of the default flash chip, `None` if it cannot be read.
pub fn flash_size_kb() -> Option<u32> {
    let mut size = 0u32;
    let err = unsafe { esp_flash_get_size(core::ptr::null_mut(), &mut size) };
    (err == ESP_OK).then_some(size / 1024)
}

/// Device banner printed once at boot
pub fn log_startup_info() {
    let (model, cores, revision) = chip_model();
    log::info!("Chip: {} rev {} ({} cores)", model, revision, cores);
    match flash_size_kb() {
        Some(kb) => log::info!("Flash: {} KB", kb),
        None => log::warn!("Flash size unavailable"),
    }
    log::info!("Free heap: {} KB", unsafe { esp_get_free_heap_size() } / 1024);
}
