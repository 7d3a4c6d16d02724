// OTA slot access on the device
//
// Update flow (driven by updater_core):
// 1. Boot validator confirms or leaves the running slot
// 2. Scheduler checks the manifest and streams the image into the other slot
// 3. Slot is committed as the next boot partition
// 4. Restart; the boot loader reverts if step 1 never runs on the new image

pub mod partitions;

pub use partitions::EspPartitions;
