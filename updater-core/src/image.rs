// ESP application image descriptor.
//
// Every app image starts with the image header, one segment header and then
// `esp_app_desc_t`, which carries the version string the build was stamped
// with. Reading it lets a slot be named by release without booting it.

/// First byte of every ESP-IDF application image.
pub const IMAGE_MAGIC: u8 = 0xE9;

const APP_DESC_MAGIC: u32 = 0xABCD_5432;

// esp_image_header_t (24) + esp_image_segment_header_t (8)
const APP_DESC_OFFSET: usize = 32;
const VERSION_OFFSET: usize = APP_DESC_OFFSET + 16;
const PROJECT_NAME_OFFSET: usize = VERSION_OFFSET + FIELD_LEN;
const FIELD_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub version: String,
    pub project_name: String,
}

impl AppDescriptor {
    /// `None` for anything that is not an ESP app image with a version.
    pub fn parse(image: &[u8]) -> Option<Self> {
        if image.first() != Some(&IMAGE_MAGIC) || image.len() < PROJECT_NAME_OFFSET + FIELD_LEN {
            return None;
        }

        let magic = u32::from_le_bytes(image[APP_DESC_OFFSET..APP_DESC_OFFSET + 4].try_into().ok()?);
        if magic != APP_DESC_MAGIC {
            return None;
        }

        let version = c_field(&image[VERSION_OFFSET..VERSION_OFFSET + FIELD_LEN])?;
        if version.is_empty() {
            return None;
        }
        let project_name = c_field(&image[PROJECT_NAME_OFFSET..PROJECT_NAME_OFFSET + FIELD_LEN])?;

        Some(Self {
            version,
            project_name,
        })
    }

    /// Image prefix holding this descriptor, padded with `filler` to `len` bytes.
    pub fn build_image(&self, len: usize, filler: impl Fn(usize) -> u8) -> Vec<u8> {
        let mut image: Vec<u8> = (0..len.max(PROJECT_NAME_OFFSET + FIELD_LEN)).map(filler).collect();
        image[0] = IMAGE_MAGIC;
        image[APP_DESC_OFFSET..APP_DESC_OFFSET + 4].copy_from_slice(&APP_DESC_MAGIC.to_le_bytes());
        write_c_field(&mut image[VERSION_OFFSET..VERSION_OFFSET + FIELD_LEN], &self.version);
        write_c_field(
            &mut image[PROJECT_NAME_OFFSET..PROJECT_NAME_OFFSET + FIELD_LEN],
            &self.project_name,
        );
        image
    }
}

fn c_field(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_owned)
}

// Truncates to leave room for the terminator.
fn write_c_field(field: &mut [u8], value: &str) {
    field.fill(0);
    let n = value.len().min(field.len() - 1);
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
}
