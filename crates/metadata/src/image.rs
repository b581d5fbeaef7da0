use std::fs;
use std::path::Path;

use lofty::picture::PictureInformation;

use crate::MetadataError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

pub fn read_image_info(path: &Path) -> Result<ImageInfo, MetadataError> {
    let data = fs::read(path)?;
    let info = match guess_mime(&data) {
        Some("image/jpeg") => PictureInformation::from_jpeg(&data)?,
        Some("image/png") => PictureInformation::from_png(&data)?,
        _ => return Err(MetadataError::UnsupportedImage),
    };
    Ok(ImageInfo {
        width: info.width,
        height: info.height,
    })
}

fn guess_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png")
    } else {
        None
    }
}
