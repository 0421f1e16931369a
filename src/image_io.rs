use std::path::Path;
use image::RgbImage;

use crate::errors::{DiagnosisError, Result};

/// A decoded input photo with its metadata
pub struct InputImage {
    pub image: RgbImage,
    /// File stem, used to name the image in logs
    pub filename: String,
}

impl InputImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Load an image file and decode it to 8-bit RGB.
///
/// The format is guessed from the file content, not the extension, so an
/// upload saved without an extension still decodes.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<InputImage> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(DiagnosisError::InvalidPath(path.to_path_buf()));
    }

    let filename = path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();

    let img = image::io::Reader::open(path)?
        .with_guessed_format()?
        .decode()?;

    Ok(InputImage {
        image: img.to_rgb8(),
        filename,
    })
}
