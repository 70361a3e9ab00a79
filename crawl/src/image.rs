use std::io::Cursor;

use image::{ImageFormat, ImageReader};

use crate::Error;

/// Inspects raw bytes and returns the canonical file extension of the image
/// format they're encoded in.
///
/// The format is guessed from the magic bytes, and the image header is
/// parsed to make sure the data actually is an image of that format.
pub fn detect_format(data: &[u8]) -> Result<&'static str, Error> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::Decode(e.to_string()))?;

    let ext = reader
        .format()
        .and_then(extension)
        .ok_or_else(|| Error::Decode("unknown image format".to_string()))?;

    reader
        .into_dimensions()
        .map_err(|e| Error::Decode(format!("invalid {} image: {}", ext, e)))?;

    Ok(ext)
}

fn extension(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        _ => None,
    }
}
