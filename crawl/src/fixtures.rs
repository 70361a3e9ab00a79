use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use lazy_static::lazy_static;

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .expect("encoding fixture must succeed");
    buf.into_inner()
}

lazy_static! {
    /// A 2x2 PNG.
    pub static ref PNG_IMAGE: Vec<u8> = encode(DynamicImage::new_rgb8(2, 2), ImageFormat::Png);

    /// A 3x1 GIF.
    pub static ref GIF_IMAGE: Vec<u8> = encode(DynamicImage::new_rgba8(3, 1), ImageFormat::Gif);

    /// Some bytes which are not an image of any kind.
    pub static ref NOT_AN_IMAGE: Vec<u8> = b"definitely not an image".to_vec();
}
