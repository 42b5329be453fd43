use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

/// Red ramps left to right, green top to bottom.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Black canvas with one filled white rectangle.
pub fn rectangle(width: u32, height: u32, x: u32, y: u32, rw: u32, rh: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |px, py| {
        if px >= x && px < x + rw && py >= y && py < y + rh {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("png encode");
    buf.into_inner()
}
