//! Synthetic images shared by the texture tests.

use image::{Rgba, RgbaImage};

/// Uniform image
pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(rgba))
}

/// Set alpha on a rectangle (clipped to the image)
pub fn fill_alpha(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, alpha: u8) {
    for py in y..(y + h).min(img.height()) {
        for px in x..(x + w).min(img.width()) {
            img.get_pixel_mut(px, py).0[3] = alpha;
        }
    }
}

/// Set colour on a rectangle, keeping alpha (clipped to the image)
pub fn fill_rgb(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
    for py in y..(y + h).min(img.height()) {
        for px in x..(x + w).min(img.width()) {
            let p = img.get_pixel_mut(px, py);
            p.0[..3].copy_from_slice(&rgb);
        }
    }
}

/// Opaque grey ramp, black at the top row and white at the bottom row
pub fn vertical_gradient(width: u32, height: u32) -> RgbaImage {
    let last = height.saturating_sub(1).max(1);
    RgbaImage::from_fn(width, height, |_, y| {
        let v = (y * 255 / last) as u8;
        Rgba([v, v, v, 255])
    })
}

/// Opaque deterministic noise
pub fn noise(width: u32, height: u32, seed: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let mut h = x.wrapping_mul(0x9E37_79B1) ^ y.wrapping_mul(0x85EB_CA77) ^ seed;
        h ^= h >> 15;
        h = h.wrapping_mul(0x2C1B_3C6D);
        h ^= h >> 12;
        Rgba([h as u8, (h >> 8) as u8, (h >> 16) as u8, 255])
    })
}

/// Warm glow whose alpha ramps smoothly from 0 on the left to 255 on the right
pub fn glow(width: u32, height: u32) -> RgbaImage {
    let last = width.saturating_sub(1).max(1);
    RgbaImage::from_fn(width, height, |x, _| {
        Rgba([255, 220, 120, (x * 255 / last) as u8])
    })
}
