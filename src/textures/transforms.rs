//! Pixel transforms applied before compression
//!
//! Resizing goes through the [`Resizer`] trait so the policy engine can align
//! images without depending on a particular resampler. The colour transforms
//! work in place on tightly packed RGBA8 images.

use image::imageops::FilterType;
use image::RgbaImage;
use tracing::debug;

use super::decision::Preprocess;
use super::pixels::PixelBuffer;

/// Block compressors work on 4x4 pixel blocks
pub const BLOCK_SIZE: u32 = 4;

/// Resamples a pixel buffer to new dimensions
pub trait Resizer: Send + Sync {
    fn resize(&self, src: PixelBuffer<'_>, width: u32, height: u32) -> RgbaImage;
}

/// [`Resizer`] backed by `image::imageops`
#[derive(Debug, Clone, Copy)]
pub struct FilterResizer {
    filter: FilterType,
}

impl FilterResizer {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for FilterResizer {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl Resizer for FilterResizer {
    fn resize(&self, src: PixelBuffer<'_>, width: u32, height: u32) -> RgbaImage {
        debug!(
            "Resizing {}x{} -> {}x{} ({:?})",
            src.width(),
            src.height(),
            width,
            height,
            self.filter
        );
        image::imageops::resize(&src.to_image(), width, height, self.filter)
    }
}

/// Round both dimensions up to the next multiple of 4
pub fn aligned_size(width: u32, height: u32) -> (u32, u32) {
    (
        width.next_multiple_of(BLOCK_SIZE),
        height.next_multiple_of(BLOCK_SIZE),
    )
}

pub fn is_block_aligned(width: u32, height: u32) -> bool {
    width % BLOCK_SIZE == 0 && height % BLOCK_SIZE == 0
}

/// Scale RGB by alpha
pub fn premultiply_alpha(image: &mut RgbaImage) {
    for px in image.pixels_mut() {
        let a = px.0[3] as u16;
        for c in &mut px.0[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}

fn build_table(f: impl Fn(f32) -> f32) -> [u8; 256] {
    std::array::from_fn(|i| (f(i as f32 / 255.0).clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Raise RGB to `gamma` (alpha untouched)
pub fn apply_gamma(image: &mut RgbaImage, gamma: f32) {
    let table = build_table(|v| v.powf(gamma));
    for px in image.pixels_mut() {
        for c in &mut px.0[..3] {
            *c = table[*c as usize];
        }
    }
}

/// Multiply the green channel by `factor`, saturating at 255
pub fn boost_green(image: &mut RgbaImage, factor: f32) {
    let table = build_table(|v| v * factor);
    for px in image.pixels_mut() {
        px.0[1] = table[px.0[1] as usize];
    }
}

/// Run every step of a decision over the image, in order.
///
/// A resize step whose target already matches the image is skipped, so an
/// image the policy engine has aligned is not resampled again.
pub fn apply_preprocessing(
    mut image: RgbaImage,
    steps: &[Preprocess],
    resizer: &dyn Resizer,
) -> RgbaImage {
    for step in steps {
        match *step {
            Preprocess::ResizeToMultipleOf4 { width, height } => {
                if image.dimensions() != (width, height) {
                    image = resizer.resize(PixelBuffer::from_image(&image), width, height);
                }
            }
            Preprocess::PremultiplyAlpha => premultiply_alpha(&mut image),
            Preprocess::GammaCorrect { gamma } => apply_gamma(&mut image, gamma),
            Preprocess::GreenBoost { factor } => boost_green(&mut image, factor),
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textures::fixtures::*;

    #[test]
    fn test_aligned_size() {
        for w in 1..=64 {
            for h in [1, 3, 4, 5, 127, 128] {
                let (aw, ah) = aligned_size(w, h);
                assert!(is_block_aligned(aw, ah));
                assert!(aw >= w && aw - w < BLOCK_SIZE);
                assert!(ah >= h && ah - h < BLOCK_SIZE);
            }
        }
        assert_eq!(aligned_size(256, 128), (256, 128));
        assert_eq!(aligned_size(250, 130), (252, 132));
    }

    #[test]
    fn test_filter_resizer() {
        let img = noise(10, 7, 1);
        let out = FilterResizer::default().resize(PixelBuffer::from_image(&img), 12, 8);
        assert_eq!(out.dimensions(), (12, 8));
    }

    #[test]
    fn test_premultiply() {
        let mut img = solid(2, 1, [200, 100, 50, 128]);
        img.get_pixel_mut(1, 0).0 = [200, 100, 50, 0];
        premultiply_alpha(&mut img);
        assert_eq!(img.get_pixel(0, 0).0, [100, 50, 25, 128]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_gamma_keeps_extremes_and_alpha() {
        let mut img = solid(3, 1, [0, 255, 128, 77]);
        apply_gamma(&mut img, 0.88);
        let px = img.get_pixel(0, 0).0;
        assert_eq!(px[0], 0);
        assert_eq!(px[1], 255);
        // gamma < 1 brightens midtones
        assert!(px[2] > 128);
        assert_eq!(px[3], 77);
    }

    #[test]
    fn test_boost_green_saturates() {
        let mut img = solid(1, 1, [10, 240, 10, 255]);
        boost_green(&mut img, 1.16);
        assert_eq!(img.get_pixel(0, 0).0, [10, 255, 10, 255]);

        let mut img = solid(1, 1, [10, 100, 10, 255]);
        boost_green(&mut img, 1.16);
        assert_eq!(img.get_pixel(0, 0).0[1], 116);
    }

    #[test]
    fn test_apply_preprocessing_order() {
        let img = solid(6, 6, [200, 200, 200, 128]);
        let steps = [
            Preprocess::ResizeToMultipleOf4 {
                width: 8,
                height: 8,
            },
            Preprocess::PremultiplyAlpha,
        ];
        let out = apply_preprocessing(img, &steps, &FilterResizer::default());
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(4, 4).0, [100, 100, 100, 128]);
    }

    #[test]
    fn test_resize_step_skipped_when_aligned() {
        let img = noise(8, 8, 5);
        let steps = [Preprocess::ResizeToMultipleOf4 {
            width: 8,
            height: 8,
        }];
        let out = apply_preprocessing(img.clone(), &steps, &FilterResizer::default());
        assert_eq!(out, img);
    }
}
