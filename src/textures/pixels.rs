//! Borrowed RGBA8 pixel views
//!
//! A [`PixelBuffer`] is the only thing the metrics and the policy engine ever
//! look at. It borrows decoded samples (R, G, B, A order) and tolerates padded
//! rows, so callers can hand over a mapped scratch image without copying.

use image::RgbaImage;

/// Bytes per RGBA8 pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Index of the alpha channel inside a pixel
pub const ALPHA: usize = 3;

/// Errors raised when a view does not fit its backing slice
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PixelBufferError {
    #[error("Row stride {stride} is smaller than one row of {width} pixels ({min_stride} bytes)")]
    StrideTooSmall {
        stride: usize,
        width: u32,
        min_stride: usize,
    },

    #[error("Pixel data holds {actual} bytes, {width}x{height} with stride {stride} needs {required}")]
    DataTooShort {
        actual: usize,
        required: usize,
        width: u32,
        height: u32,
        stride: usize,
    },

    #[error("{height} rows with stride {stride} overflow the address space")]
    Overflow { height: u32, stride: usize },
}

/// Read-only view over one decoded RGBA8 image
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> PixelBuffer<'a> {
    /// Create a view, checking that `stride` and the dimensions fit `data`.
    ///
    /// Zero width or height is accepted; such a buffer is degenerate and every
    /// metric reports its safe default for it.
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
    ) -> Result<Self, PixelBufferError> {
        let row_bytes = width as usize * BYTES_PER_PIXEL;

        if width > 0 && height > 0 {
            if stride < row_bytes {
                return Err(PixelBufferError::StrideTooSmall {
                    stride,
                    width,
                    min_stride: row_bytes,
                });
            }

            let required = stride
                .checked_mul(height as usize - 1)
                .and_then(|n| n.checked_add(row_bytes))
                .ok_or(PixelBufferError::Overflow { height, stride })?;
            if data.len() < required {
                return Err(PixelBufferError::DataTooShort {
                    actual: data.len(),
                    required,
                    width,
                    height,
                    stride,
                });
            }
        }

        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// View a tightly packed image
    pub fn from_image(image: &'a RgbaImage) -> Self {
        Self {
            data: image.as_raw(),
            width: image.width(),
            height: image.height(),
            stride: image.width() as usize * BYTES_PER_PIXEL,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of pixels (not bytes)
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The `width * 4` meaningful bytes of row `y`, padding excluded
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    /// Rows top to bottom
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride + x as usize * BYTES_PER_PIXEL;
        let p = &self.data[offset..offset + BYTES_PER_PIXEL];
        [p[0], p[1], p[2], p[3]]
    }

    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.stride + x as usize * BYTES_PER_PIXEL + ALPHA]
    }

    /// Copy into a tightly packed image (drops row padding)
    pub fn to_image(&self) -> RgbaImage {
        let mut raw = Vec::with_capacity(self.pixel_count() * BYTES_PER_PIXEL);
        for row in self.rows() {
            raw.extend_from_slice(row);
        }
        // Length is width * height * 4 by construction
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}
