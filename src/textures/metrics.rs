//! Pixel statistics used by the encoding policy
//!
//! Every function here is a pure, total function of a [`PixelBuffer`]: no I/O,
//! no failure. Degenerate buffers (zero width or height) produce the safe
//! default (`false`, `0.0`, or an empty [`AlphaInfo`]) so the policy falls
//! through to its fallback rule instead of dividing by zero.
//!
//! The numeric thresholds are fixed policy, tuned against a labeled asset
//! corpus. For reference, the glow signatures measured there were roughly
//! mid/saturated/gradient = 0.09/0.086/1.17 for "Jackpot" banners and
//! 0.31-0.36/0.31+/1.89-2.41 for "Major"/"Mega" banners.

use serde::Serialize;
use std::cell::OnceCell;

use super::pixels::{PixelBuffer, ALPHA};

/// Alpha at or below this is counted as transparent
pub const TRANSPARENT_MAX: u8 = 5;
/// Alpha at or above this is counted as opaque
pub const OPAQUE_MIN: u8 = 250;

/// Alpha step between vertically adjacent pixels that counts as a soft edge
pub const SOFT_ALPHA_DELTA: u8 = 10;
/// Fraction of pixels that must sit on a soft edge
pub const SOFT_ALPHA_MIN_RATIO: f64 = 0.01;

pub const GLOW_MIN_WIDTH: u32 = 700;
pub const GLOW_MIN_HEIGHT: u32 = 200;
pub const GLOW_MIN_MID_RATIO: f32 = 0.08;
pub const GLOW_MIN_SATURATED_MID_RATIO: f32 = 0.08;
pub const GLOW_MAX_ALPHA_GRADIENT: f32 = 3.0;

pub const DARK_GRADIENT_MIN_SIZE: u32 = 400;
pub const DARK_GRADIENT_STEP: u32 = 4;
pub const DARK_GRADIENT_MAX_LUMA_DELTA: f32 = 4.5;

pub const LONG_STRIP_MIN_ASPECT: f32 = 3.5;

pub const STRIP_SHEET_MIN_SIZE: u32 = 64;
/// A channel above this is "not near-black"
pub const STRIP_SHEET_INK_LEVEL: u8 = 8;
pub const STRIP_SHEET_MIN_ROW_COVERAGE: f32 = 0.03;
pub const STRIP_SHEET_MIN_BAND_HEIGHT: u32 = 4;
/// Bands past this count are ignored
pub const STRIP_SHEET_MAX_BANDS: usize = 32;
pub const STRIP_SHEET_LONG_BAND_ASPECT: f32 = 6.0;
pub const STRIP_SHEET_MIN_LONG_FRACTION: f32 = 0.6;

/// Alpha histogram summary
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AlphaInfo {
    /// Any pixel with alpha != 255
    pub has_alpha: bool,
    pub transparent_ratio: f32,
    pub mid_ratio: f32,
    pub opaque_ratio: f32,
}

/// Classify every pixel's alpha as transparent, mid or opaque (full scan).
pub fn analyze_alpha(buf: PixelBuffer<'_>) -> AlphaInfo {
    if buf.is_empty() {
        return AlphaInfo::default();
    }

    let mut transparent = 0usize;
    let mut mid = 0usize;
    let mut opaque = 0usize;
    let mut has_alpha = false;

    for row in buf.rows() {
        for px in row.chunks_exact(4) {
            let a = px[ALPHA];
            has_alpha |= a != u8::MAX;
            match a {
                0..=TRANSPARENT_MAX => transparent += 1,
                OPAQUE_MIN..=u8::MAX => opaque += 1,
                _ => mid += 1,
            }
        }
    }

    let total = buf.pixel_count() as f64;
    AlphaInfo {
        has_alpha,
        transparent_ratio: (transparent as f64 / total) as f32,
        mid_ratio: (mid as f64 / total) as f32,
        opaque_ratio: (opaque as f64 / total) as f32,
    }
}

/// Any alpha strictly between fully transparent and fully opaque
pub fn has_partial_alpha(buf: PixelBuffer<'_>) -> bool {
    buf.rows().any(|row| {
        row.chunks_exact(4)
            .any(|px| px[ALPHA] != 0 && px[ALPHA] != u8::MAX)
    })
}

/// Population standard deviation of R, G, B around their means.
///
/// Two passes: channel means first, then the squared deviations averaged over
/// all pixels and the three channels. Alpha is ignored.
pub fn color_std_dev(buf: PixelBuffer<'_>) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }

    let n = buf.pixel_count() as f64;
    let mut sum = [0f64; 3];
    for row in buf.rows() {
        for px in row.chunks_exact(4) {
            sum[0] += px[0] as f64;
            sum[1] += px[1] as f64;
            sum[2] += px[2] as f64;
        }
    }
    let mean = sum.map(|s| s / n);

    let mut squared = 0f64;
    for row in buf.rows() {
        for px in row.chunks_exact(4) {
            for c in 0..3 {
                let d = px[c] as f64 - mean[c];
                squared += d * d;
            }
        }
    }

    (squared / (n * 3.0)).sqrt() as f32
}

/// True when more than 1% of pixels differ in alpha by more than
/// [`SOFT_ALPHA_DELTA`] from the pixel directly above them.
pub fn has_soft_alpha(buf: PixelBuffer<'_>) -> bool {
    if buf.is_empty() || buf.height() < 2 {
        return false;
    }

    let mut changes = 0usize;
    let mut above = buf.row(0);
    for y in 1..buf.height() {
        let row = buf.row(y);
        changes += row
            .chunks_exact(4)
            .zip(above.chunks_exact(4))
            .filter(|(p, q)| p[ALPHA].abs_diff(q[ALPHA]) > SOFT_ALPHA_DELTA)
            .count();
        above = row;
    }

    changes as f64 > buf.pixel_count() as f64 * SOFT_ALPHA_MIN_RATIO
}

/// Fraction of pixels on a 2x2 subsampled grid that are semi-transparent
/// (alpha in 21..=234) and carry at least one bright channel (> 200).
pub fn saturated_mid_ratio(buf: PixelBuffer<'_>) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }

    let mut samples = 0usize;
    let mut saturated = 0usize;
    for y in (0..buf.height()).step_by(2) {
        for x in (0..buf.width()).step_by(2) {
            let [r, g, b, a] = buf.pixel(x, y);
            samples += 1;
            if a > 20 && a < 235 && (r > 200 || g > 200 || b > 200) {
                saturated += 1;
            }
        }
    }

    saturated as f32 / samples as f32
}

/// Mean absolute alpha difference to the four axis neighbours, sampled on a
/// stride-2 grid that skips the border.
pub fn mean_alpha_gradient(buf: PixelBuffer<'_>) -> f32 {
    if buf.width() < 3 || buf.height() < 3 {
        return 0.0;
    }

    let mut samples = 0usize;
    let mut total = 0f64;
    for y in (1..buf.height() - 1).step_by(2) {
        for x in (1..buf.width() - 1).step_by(2) {
            let a = buf.alpha(x, y);
            let diff = a.abs_diff(buf.alpha(x - 1, y)) as u32
                + a.abs_diff(buf.alpha(x + 1, y)) as u32
                + a.abs_diff(buf.alpha(x, y - 1)) as u32
                + a.abs_diff(buf.alpha(x, y + 1)) as u32;
            total += diff as f64 / 4.0;
            samples += 1;
        }
    }

    (total / samples as f64) as f32
}

/// Large semi-transparent glow/flare effect.
///
/// All of: at least 700x200, mid-alpha ratio >= 0.08, saturated mid-alpha
/// ratio >= 0.08, and a smooth alpha ramp (mean gradient <= 3.0).
pub fn is_glow_fx(buf: PixelBuffer<'_>) -> bool {
    if buf.width() < GLOW_MIN_WIDTH || buf.height() < GLOW_MIN_HEIGHT {
        return false;
    }

    if analyze_alpha(buf).mid_ratio < GLOW_MIN_MID_RATIO {
        return false;
    }

    if saturated_mid_ratio(buf) < GLOW_MIN_SATURATED_MID_RATIO {
        return false;
    }

    mean_alpha_gradient(buf) <= GLOW_MAX_ALPHA_GRADIENT
}

/// BT.709 luma on the 0..=255 scale
fn luma(px: [u8; 4]) -> f32 {
    0.2126 * px[0] as f32 + 0.7152 * px[1] as f32 + 0.0722 * px[2] as f32
}

/// Mean |Δluma| to the four axis neighbours `step` pixels away, sampled every
/// `step` pixels. `None` when the image is too small to hold one sample.
pub fn mean_luma_gradient(buf: PixelBuffer<'_>, step: u32) -> Option<f32> {
    let step = step.max(1);
    if buf.width() <= 2 * step || buf.height() <= 2 * step {
        return None;
    }

    let mut samples = 0usize;
    let mut total = 0f64;
    for y in (step..buf.height() - step).step_by(step as usize) {
        for x in (step..buf.width() - step).step_by(step as usize) {
            let l = luma(buf.pixel(x, y));
            let diff = (l - luma(buf.pixel(x - step, y))).abs()
                + (l - luma(buf.pixel(x + step, y))).abs()
                + (l - luma(buf.pixel(x, y - step))).abs()
                + (l - luma(buf.pixel(x, y + step))).abs();
            total += diff as f64 / 4.0;
            samples += 1;
        }
    }

    Some((total / samples as f64) as f32)
}

/// Large background made of a smooth luma ramp.
///
/// Needs both dimensions >= 400 and a sampled luma gradient that is present
/// but below [`DARK_GRADIENT_MAX_LUMA_DELTA`]. A perfectly flat image has no
/// gradient at all and does not qualify.
pub fn is_dark_gradient_background(buf: PixelBuffer<'_>) -> bool {
    if buf.width() < DARK_GRADIENT_MIN_SIZE || buf.height() < DARK_GRADIENT_MIN_SIZE {
        return false;
    }

    match mean_luma_gradient(buf, DARK_GRADIENT_STEP) {
        Some(gradient) => gradient > 0.0 && gradient < DARK_GRADIENT_MAX_LUMA_DELTA,
        None => false,
    }
}

/// Aspect ratio of at least 3.5 in either orientation
pub fn is_long_strip(width: u32, height: u32) -> bool {
    if width == 0 || height == 0 {
        return false;
    }

    let (w, h) = (width as f32, height as f32);
    (w / h).max(h / w) >= LONG_STRIP_MIN_ASPECT
}

/// A horizontal run of content rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBand {
    pub top: u32,
    pub height: u32,
    /// Leftmost column holding content
    pub left: u32,
    /// Rightmost column holding content
    pub right: u32,
}

impl ContentBand {
    pub fn content_width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn aspect(&self) -> f32 {
        self.content_width() as f32 / self.height as f32
    }

    pub fn is_long(&self) -> bool {
        self.aspect() >= STRIP_SHEET_LONG_BAND_ASPECT
    }
}

fn is_ink(px: &[u8]) -> bool {
    px[0] > STRIP_SHEET_INK_LEVEL || px[1] > STRIP_SHEET_INK_LEVEL || px[2] > STRIP_SHEET_INK_LEVEL
}

fn is_content_row(row: &[u8], width: u32) -> bool {
    let ink = row.chunks_exact(4).filter(|px| is_ink(px)).count();
    ink as f32 / width as f32 >= STRIP_SHEET_MIN_ROW_COVERAGE
}

fn measure_band(buf: PixelBuffer<'_>, top: u32, height: u32) -> ContentBand {
    let mut left = u32::MAX;
    let mut right = 0;
    for y in top..top + height {
        let row = buf.row(y);
        if let Some(first) = row.chunks_exact(4).position(is_ink) {
            left = left.min(first as u32);
        }
        if let Some(last) = row.chunks_exact(4).rposition(is_ink) {
            right = right.max(last as u32);
        }
    }
    // Content rows always hold ink, so left <= right here
    ContentBand {
        top,
        height,
        left: left.min(right),
        right,
    }
}

/// Detect horizontal content bands: runs of at least four rows where >= 3% of
/// pixels are not near-black. At most [`STRIP_SHEET_MAX_BANDS`] are returned.
pub fn content_bands(buf: PixelBuffer<'_>) -> Vec<ContentBand> {
    let mut bands = Vec::new();
    if buf.is_empty() {
        return bands;
    }

    let mut run_start: Option<u32> = None;
    for y in 0..=buf.height() {
        let content = y < buf.height() && is_content_row(buf.row(y), buf.width());
        match (content, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                let height = y - start;
                if height >= STRIP_SHEET_MIN_BAND_HEIGHT {
                    if bands.len() == STRIP_SHEET_MAX_BANDS {
                        break;
                    }
                    bands.push(measure_band(buf, start, height));
                }
                run_start = None;
            }
            _ => {}
        }
    }

    bands
}

/// Sheet of long horizontal strips (e.g. stacked reel or meter frames).
///
/// True when at least 60% of the detected content bands are at least six times
/// wider than tall. No bands means no sheet.
pub fn is_long_strip_sheet(buf: PixelBuffer<'_>) -> bool {
    if buf.width() < STRIP_SHEET_MIN_SIZE || buf.height() < STRIP_SHEET_MIN_SIZE {
        return false;
    }

    let bands = content_bands(buf);
    if bands.is_empty() {
        return false;
    }

    let long = bands.iter().filter(|b| b.is_long()).count();
    long as f32 / bands.len() as f32 >= STRIP_SHEET_MIN_LONG_FRACTION
}

/// Snapshot of every metric for one image, for diagnostics and reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageMetrics {
    pub alpha: AlphaInfo,
    pub color_std_dev: f32,
    pub soft_alpha: bool,
    pub glow_signature: bool,
    pub dark_gradient_background: bool,
    pub long_strip: bool,
    pub long_strip_sheet: bool,
}

impl ImageMetrics {
    pub fn compute(buf: PixelBuffer<'_>) -> Self {
        MetricCache::default().snapshot(buf)
    }
}

/// Per-run memo of the metrics the policy has asked for.
///
/// A cache belongs to exactly one buffer; callers must pass that same buffer
/// on every call and [`clear`](Self::clear) it when the pixels change.
#[derive(Debug, Default)]
pub struct MetricCache {
    alpha: OnceCell<AlphaInfo>,
    std_dev: OnceCell<f32>,
    soft_alpha: OnceCell<bool>,
    glow: OnceCell<bool>,
    dark_gradient: OnceCell<bool>,
    strip_sheet: OnceCell<bool>,
}

impl MetricCache {
    pub fn alpha(&self, buf: PixelBuffer<'_>) -> AlphaInfo {
        *self.alpha.get_or_init(|| analyze_alpha(buf))
    }

    pub fn color_std_dev(&self, buf: PixelBuffer<'_>) -> f32 {
        *self.std_dev.get_or_init(|| color_std_dev(buf))
    }

    pub fn soft_alpha(&self, buf: PixelBuffer<'_>) -> bool {
        *self.soft_alpha.get_or_init(|| has_soft_alpha(buf))
    }

    pub fn glow_fx(&self, buf: PixelBuffer<'_>) -> bool {
        *self.glow.get_or_init(|| is_glow_fx(buf))
    }

    pub fn dark_gradient_background(&self, buf: PixelBuffer<'_>) -> bool {
        *self
            .dark_gradient
            .get_or_init(|| is_dark_gradient_background(buf))
    }

    pub fn long_strip_sheet(&self, buf: PixelBuffer<'_>) -> bool {
        *self.strip_sheet.get_or_init(|| is_long_strip_sheet(buf))
    }

    pub fn snapshot(&self, buf: PixelBuffer<'_>) -> ImageMetrics {
        ImageMetrics {
            alpha: self.alpha(buf),
            color_std_dev: self.color_std_dev(buf),
            soft_alpha: self.soft_alpha(buf),
            glow_signature: self.glow_fx(buf),
            dark_gradient_background: self.dark_gradient_background(buf),
            long_strip: is_long_strip(buf.width(), buf.height()),
            long_strip_sheet: self.long_strip_sheet(buf),
        }
    }

    /// Forget everything (the buffer was replaced)
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
