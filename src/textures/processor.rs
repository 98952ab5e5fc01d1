//! Texture conversion: decode, classify, preprocess, compress, write DDS
//!
//! BC7 goes to the GPU (wgpu) when a [`CompressorContext`] has one, otherwise
//! everything is encoded on the CPU with image_dds.

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use image_dds::ddsfile::{AlphaMode, D3D10ResourceDimension, Dds, DxgiFormat, NewDxgiParams};
use image_dds::{Mipmaps, SurfaceRgba8};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::clock::{Clock, SystemClock};
use super::decision::{EncodingDecision, QualityTier, RuleId, TextureFormat};
use super::gpu_encoder::{GpuEncoder, GpuInfo};
use super::hints::AssetHints;
use super::pixels::PixelBuffer;
use super::policy::{Classification, PolicyEngine, SourceTraits};
use super::transforms::{apply_preprocessing, is_block_aligned};
use crate::paths;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// PNG `gAMA` value (scaled by 100000) of plain sRGB, 1/2.2
pub const SRGB_PNG_GAMMA: u32 = 45455;

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("Failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{format} needs dimensions divisible by 4, got {width}x{height}")]
    InvalidGeometry {
        format: TextureFormat,
        width: u32,
        height: u32,
    },

    #[error("{format} encoding failed: {source}")]
    Codec {
        format: TextureFormat,
        source: BoxError,
    },

    #[error("Failed to write DDS {}: {source}", .path.display())]
    Container {
        path: PathBuf,
        source: image_dds::ddsfile::Error,
    },
}

impl TextureError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        TextureError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn decode(path: &Path, source: image::ImageError) -> Self {
        TextureError::Decode {
            path: path.to_path_buf(),
            source,
        }
    }

    fn codec(format: TextureFormat, source: impl Into<BoxError>) -> Self {
        TextureError::Codec {
            format,
            source: source.into(),
        }
    }
}

/// A decoded source image plus what the file said about itself
pub struct DecodedImage {
    pub image: RgbaImage,
    /// The stored pixel format had an alpha channel
    pub has_alpha_channel: bool,
    pub icc_profile: Option<Vec<u8>>,
    /// PNG `gAMA` chunk, scaled by 100000
    pub png_gamma: Option<u32>,
}

impl DecodedImage {
    pub fn traits(&self) -> SourceTraits {
        let tagged_gamma = self.png_gamma.is_some_and(|g| g != SRGB_PNG_GAMMA);
        SourceTraits {
            has_icc_profile: self.icc_profile.is_some() || tagged_gamma,
        }
    }
}

/// Read the `gAMA` chunk of a PNG. Unreadable headers count as untagged; the
/// pixel decode reports the real error.
fn read_png_gamma(path: &Path) -> Option<u32> {
    let file = File::open(path).ok()?;
    match png::Decoder::new(BufReader::new(file)).read_info() {
        Ok(reader) => reader.info().source_gamma.map(|g| g.into_scaled()),
        Err(e) => {
            debug!("No PNG header in {}: {}", path.display(), e);
            None
        }
    }
}

/// Decode any format the image crate recognizes (sniffed from content) to RGBA8
pub fn decode_image(path: &Path) -> Result<DecodedImage, TextureError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| TextureError::io(path, e))?;
    let png_gamma = match reader.format() {
        Some(ImageFormat::Png) => read_png_gamma(path),
        _ => None,
    };

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| TextureError::decode(path, e))?;
    let icc_profile = decoder
        .icc_profile()
        .map_err(|e| TextureError::decode(path, e))?;

    let image = DynamicImage::from_decoder(decoder).map_err(|e| TextureError::decode(path, e))?;
    let has_alpha_channel = image.color().has_alpha();

    debug!(
        "Decoded {}: {}x{} {:?}{}",
        path.display(),
        image.width(),
        image.height(),
        image.color(),
        if icc_profile.is_some() { " +ICC" } else { "" }
    );

    Ok(DecodedImage {
        image: image.into_rgba8(),
        has_alpha_channel,
        icc_profile,
        png_gamma,
    })
}

/// Serialize a DDS container to `path`, creating parent directories
pub fn write_dds(dds: &Dds, path: &Path) -> Result<(), TextureError> {
    let mut data = Vec::new();
    dds.write(&mut data).map_err(|source| TextureError::Container {
        path: path.to_path_buf(),
        source,
    })?;

    paths::ensure_parent_dirs(path).map_err(|e| TextureError::io(path, e))?;
    std::fs::write(path, &data).map_err(|e| TextureError::io(path, e))
}

fn check_geometry(format: TextureFormat, width: u32, height: u32) -> Result<(), TextureError> {
    if format.is_block_compressed() && !is_block_aligned(width, height) {
        return Err(TextureError::InvalidGeometry {
            format,
            width,
            height,
        });
    }
    Ok(())
}

/// Encodes one prepared image into a DDS container
pub trait Compressor: Send + Sync {
    fn compress(
        &self,
        image: &RgbaImage,
        format: TextureFormat,
        quality: QualityTier,
        mipmaps: bool,
    ) -> Result<Dds, TextureError>;
}

/// image_dds on the CPU, for every format
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuCompressor;

impl Compressor for CpuCompressor {
    fn compress(
        &self,
        image: &RgbaImage,
        format: TextureFormat,
        quality: QualityTier,
        mipmaps: bool,
    ) -> Result<Dds, TextureError> {
        check_geometry(format, image.width(), image.height())?;

        let mipmaps = if mipmaps {
            Mipmaps::GeneratedAutomatic
        } else {
            Mipmaps::Disabled
        };

        let encoded = SurfaceRgba8::from_image(image)
            .encode(format.to_image_format(), quality.cpu_quality(), mipmaps)
            .map_err(|e| TextureError::codec(format, e))?;
        encoded.to_dds().map_err(|e| TextureError::codec(format, e))
    }
}

/// Number of mip levels, starting at the base, whose size stays a whole
/// number of 4x4 blocks
fn block_mip_count(width: u32, height: u32) -> u32 {
    let (mut w, mut h) = (width, height);
    let mut count = 1;
    while w > 4 || h > 4 {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        if !is_block_aligned(w, h) {
            break;
        }
        count += 1;
    }
    count
}

/// Base level plus `levels - 1` halvings
fn generate_mipmaps(base: &RgbaImage, levels: u32) -> Vec<RgbaImage> {
    let mut mips = vec![base.clone()];
    for _ in 1..levels {
        let prev = &mips[mips.len() - 1];
        let (w, h) = ((prev.width() / 2).max(1), (prev.height() / 2).max(1));
        let next = image::imageops::resize(prev, w, h, image::imageops::FilterType::Lanczos3);
        mips.push(next);
    }
    mips
}

fn create_bc7_dds(levels: Vec<Vec<u8>>, width: u32, height: u32) -> anyhow::Result<Dds> {
    let params = NewDxgiParams {
        width,
        height,
        depth: None,
        format: DxgiFormat::BC7_UNorm,
        mipmap_levels: Some(levels.len() as u32),
        array_layers: None,
        caps2: None,
        is_cubemap: false,
        resource_dimension: D3D10ResourceDimension::Texture2D,
        alpha_mode: AlphaMode::Straight,
    };

    let mut dds = Dds::new_dxgi(params)?;
    dds.data = levels.concat();
    Ok(dds)
}

fn encode_bc7_gpu(
    encoder: &mut GpuEncoder,
    image: &RgbaImage,
    quality: QualityTier,
    mipmaps: bool,
) -> anyhow::Result<Dds> {
    let (width, height) = image.dimensions();
    let levels = if mipmaps {
        block_mip_count(width, height)
    } else {
        1
    };
    debug!("GPU BC7 {}x{}, {} levels, {}", width, height, levels, quality);

    let mut batch = encoder.create_batch(quality.bc7_settings());
    for mip in generate_mipmaps(image, levels) {
        encoder.queue_bc7(&mut batch, mip.as_raw(), mip.width(), mip.height())?;
    }
    let blocks = encoder.flush_batch(batch)?;
    create_bc7_dds(blocks, width, height)
}

enum GpuSlot {
    Uninitialized,
    Ready(GpuEncoder),
    Unavailable,
}

/// Compression resources for one run.
///
/// Holds the optional GPU encoder behind a mutex; BC7 uses it once
/// [`init_gpu`](Self::init_gpu) has succeeded, and everything else (or any GPU
/// failure) goes to [`CpuCompressor`].
pub struct CompressorContext {
    cpu: CpuCompressor,
    gpu: Mutex<GpuSlot>,
}

impl Default for CompressorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressorContext {
    /// CPU only until [`init_gpu`](Self::init_gpu) is called
    pub fn new() -> Self {
        Self {
            cpu: CpuCompressor,
            gpu: Mutex::new(GpuSlot::Uninitialized),
        }
    }

    /// Bring up the GPU encoder. Only the first call does any work; a failure
    /// is logged and remembered. Returns whether BC7 will run on the GPU.
    pub fn init_gpu(&self, gpu_index: Option<usize>) -> bool {
        let Ok(mut slot) = self.gpu.lock() else {
            return false;
        };

        if matches!(*slot, GpuSlot::Uninitialized) {
            *slot = match GpuEncoder::with_gpu_index(gpu_index) {
                Ok(encoder) => {
                    info!("GPU encoder initialized: {}", encoder.info());
                    GpuSlot::Ready(encoder)
                }
                Err(e) => {
                    warn!("GPU encoder not available: {:#}. BC7 will use the CPU.", e);
                    GpuSlot::Unavailable
                }
            };
        }

        matches!(*slot, GpuSlot::Ready(_))
    }

    pub fn gpu_info(&self) -> Option<GpuInfo> {
        match &*self.gpu.lock().ok()? {
            GpuSlot::Ready(encoder) => Some(encoder.info().clone()),
            _ => None,
        }
    }
}

impl Compressor for CompressorContext {
    fn compress(
        &self,
        image: &RgbaImage,
        format: TextureFormat,
        quality: QualityTier,
        mipmaps: bool,
    ) -> Result<Dds, TextureError> {
        check_geometry(format, image.width(), image.height())?;

        if format == TextureFormat::Bc7 {
            if let Ok(mut slot) = self.gpu.lock() {
                if let GpuSlot::Ready(encoder) = &mut *slot {
                    match encode_bc7_gpu(encoder, image, quality, mipmaps) {
                        Ok(dds) => return Ok(dds),
                        Err(e) => warn!("GPU BC7 failed, using CPU: {:#}", e),
                    }
                }
            }
        }

        self.cpu.compress(image, format, quality, mipmaps)
    }
}

/// One converted texture
pub struct ProcessedTexture {
    pub dds: Dds,
    /// Dimensions after preprocessing
    pub width: u32,
    pub height: u32,
    /// The decision that produced `dds` (the downgrade when one was taken)
    pub decision: EncodingDecision,
    /// The time-budgeted encoding overran and was redone cheaper
    pub downgraded: bool,
}

/// Classifies images and encodes them as the policy decides
pub struct TexturePipeline {
    engine: PolicyEngine,
    compressor: Arc<dyn Compressor>,
    clock: Arc<dyn Clock>,
    mipmaps: bool,
}

impl TexturePipeline {
    pub fn new(engine: PolicyEngine, compressor: Arc<dyn Compressor>) -> Self {
        Self {
            engine,
            compressor,
            clock: Arc::new(SystemClock::default()),
            mipmaps: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mipmaps(mut self, mipmaps: bool) -> Self {
        self.mipmaps = mipmaps;
        self
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Classify without encoding
    pub fn classify(&self, decoded: &DecodedImage, hints: AssetHints) -> EncodingDecision {
        self.engine
            .classify(
                PixelBuffer::from_image(&decoded.image),
                hints,
                decoded.traits(),
            )
            .decision
    }

    /// Run the full policy over an in-memory image
    pub fn encode(
        &self,
        image: RgbaImage,
        hints: AssetHints,
        traits: SourceTraits,
    ) -> Result<ProcessedTexture, TextureError> {
        let Classification { decision, aligned } =
            self.engine
                .classify(PixelBuffer::from_image(&image), hints, traits);

        let working = aligned.unwrap_or(image);
        let prepared = apply_preprocessing(working, &decision.preprocessing, self.engine.resizer());
        let (width, height) = prepared.dimensions();

        let started = self.clock.now();
        let dds = self
            .compressor
            .compress(&prepared, decision.format, decision.quality, self.mipmaps)?;
        let elapsed = self.clock.now().saturating_sub(started);

        if let Some(budget) = decision.time_budget {
            if elapsed > budget.limit {
                if let Some(downgrade) = decision.downgraded() {
                    warn!(
                        "{} took {}ms (budget {}ms), re-encoding as {} {}",
                        decision.format,
                        elapsed.as_millis(),
                        budget.limit.as_millis(),
                        downgrade.format,
                        downgrade.quality
                    );
                    let dds = self.compressor.compress(
                        &prepared,
                        downgrade.format,
                        downgrade.quality,
                        self.mipmaps,
                    )?;
                    return Ok(ProcessedTexture {
                        dds,
                        width,
                        height,
                        decision: downgrade,
                        downgraded: true,
                    });
                }
            }
        }

        Ok(ProcessedTexture {
            dds,
            width,
            height,
            decision,
            downgraded: false,
        })
    }

    /// Decode `input`, encode it and write the DDS to `output`
    pub fn convert_file(
        &self,
        input: &Path,
        output: &Path,
        hints: AssetHints,
    ) -> Result<ProcessedTexture, TextureError> {
        let decoded = decode_image(input)?;
        let traits = decoded.traits();
        let texture = self.encode(decoded.image, hints, traits)?;
        write_dds(&texture.dds, output)?;

        info!(
            "{} -> {} ({}x{}, {})",
            input.display(),
            output.display(),
            texture.width,
            texture.height,
            texture.decision
        );
        Ok(texture)
    }

    /// Convert every job in parallel. `progress` sees the completed count.
    pub fn convert_batch<F>(&self, jobs: &[ConversionJob], progress: F) -> Vec<ConversionResult>
    where
        F: Fn(usize) + Sync,
    {
        let completed = AtomicUsize::new(0);

        info!("Converting {} images", jobs.len());

        let results: Vec<ConversionResult> = jobs
            .par_iter()
            .map(|job| {
                let result = self
                    .convert_file(&job.input, &job.output, job.hints)
                    .map(|texture| ConversionReport::new(job, &texture));
                if let Err(e) = &result {
                    warn!("{}", e);
                }
                progress(completed.fetch_add(1, Ordering::Relaxed) + 1);
                ConversionResult {
                    input: job.input.clone(),
                    result,
                }
            })
            .collect();

        let summary = BatchSummary::from_results(&results);
        info!(
            "Conversion complete: {}/{} succeeded, {} downgraded",
            summary.succeeded, summary.total, summary.downgraded
        );
        results
    }
}

/// One file of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub hints: AssetHints,
}

/// Find every supported image under `input_root`, mirrored into `output_root`
/// with a `.dds` extension. Hints come from the path relative to the root.
pub fn discover_jobs(input_root: &Path, output_root: &Path) -> Vec<ConversionJob> {
    let mut jobs: Vec<ConversionJob> = WalkDir::new(input_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && paths::is_supported_image(e.path()))
        .filter_map(|e| {
            let relative = e.path().strip_prefix(input_root).ok()?;
            Some(ConversionJob {
                input: e.path().to_path_buf(),
                output: paths::dds_output_path(output_root, relative),
                hints: AssetHints::from_path(relative),
            })
        })
        .collect();

    jobs.sort_by(|a, b| a.input.cmp(&b.input));
    jobs
}

/// Serializable record of a successful conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub hints: AssetHints,
    pub width: u32,
    pub height: u32,
    pub decision: EncodingDecision,
    pub downgraded: bool,
}

impl ConversionReport {
    fn new(job: &ConversionJob, texture: &ProcessedTexture) -> Self {
        Self {
            input: job.input.clone(),
            output: job.output.clone(),
            hints: job.hints,
            width: texture.width,
            height: texture.height,
            decision: texture.decision.clone(),
            downgraded: texture.downgraded,
        }
    }
}

#[derive(Debug)]
pub struct ConversionResult {
    pub input: PathBuf,
    pub result: Result<ConversionReport, TextureError>,
}

/// Totals for a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub downgraded: usize,
    pub by_rule: BTreeMap<RuleId, usize>,
    pub by_format: BTreeMap<&'static str, usize>,
}

impl BatchSummary {
    pub fn from_results(results: &[ConversionResult]) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };

        for r in results {
            match &r.result {
                Ok(report) => {
                    summary.succeeded += 1;
                    if report.downgraded {
                        summary.downgraded += 1;
                    }
                    *summary.by_rule.entry(report.decision.rule).or_default() += 1;
                    *summary
                        .by_format
                        .entry(report.decision.format.name())
                        .or_default() += 1;
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Elapsed time formatted for the batch summary line
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}m{:02}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
    }
}
