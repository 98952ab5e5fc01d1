//! Texture encoding policy and conversion
//!
//! Each source image is classified by an ordered rule table into an
//! [`EncodingDecision`] (BC7, BC3 or uncompressed RGBA8, plus a quality preset
//! and any pixel preprocessing), then compressed into a DDS container. BC7 can
//! run on the GPU through wgpu; everything else uses image_dds on the CPU with
//! rayon parallelism for batches.

mod clock;
mod decision;
mod gpu_encoder;
mod hints;
pub mod metrics;
mod pixels;
mod policy;
mod processor;
mod transforms;

#[cfg(test)]
mod fixtures;

pub use clock::{Clock, SystemClock};
pub use decision::{
    Downgrade, EncodingDecision, Preprocess, QualityTier, RuleId, TextureFormat, TimeBudget,
};
pub use gpu_encoder::{list_gpus, EncodeBatch, GpuEncoder, GpuInfo};
pub use hints::{AssetCategory, AssetHints};
pub use metrics::{AlphaInfo, ImageMetrics};
pub use pixels::{PixelBuffer, PixelBufferError};
pub use policy::{
    rule_id, rule_table, Classification, Correction, PolicyEngine, PolicySettings, SourceTraits,
    DEFAULT_FALLBACK_BUDGET, DOWNGRADE_RULE_NAME, FALLBACK_RULE_NAME,
};
pub use processor::{
    decode_image, discover_jobs, format_elapsed, write_dds, BatchSummary, CompressorContext,
    Compressor, ConversionJob, ConversionReport, ConversionResult, CpuCompressor, DecodedImage,
    ProcessedTexture, TextureError, TexturePipeline,
};
pub use transforms::{FilterResizer, Resizer};
