//! Encoding decisions produced by the policy engine

use block_compression::BC7Settings;
use image_dds::{ImageFormat, Quality};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Container pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextureFormat {
    /// BC7 - high quality block compression
    #[serde(rename = "BC7")]
    Bc7,
    /// BC3 - DXT5, interpolated alpha
    #[serde(rename = "BC3")]
    Bc3,
    /// Uncompressed R8G8B8A8
    #[serde(rename = "RGBA8")]
    Rgba8,
}

impl TextureFormat {
    /// Convert to image_dds ImageFormat
    pub(crate) fn to_image_format(self) -> ImageFormat {
        match self {
            TextureFormat::Bc7 => ImageFormat::BC7RgbaUnorm,
            TextureFormat::Bc3 => ImageFormat::BC3RgbaUnorm,
            TextureFormat::Rgba8 => ImageFormat::Rgba8Unorm,
        }
    }

    /// Block formats need dimensions that are multiples of 4
    pub fn is_block_compressed(self) -> bool {
        !matches!(self, TextureFormat::Rgba8)
    }

    /// Get format name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TextureFormat::Bc7 => "BC7",
            TextureFormat::Bc3 => "BC3",
            TextureFormat::Rgba8 => "RGBA8",
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compressor effort preset, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum QualityTier {
    UltraFast,
    QuickOnly,
    FastBalanced,
    Balanced,
    HighQuality,
    /// Highest effort with uniform channel weighting
    HighQualityUniform,
}

impl QualityTier {
    /// CPU encoder preset
    pub(crate) fn cpu_quality(self) -> Quality {
        match self {
            QualityTier::UltraFast | QualityTier::QuickOnly => Quality::Fast,
            QualityTier::FastBalanced | QualityTier::Balanced => Quality::Normal,
            QualityTier::HighQuality | QualityTier::HighQualityUniform => Quality::Slow,
        }
    }

    /// GPU BC7 preset
    pub(crate) fn bc7_settings(self) -> BC7Settings {
        match self {
            QualityTier::UltraFast => BC7Settings::alpha_ultrafast(),
            QualityTier::QuickOnly => BC7Settings::alpha_very_fast(),
            QualityTier::FastBalanced => BC7Settings::alpha_fast(),
            QualityTier::Balanced => BC7Settings::alpha_basic(),
            QualityTier::HighQuality | QualityTier::HighQualityUniform => {
                BC7Settings::alpha_slow()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::UltraFast => "ultra-fast",
            QualityTier::QuickOnly => "quick-only",
            QualityTier::FastBalanced => "fast-balanced",
            QualityTier::Balanced => "balanced",
            QualityTier::HighQuality => "high-quality",
            QualityTier::HighQualityUniform => "high-quality-uniform",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel work applied before compression, in list order
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Preprocess {
    /// Resample up to the next multiple of 4 in each dimension
    ResizeToMultipleOf4 { width: u32, height: u32 },
    PremultiplyAlpha,
    GammaCorrect { gamma: f32 },
    GreenBoost { factor: f32 },
}

impl fmt::Display for Preprocess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preprocess::ResizeToMultipleOf4 { width, height } => {
                write!(f, "resize {}x{}", width, height)
            }
            Preprocess::PremultiplyAlpha => f.write_str("premultiply"),
            Preprocess::GammaCorrect { gamma } => write!(f, "gamma {}", gamma),
            Preprocess::GreenBoost { factor } => write!(f, "green x{}", factor),
        }
    }
}

/// Stable identifier of a policy rule, its 1-based position in the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RuleId(u8);

impl RuleId {
    pub(crate) const fn from_position(index: usize) -> Self {
        RuleId(index as u8 + 1)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cheaper encoding used when a budgeted compression overruns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Downgrade {
    pub format: TextureFormat,
    pub quality: QualityTier,
}

/// Soft wall-clock limit for a single compression call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBudget {
    #[serde(rename = "limit_ms", serialize_with = "serialize_millis")]
    pub limit: Duration,
    pub downgrade: Downgrade,
    /// Rule reported when the downgrade is taken
    pub downgrade_rule: RuleId,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// How one source image is to be encoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodingDecision {
    pub rule: RuleId,
    /// Table name of the matched rule
    pub rule_name: &'static str,
    pub format: TextureFormat,
    pub quality: QualityTier,
    pub preprocessing: Vec<Preprocess>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_budget: Option<TimeBudget>,
}

impl EncodingDecision {
    /// Final dimensions after any resize step
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.preprocessing
            .iter()
            .rev()
            .find_map(|step| match step {
                Preprocess::ResizeToMultipleOf4 { width, height } => Some((*width, *height)),
                _ => None,
            })
            .unwrap_or((width, height))
    }

    /// The decision to use once the time budget has been exceeded
    pub fn downgraded(&self) -> Option<EncodingDecision> {
        let budget = self.time_budget?;
        Some(EncodingDecision {
            rule: budget.downgrade_rule,
            rule_name: super::policy::DOWNGRADE_RULE_NAME,
            format: budget.downgrade.format,
            quality: budget.downgrade.quality,
            preprocessing: self.preprocessing.clone(),
            time_budget: None,
        })
    }
}

impl fmt::Display for EncodingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule {} ({}): {} {}",
            self.rule, self.rule_name, self.format, self.quality
        )?;
        for step in &self.preprocessing {
            write!(f, ", {}", step)?;
        }
        if let Some(budget) = &self.time_budget {
            write!(
                f,
                ", budget {}ms -> {} {}",
                budget.limit.as_millis(),
                budget.downgrade.format,
                budget.downgrade.quality
            )?;
        }
        Ok(())
    }
}
