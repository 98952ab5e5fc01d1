//! Policy configuration
//!
//! Stored as JSON in `~/.config/texpolicy/config.json` (or any file passed
//! with `--config`). Every field is optional; a missing file means defaults.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::textures::{
    Correction, FilterResizer, PolicyEngine, PolicySettings, TextureFormat,
    DEFAULT_FALLBACK_BUDGET,
};

/// Environment override for the fallback budget in milliseconds (0 disables it)
pub const BUDGET_ENV: &str = "TEXPOLICY_FALLBACK_BUDGET_MS";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Gamma must be positive, got {0}")]
    InvalidGamma(f32),

    #[error("Green boost must be positive, got {0}")]
    InvalidGreenBoost(f32),

    #[error("Fallback budget of 0 ms; use null to disable the budget")]
    ZeroBudget,
}

/// Output for bitmap font pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontsOutput {
    #[default]
    Bc7,
    Rgba8,
}

impl FontsOutput {
    pub fn format(self) -> TextureFormat {
        match self {
            FontsOutput::Bc7 => TextureFormat::Bc7,
            FontsOutput::Rgba8 => TextureFormat::Rgba8,
        }
    }
}

/// Resampling filter for block alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Soft time limit on the fallback BC7 encode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    /// `null` disables the budget and uses the fast BC7 preset instead
    pub budget_ms: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            budget_ms: Some(DEFAULT_FALLBACK_BUDGET.as_millis() as u64),
        }
    }
}

/// Premultiply + gamma + green boost for semi-transparent sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrectionConfig {
    pub enabled: bool,
    pub gamma: f32,
    pub green_boost: f32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gamma: 0.88,
            green_boost: 1.16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub fonts_output: FontsOutput,
    pub fallback: FallbackConfig,
    pub correction: CorrectionConfig,
    pub resize_filter: ResizeFilter,
    /// Write full mip chains into the DDS
    pub mipmaps: bool,
}

/// Budget from [`BUDGET_ENV`], read once: `None` when unset or unparseable,
/// `Some(None)` for 0
pub fn budget_env_override() -> Option<Option<u64>> {
    static OVERRIDE: OnceLock<Option<Option<u64>>> = OnceLock::new();
    *OVERRIDE.get_or_init(|| {
        std::env::var(BUDGET_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|ms| (ms > 0).then_some(ms))
    })
}

impl PolicyConfig {
    /// `~/.config/texpolicy/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("texpolicy")
            .join("config.json"))
    }

    /// Load `path`, or the default location when `None`. A missing default
    /// file (or no config directory at all) gives the defaults; a missing
    /// explicit file is an error. The environment budget override is applied
    /// and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = match path {
            Some(_) => None,
            None => Self::default_path().ok(),
        };
        Self::load_from(path, default_path.as_deref())
    }

    fn load_from(path: Option<&Path>, default_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match (path, default_path) {
            (Some(path), _) => Self::from_file(path)?,
            (None, Some(path)) if path.exists() => Self::from_file(path)?,
            (None, Some(path)) => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            (None, None) => {
                debug!("No config directory, using defaults");
                Self::default()
            }
        };

        if let Some(budget_ms) = budget_env_override() {
            debug!("{} overrides fallback budget: {:?}", BUDGET_ENV, budget_ms);
            config.fallback.budget_ms = budget_ms;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        crate::paths::ensure_parent_dirs(path).map_err(write_err)?;
        let content = serde_json::to_string_pretty(self).map_err(std::io::Error::from).map_err(write_err)?;
        std::fs::write(path, content).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fallback.budget_ms == Some(0) {
            return Err(ConfigError::ZeroBudget);
        }

        // NaN fails these comparisons too
        if !(self.correction.gamma > 0.0) {
            return Err(ConfigError::InvalidGamma(self.correction.gamma));
        }
        if !(self.correction.green_boost > 0.0) {
            return Err(ConfigError::InvalidGreenBoost(self.correction.green_boost));
        }

        Ok(())
    }

    pub fn policy_settings(&self) -> PolicySettings {
        PolicySettings {
            font_format: self.fonts_output.format(),
            fallback_budget: self.fallback.budget_ms.map(Duration::from_millis),
            correction: self.correction.enabled.then_some(Correction {
                gamma: self.correction.gamma,
                green_boost: self.correction.green_boost,
            }),
        }
    }

    pub fn engine(&self) -> PolicyEngine {
        PolicyEngine::with_resizer(
            self.policy_settings(),
            FilterResizer::new(self.resize_filter.filter_type()),
        )
    }
}
