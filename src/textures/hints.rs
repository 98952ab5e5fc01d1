//! Asset category tags
//!
//! The policy never looks at file paths. Callers tag each input with the
//! categories it belongs to when they ingest it; [`AssetHints::from_path`]
//! derives the tags from the usual asset folder layout.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::paths;

/// Coarse asset categories that override size-based heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetCategory {
    /// Animation frames
    Animation,
    /// Jackpot banners and meters
    Jackpot,
    /// Progress counter digits
    ProgressCounter,
    /// Bitmap font pages
    Font,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 4] = [
        AssetCategory::Animation,
        AssetCategory::Jackpot,
        AssetCategory::ProgressCounter,
        AssetCategory::Font,
    ];

    fn bit(self) -> u8 {
        match self {
            AssetCategory::Animation => 1 << 0,
            AssetCategory::Jackpot => 1 << 1,
            AssetCategory::ProgressCounter => 1 << 2,
            AssetCategory::Font => 1 << 3,
        }
    }

    /// Substring of a normalized path (lowercase, `/` separators) that marks
    /// the category
    pub fn path_marker(self) -> &'static str {
        match self {
            AssetCategory::Animation => "animation",
            AssetCategory::Jackpot => "jackpot",
            AssetCategory::ProgressCounter => "/progresscounters/",
            AssetCategory::Font => "fonts",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetCategory::Animation => "animation",
            AssetCategory::Jackpot => "jackpot",
            AssetCategory::ProgressCounter => "progress-counter",
            AssetCategory::Font => "font",
        }
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of [`AssetCategory`] tags attached to one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AssetHints(u8);

impl AssetHints {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn with(self, category: AssetCategory) -> Self {
        Self(self.0 | category.bit())
    }

    pub fn insert(&mut self, category: AssetCategory) {
        self.0 |= category.bit();
    }

    pub fn contains(&self, category: AssetCategory) -> bool {
        self.0 & category.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = AssetCategory> + '_ {
        AssetCategory::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// Tag a source file from its location.
    ///
    /// Windows and Unix separators are both accepted and matching ignores
    /// case, so `Assets\ProgressCounters\digit_0.png` and
    /// `assets/progresscounters/digit_0.png` get the same tags.
    pub fn from_path(path: &Path) -> Self {
        Self::from_path_str(&path.to_string_lossy())
    }

    pub fn from_path_str(path: &str) -> Self {
        // Leading separator so a root-level folder still matches "/name/"
        let normalized = format!("/{}", paths::normalize_for_lookup(path));

        let mut hints = Self::none();
        for category in AssetCategory::ALL {
            if normalized.contains(category.path_marker()) {
                hints.insert(category);
            }
        }
        hints
    }
}

impl FromIterator<AssetCategory> for AssetHints {
    fn from_iter<I: IntoIterator<Item = AssetCategory>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}

impl Serialize for AssetHints {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl fmt::Display for AssetHints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let names: Vec<&str> = self.iter().map(|c| c.name()).collect();
        f.write_str(&names.join(","))
    }
}
