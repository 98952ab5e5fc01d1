//! Path helpers for asset trees
//!
//! Asset folders often come from Windows machines, so lookups treat `\` and
//! `/` alike and ignore case.

use std::path::{Path, PathBuf};

/// Extensions (lowercase) accepted as conversion inputs
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tga", "tif", "tiff", "webp"];

/// Convert Windows path separators to `/`
/// `UI\Fonts\title.png` -> `UI/Fonts/title.png`
pub fn to_linux_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a path for lookups and comparisons (lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    to_linux_path(&path.to_lowercase())
        .trim_matches('/')
        .to_string()
}

/// Lowercase extension of a path, if any
fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `path` has one of [`IMAGE_EXTENSIONS`]
pub fn is_supported_image(path: &Path) -> bool {
    extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Output location for `relative` (a path under the input root) inside
/// `output_root`, with the extension replaced by `.dds`
pub fn dds_output_path(output_root: &Path, relative: &Path) -> PathBuf {
    output_root.join(relative).with_extension("dds")
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
