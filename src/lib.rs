//! texpolicy - picks a GPU texture encoding for every image
//!
//! Classifies source images (icons, glow effects, gradient backgrounds,
//! fonts, strip sheets, ...) with an ordered rule table and converts them to
//! DDS as BC7, BC3 or uncompressed RGBA8.

pub mod config;
pub mod paths;
pub mod textures;
