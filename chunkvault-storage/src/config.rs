//! Storage settings, with environment overrides.

use std::path::PathBuf;

use chunkvault_anvil::CompressionFormat;
use chunkvault_anvil::cache::DEFAULT_CAPACITY;

pub const ENV_CACHE_SIZE: &str = "CHUNKVAULT_CACHE_SIZE";
pub const ENV_COMPRESSION: &str = "CHUNKVAULT_COMPRESSION";
pub const ENV_COMPACT_ON_CLOSE: &str = "CHUNKVAULT_COMPACT_ON_CLOSE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding the `r.<x>.<z>.mca` files.
    pub region_dir: PathBuf,
    /// Maximum number of region files kept open.
    pub cache_capacity: usize,
    /// Codec used for new writes. Reads accept every known codec.
    pub compression: CompressionFormat,
    /// Zero unused sectors when a region file is closed.
    pub compact_on_close: bool,
}

impl StorageConfig {
    pub fn new(region_dir: impl Into<PathBuf>) -> Self {
        Self {
            region_dir: region_dir.into(),
            cache_capacity: DEFAULT_CAPACITY,
            compression: CompressionFormat::Zlib,
            compact_on_close: true,
        }
    }

    /// Defaults overridden by `CHUNKVAULT_*` environment variables.
    pub fn from_env(region_dir: impl Into<PathBuf>) -> Self {
        Self::from_lookup(region_dir, |key| std::env::var(key).ok())
    }

    fn from_lookup(region_dir: impl Into<PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(region_dir);

        if let Some(value) = lookup(ENV_CACHE_SIZE) {
            match value.parse::<usize>() {
                Ok(size) if size > 0 => config.cache_capacity = size,
                _ => log::warn!("Ignoring invalid {}={:?}", ENV_CACHE_SIZE, value),
            }
        }
        if let Some(value) = lookup(ENV_COMPRESSION) {
            match value.parse() {
                Ok(format) => config.compression = format,
                Err(e) => log::warn!("Ignoring {}: {}", ENV_COMPRESSION, e),
            }
        }
        if let Some(value) = lookup(ENV_COMPACT_ON_CLOSE) {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.compact_on_close = true,
                "0" | "false" | "no" => config.compact_on_close = false,
                _ => log::warn!("Ignoring invalid {}={:?}", ENV_COMPACT_ON_CLOSE, value),
            }
        }
        config
    }
}
