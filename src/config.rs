use crate::error::{Error, Result};
use serde::Deserialize;

/// Default minimum body size for compression (approximately 1 MTU).
pub const DEFAULT_MIN_LENGTH: u64 = 860;

/// Default number of idle gzip encoders kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

const DEFAULT_TYPES: &[&str] = &[
    "text/html",
    "text/css",
    "text/plain",
    "text/javascript",
    "application/javascript",
    "application/json",
    "application/xml",
    "image/svg+xml",
];

/// Static configuration for the interceptor.
///
/// Deserializes from any serde format; missing fields take their defaults:
///
/// ```
/// # use http_compress_interceptor::CompressionConfig;
/// let config: CompressionConfig =
///     serde_json::from_str(r#"{ "types": ["text/html"], "min_length": 256 }"#).unwrap();
/// assert_eq!(config.gzip_level, 6);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Media types eligible for compression, matched exactly against the
    /// parameter-free `Content-Type`.
    pub types: Vec<String>,
    /// Bodies whose length is known and at most this many bytes are sent as-is.
    pub min_length: u64,
    /// Brotli quality, `0..=11`.
    pub brotli_quality: u32,
    /// Brotli window size as log2 of the window, `10..=24`.
    pub brotli_window: u32,
    /// Gzip level, `0..=9`.
    pub gzip_level: u32,
    /// Upper bound on idle gzip encoders held by the pool.
    pub pool_capacity: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            types: DEFAULT_TYPES.iter().map(|t| t.to_string()).collect(),
            min_length: DEFAULT_MIN_LENGTH,
            brotli_quality: BrotliOptions::DEFAULT.quality,
            brotli_window: BrotliOptions::DEFAULT.window,
            gzip_level: GzipLevel::DEFAULT.0,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl CompressionConfig {
    /// Replaces the set of eligible media types.
    pub fn types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the minimum body length required for compression.
    pub fn min_length(mut self, length: u64) -> Self {
        self.min_length = length;
        self
    }

    /// Sets the brotli quality.
    pub fn brotli_quality(mut self, quality: u32) -> Self {
        self.brotli_quality = quality;
        self
    }

    /// Sets the brotli window size.
    pub fn brotli_window(mut self, window: u32) -> Self {
        self.brotli_window = window;
        self
    }

    /// Sets the gzip level.
    pub fn gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level;
        self
    }

    /// Sets how many idle gzip encoders the pool may hold.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Returns whether `media_type` is one of the eligible types.
    pub fn is_eligible(&self, media_type: &str) -> bool {
        self.types.iter().any(|t| t == media_type)
    }

    pub(crate) fn gzip(&self) -> Result<GzipLevel> {
        GzipLevel::new(self.gzip_level)
    }

    pub(crate) fn brotli(&self) -> Result<BrotliOptions> {
        BrotliOptions::new(self.brotli_quality, self.brotli_window)
    }
}

/// A gzip level accepted by the deflate encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipLevel(u32);

impl GzipLevel {
    /// Level 6, zlib's default trade-off.
    pub const DEFAULT: GzipLevel = GzipLevel(6);

    /// Validates `level`.
    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidGzipLevel(level));
        }
        Ok(Self(level))
    }

    /// Returns the raw level.
    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn compression(self) -> flate2::Compression {
        flate2::Compression::new(self.0)
    }
}

/// Validated brotli encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrotliOptions {
    pub(crate) quality: u32,
    pub(crate) window: u32,
}

impl BrotliOptions {
    /// Quality 5 with a 4MiB window.
    pub const DEFAULT: BrotliOptions = BrotliOptions {
        quality: 5,
        window: 22,
    };

    /// Validates `quality` and `window`.
    pub fn new(quality: u32, window: u32) -> Result<Self> {
        if quality > 11 {
            return Err(Error::InvalidBrotliQuality(quality));
        }
        if !(10..=24).contains(&window) {
            return Err(Error::InvalidBrotliWindow(window));
        }
        Ok(Self { quality, window })
    }
}
