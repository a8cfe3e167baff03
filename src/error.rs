use thiserror::Error;

/// Result type for interceptor setup.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a [`Compression`](crate::Compression) from its configuration.
///
/// These are setup-time failures. Nothing at request time produces them; write
/// failures are reported as [`std::io::Error`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The gzip level is outside `0..=9`.
    #[error("invalid gzip compression level {0}, expected 0..=9")]
    InvalidGzipLevel(u32),

    /// The brotli quality is outside `0..=11`.
    #[error("invalid brotli quality {0}, expected 0..=11")]
    InvalidBrotliQuality(u32),

    /// The brotli window size is outside `10..=24`.
    #[error("invalid brotli window size {0}, expected 10..=24")]
    InvalidBrotliWindow(u32),
}
