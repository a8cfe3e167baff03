use crate::interceptor::Compression;
use crate::service::CompressionService;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies based on the
/// client's Accept-Encoding header and the first chunk of each body.
#[derive(Debug, Clone, Default)]
pub struct CompressionLayer {
    compression: Compression,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// The default minimum size for compression is 860 bytes.
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<Compression> for CompressionLayer {
    fn from(compression: Compression) -> Self {
        Self { compression }
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.compression.clone())
    }
}
