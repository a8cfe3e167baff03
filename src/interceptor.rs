use crate::codec::{add_vary_accept_encoding, negotiate};
use crate::config::{BrotliOptions, CompressionConfig};
use crate::error::Result;
use crate::layer::CompressionLayer;
use crate::pool::GzipPool;
use crate::sink::ResponseSink;
use crate::writer::CompressWriter;
use http::Request;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validated settings shared by every response.
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) config: CompressionConfig,
    pub(crate) brotli: BrotliOptions,
}

impl Settings {
    pub(crate) fn new(config: CompressionConfig) -> Result<Self> {
        let brotli = config.brotli()?;
        Ok(Self { config, brotli })
    }
}

/// Response compression for a server.
///
/// Build one per server and share it; clones are cheap and use the same gzip
/// encoder pool.
///
/// # Example
///
/// ```ignore
/// let compression = Compression::new(CompressionConfig::default())?;
///
/// compression.handle(&request, &mut response, |writer| {
///     writer.headers_mut().insert(CONTENT_TYPE, "text/html".parse().unwrap());
///     writer.write_all(page.as_bytes())
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct Compression {
    settings: Arc<Settings>,
    pool: Arc<GzipPool>,
}

impl Compression {
    /// Validates `config` and builds the encoder pool.
    ///
    /// Fails if the gzip level or brotli settings are out of range.
    pub fn new(config: CompressionConfig) -> Result<Self> {
        let level = config.gzip()?;
        let pool = GzipPool::new(level, config.pool_capacity);
        let settings = Settings::new(config)?;
        Ok(Self {
            settings: Arc::new(settings),
            pool: Arc::new(pool),
        })
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &CompressionConfig {
        &self.settings.config
    }

    /// Returns the gzip encoder pool.
    pub fn pool(&self) -> &Arc<GzipPool> {
        &self.pool
    }

    pub(crate) fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Returns a Tower layer that compresses with these settings.
    pub fn layer(&self) -> CompressionLayer {
        CompressionLayer::from(self.clone())
    }

    /// Negotiates a codec for `request` and wraps `sink` in a compressing writer.
    ///
    /// `Vary: Accept-Encoding` is added to the sink's headers whatever the
    /// outcome. The returned writer must be finished once the handler is done;
    /// see [`handle`](Compression::handle).
    pub fn wrap<B, S: ResponseSink>(&self, request: &Request<B>, mut sink: S) -> CompressWriter<S> {
        let codec = negotiate(request.method(), request.version(), request.headers());
        debug!(?codec, method = %request.method(), "negotiated response encoding");

        add_vary_accept_encoding(sink.headers_mut());

        CompressWriter::new(
            sink,
            request.method().clone(),
            codec,
            Arc::clone(&self.settings),
            Arc::clone(&self.pool),
        )
    }

    /// Runs `handler` against a compressing writer and finalizes it afterwards.
    ///
    /// Finalization runs whether the handler succeeds or fails. If the handler
    /// failed, its error is returned and a finalization error is only logged.
    /// A panicking handler still has its writer finalized on unwind.
    pub fn handle<B, S, F, T, E>(
        &self,
        request: &Request<B>,
        sink: S,
        handler: F,
    ) -> std::result::Result<T, E>
    where
        S: ResponseSink,
        F: FnOnce(&mut CompressWriter<S>) -> std::result::Result<T, E>,
        E: From<io::Error>,
    {
        let mut writer = self.wrap(request, sink);
        let result = handler(&mut writer);
        let finished = writer.finish();

        match (result, finished) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(E::from(e)),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(finish_error)) => {
                warn!(error = %finish_error, "failed to finalize response after handler error");
                Err(e)
            }
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        let config = CompressionConfig::default();
        let level = crate::config::GzipLevel::DEFAULT;
        Self {
            pool: Arc::new(GzipPool::new(level, config.pool_capacity)),
            settings: Arc::new(Settings {
                config,
                brotli: BrotliOptions::DEFAULT,
            }),
        }
    }
}
