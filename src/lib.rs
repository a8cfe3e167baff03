//! HTTP response compression that decides on the first body write.
//!
//! The client's `Accept-Encoding` picks a codec when the request arrives, but
//! whether to compress is only settled once the handler writes its first body
//! bytes. By then the handler has set `Content-Type` and maybe
//! `Content-Length`, which is what the decision needs.
//!
//! Two surfaces share the same negotiation, gate and gzip encoder pool:
//!
//! - [`Compression::handle`] and [`CompressWriter`] wrap any [`ResponseSink`],
//!   a blocking writer with mutable headers.
//! - [`CompressionLayer`] is a Tower layer for `http_body` services.
//!
//! # Example
//!
//! ```ignore
//! use http_compress_interceptor::{Compression, CompressionConfig};
//! use tower::ServiceBuilder;
//!
//! let compression = Compression::new(CompressionConfig::default().min_length(1024))?;
//! let service = ServiceBuilder::new()
//!     .layer(compression.layer())
//!     .service(my_service);
//! ```
//!
//! # Negotiation
//!
//! `br` is preferred over `gzip`; codings with `q=0` are refused. Nothing is
//! negotiated for `OPTIONS`, protocol upgrades, or HTTP/1.0 and older.
//!
//! # Compression Rules
//!
//! On the first body write the response is **not** compressed when:
//! - No codec was negotiated
//! - `Content-Encoding` header is already set
//! - The body is known to be at most `min_length` bytes, from the first write
//!   or else the declared `Content-Length`
//! - The media type of `Content-Type` is missing, malformed, or not listed
//!
//! # Response Modifications
//!
//! - `Vary` always includes `Accept-Encoding`
//! - When compressing, `Content-Encoding` is set and `Content-Length` removed
//! - `HEAD` responses announce the encoding but carry no body
//!
//! The Tower body **always flushes** after each chunk for
//! `X-Accel-Buffering: no` and `text/event-stream` responses.

#![deny(missing_docs)]

mod body;
mod codec;
mod config;
mod encoder;
mod error;
mod future;
mod gate;
mod interceptor;
mod layer;
mod pool;
mod service;
mod sink;
mod writer;

#[cfg(test)]
mod testing;

pub use body::CompressionBody;
pub use codec::{Codec, add_vary_accept_encoding, negotiate};
pub use config::{
    BrotliOptions, CompressionConfig, DEFAULT_MIN_LENGTH, DEFAULT_POOL_CAPACITY, GzipLevel,
};
pub use error::{Error, Result};
pub use future::ResponseFuture;
pub use gate::{Decision, SizeHint, decide};
pub use interceptor::Compression;
pub use layer::CompressionLayer;
pub use pool::{GzipPool, GzipState, GzipWriter};
pub use service::CompressionService;
pub use sink::ResponseSink;
pub use writer::CompressWriter;
