use crate::codec::Codec;
use crate::config::CompressionConfig;
use http::{HeaderMap, HeaderValue, Method, header};
use mime::Mime;
use tracing::trace;

/// Size of the first body chunk, as known when the gate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeHint {
    /// The chunk is exactly this many bytes.
    Known(u64),
    /// Nothing is known yet; the declared Content-Length is consulted instead.
    Unknown,
}

impl From<usize> for SizeHint {
    fn from(len: usize) -> Self {
        SizeHint::Known(len as u64)
    }
}

/// Outcome of the gate for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Body bytes go to the sink unchanged.
    Identity,
    /// Headers announce the codec but no body bytes are sent (HEAD).
    Suppress(Codec),
    /// Body bytes go through an encoder for the codec.
    Compress(Codec),
}

/// Decides whether the response is compressed and rewrites its headers.
///
/// Must run before the sink commits its header block. Compression is skipped
/// when no codec was negotiated, the response is already encoded, its known
/// length is at most `min_length`, or its media type is not eligible. When it
/// is not skipped, Content-Length is removed and Content-Encoding is set.
pub fn decide(
    headers: &mut HeaderMap,
    method: &Method,
    codec: Option<Codec>,
    config: &CompressionConfig,
    hint: SizeHint,
) -> Decision {
    let Some(codec) = codec else {
        return Decision::Identity;
    };

    if headers.contains_key(header::CONTENT_ENCODING) {
        trace!("response already encoded");
        return Decision::Identity;
    }

    let length = match hint {
        SizeHint::Known(len) => Some(len),
        SizeHint::Unknown => declared_length(headers),
    };
    if let Some(length) = length.filter(|len| *len <= config.min_length) {
        trace!(length, min_length = config.min_length, "response below minimum length");
        return Decision::Identity;
    }

    let Some(media_type) = media_type(headers) else {
        trace!("response has no usable content type");
        return Decision::Identity;
    };
    if !config.is_eligible(media_type.essence_str()) {
        trace!(media_type = media_type.essence_str(), "content type not eligible");
        return Decision::Identity;
    }

    headers.remove(header::CONTENT_LENGTH);
    headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(codec.content_encoding()),
    );

    if method == Method::HEAD {
        Decision::Suppress(codec)
    } else {
        Decision::Compress(codec)
    }
}

/// Reads the declared Content-Length, if it is a non-negative integer.
fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parses Content-Type down to its media type.
fn media_type(headers: &HeaderMap) -> Option<Mime> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Mime>().ok())
}
