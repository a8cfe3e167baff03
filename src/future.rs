use crate::body::CompressionBody;
use crate::codec::{Codec, add_vary_accept_encoding};
use crate::encoder::Encoder;
use crate::gate::{self, Decision, SizeHint};
use crate::interceptor::Compression;
use bytes::{Buf, BufMut, BytesMut};
use http::{Method, Response, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

pin_project! {
    /// Future for compression service responses.
    ///
    /// Resolves once the inner response is ready and its first body frame has
    /// been read, since that frame decides whether compression applies.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        accepted_codec: Option<Codec>,
        method: Method,
        compression: Compression,
        peek: Option<Peek<B>>,
    }
}

/// A response whose headers are held back until the first body frame arrives.
struct Peek<B> {
    parts: http::response::Parts,
    body: Pin<Box<B>>,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(
        inner: F,
        accepted_codec: Option<Codec>,
        method: Method,
        compression: Compression,
    ) -> Self {
        Self {
            inner,
            accepted_codec,
            method,
            compression,
            peek: None,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            if let Some(mut peek) = this.peek.take() {
                return match peek.body.as_mut().poll_frame(cx) {
                    Poll::Pending => {
                        *this.peek = Some(peek);
                        Poll::Pending
                    }
                    Poll::Ready(first) => Poll::Ready(Ok(open_response(
                        peek,
                        first,
                        *this.accepted_codec,
                        this.method,
                        this.compression,
                    ))),
                };
            }

            match this.inner.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(response)) => {
                    let (mut parts, body) = response.into_parts();
                    add_vary_accept_encoding(&mut parts.headers);

                    // Nothing to decide: answer without waiting on the body.
                    if this.accepted_codec.is_none() || body.is_end_stream() {
                        let body = CompressionBody::passthrough(Box::pin(body), None);
                        return Poll::Ready(Ok(Response::from_parts(parts, body)));
                    }

                    *this.peek = Some(Peek {
                        parts,
                        body: Box::pin(body),
                    });
                }
            }
        }
    }
}

/// Runs the gate on the first frame and wraps the body accordingly.
fn open_response<B>(
    peek: Peek<B>,
    first: Option<Result<http_body::Frame<B::Data>, B::Error>>,
    accepted_codec: Option<Codec>,
    method: &Method,
    compression: &Compression,
) -> Response<CompressionBody<B>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let Peek { mut parts, body } = peek;

    let frame = match first {
        None => return Response::from_parts(parts, CompressionBody::empty()),
        Some(Err(e)) => {
            let error = io::Error::other(e.into());
            return Response::from_parts(parts, CompressionBody::passthrough(body, Some(Err(error))));
        }
        Some(Ok(frame)) => frame,
    };

    // Trailers before any data: there is no body write to decide on.
    let mut data = match frame.into_data() {
        Ok(data) => data,
        Err(frame) => {
            let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
            return Response::from_parts(parts, CompressionBody::passthrough(body, Some(Ok(frame))));
        }
    };
    let chunk = data.copy_to_bytes(data.remaining());

    let decision = gate::decide(
        &mut parts.headers,
        method,
        accepted_codec,
        compression.config(),
        SizeHint::from(chunk.len()),
    );
    debug!(?decision, first_chunk = chunk.len(), %method, "compression gate decided");

    let body = match decision {
        Decision::Identity => {
            CompressionBody::passthrough(body, Some(Ok(http_body::Frame::data(chunk))))
        }
        Decision::Suppress(_) => CompressionBody::empty(),
        Decision::Compress(codec) => {
            let always_flush = parts
                .headers
                .get("x-accel-buffering")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("no"))
                || is_streaming_content_type(&parts.headers);

            let encoder = Encoder::new(
                codec,
                BytesMut::new().writer(),
                compression.pool(),
                compression.settings().brotli,
            );
            CompressionBody::compressed(
                body,
                chunk,
                encoder,
                Arc::clone(compression.pool()),
                always_flush,
            )
        }
    };

    Response::from_parts(parts, body)
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}
