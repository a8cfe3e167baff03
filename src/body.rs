use crate::encoder::Encoder;
use crate::pool::GzipPool;
use bytes::buf::Writer;
use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body, Frame};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A response body that may be compressed.
///
/// Produced by [`CompressionService`](crate::CompressionService). The first
/// chunk of the inner body has already been read to make the compression
/// decision; it is replayed (or compressed) before anything else.
pub struct CompressionBody<B> {
    kind: Kind<B>,
}

enum Kind<B> {
    /// Compressed body with encoder.
    Compressed {
        inner: Pin<Box<B>>,
        state: CompressedBody,
    },
    /// Passthrough body without compression.
    Passthrough {
        inner: Pin<Box<B>>,
        first: Option<Result<Frame<Bytes>, io::Error>>,
    },
    /// No frames at all: the inner body was empty or the request was HEAD.
    Empty,
}

/// State and buffers for an actively compressed body.
pub(crate) struct CompressedBody {
    encoder: Option<Encoder<Writer<BytesMut>>>,
    pool: Arc<GzipPool>,
    first: Option<Bytes>,
    always_flush: bool,
    state: CompressState,
    pending_trailers: Option<http::HeaderMap>,
}

/// State machine for compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading data from inner body and compressing.
    Reading,
    /// Finishing compression after inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Compression is complete.
    Done,
}

impl CompressedBody {
    fn new(
        encoder: Encoder<Writer<BytesMut>>,
        pool: Arc<GzipPool>,
        first: Bytes,
        always_flush: bool,
    ) -> Self {
        Self {
            encoder: Some(encoder),
            pool,
            first: Some(first),
            always_flush,
            state: CompressState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current compression state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Returns whether always flush is enabled.
    pub(crate) fn always_flush(&self) -> bool {
        self.always_flush
    }

    fn after_finish(&self) -> CompressState {
        if self.pending_trailers.is_some() {
            CompressState::Trailers
        } else {
            CompressState::Done
        }
    }

    /// Polls the inner body and compresses data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    if let Some(trailers) = self.pending_trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                    return Poll::Ready(None);
                }

                CompressState::Finishing => {
                    let Some(encoder) = self.encoder.take() else {
                        self.state = self.after_finish();
                        continue;
                    };
                    match encoder.finish(&self.pool) {
                        Ok(output) => {
                            self.state = self.after_finish();
                            let data = output.into_inner().freeze();
                            if !data.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(data))));
                            }
                        }
                        Err(e) => {
                            self.state = CompressState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }

                CompressState::Reading => {
                    if let Some(first) = self.first.take() {
                        match self.compress_chunk(&first) {
                            Ok(Some(data)) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                            Ok(None) => continue,
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        }
                    }

                    match inner.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            // Inner body is done, transition to finishing
                            self.state = CompressState::Finishing;
                        }
                        Poll::Ready(Some(Err(e))) => {
                            return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                        }
                        Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                            Ok(mut data) => {
                                let input = data.copy_to_bytes(data.remaining());
                                match self.compress_chunk(&input) {
                                    Ok(Some(data)) => {
                                        return Poll::Ready(Some(Ok(Frame::data(data))));
                                    }
                                    Ok(None) => {}
                                    Err(e) => return Poll::Ready(Some(Err(e))),
                                }
                            }
                            Err(frame) => {
                                // Buffer trailers and finish compression first
                                if let Ok(trailers) = frame.into_trailers() {
                                    self.pending_trailers = Some(trailers);
                                    self.state = CompressState::Finishing;
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    /// Compresses a chunk, returning whatever output the encoder released.
    fn compress_chunk(&mut self, input: &[u8]) -> io::Result<Option<Bytes>> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(None);
        };

        encoder.write_all(input)?;
        if self.always_flush {
            encoder.flush()?;
        }

        let output = encoder.get_mut().get_mut().split().freeze();
        Ok((!output.is_empty()).then_some(output))
    }
}

impl Drop for CompressedBody {
    fn drop(&mut self) {
        // Abandoned mid-stream: nobody will read the rest, but the state is reusable.
        if let Some(state) = self.encoder.take().and_then(Encoder::abandon) {
            self.pool.give_back(state);
        }
    }
}

impl<B> CompressionBody<B> {
    /// Creates a compressed body; `first` is the chunk already read from `inner`.
    pub(crate) fn compressed(
        inner: Pin<Box<B>>,
        first: Bytes,
        encoder: Encoder<Writer<BytesMut>>,
        pool: Arc<GzipPool>,
        always_flush: bool,
    ) -> Self {
        Self {
            kind: Kind::Compressed {
                inner,
                state: CompressedBody::new(encoder, pool, first, always_flush),
            },
        }
    }

    /// Creates a passthrough body that replays `first` before reading `inner`.
    pub(crate) fn passthrough(
        inner: Pin<Box<B>>,
        first: Option<Result<Frame<Bytes>, io::Error>>,
    ) -> Self {
        Self {
            kind: Kind::Passthrough { inner, first },
        }
    }

    /// Creates a body without frames.
    pub(crate) fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// Returns whether the body is being compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self.kind, Kind::Compressed { .. })
    }

    #[cfg(test)]
    pub(crate) fn compressed_state(&self) -> Option<&CompressedBody> {
        match &self.kind {
            Kind::Compressed { state, .. } => Some(state),
            _ => None,
        }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Passthrough { inner, first } => {
                if let Some(first) = first.take() {
                    return Poll::Ready(Some(first));
                }
                // Pass through frames, converting data to Bytes
                match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Ready(Some(Ok(frame))) => {
                        let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                        Poll::Ready(Some(Ok(frame)))
                    }
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
                }
            }
            Kind::Compressed { inner, state } => state.poll_compressed(cx, inner.as_mut()),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Passthrough { inner, first } => first.is_none() && inner.is_end_stream(),
            Kind::Compressed { state, .. } => state.state() == CompressState::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match &self.kind {
            Kind::Empty => http_body::SizeHint::with_exact(0),
            Kind::Passthrough { inner, first } => {
                let mut hint = inner.size_hint();
                let buffered = match first {
                    Some(Ok(frame)) => frame.data_ref().map_or(0, |data| data.len() as u64),
                    _ => 0,
                };
                if let Some(upper) = hint.upper() {
                    hint.set_upper(upper + buffered);
                }
                hint.set_lower(hint.lower() + buffered);
                hint
            }
            // Compressed size is unknown
            Kind::Compressed { .. } => http_body::SizeHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::config::{BrotliOptions, GzipLevel};
    use crate::testing::{TestBody, gunzip, poll_body, unbrotli};
    use bytes::BufMut;
    use http::HeaderMap;

    fn pool() -> Arc<GzipPool> {
        Arc::new(GzipPool::new(GzipLevel::DEFAULT, 4))
    }

    fn compressed(
        frames: Vec<Frame<Bytes>>,
        codec: Codec,
        pool: &Arc<GzipPool>,
        always_flush: bool,
    ) -> CompressionBody<TestBody> {
        let mut inner = TestBody::new(frames);
        let first = inner.take_first_data();
        let encoder = Encoder::new(codec, BytesMut::new().writer(), pool, BrotliOptions::DEFAULT);
        CompressionBody::compressed(Box::pin(inner), first, encoder, Arc::clone(pool), always_flush)
    }

    fn collect_data(body: &mut CompressionBody<TestBody>) -> (Vec<u8>, Option<HeaderMap>) {
        let mut data = Vec::new();
        let mut trailers = None;
        while let Some(frame) = poll_body(body) {
            let frame = frame.unwrap();
            if frame.is_data() {
                data.extend_from_slice(&frame.into_data().unwrap());
            } else {
                trailers = frame.into_trailers().ok();
            }
        }
        (data, trailers)
    }

    #[test]
    fn test_passthrough_replays_first_frame() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from("world"))]);
        let mut body = CompressionBody::passthrough(
            Box::pin(inner),
            Some(Ok(Frame::data(Bytes::from("hello ")))),
        );
        assert_eq!(body.size_hint().exact(), None);
        assert!(!body.is_end_stream());

        let (data, trailers) = collect_data(&mut body);
        assert_eq!(data, b"hello world");
        assert!(trailers.is_none());
    }

    #[test]
    fn test_passthrough_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let inner = TestBody::new(vec![Frame::trailers(trailers)]);
        let mut body =
            CompressionBody::passthrough(Box::pin(inner), Some(Ok(Frame::data(Bytes::from("data")))));

        let (data, trailers) = collect_data(&mut body);
        assert_eq!(data, b"data");
        assert_eq!(trailers.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_empty_body() {
        let mut body = CompressionBody::<TestBody>::empty();
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_compressed_gzip_returns_state() {
        let pool = pool();
        let mut body = compressed(
            vec![
                Frame::data(Bytes::from("hello ")),
                Frame::data(Bytes::from("world")),
            ],
            Codec::Gzip,
            &pool,
            false,
        );
        assert!(body.is_compressed());
        assert_eq!(pool.idle(), 0);

        let (data, _) = collect_data(&mut body);
        assert_eq!(gunzip(&data), b"hello world");
        assert!(body.is_end_stream());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_compressed_brotli() {
        let pool = pool();
        let mut body = compressed(
            vec![Frame::data(Bytes::from("{\"hello\":\"world\"}"))],
            Codec::Brotli,
            &pool,
            false,
        );

        let (data, _) = collect_data(&mut body);
        assert_eq!(unbrotli(&data), b"{\"hello\":\"world\"}");
    }

    #[test]
    fn test_compressed_with_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());

        let pool = pool();
        let mut body = compressed(
            vec![
                Frame::data(Bytes::from("hello world")),
                Frame::trailers(trailers),
            ],
            Codec::Gzip,
            &pool,
            false,
        );

        let (data, trailers) = collect_data(&mut body);
        assert_eq!(gunzip(&data), b"hello world");
        let trailers = trailers.expect("Expected trailers frame");
        assert_eq!(trailers.get("x-checksum").unwrap(), "abc123");
        assert_eq!(body.compressed_state().unwrap().state(), CompressState::Done);
    }

    #[test]
    fn test_always_flush_releases_each_chunk() {
        let pool = pool();
        let mut body = compressed(
            vec![
                Frame::data(Bytes::from("data: one\n\n")),
                Frame::data(Bytes::from("data: two\n\n")),
            ],
            Codec::Gzip,
            &pool,
            true,
        );
        assert!(body.compressed_state().unwrap().always_flush());

        let first = poll_body(&mut body).unwrap().unwrap().into_data().unwrap();
        let mut decoder = flate2::write::GzDecoder::new(Vec::new());
        decoder.write_all(&first).unwrap();
        decoder.flush().unwrap();
        assert_eq!(decoder.get_ref().as_slice(), b"data: one\n\n");

        let (rest, _) = collect_data(&mut body);
        let mut all = first.to_vec();
        all.extend_from_slice(&rest);
        assert_eq!(gunzip(&all), b"data: one\n\ndata: two\n\n");
    }

    #[test]
    fn test_abandoned_body_returns_state() {
        let pool = pool();
        let mut body = compressed(
            vec![
                Frame::data(Bytes::from("hello ")),
                Frame::data(Bytes::from("world")),
            ],
            Codec::Gzip,
            &pool,
            false,
        );
        assert!(poll_body(&mut body).is_some());
        assert_eq!(pool.idle(), 0);

        drop(body);
        assert_eq!(pool.idle(), 1);
    }
}
