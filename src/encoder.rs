use crate::codec::Codec;
use crate::config::BrotliOptions;
use crate::pool::{GzipPool, GzipState, GzipWriter};
use brotli::CompressorWriter;
use std::io::{self, Write};
use tracing::warn;

const BROTLI_BUFFER_SIZE: usize = 4096;

/// An active encoder bound to one response's sink.
pub(crate) enum Encoder<W: Write> {
    /// Gzip over a state checked out of the pool.
    Gzip(GzipWriter<W>),
    /// One-shot brotli, dropped after the response.
    Brotli(Box<CompressorWriter<Recorded<W>>>),
}

/// Sink wrapper that keeps the first write error.
///
/// `CompressorWriter::into_inner` finishes the stream but discards any error
/// from it, so the failure has to be picked up from the sink side.
pub(crate) struct Recorded<W> {
    inner: W,
    error: Option<io::Error>,
}

impl<W> Recorded<W> {
    fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    fn into_result(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.inner),
        }
    }
}

impl<W: Write> Write for Recorded<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(|e| {
            let reported = io::Error::new(e.kind(), e.to_string());
            self.error.get_or_insert(e);
            reported
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Encoder<W> {
    /// Creates an encoder for `codec` that writes into `sink`.
    pub(crate) fn new(codec: Codec, sink: W, pool: &GzipPool, brotli: BrotliOptions) -> Self {
        match codec {
            Codec::Gzip => Encoder::Gzip(GzipWriter::new(pool.checkout(), sink)),
            Codec::Brotli => Encoder::Brotli(Box::new(CompressorWriter::new(
                Recorded::new(sink),
                BROTLI_BUFFER_SIZE,
                brotli.quality,
                brotli.window,
            ))),
        }
    }

    pub(crate) fn codec(&self) -> Codec {
        match self {
            Encoder::Gzip(_) => Codec::Gzip,
            Encoder::Brotli(_) => Codec::Brotli,
        }
    }

    pub(crate) fn get_ref(&self) -> &W {
        match self {
            Encoder::Gzip(writer) => writer.get_ref(),
            Encoder::Brotli(writer) => &writer.get_ref().inner,
        }
    }

    pub(crate) fn get_mut(&mut self) -> &mut W {
        match self {
            Encoder::Gzip(writer) => writer.get_mut(),
            Encoder::Brotli(writer) => &mut writer.get_mut().inner,
        }
    }

    /// Terminates the compressed stream and returns the sink.
    ///
    /// A gzip state goes back to `pool` only if its stream finished cleanly.
    pub(crate) fn finish(self, pool: &GzipPool) -> io::Result<W> {
        match self {
            Encoder::Gzip(writer) => match writer.finish() {
                Ok((sink, state)) => {
                    pool.give_back(state);
                    Ok(sink)
                }
                Err(e) => {
                    warn!(error = %e, "gzip stream failed to finish, discarding encoder");
                    Err(e)
                }
            },
            Encoder::Brotli(writer) => {
                let mut sink = (*writer).into_inner().into_result()?;
                sink.flush()?;
                Ok(sink)
            }
        }
    }

    /// Gives up on the stream, handing back a pooled gzip state if there is one.
    pub(crate) fn abandon(self) -> Option<GzipState> {
        match self {
            Encoder::Gzip(writer) => Some(writer.into_state()),
            Encoder::Brotli(_) => None,
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(writer) => writer.write(buf),
            Encoder::Brotli(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(writer) => writer.flush(),
            Encoder::Brotli(writer) => writer.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GzipLevel;
    use crate::testing::{ResetSink, gunzip, unbrotli};

    fn pool() -> GzipPool {
        GzipPool::new(GzipLevel::new(6).unwrap(), 4)
    }

    fn brotli() -> BrotliOptions {
        BrotliOptions::new(5, 22).unwrap()
    }

    #[test]
    fn test_gzip_round_trip_returns_state() {
        let pool = pool();
        let mut encoder = Encoder::new(Codec::Gzip, Vec::new(), &pool, brotli());
        assert_eq!(encoder.codec(), Codec::Gzip);
        assert_eq!(pool.idle(), 0);

        encoder.write_all(b"<p>hello</p>").unwrap();
        let output = encoder.finish(&pool).unwrap();

        assert_eq!(gunzip(&output), b"<p>hello</p>");
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_brotli_is_not_pooled() {
        let pool = pool();
        let mut encoder = Encoder::new(Codec::Brotli, Vec::new(), &pool, brotli());
        assert_eq!(encoder.codec(), Codec::Brotli);

        encoder.write_all(b"{\"ok\":true}").unwrap();
        let output = encoder.finish(&pool).unwrap();

        assert_eq!(unbrotli(&output), b"{\"ok\":true}");
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_brotli_finish_reports_sink_failure() {
        let pool = pool();
        let mut encoder = Encoder::new(Codec::Brotli, ResetSink::default(), &pool, brotli());

        // Small enough to stay inside the brotli buffer until finish.
        encoder.write_all(b"<p>buffered</p>").unwrap();
        let err = encoder.finish(&pool).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_abandon_releases_gzip_state() {
        let pool = pool();
        let mut encoder = Encoder::new(Codec::Gzip, Vec::new(), &pool, brotli());
        encoder.write_all(b"half a response").unwrap();

        let state = encoder.abandon().expect("gzip encoder holds a pooled state");
        pool.give_back(state);
        assert_eq!(pool.idle(), 1);

        let encoder = Encoder::new(Codec::Brotli, Vec::new(), &pool, brotli());
        assert!(encoder.abandon().is_none());
    }
}
