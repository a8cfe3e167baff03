use crate::codec::Codec;
use crate::encoder::Encoder;
use crate::gate::{self, Decision, SizeHint};
use crate::interceptor::Settings;
use crate::pool::GzipPool;
use crate::sink::ResponseSink;
use http::{HeaderMap, Method, StatusCode};
use std::io::{self, Write};
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where body bytes go for the current response.
enum Stage<S: Write> {
    /// The gate has not run; no body byte has been written.
    Pending(S),
    /// Bytes go to the sink unchanged.
    Identity(S),
    /// Headers announce an encoding but the body is dropped (HEAD).
    Suppressed(S),
    /// Bytes go through an encoder into the sink.
    Encoding(Encoder<S>),
    /// Finalized; the sink has been handed back.
    Closed,
}

/// Response writer that compresses the body when the gate allows it.
///
/// Wraps the server's [`ResponseSink`] and implements it, so handlers write
/// to it as they would to the raw sink. The compression decision is made once,
/// on the first body write (or flush), using the size of that write. Header
/// changes made before then are visible to the decision.
///
/// Call [`finish`](CompressWriter::finish) when the handler is done. If the
/// writer is dropped without it, finalization is still attempted.
pub struct CompressWriter<S: ResponseSink> {
    stage: Stage<S>,
    codec: Option<Codec>,
    method: Method,
    settings: Arc<Settings>,
    pool: Arc<GzipPool>,
}

impl<S: ResponseSink> CompressWriter<S> {
    pub(crate) fn new(
        sink: S,
        method: Method,
        codec: Option<Codec>,
        settings: Arc<Settings>,
        pool: Arc<GzipPool>,
    ) -> Self {
        Self {
            stage: Stage::Pending(sink),
            codec,
            method,
            settings,
            pool,
        }
    }

    /// Returns the negotiated codec, which may still be declined by the gate.
    pub fn codec(&self) -> Option<Codec> {
        self.codec
    }

    /// Returns whether the gate has run.
    pub fn is_opened(&self) -> bool {
        !matches!(self.stage, Stage::Pending(_))
    }

    /// Returns the codec body bytes are being encoded with, if any.
    pub fn active_codec(&self) -> Option<Codec> {
        match &self.stage {
            Stage::Encoding(encoder) => Some(encoder.codec()),
            _ => None,
        }
    }

    /// Returns a reference to the wrapped sink.
    pub fn get_ref(&self) -> &S {
        // Closed outlives a call only in `finish` and `Drop`, which consume the writer.
        match &self.stage {
            Stage::Pending(sink) | Stage::Identity(sink) | Stage::Suppressed(sink) => sink,
            Stage::Encoding(encoder) => encoder.get_ref(),
            Stage::Closed => unreachable!("response writer used after finalization"),
        }
    }

    /// Returns a mutable reference to the wrapped sink.
    ///
    /// Writing to it directly bypasses both the gate and the encoder.
    pub fn get_mut(&mut self) -> &mut S {
        // See `get_ref`: no caller can observe Closed.
        match &mut self.stage {
            Stage::Pending(sink) | Stage::Identity(sink) | Stage::Suppressed(sink) => sink,
            Stage::Encoding(encoder) => encoder.get_mut(),
            Stage::Closed => unreachable!("response writer used after finalization"),
        }
    }

    /// Runs the gate with `hint` as the size of the first chunk.
    ///
    /// Only the first call has any effect; later calls leave the selected
    /// writer and the headers as they are.
    pub fn open(&mut self, hint: SizeHint) {
        let Stage::Pending(sink) = &mut self.stage else {
            return;
        };

        let decision = gate::decide(
            sink.headers_mut(),
            &self.method,
            self.codec,
            &self.settings.config,
            hint,
        );
        debug!(?decision, ?hint, method = %self.method, "compression gate decided");

        // Closed only for the instant the sink moves into its next stage.
        let Stage::Pending(sink) = mem::replace(&mut self.stage, Stage::Closed) else {
            return;
        };
        self.stage = match decision {
            Decision::Identity => Stage::Identity(sink),
            Decision::Suppress(_) => Stage::Suppressed(sink),
            Decision::Compress(codec) => Stage::Encoding(Encoder::new(
                codec,
                sink,
                &self.pool,
                self.settings.brotli,
            )),
        };
    }

    /// Writes a string body chunk.
    pub fn write_str(&mut self, data: &str) -> io::Result<()> {
        self.write_all(data.as_bytes())
    }

    /// Finalizes the response and hands back the sink.
    ///
    /// An active encoder is flushed and terminated; a pooled gzip state is
    /// returned to its pool. Raw and suppressed bodies need nothing.
    pub fn finish(mut self) -> io::Result<S> {
        let stage = mem::replace(&mut self.stage, Stage::Closed);
        finalize(stage, &self.pool)
    }
}

fn finalize<S: Write>(stage: Stage<S>, pool: &GzipPool) -> io::Result<S> {
    match stage {
        Stage::Pending(sink) | Stage::Identity(sink) | Stage::Suppressed(sink) => Ok(sink),
        Stage::Encoding(encoder) => encoder.finish(pool),
        Stage::Closed => Err(io::Error::other("response writer already finalized")),
    }
}

impl<S: ResponseSink> Write for CompressWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_opened() {
            self.open(SizeHint::from(buf.len()));
        }

        match &mut self.stage {
            Stage::Pending(sink) | Stage::Identity(sink) => sink.write(buf),
            Stage::Suppressed(_) => Ok(buf.len()),
            Stage::Encoding(encoder) => encoder.write(buf),
            Stage::Closed => Err(io::Error::other("response writer already finalized")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Flushing commits headers, so the decision cannot wait any longer.
        if !self.is_opened() {
            self.open(SizeHint::Unknown);
        }

        match &mut self.stage {
            Stage::Pending(sink) | Stage::Identity(sink) | Stage::Suppressed(sink) => sink.flush(),
            Stage::Encoding(encoder) => encoder.flush(),
            Stage::Closed => Ok(()),
        }
    }
}

impl<S: ResponseSink> ResponseSink for CompressWriter<S> {
    fn headers(&self) -> &HeaderMap {
        self.get_ref().headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.get_mut().headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.get_mut().write_status(status);
    }
}

impl<S: ResponseSink> Drop for CompressWriter<S> {
    fn drop(&mut self) {
        let stage = mem::replace(&mut self.stage, Stage::Closed);
        if matches!(stage, Stage::Closed) {
            return;
        }
        if let Err(e) = finalize(stage, &self.pool) {
            warn!(error = %e, "failed to finalize abandoned response");
        }
    }
}
