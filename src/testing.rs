//! Helpers shared by the unit tests.

use crate::sink::ResponseSink;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

/// In-memory sink that snapshots its headers when the first body byte arrives.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: HeaderMap,
    pub(crate) committed: Option<HeaderMap>,
    pub(crate) body: Vec<u8>,
    pub(crate) flushes: usize,
}

impl RecordingSink {
    pub(crate) fn with_headers<I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut sink = Self::default();
        for (name, value) in headers {
            sink.headers
                .append(name, http::HeaderValue::from_static(value));
        }
        sink
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.committed.is_none() {
            self.committed = Some(self.headers.clone());
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.committed.is_none() {
            self.committed = Some(self.headers.clone());
        }
        self.flushes += 1;
        Ok(())
    }
}

impl ResponseSink for RecordingSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

/// Sink whose connection has gone away.
#[derive(Debug, Default)]
pub(crate) struct BrokenSink {
    pub(crate) headers: HeaderMap,
}

impl Write for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

impl ResponseSink for BrokenSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, _status: StatusCode) {}
}

/// Sink that drops every body byte but reports flushes as successful.
#[derive(Debug, Default)]
pub(crate) struct ResetSink {
    pub(crate) headers: HeaderMap,
}

impl Write for ResetSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseSink for ResetSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, _status: StatusCode) {}
}

pub(crate) fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::new();
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut output)
        .unwrap();
    output
}

pub(crate) fn unbrotli(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::new();
    brotli::Decompressor::new(data, 4096)
        .read_to_end(&mut output)
        .unwrap();
    output
}

/// A body long and repetitive enough to pass any small minimum length.
pub(crate) fn html_page() -> String {
    let mut page = String::from("<html><body>");
    for i in 0..200 {
        page.push_str(&format!("<p>paragraph {i} of a compressible page</p>"));
    }
    page.push_str("</body></html>");
    page
}

/// A test body that yields predefined frames.
pub(crate) struct TestBody {
    frames: VecDeque<Frame<Bytes>>,
}

impl TestBody {
    pub(crate) fn new(frames: Vec<Frame<Bytes>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// Removes the leading data frame, as the response future does before
    /// building a body.
    pub(crate) fn take_first_data(&mut self) -> Bytes {
        self.frames
            .pop_front()
            .and_then(|frame| frame.into_data().ok())
            .expect("first frame should be data")
    }
}

impl Body for TestBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.frames.pop_front().map(Ok))
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty()
    }
}

pub(crate) fn poll_body<B: Body + Unpin>(body: &mut B) -> Option<Result<Frame<B::Data>, B::Error>> {
    let waker = std::task::Waker::noop();
    let mut cx = Context::from_waker(waker);
    match Pin::new(body).poll_frame(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => None,
    }
}
