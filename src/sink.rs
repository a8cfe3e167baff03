use http::{HeaderMap, StatusCode};
use std::io::Write;

/// A writable response target with a header map and a status setter.
///
/// Implemented by the host server's response object. Headers may be changed
/// freely until the first body byte is written; at that point the sink
/// commits its header block to the network.
pub trait ResponseSink: Write {
    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for modification.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sets the response status.
    fn write_status(&mut self, status: StatusCode);
}

impl<T: ResponseSink + ?Sized> ResponseSink for &mut T {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        (**self).write_status(status)
    }
}
