use crate::config::GzipLevel;
use flate2::CrcWriter;
use flate2::write::DeflateEncoder;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_DEFLATE: u8 = 8;
const GZIP_OS_UNKNOWN: u8 = 0xff;

/// Deflate encoder over an output buffer, with a CRC of everything fed to it.
type PooledDeflate = CrcWriter<DeflateEncoder<Vec<u8>>>;

fn pooled_deflate(level: GzipLevel) -> PooledDeflate {
    CrcWriter::new(DeflateEncoder::new(
        Vec::with_capacity(OUTPUT_BUFFER_SIZE),
        level.compression(),
    ))
}

/// Reusable deflate state for gzip responses.
///
/// Allocating a deflate window is the expensive part of gzip, so this state
/// outlives a single response. It is only ever owned by one response at a
/// time: the pool hands it out by value and takes it back by value.
pub struct GzipState {
    id: u64,
    level: GzipLevel,
    encoder: PooledDeflate,
}

impl GzipState {
    fn new(id: u64, level: GzipLevel) -> Self {
        Self {
            id,
            level,
            encoder: pooled_deflate(level),
        }
    }

    /// Identifier unique within the pool that created this state.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Readies the state for a new stream, keeping the output buffer.
    fn reset(&mut self) {
        let deflate = self.encoder.get_mut();
        let mut buffer = mem::take(deflate.get_mut());
        buffer.clear();
        // Terminates any unfinished stream into the discarded placeholder.
        if let Err(e) = deflate.reset(buffer) {
            warn!(id = self.id, error = %e, "gzip state failed to reset, rebuilding");
            self.encoder = pooled_deflate(self.level);
            return;
        }
        self.encoder.reset();
    }

    fn header(&self) -> [u8; 10] {
        let extra_flags = match self.level.get() {
            9 => 2,
            1 => 4,
            _ => 0,
        };
        [
            GZIP_MAGIC[0],
            GZIP_MAGIC[1],
            GZIP_DEFLATE,
            0,
            0,
            0,
            0,
            0,
            extra_flags,
            GZIP_OS_UNKNOWN,
        ]
    }

    fn trailer(&self) -> [u8; 8] {
        let crc = self.encoder.crc();
        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&crc.sum().to_le_bytes());
        trailer[4..].copy_from_slice(&crc.amount().to_le_bytes());
        trailer
    }
}

impl std::fmt::Debug for GzipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipState")
            .field("id", &self.id)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// A pool of idle gzip states, all at the same level.
///
/// Checkout and give-back are synchronized internally, so one pool can be
/// shared by every in-flight response.
#[derive(Debug)]
pub struct GzipPool {
    level: GzipLevel,
    capacity: usize,
    idle: Mutex<Vec<GzipState>>,
    next_id: AtomicU64,
}

impl GzipPool {
    /// Creates a pool holding at most `capacity` idle states.
    ///
    /// One state is built up front so the level is exercised before any
    /// request is served.
    pub fn new(level: GzipLevel, capacity: usize) -> Self {
        let pool = Self {
            level,
            capacity,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        };
        let seed = pool.create();
        pool.give_back(seed);
        debug!(level = level.get(), capacity, "created gzip encoder pool");
        pool
    }

    /// Returns the level every state in this pool uses.
    pub fn level(&self) -> GzipLevel {
        self.level
    }

    /// Returns the number of idle states.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Takes an idle state, or builds a new one if none is idle.
    pub fn checkout(&self) -> GzipState {
        let state = self.idle.lock().pop();
        state.unwrap_or_else(|| self.create())
    }

    /// Returns a finished state to the pool.
    ///
    /// The state is reset before it becomes visible to other responses. It is
    /// dropped if the pool is already at capacity.
    pub fn give_back(&self, mut state: GzipState) {
        state.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(state);
        }
    }

    fn create(&self) -> GzipState {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        GzipState::new(id, self.level)
    }
}

/// Gzip stream written over a pooled [`GzipState`] into a sink.
///
/// Deflate output collects in the state's buffer and is copied to the sink
/// after every call, so the sink sees bytes as soon as the encoder releases
/// them.
pub struct GzipWriter<W: Write> {
    state: GzipState,
    sink: W,
    header_written: bool,
}

impl<W: Write> GzipWriter<W> {
    /// Binds `state` to a new sink.
    pub fn new(mut state: GzipState, sink: W) -> Self {
        state.reset();
        Self {
            state,
            sink,
            header_written: false,
        }
    }

    /// Returns a reference to the sink.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Returns a mutable reference to the sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Returns the identifier of the bound state.
    pub fn state_id(&self) -> u64 {
        self.state.id
    }

    /// Terminates the gzip stream and flushes the sink.
    ///
    /// Hands back the sink and the state so the caller can return the state
    /// to its pool. On error both are dropped.
    pub fn finish(mut self) -> io::Result<(W, GzipState)> {
        self.write_header()?;
        self.state.encoder.get_mut().try_finish()?;
        self.drain()?;
        self.sink.write_all(&self.state.trailer())?;
        self.sink.flush()?;

        Ok((self.sink, self.state))
    }

    /// Releases the state without terminating the stream.
    pub(crate) fn into_state(self) -> GzipState {
        self.state
    }

    fn write_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.sink.write_all(&self.state.header())?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Moves buffered deflate output to the sink.
    fn drain(&mut self) -> io::Result<()> {
        let buffer = self.state.encoder.get_mut().get_mut();
        if !buffer.is_empty() {
            self.sink.write_all(buffer)?;
            buffer.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_header()?;
        let written = self.state.encoder.write(buf)?;
        self.drain()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_header()?;
        // Sync flush: everything written so far becomes decodable.
        self.state.encoder.flush()?;
        self.drain()?;
        self.sink.flush()
    }
}
