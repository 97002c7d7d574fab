use std::io::{self, Read};

use crate::bench::ChunkSink;

/// Produces throwaway upload payload, optionally bounded in size.
pub struct JunkReader {
    size: Option<u64>,
    pos: u64,
}

impl JunkReader {
    /// `None` never reaches end of stream.
    pub fn new(size: Option<u64>) -> Self {
        Self { size, pos: 0 }
    }
}

impl Read for JunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.size {
            Some(size) => size.saturating_sub(self.pos).min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = i as u8;
        }
        self.pos += n as u64;
        Ok(n)
    }
}

/// Reports every read of the wrapped reader to a [`ChunkSink`].
///
/// Expiry surfaces as an `io::Error` wrapping
/// [`TimeExpired`](crate::bench::TimeExpired), which aborts whatever is
/// consuming the reader.
pub struct CallbackReader<R> {
    inner: R,
    sink: ChunkSink,
}

impl<R: Read> CallbackReader<R> {
    pub fn new(inner: R, sink: ChunkSink) -> Self {
        Self { inner, sink }
    }
}

impl<R: Read> Read for CallbackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sink.record(n).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        Ok(n)
    }
}
