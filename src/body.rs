//! Body kinds and their writers
//!
//! A body value describes the payload of a message; its writer yields the
//! payload lazily, one batch at a time, so that the write engine can push
//! arbitrarily large bodies with bounded buffering.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Async, Poll};

/// Default batch size for file-backed bodies
const FILE_CHUNK_SIZE: usize = 8192;

/// Marker returned along with every body batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batch {
    /// More data may follow this batch
    More,
    /// The producer knows this batch is the final one
    Last,
}

/// A message body kind
///
/// The length probe is a capability separate from the writer, so asking
/// for `content_length` does not construct (and then discard) a writer.
/// Consequently writers may assume a single initialization per send.
pub trait Body {
    type Writer: BodyWriter;
    /// Total number of payload bytes when known up front
    fn content_length(&self) -> Option<u64>;
    /// Deferred bodies get their headers flushed before the first
    /// payload batch is requested
    fn is_deferred(&self) -> bool { false }
    /// Initialize the writer for one serialization pass
    fn writer(&self) -> io::Result<Self::Writer>;
}

/// Produces the payload of one message, batch by batch
///
/// `NotReady` means no data is ready yet (the caller retries later),
/// `Ready(None)` is the end of the body. After `Ready(Some(..))` the
/// batch bytes are available through `chunk` until the next `read`.
pub trait BodyWriter {
    fn read(&mut self) -> Poll<Option<Batch>, io::Error>;
    fn chunk(&self) -> &[u8];
}

/// A message without a body
#[derive(Debug, Clone, Copy)]
pub struct Empty;

pub struct EmptyWriter;

impl Body for Empty {
    type Writer = EmptyWriter;
    fn content_length(&self) -> Option<u64> { Some(0) }
    fn writer(&self) -> io::Result<EmptyWriter> { Ok(EmptyWriter) }
}

impl BodyWriter for EmptyWriter {
    fn read(&mut self) -> Poll<Option<Batch>, io::Error> {
        Ok(Async::Ready(None))
    }
    fn chunk(&self) -> &[u8] { b"" }
}

/// A body held in memory and sent in one batch
///
/// The bytes are shared with the writer, not copied.
#[derive(Debug, Clone)]
pub struct StringBody {
    data: Arc<[u8]>,
}

pub struct StringWriter {
    data: Arc<[u8]>,
    delivered: bool,
}

impl StringBody {
    pub fn new<S: Into<String>>(data: S) -> StringBody {
        StringBody { data: data.into().into_bytes().into() }
    }
    pub fn from_bytes<B: Into<Vec<u8>>>(data: B) -> StringBody {
        StringBody { data: data.into().into() }
    }
}

impl Body for StringBody {
    type Writer = StringWriter;
    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
    fn writer(&self) -> io::Result<StringWriter> {
        Ok(StringWriter { data: self.data.clone(), delivered: false })
    }
}

impl BodyWriter for StringWriter {
    fn read(&mut self) -> Poll<Option<Batch>, io::Error> {
        if self.delivered || self.data.len() == 0 {
            self.delivered = true;
            return Ok(Async::Ready(None));
        }
        self.delivered = true;
        Ok(Async::Ready(Some(Batch::Last)))
    }
    fn chunk(&self) -> &[u8] {
        &self.data
    }
}

/// A body assembled from caller-pushed chunks
///
/// By default the body reports the sum of its chunk lengths as the
/// content length; `without_length` makes it decline, which selects
/// chunked encoding on HTTP/1.1 and close-delimited framing on HTTP/1.0.
#[derive(Debug, Clone)]
pub struct BufferedBody {
    chunks: Vec<Arc<[u8]>>,
    report_length: bool,
}

pub struct BufferedWriter {
    chunks: Vec<Arc<[u8]>>,
    current: Option<usize>,
}

impl BufferedBody {
    pub fn new() -> BufferedBody {
        BufferedBody { chunks: Vec::new(), report_length: true }
    }
    /// Append a chunk; empty chunks are kept but produce no bytes
    pub fn push<D: Into<Vec<u8>>>(&mut self, data: D) -> &mut Self {
        self.chunks.push(data.into().into());
        self
    }
    /// Decline to report a length even though it is known
    pub fn without_length(mut self) -> BufferedBody {
        self.report_length = false;
        self
    }
}

impl Body for BufferedBody {
    type Writer = BufferedWriter;
    fn content_length(&self) -> Option<u64> {
        if self.report_length {
            Some(self.chunks.iter().map(|c| c.len() as u64).sum())
        } else {
            None
        }
    }
    fn writer(&self) -> io::Result<BufferedWriter> {
        Ok(BufferedWriter {
            chunks: self.chunks.clone(),
            current: None,
        })
    }
}

impl BodyWriter for BufferedWriter {
    fn read(&mut self) -> Poll<Option<Batch>, io::Error> {
        let next = self.current.map(|x| x + 1).unwrap_or(0);
        if next >= self.chunks.len() {
            self.current = Some(self.chunks.len());
            return Ok(Async::Ready(None));
        }
        self.current = Some(next);
        if next == self.chunks.len() - 1 {
            Ok(Async::Ready(Some(Batch::Last)))
        } else {
            Ok(Async::Ready(Some(Batch::More)))
        }
    }
    fn chunk(&self) -> &[u8] {
        match self.current {
            Some(idx) if idx < self.chunks.len() => &self.chunks[idx],
            _ => b"",
        }
    }
}

/// A body read from a file in bounded batches
///
/// The length is taken from file metadata when the body is created. The
/// body is deferred: headers are flushed before the first disk read. Reads
/// are synchronous, so large files are best served from an executor that
/// tolerates blocking.
#[derive(Debug, Clone)]
pub struct FileBody {
    path: PathBuf,
    length: u64,
    chunk_size: usize,
}

pub struct FileWriter {
    file: File,
    buf: Vec<u8>,
    filled: usize,
}

impl FileBody {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<FileBody> {
        let length = path.as_ref().metadata()?.len();
        Ok(FileBody {
            path: path.as_ref().to_path_buf(),
            length: length,
            chunk_size: FILE_CHUNK_SIZE,
        })
    }
    /// Override the batch size (default 8192)
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn chunk_size(mut self, size: usize) -> FileBody {
        assert!(size > 0);
        self.chunk_size = size;
        self
    }
}

impl Body for FileBody {
    type Writer = FileWriter;
    fn content_length(&self) -> Option<u64> {
        Some(self.length)
    }
    fn is_deferred(&self) -> bool { true }
    fn writer(&self) -> io::Result<FileWriter> {
        Ok(FileWriter {
            file: File::open(&self.path)?,
            buf: vec![0; self.chunk_size],
            filled: 0,
        })
    }
}

impl BodyWriter for FileWriter {
    fn read(&mut self) -> Poll<Option<Batch>, io::Error> {
        let n = self.file.read(&mut self.buf)?;
        self.filled = n;
        if n == 0 {
            Ok(Async::Ready(None))
        } else {
            Ok(Async::Ready(Some(Batch::More)))
        }
    }
    fn chunk(&self) -> &[u8] {
        &self.buf[..self.filled]
    }
}
