//! Incremental message write engine
//!
//! `MessageWriter` pushes one prepared message into a byte stream. Every
//! `write_some` call performs at most one underlying write, so callers can
//! interleave timeouts and flow control between calls. Body bytes are
//! handed to the stream straight from the body writer's current batch; the
//! engine only stages the start line, the fields, and chunk framing.

use std::io::{self, IoSlice, Write};
use std::str::from_utf8;

use futures::{Async, Future, Poll};
use netbuf::Buf;

use body::{Batch, Body, BodyWriter};
use enums::Version;
use message::Message;

quick_error! {
    #[derive(Debug)]
    pub enum WriteError {
        /// Stream failure, terminal for the engine
        Io(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
        }
        /// The message is complete and the connection must now close
        ///
        /// This is a completion signal, not a failure: it is returned by
        /// the call that finishes a message whose framing requires closing
        /// the connection (`Connection: close`, or HTTP/1.0 without a
        /// `Content-Length`).
        Closed {
            description("message complete, connection closes")
        }
        /// The body writer produced more bytes than `Content-Length`
        BodyOverflow {
            description("body is longer than the declared Content-Length")
        }
        /// The body writer finished before `Content-Length` bytes
        BodyIncomplete {
            description("body is shorter than the declared Content-Length")
        }
        /// The prepared header carries an unparseable `Content-Length`
        InvalidContentLength {
            description("Content-Length value is not a valid number")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Identity,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Pull the next body batch before touching the stream
    Read,
    /// Push staged bytes and the rest of the current batch
    Write,
    /// Only staged bytes (trailer or headers) are left
    Finish,
    Done,
    Failed,
}

/// Write engine for a single message
///
/// The engine is single-use: construct it from a prepared message, then
/// call [`write_some`](#method.write_some) until [`done`](#method.done)
/// reports completion.
pub struct MessageWriter<B: Body> {
    writer: B::Writer,
    staging: Buf,
    state: State,
    framing: Framing,
    close: bool,
    /// identity bytes left, checked against Content-Length
    remaining: Option<u64>,
    has_batch: bool,
    batch_len: usize,
    batch_last: bool,
    cursor: usize,
}

fn parse_content_length(value: &[u8]) -> Result<u64, WriteError> {
    let value = ::headers::trim(value);
    from_utf8(value).ok()
        .and_then(|s| s.parse().ok())
        .ok_or(WriteError::InvalidContentLength)
}

impl<B: Body> MessageWriter<B> {
    /// Create the engine, staging the header block
    ///
    /// The framing is decided here by inspecting the prepared header:
    /// chunked when `Transfer-Encoding` lists `chunked`, close-on-complete
    /// when `Connection` lists `close` or the message is HTTP/1.0 without
    /// a `Content-Length`. The body writer is initialized eagerly, so
    /// init failures surface from this constructor.
    pub fn new(msg: &Message<B>) -> Result<MessageWriter<B>, WriteError> {
        let head = &msg.head;
        let chunked =
            head.field_contains_token("Transfer-Encoding", "chunked");
        let remaining = match head.field("Content-Length") {
            Some(value) => Some(parse_content_length(value)?),
            None => None,
        };
        let close = head.field_contains_token("Connection", "close") ||
            (head.version() == Version::Http10 && remaining.is_none());

        let mut staging = Buf::new();
        if head.is_request() {
            write!(staging, "{} {} {}\r\n",
                head.method().expect("request has a method"),
                head.target().expect("request has a target"),
                head.version()).unwrap();
        } else {
            write!(staging, "{} {} {}\r\n",
                head.version(),
                head.code().expect("response has a code"),
                head.reason().expect("response has a reason")).unwrap();
        }
        for (name, value) in head.fields() {
            if name.starts_with(':') {
                // pseudo-fields never hit the wire
                continue;
            }
            staging.write_all(name.as_bytes()).unwrap();
            staging.write_all(b": ").unwrap();
            staging.write_all(value).unwrap();
            staging.write_all(b"\r\n").unwrap();
        }
        staging.write_all(b"\r\n").unwrap();

        let writer = msg.body.writer().map_err(WriteError::Io)?;
        Ok(MessageWriter {
            writer: writer,
            staging: staging,
            // deferred bodies get the header flushed before the
            // first batch is requested
            state: if msg.body.is_deferred() { State::Write }
                   else { State::Read },
            framing: if chunked { Framing::Chunked }
                     else { Framing::Identity },
            close: close,
            remaining: remaining,
            has_batch: false,
            batch_len: 0,
            batch_last: false,
            cursor: 0,
        })
    }

    /// Returns true when the whole message has been accepted by the stream
    pub fn done(&self) -> bool {
        self.state == State::Done
    }

    /// Returns true when completing this message closes the connection
    pub fn close_on_complete(&self) -> bool {
        self.close
    }

    fn fail<T>(&mut self, err: WriteError) -> Poll<T, WriteError> {
        self.state = State::Failed;
        Err(err)
    }

    /// Mark the end of the body, staging the chunked trailer
    fn finish_body(&mut self) -> Result<(), WriteError> {
        if let Some(rem) = self.remaining {
            if rem > 0 {
                self.state = State::Failed;
                return Err(WriteError::BodyIncomplete);
            }
        }
        if self.framing == Framing::Chunked {
            self.staging.extend(b"0\r\n\r\n");
        }
        self.state = State::Finish;
        Ok(())
    }

    /// Pull body batches until there is something to write
    ///
    /// Returns false when the body has no data ready and nothing is
    /// staged (the need-more case).
    fn fill(&mut self) -> Result<bool, WriteError> {
        while self.state == State::Read {
            match self.writer.read() {
                Err(e) => {
                    self.state = State::Failed;
                    return Err(e.into());
                }
                Ok(Async::NotReady) => {
                    // push what is already staged while the body
                    // catches up
                    return Ok(self.staging.len() > 0);
                }
                Ok(Async::Ready(None)) => {
                    self.finish_body()?;
                }
                Ok(Async::Ready(Some(batch))) => {
                    let len = self.writer.chunk().len();
                    if let Some(ref mut rem) = self.remaining {
                        if len as u64 > *rem {
                            self.state = State::Failed;
                            return Err(WriteError::BodyOverflow);
                        }
                        *rem -= len as u64;
                    }
                    self.batch_last = batch == Batch::Last;
                    if len == 0 {
                        if self.batch_last {
                            self.finish_body()?;
                        }
                        // empty interim batches produce nothing
                        continue;
                    }
                    if self.framing == Framing::Chunked {
                        write!(self.staging, "{:x}\r\n", len).unwrap();
                    }
                    self.has_batch = true;
                    self.batch_len = len;
                    self.cursor = 0;
                    self.state = State::Write;
                }
            }
        }
        Ok(true)
    }

    /// Push some bytes of the message into the stream
    ///
    /// Performs at most one underlying write per call and reports the
    /// number of bytes the stream accepted. `NotReady` means either the
    /// stream or the body writer has no capacity/data right now. The call
    /// that completes a close-on-complete message returns
    /// `Err(WriteError::Closed)` after its bytes were accepted; treat it
    /// as successful completion.
    ///
    /// # Panics
    ///
    /// Panics when called after completion or after an error.
    pub fn write_some<S: Write>(&mut self, stream: &mut S)
        -> Poll<usize, WriteError>
    {
        match self.state {
            State::Done => panic!("write_some() called after completion"),
            State::Failed => panic!("write_some() called after failure"),
            _ => {}
        }
        if !self.fill()? {
            return Ok(Async::NotReady);
        }

        let in_batch = if self.state == State::Write {
            self.batch_len - self.cursor
        } else {
            0
        };
        let total = self.staging.len() + in_batch;
        let n = if total == 0 { 0 } else {
            let res = {
                let staged = &self.staging[..];
                let batch = &self.writer.chunk()
                    [self.cursor..self.cursor + in_batch];
                loop {
                    match stream.write_vectored(
                        &[IoSlice::new(staged), IoSlice::new(batch)])
                    {
                        Err(ref e)
                            if e.kind() == io::ErrorKind::Interrupted
                        => continue,
                        res => break res,
                    }
                }
            };
            match res {
                Ok(0) => {
                    return self.fail(
                        io::Error::from(io::ErrorKind::WriteZero).into());
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Async::NotReady);
                }
                Err(e) => return self.fail(e.into()),
            }
        };

        let from_staging = if n < self.staging.len() { n }
                           else { self.staging.len() };
        self.staging.consume(from_staging);
        self.cursor += n - from_staging;

        if self.staging.len() == 0 {
            if self.state == State::Write {
                if self.has_batch && self.cursor == self.batch_len {
                    self.has_batch = false;
                    self.batch_len = 0;
                    self.cursor = 0;
                    if self.framing == Framing::Chunked {
                        self.staging.extend(b"\r\n");
                    }
                    if self.batch_last {
                        self.finish_body()?;
                    } else {
                        self.state = State::Read;
                    }
                } else if !self.has_batch {
                    // deferred header is out, body polling starts now
                    self.state = State::Read;
                }
            }
            if self.state == State::Finish && self.staging.len() == 0 {
                self.state = State::Done;
                if self.close {
                    return Err(WriteError::Closed);
                }
            }
        }
        Ok(Async::Ready(n))
    }
}

/// Write a whole message, yielding the stream back on completion
///
/// A close-on-complete message resolves with `Err(WriteError::Closed)`
/// once fully written; the caller is expected to drop the connection in
/// that case, so the stream is not returned.
pub fn write_message<S, B>(stream: S, msg: &Message<B>)
    -> Result<WriteMessage<S, B>, WriteError>
    where S: Write, B: Body,
{
    Ok(WriteMessage {
        stream: Some(stream),
        writer: MessageWriter::new(msg)?,
    })
}

/// Future returned by `write_message`
pub struct WriteMessage<S, B: Body> {
    stream: Option<S>,
    writer: MessageWriter<B>,
}

impl<S: Write, B: Body> Future for WriteMessage<S, B> {
    type Item = S;
    type Error = WriteError;
    fn poll(&mut self) -> Poll<S, WriteError> {
        loop {
            if self.writer.done() {
                return Ok(Async::Ready(
                    self.stream.take().expect("poll after complete")));
            }
            let stream = self.stream.as_mut().expect("poll after complete");
            match self.writer.write_some(stream)? {
                Async::Ready(_) => continue,
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }
}
