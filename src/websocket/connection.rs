//! Websocket connection: the message read and write engines
//!
//! A connection splits into a `Sender` and a `Receiver` which may be
//! driven concurrently (at most one read and one write in flight). The
//! two halves share one mutex around the write side of the stream; the
//! read path takes it only to emit pongs and mirrored close frames.
//! Frames are always staged atomically, so an engine-generated control
//! frame can land between user frames but never inside one.

use std::cmp::min;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{Async, Future, Poll};
use netbuf::Buf;
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_io::{AsyncRead, AsyncWrite};

use websocket::config::{Config, Kind};
use websocket::deflate::{Deflate, Inflate};
use websocket::error::{Error, ErrorEnum};
use websocket::extension::DeflateParams;
use websocket::frame::{self, FrameHeader, Opcode};
use websocket::utf8::Utf8Validator;
use websocket::Role;

/// Code and reason of a received close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// `None` when the peer sent a payload-less close frame
    pub code: Option<u16>,
    pub reason: String,
}

/// What `read_frame` yields for every data frame
///
/// The opcode is the message's one; continuation frames report the
/// opcode that started the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub opcode: Opcode,
    pub fin: bool,
}

struct Shared<S> {
    out: WriteBuf<S>,
    close_sent: bool,
    close_received: bool,
    close_reason: Option<CloseReason>,
}

impl<S: AsyncWrite> Shared<S> {
    fn flush(&mut self) -> Result<(), Error> {
        self.out.flush().map_err(ErrorEnum::Io)?;
        Ok(())
    }
}

/// A websocket connection over any byte stream
///
/// Produced by the client or server handshake (or `new` for a stream
/// that has already been upgraded elsewhere). All operations of one
/// connection must run on the same executor.
pub struct WebSocket<S> {
    sender: Sender<S>,
    receiver: Receiver<S>,
}

impl<S> ::std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.write_str("WebSocket { .. }")
    }
}

/// The sending half: message write engine and control frames
pub struct Sender<S> {
    shared: Arc<Mutex<Shared<S>>>,
    role: Role,
    kind: Kind,
    deflate: Option<Deflate>,
    config: Arc<Config>,
    /// a fragmented message started by `write_frame` is unfinished
    continued: bool,
}

/// The receiving half: message read engine and close coordination
pub struct Receiver<S> {
    input: ReadBuf<S>,
    shared: Arc<Mutex<Shared<S>>>,
    role: Role,
    config: Arc<Config>,
    inflate: Option<Inflate>,
    state: ReadState,
    /// opcode and compression flag of the message being assembled
    message: Option<(Opcode, bool)>,
    utf8: Utf8Validator,
    /// bytes delivered for the current message, after decompression
    message_len: usize,
    ping_handler: Option<Box<dyn FnMut(bool, &[u8]) + Send>>,
    scratch: Vec<u8>,
}

enum ReadState {
    /// Waiting for a complete frame header (or whole control frame)
    Header,
    /// Consuming the payload of a data frame
    Payload { header: FrameHeader, remaining: u64, offset: usize },
    Closed,
}

fn lock<S>(shared: &Arc<Mutex<Shared<S>>>) -> MutexGuard<Shared<S>> {
    shared.lock().expect("websocket write mutex poisoned")
}

impl<S> WebSocket<S> {
    /// Wrap a stream that has already completed the upgrade handshake
    pub fn new(stream: S, role: Role, config: &Arc<Config>,
        deflate: Option<DeflateParams>)
        -> WebSocket<S>
        where S: AsyncRead + AsyncWrite,
    {
        let (out, inp) = IoBuf::new(stream).split();
        WebSocket::from_parts(out, inp, role, config, deflate)
    }

    /// Assemble a connection from buffered stream halves
    ///
    /// This is what the handshake protocols call; `inp` may already
    /// contain bytes received past the handshake.
    pub fn from_parts(out: WriteBuf<S>, inp: ReadBuf<S>, role: Role,
        config: &Arc<Config>, deflate: Option<DeflateParams>)
        -> WebSocket<S>
    {
        let shared = Arc::new(Mutex::new(Shared {
            out: out,
            close_sent: false,
            close_received: false,
            close_reason: None,
        }));
        WebSocket {
            sender: Sender {
                shared: shared.clone(),
                role: role,
                kind: config.message_kind,
                deflate: deflate.as_ref().map(|p| {
                    Deflate::new(p, role, config.deflate.compression_level)
                }),
                config: config.clone(),
                continued: false,
            },
            receiver: Receiver {
                input: inp,
                shared: shared,
                role: role,
                config: config.clone(),
                inflate: deflate.as_ref().map(|p| Inflate::new(p, role)),
                state: ReadState::Header,
                message: None,
                utf8: Utf8Validator::new(),
                message_len: 0,
                ping_handler: None,
                scratch: Vec::new(),
            },
        }
    }

    /// Split into independently driven halves
    pub fn split(self) -> (Sender<S>, Receiver<S>) {
        (self.sender, self.receiver)
    }

    pub fn sender(&mut self) -> &mut Sender<S> {
        &mut self.sender
    }

    pub fn receiver(&mut self) -> &mut Receiver<S> {
        &mut self.receiver
    }

    /// Shortcut for `receiver().read_message(buf)`
    pub fn read_message(&mut self, buf: &mut Buf) -> Poll<Opcode, Error>
        where S: AsyncRead + AsyncWrite,
    {
        self.receiver.read_message(buf)
    }

    /// Shortcut for `sender().write(data)`
    pub fn write<'a>(&'a mut self, data: &'a [u8]) -> SendMessage<'a, S> {
        self.sender.write(data)
    }
}

enum Payload<'a> {
    Plain(&'a [u8]),
    Deflated(Vec<u8>),
}

impl<'a> Payload<'a> {
    fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Plain(data) => data,
            Payload::Deflated(ref data) => data,
        }
    }
}

impl<S> Sender<S> {
    /// Subsequent `write` calls produce text messages
    pub fn set_text(&mut self) {
        self.kind = Kind::Text;
    }

    /// Subsequent `write` calls produce binary messages
    pub fn set_binary(&mut self) {
        self.kind = Kind::Binary;
    }

    /// Write one whole message of the configured kind
    ///
    /// The message is fragmented to `write_buffer_size` frames when
    /// auto-fragmentation is on, and deflated when the connection
    /// negotiated permessage-deflate. At most one write may be in
    /// flight; drive the returned future to completion before starting
    /// the next one.
    ///
    /// # Panics
    ///
    /// Panics when a fragmented message started with `write_frame` has
    /// not been finished yet.
    pub fn write<'a>(&'a mut self, data: &'a [u8]) -> SendMessage<'a, S> {
        assert!(!self.continued,
            "write() while a fragmented message is unfinished");
        SendMessage {
            sender: self,
            payload: Payload::Plain(data),
            pos: 0,
            first: true,
            compressed: false,
            staged_all: false,
        }
    }

    /// Write a single frame of a fragmented message
    ///
    /// The first frame carries the configured message kind, later ones
    /// are continuations; `fin` finishes the message.
    pub fn write_frame<'a>(&'a mut self, fin: bool, data: &'a [u8])
        -> SendFrame<'a, S>
    {
        SendFrame {
            sender: self,
            payload: Payload::Plain(data),
            fin: fin,
            prepared: false,
            staged: false,
        }
    }
}

impl<S: AsyncWrite> Sender<S> {
    fn send_control(&mut self, opcode: Opcode, payload: &[u8])
        -> Result<(), Error>
    {
        assert!(payload.len() <= frame::MAX_CONTROL_PAYLOAD);
        let mut guard = lock(&self.shared);
        if guard.close_sent || guard.close_received {
            return Err(ErrorEnum::Closed.into());
        }
        frame::write_frame(&mut guard.out.out_buf, true, false, opcode,
            self.role.masks_output(), payload);
        guard.flush()
    }

    /// Send a ping frame
    ///
    /// The frame is staged as a whole and flushed as far as the stream
    /// allows; leftovers go out with the next flush from either half.
    ///
    /// # Panics
    ///
    /// Panics when the payload exceeds 125 bytes.
    pub fn send_ping(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send_control(Opcode::Ping, payload)
    }

    /// Send an unsolicited pong frame
    ///
    /// # Panics
    ///
    /// Panics when the payload exceeds 125 bytes.
    pub fn send_pong(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send_control(Opcode::Pong, payload)
    }

    /// Initiate the close handshake
    ///
    /// Later writes fail with the closed signal; the connection is done
    /// once the peer mirrors the close (the pending read completes with
    /// the closed signal).
    ///
    /// # Panics
    ///
    /// Panics when the reason exceeds 123 bytes.
    pub fn send_close(&mut self, code: u16, reason: &str)
        -> Result<(), Error>
    {
        if !frame::close_code_valid(code) {
            return Err(ErrorEnum::InvalidCloseCode(code).into());
        }
        let mut guard = lock(&self.shared);
        if guard.close_sent {
            return Err(ErrorEnum::Closed.into());
        }
        frame::write_close(&mut guard.out.out_buf,
            self.role.masks_output(), Some(code), reason);
        guard.close_sent = true;
        guard.flush()
    }

    /// Push buffered output bytes into the stream
    ///
    /// Resolves once the shared write buffer is empty.
    pub fn flush(&mut self) -> Poll<(), Error> {
        let mut guard = lock(&self.shared);
        guard.flush()?;
        if guard.out.out_buf.len() == 0 {
            Ok(Async::Ready(()))
        } else {
            Ok(Async::NotReady)
        }
    }
}

/// Future of one whole-message write, created by `Sender::write`
pub struct SendMessage<'a, S: 'a> {
    sender: &'a mut Sender<S>,
    payload: Payload<'a>,
    pos: usize,
    first: bool,
    compressed: bool,
    staged_all: bool,
}

impl<'a, S: AsyncWrite> Future for SendMessage<'a, S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        if self.first {
            // the whole message deflates up front, fragments are cut
            // from the compressed stream
            if let Some(ref mut deflate) = self.sender.deflate {
                if let Payload::Plain(data) = self.payload {
                    self.payload = Payload::Deflated(
                        deflate.compress(data, true)?);
                    self.compressed = true;
                }
            }
        }
        let mut guard = lock(&self.sender.shared);
        if guard.close_sent || guard.close_received {
            return Err(ErrorEnum::Closed.into());
        }
        loop {
            guard.flush()?;
            if self.staged_all {
                return if guard.out.out_buf.len() == 0 {
                    Ok(Async::Ready(()))
                } else {
                    Ok(Async::NotReady)
                };
            }
            if guard.out.out_buf.len() >=
                self.sender.config.write_buffer_size
            {
                // wait for the stream to drain before staging more
                return Ok(Async::NotReady);
            }
            let data = self.payload.bytes();
            let remaining = data.len() - self.pos;
            let step = if self.sender.config.auto_fragment {
                min(remaining, self.sender.config.write_buffer_size)
            } else {
                remaining
            };
            let fin = step == remaining;
            let opcode = if self.first {
                self.sender.kind.opcode()
            } else {
                Opcode::Continuation
            };
            frame::write_frame(&mut guard.out.out_buf, fin,
                self.compressed && self.first, opcode,
                self.sender.role.masks_output(),
                &data[self.pos..self.pos + step]);
            self.pos += step;
            self.first = false;
            if fin {
                self.staged_all = true;
            }
        }
    }
}

/// Future of one frame write, created by `Sender::write_frame`
pub struct SendFrame<'a, S: 'a> {
    sender: &'a mut Sender<S>,
    payload: Payload<'a>,
    fin: bool,
    prepared: bool,
    staged: bool,
}

impl<'a, S: AsyncWrite> Future for SendFrame<'a, S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        if !self.prepared {
            if let Some(ref mut deflate) = self.sender.deflate {
                if let Payload::Plain(data) = self.payload {
                    // frames of one message share the deflate stream,
                    // only the message end is flushed
                    self.payload = Payload::Deflated(
                        deflate.compress(data, self.fin)?);
                }
            }
            self.prepared = true;
        }
        let mut guard = lock(&self.sender.shared);
        if guard.close_sent || guard.close_received {
            return Err(ErrorEnum::Closed.into());
        }
        if !self.staged {
            let first = !self.sender.continued;
            let opcode = if first {
                self.sender.kind.opcode()
            } else {
                Opcode::Continuation
            };
            frame::write_frame(&mut guard.out.out_buf, self.fin,
                first && self.sender.deflate.is_some(), opcode,
                self.sender.role.masks_output(), self.payload.bytes());
            self.sender.continued = !self.fin;
            self.staged = true;
        }
        guard.flush()?;
        if guard.out.out_buf.len() == 0 {
            Ok(Async::Ready(()))
        } else {
            Ok(Async::NotReady)
        }
    }
}

impl<S> Receiver<S> {
    /// Install the ping/pong callback
    ///
    /// Invoked synchronously from the read path for every ping
    /// (`is_pong == false`) and pong (`is_pong == true`) frame.
    pub fn set_ping_handler<F>(&mut self, handler: F)
        where F: FnMut(bool, &[u8]) + Send + 'static,
    {
        self.ping_handler = Some(Box::new(handler));
    }

    /// The close reason recorded from the peer's close frame
    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.shared).close_reason.clone()
    }
}

impl<S: AsyncRead + AsyncWrite> Receiver<S> {
    /// Read one whole message into `buf`, yielding its opcode
    ///
    /// Control frames are handled transparently: pings are answered,
    /// the callback is invoked, a close frame finishes the close
    /// handshake and surfaces the closed signal.
    pub fn read_message(&mut self, buf: &mut Buf) -> Poll<Opcode, Error> {
        loop {
            match self.read_frame(buf)? {
                Async::Ready(info) => {
                    if info.fin {
                        return Ok(Async::Ready(info.opcode));
                    }
                }
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }

    /// Read one data frame into `buf`
    ///
    /// Yields once per frame; fragmented messages report their opcode
    /// on every frame and `fin` on the last one. Text payloads are
    /// utf-8 checked incrementally across the whole message.
    pub fn read_frame(&mut self, buf: &mut Buf) -> Poll<FrameInfo, Error> {
        loop {
            match self.state {
                ReadState::Closed => {
                    return Err(ErrorEnum::Closed.into());
                }
                ReadState::Header => {
                    match frame::parse_header(&self.input.in_buf[..])? {
                        Some((header, header_len)) => {
                            if self.accept_frame(header, header_len)? {
                                continue;
                            }
                            // control frame needs more payload bytes
                        }
                        None => {}
                    }
                }
                ReadState::Payload { .. } => {
                    if let Some(info) = self.frame_payload(buf)? {
                        return Ok(Async::Ready(info));
                    }
                }
            }
            match self.input.read().map_err(ErrorEnum::Io)? {
                0 => {
                    if self.input.done() {
                        let closing = {
                            let guard = lock(&self.shared);
                            guard.close_sent || guard.close_received
                        };
                        if closing {
                            self.state = ReadState::Closed;
                            return Err(ErrorEnum::Closed.into());
                        }
                        return Err(ErrorEnum::Io(
                            ::std::io::ErrorKind::UnexpectedEof.into())
                            .into());
                    }
                    return Ok(Async::NotReady);
                }
                _ => continue,
            }
        }
    }

    /// Validate a parsed header and move into the payload (or handle a
    /// whole control frame). `Ok(false)` means more bytes are needed.
    fn accept_frame(&mut self, header: FrameHeader, header_len: usize)
        -> Result<bool, Error>
    {
        match (self.role, header.mask) {
            (Role::Server, Some(_)) | (Role::Client, None) => {}
            _ => return Err(ErrorEnum::BadMask.into()),
        }
        if header.opcode.is_control() {
            let total = header_len + header.payload_len as usize;
            if self.input.in_buf.len() < total {
                return Ok(false);
            }
            let mut payload = [0u8; frame::MAX_CONTROL_PAYLOAD];
            let len = header.payload_len as usize;
            payload[..len].copy_from_slice(
                &self.input.in_buf[header_len..total]);
            if let Some(key) = header.mask {
                frame::apply_mask(key, 0, &mut payload[..len]);
            }
            self.input.in_buf.consume(total);
            self.handle_control(header.opcode, &payload[..len])?;
            return Ok(true);
        }
        if header.opcode == Opcode::Continuation {
            if self.message.is_none() {
                return Err(ErrorEnum::UnexpectedContinuation.into());
            }
            if header.rsv1 {
                // rsv1 is only valid on the first frame of a message
                return Err(ErrorEnum::ReservedBits.into());
            }
        } else {
            if self.message.is_some() {
                return Err(ErrorEnum::UnfinishedMessage.into());
            }
            if header.rsv1 && self.inflate.is_none() {
                return Err(ErrorEnum::ReservedBits.into());
            }
            self.message = Some((header.opcode, header.rsv1));
            self.message_len = 0;
            if header.opcode == Opcode::Text {
                self.utf8.reset();
            }
        }
        self.input.in_buf.consume(header_len);
        self.state = ReadState::Payload {
            header: header,
            remaining: header.payload_len,
            offset: 0,
        };
        Ok(true)
    }

    /// Consume available payload bytes of the current data frame.
    /// Returns the frame info once the frame is complete.
    fn frame_payload(&mut self, buf: &mut Buf)
        -> Result<Option<FrameInfo>, Error>
    {
        let (mask, fin) = match self.state {
            ReadState::Payload { ref header, .. } => {
                (header.mask, header.fin)
            }
            _ => unreachable!(),
        };
        let (opcode, compressed) =
            self.message.expect("data frame outside a message");
        let limit = self.config.read_message_max;
        let step = self.config.read_buffer_size;

        let (avail, remaining) = match self.state {
            ReadState::Payload { ref mut remaining, ref mut offset, .. }
            => {
                let avail = min(self.input.in_buf.len() as u64,
                                *remaining) as usize;
                if avail == 0 && *remaining > 0 {
                    // nothing buffered yet
                    return Ok(None);
                }
                if let Some(key) = mask {
                    frame::unmask_buf(key, *offset, &mut self.input.in_buf,
                        0, avail);
                }
                *offset += avail;
                *remaining -= avail as u64;
                (avail, *remaining)
            }
            _ => unreachable!(),
        };

        if compressed {
            self.scratch.clear();
            if limit < self.message_len {
                return Err(ErrorEnum::TooLong.into());
            }
            self.inflate.as_mut().expect("rsv1 implies negotiation")
                .decompress(&self.input.in_buf[..avail],
                    &mut self.scratch, limit - self.message_len, step)?;
            if opcode == Opcode::Text && !self.utf8.update(&self.scratch) {
                return Err(ErrorEnum::BadUtf8.into());
            }
            buf.extend(&self.scratch);
            self.message_len += self.scratch.len();
        } else {
            if self.message_len + avail > limit {
                return Err(ErrorEnum::TooLong.into());
            }
            if opcode == Opcode::Text &&
                !self.utf8.update(&self.input.in_buf[..avail])
            {
                return Err(ErrorEnum::BadUtf8.into());
            }
            buf.extend(&self.input.in_buf[..avail]);
            self.message_len += avail;
        }
        self.input.in_buf.consume(avail);

        if remaining > 0 {
            return Ok(None);
        }
        self.state = ReadState::Header;
        if fin {
            if compressed {
                self.scratch.clear();
                self.inflate.as_mut().expect("rsv1 implies negotiation")
                    .finish_message(&mut self.scratch,
                        limit - self.message_len, step)?;
                if opcode == Opcode::Text &&
                    !self.utf8.update(&self.scratch)
                {
                    return Err(ErrorEnum::BadUtf8.into());
                }
                buf.extend(&self.scratch);
                self.message_len += self.scratch.len();
            }
            if opcode == Opcode::Text && !self.utf8.finish() {
                return Err(ErrorEnum::BadUtf8.into());
            }
            self.message = None;
        }
        Ok(Some(FrameInfo { opcode: opcode, fin: fin }))
    }

    fn handle_control(&mut self, opcode: Opcode, payload: &[u8])
        -> Result<(), Error>
    {
        match opcode {
            Opcode::Ping => {
                trace!("Received ping {:?}", payload);
                if let Some(ref mut handler) = self.ping_handler {
                    handler(false, payload);
                }
                let mut guard = lock(&self.shared);
                if !guard.close_sent {
                    frame::write_frame(&mut guard.out.out_buf, true, false,
                        Opcode::Pong, self.role.masks_output(), payload);
                    guard.flush()?;
                }
                Ok(())
            }
            Opcode::Pong => {
                trace!("Received pong {:?}", payload);
                if let Some(ref mut handler) = self.ping_handler {
                    handler(true, payload);
                }
                Ok(())
            }
            Opcode::Close => {
                let (code, reason) = frame::parse_close(payload)?;
                debug!("Websocket closed by peer [{:?}] {:?}",
                    code, reason);
                let mut guard = lock(&self.shared);
                guard.close_reason = Some(CloseReason {
                    code: code,
                    reason: reason,
                });
                guard.close_received = true;
                if !guard.close_sent {
                    // mirror the close, echoing the code
                    frame::write_close(&mut guard.out.out_buf,
                        self.role.masks_output(), code, "");
                    guard.close_sent = true;
                    guard.flush()?;
                }
                drop(guard);
                self.state = ReadState::Closed;
                Err(ErrorEnum::Closed.into())
            }
            _ => unreachable!("control opcode"),
        }
    }
}
