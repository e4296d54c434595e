//! Server side of the websocket handshake

use std::str::from_utf8;
use std::sync::Arc;

use futures::{Async, Future, Poll};
use httparse;
use netbuf::Buf;
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_io::{AsyncRead, AsyncWrite};

use body::Empty;
use enums::{Status, Version};
use headers;
use message::{Head, Message};
use prepare::{prepare, PrepareOption};
use serializer::{MessageWriter, WriteError};
use websocket::config::Config;
use websocket::connection::WebSocket;
use websocket::error::{Error, ErrorEnum};
use websocket::extension::{self, DeflateParams};
use websocket::keys::Accept;
use websocket::Role;

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Everything extracted from a valid upgrade request
pub struct Handshake {
    /// The derived `Sec-WebSocket-Accept` value
    pub accept: Accept,
    /// List of `Sec-WebSocket-Protocol` tokens
    pub protocols: Vec<String>,
    /// Negotiated compression, when offered and enabled
    pub deflate: Option<DeflateParams>,
}

/// Validate an upgrade request against RFC 6455 and the config
///
/// On failure returns the reason used for the 400 response.
pub fn validate(req: &httparse::Request, config: &Config)
    -> Result<Handshake, &'static str>
{
    if req.method != Some("GET") {
        return Err("websocket handshake must be a GET request");
    }
    if req.version != Some(1) {
        return Err("websocket handshake requires HTTP/1.1");
    }
    let mut host = false;
    let mut upgrade = false;
    let mut connection = false;
    let mut version = false;
    let mut accept = None;
    let mut protocols = Vec::new();
    let mut deflate = None;
    for h in req.headers.iter() {
        if h.name.eq_ignore_ascii_case("Host") {
            host = true;
        } else if h.name.eq_ignore_ascii_case("Upgrade") {
            if headers::contains_token(h.value, "websocket") {
                upgrade = true;
            }
        } else if h.name.eq_ignore_ascii_case("Connection") {
            if headers::contains_token(h.value, "upgrade") {
                connection = true;
            }
        } else if h.name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            if accept.is_some() {
                debug!("Duplicate Sec-WebSocket-Key");
                return Err("duplicate websocket key");
            }
            accept = Some(Accept::from_key_bytes(headers::trim(h.value)));
        } else if h.name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
            // Only version 13 is supported
            if headers::trim(h.value) != b"13" {
                debug!("Bad websocket version {:?}",
                    String::from_utf8_lossy(h.value));
                return Err("unsupported websocket version");
            }
            version = true;
        } else if h.name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
            if let Ok(tokens) = from_utf8(h.value) {
                protocols.extend(tokens.split(',')
                    .map(|x| x.trim())
                    .filter(|x| x.len() > 0)
                    .map(|x| x.to_string()));
            }
        } else if h.name.eq_ignore_ascii_case("Sec-WebSocket-Extensions") {
            if deflate.is_none() {
                deflate = extension::negotiate_offer(
                    h.value, &config.deflate);
            }
        }
    }
    if !host {
        return Err("no host header");
    }
    if !upgrade {
        return Err("no websocket upgrade token");
    }
    if !connection {
        return Err("no connection upgrade token");
    }
    if !version {
        return Err("missing websocket version");
    }
    let accept = match accept {
        Some(a) => a,
        None => return Err("missing websocket key"),
    };
    Ok(Handshake {
        accept: accept,
        protocols: protocols,
        deflate: deflate,
    })
}

fn check_reserved(head: &Head) {
    for name in &["Connection", "Upgrade", "Sec-WebSocket-Accept",
                  "Sec-WebSocket-Extensions"]
    {
        if head.has_field(name) {
            panic!("{} is written by the handshake itself", name);
        }
    }
}

// the response goes through the crate's own prepare + write engine
fn stage_response(out: &mut Buf, msg: &Message<Empty>) {
    let mut writer = MessageWriter::new(msg)
        .expect("handshake response is serializable");
    while !writer.done() {
        match writer.write_some(out) {
            Ok(_) => {}
            // the 400 response carries Connection: close
            Err(WriteError::Closed) => {}
            Err(e) => panic!("staging handshake response: {}", e),
        }
    }
}

enum AcceptState {
    ReadRequest,
    Respond {
        deflate: Option<DeflateParams>,
        rejection: Option<&'static str>,
    },
}

/// Future that accepts one websocket connection on a raw stream
///
/// Parses the upgrade request, replies 101 (or 400 with a reason on any
/// validation failure) and resolves into the connection. The decorator
/// may add response fields the engine does not reserve, e.g.
/// `Sec-WebSocket-Protocol`.
pub struct AcceptProto<S, D> {
    input: Option<ReadBuf<S>>,
    output: Option<WriteBuf<S>>,
    decorator: D,
    config: Arc<Config>,
    state: AcceptState,
}

impl<S, D> AcceptProto<S, D>
    where S: AsyncRead + AsyncWrite,
          D: FnMut(&mut Head),
{
    pub fn new(transport: S, decorator: D, config: &Arc<Config>)
        -> AcceptProto<S, D>
    {
        AcceptProto::with_buffered(transport, b"", decorator, config)
    }

    /// Same as `new` for a transport some bytes were already read from
    ///
    /// The seed bytes are parsed before anything from the stream.
    pub fn with_buffered(transport: S, seed: &[u8], decorator: D,
        config: &Arc<Config>)
        -> AcceptProto<S, D>
    {
        let (tx, mut rx) = IoBuf::new(transport).split();
        rx.in_buf.extend(seed);
        AcceptProto {
            input: Some(rx),
            output: Some(tx),
            decorator: decorator,
            config: config.clone(),
            state: AcceptState::ReadRequest,
        }
    }

    /// Parse and answer the request; `false` means more bytes are needed
    fn process_request(&mut self) -> Result<bool, Error> {
        let config = self.config.clone();
        let (outcome, bytes) = {
            let ref buf = self.input.as_mut()
                .expect("buffer still exists")
                .in_buf;
            let mut vec;
            let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
            let mut raw = httparse::Request::new(&mut headers);
            let mut result = raw.parse(&buf[..]);
            if matches!(result, Err(httparse::Error::TooManyHeaders)) {
                vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
                raw = httparse::Request::new(&mut vec);
                result = raw.parse(&buf[..]);
            }
            match result? {
                httparse::Status::Complete(bytes) => {
                    (validate(&raw, &config), bytes)
                }
                _ => return Ok(false),
            }
        };
        self.input.as_mut().expect("buffer still exists")
            .in_buf.consume(bytes);

        let out = &mut self.output.as_mut()
            .expect("buffer still exists").out_buf;
        match outcome {
            Ok(handshake) => {
                let mut head = Head::response(
                    Status::SwitchingProtocols, Version::Http11);
                (self.decorator)(&mut head);
                check_reserved(&head);
                head.add_field("Upgrade", "websocket").unwrap();
                head.format_field("Sec-WebSocket-Accept",
                    &handshake.accept).unwrap();
                if let Some(ref params) = handshake.deflate {
                    head.add_field("Sec-WebSocket-Extensions",
                        extension::format_accept(params)).unwrap();
                }
                let mut msg = Message::new(head, Empty);
                prepare(&mut msg, &[PrepareOption::Upgrade])
                    .expect("fresh upgrade response");
                stage_response(out, &msg);
                self.state = AcceptState::Respond {
                    deflate: handshake.deflate,
                    rejection: None,
                };
            }
            Err(reason) => {
                debug!("Rejecting websocket handshake: {}", reason);
                let mut head = Head::response_custom(
                    400, reason, Version::Http11);
                (self.decorator)(&mut head);
                check_reserved(&head);
                let mut msg = Message::new(head, Empty);
                prepare(&mut msg, &[PrepareOption::Close])
                    .expect("fresh rejection response");
                stage_response(out, &msg);
                self.state = AcceptState::Respond {
                    deflate: None,
                    rejection: Some(reason),
                };
            }
        }
        Ok(true)
    }
}

impl<S, D> Future for AcceptProto<S, D>
    where S: AsyncRead + AsyncWrite,
          D: FnMut(&mut Head),
{
    type Item = WebSocket<S>;
    type Error = Error;

    fn poll(&mut self) -> Poll<WebSocket<S>, Error> {
        if let AcceptState::ReadRequest = self.state {
            self.input.as_mut().expect("poll after complete")
                .read().map_err(ErrorEnum::Io)?;
            if !self.process_request()? {
                if self.input.as_mut().expect("poll after complete")
                    .done()
                {
                    return Err(ErrorEnum::PrematureEof.into());
                }
                return Ok(Async::NotReady);
            }
        }
        let (deflate, rejection) = match self.state {
            AcceptState::Respond { ref deflate, ref rejection } => {
                (deflate.clone(), rejection.clone())
            }
            AcceptState::ReadRequest => unreachable!(),
        };
        self.output.as_mut().expect("poll after complete")
            .flush().map_err(ErrorEnum::Io)?;
        if self.output.as_mut().expect("poll after complete")
            .out_buf.len() > 0
        {
            return Ok(Async::NotReady);
        }
        if let Some(reason) = rejection {
            return Err(ErrorEnum::Handshake(reason).into());
        }
        let inp = self.input.take().expect("input still here");
        let out = self.output.take().expect("output still here");
        Ok(Async::Ready(WebSocket::from_parts(
            out, inp, Role::Server, &self.config, deflate)))
    }
}
