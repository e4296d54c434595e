//! Client side of the websocket handshake

use std::sync::Arc;

use futures::{Async, Future, Poll};
use httparse::{self, Header};
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_io::{AsyncRead, AsyncWrite};
use url::Url;

use body::Empty;
use enums::{Method, Status, Version};
use headers;
use message::{Head, Message};
use prepare::{prepare, PrepareOption};
use serializer::MessageWriter;
use websocket::config::Config;
use websocket::connection::WebSocket;
use websocket::error::{Error, ErrorEnum};
use websocket::extension::{self, DeflateParams};
use websocket::keys::{Accept, Key};
use websocket::Role;

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Authorizer decorates the upgrade request and checks response headers
///
/// The `SimpleAuthorizer` implementation is good enough for most cases,
/// but a custom authorizer may be helpful for `Cookie` or
/// `Authorization` headers.
pub trait Authorizer {
    /// The type that may be returned from `headers_received`. It should
    /// encompass everything parsed from the response headers.
    type Result: Sized;

    /// Add extra request fields
    ///
    /// The request line, `Host`, and the websocket-specific fields
    /// (`Connection`, `Upgrade`, `Sec-WebSocket-*`) are written by the
    /// engine; setting any of those here is a panic.
    fn decorate(&mut self, head: &mut Head);

    /// A handler of response headers
    ///
    /// Called after the engine validated the 101 response, so
    /// implementations only look for application data (cookies,
    /// subprotocol) here.
    fn headers_received(&mut self, head: &ResponseHead)
        -> Result<Self::Result, Error>;
}

/// A borrowed structure that represents response headers
///
/// It's passed to `Authorizer::headers_received` and you are free to
/// store or discard any needed fields and headers from it.
#[derive(Debug)]
pub struct ResponseHead<'a> {
    code: u16,
    reason: &'a str,
    headers: &'a [Header<'a>],
}

impl<'a> ResponseHead<'a> {
    /// Returns status if it is one of the supported statuses
    pub fn status(&self) -> Option<Status> {
        Status::from_code(self.code)
    }

    /// Returns raw status code and reason as received
    pub fn raw_status(&self) -> (u16, &'a str) {
        (self.code, self.reason)
    }

    /// All headers of the response
    pub fn all_headers(&self) -> &'a [Header<'a>] {
        self.headers
    }
}

/// Derive the `(host, target)` handshake parameters from a url
pub fn url_parts(url: &Url) -> Result<(String, String), Error> {
    let host = url.host_str()
        .ok_or(Error::from(ErrorEnum::Handshake("url has no host")))?;
    let host = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    Ok((host, target))
}

/// An authorizer that sends a user-agent and accepts any valid response
pub struct SimpleAuthorizer {
    origin: Option<String>,
}

impl SimpleAuthorizer {
    pub fn new() -> SimpleAuthorizer {
        SimpleAuthorizer { origin: None }
    }
    /// Also send an `Origin` header
    pub fn with_origin<O: Into<String>>(origin: O) -> SimpleAuthorizer {
        SimpleAuthorizer { origin: Some(origin.into()) }
    }
}

impl Authorizer for SimpleAuthorizer {
    type Result = ();
    fn decorate(&mut self, head: &mut Head) {
        if let Some(ref origin) = self.origin {
            head.add_field("Origin", origin).unwrap();
        }
        head.add_field("User-Agent",
            concat!("tk-wire/", env!("CARGO_PKG_VERSION"))).unwrap();
    }
    fn headers_received(&mut self, _head: &ResponseHead)
        -> Result<(), Error>
    {
        Ok(())
    }
}

fn check_reserved(head: &Head) {
    for name in &["Host", "Connection", "Upgrade", "Sec-WebSocket-Key",
                  "Sec-WebSocket-Version", "Sec-WebSocket-Extensions"]
    {
        if head.has_field(name) {
            panic!("{} is written by the handshake itself", name);
        }
    }
}

/// Future that performs the client handshake
///
/// Writes the upgrade request, validates the response per RFC 6455 and
/// resolves into the connection plus whatever the authorizer extracted
/// from the response headers.
pub struct HandshakeProto<S, A> {
    input: Option<ReadBuf<S>>,
    output: Option<WriteBuf<S>>,
    authorizer: A,
    key: Key,
    config: Arc<Config>,
}

impl<S, A> HandshakeProto<S, A>
    where S: AsyncRead + AsyncWrite,
          A: Authorizer,
{
    pub fn new(transport: S, host: &str, target: &str, mut authorizer: A,
        config: &Arc<Config>)
        -> HandshakeProto<S, A>
    {
        let key = Key::new();
        let mut head = Head::request(Method::Get, target, Version::Http11);
        authorizer.decorate(&mut head);
        check_reserved(&head);
        head.add_field("Host", host).unwrap();
        head.add_field("Upgrade", "websocket").unwrap();
        head.format_field("Sec-WebSocket-Key", &key).unwrap();
        head.add_field("Sec-WebSocket-Version", "13").unwrap();
        if config.deflate.client_enable {
            head.add_field("Sec-WebSocket-Extensions",
                extension::format_offer(&config.deflate)).unwrap();
        }
        let mut msg = Message::new(head, Empty);
        prepare(&mut msg, &[PrepareOption::Upgrade])
            .expect("fresh handshake request");

        let (mut tx, rx) = IoBuf::new(transport).split();
        {
            let mut writer = MessageWriter::new(&msg)
                .expect("handshake request is serializable");
            while !writer.done() {
                writer.write_some(&mut tx.out_buf)
                    .expect("buffer accepts the whole request");
            }
        }
        HandshakeProto {
            input: Some(rx),
            output: Some(tx),
            authorizer: authorizer,
            key: key,
            config: config.clone(),
        }
    }

    fn parse_headers(&mut self)
        -> Result<Option<(A::Result, Option<DeflateParams>)>, Error>
    {
        let expected = Accept::from_key_bytes(
            format!("{}", self.key).as_bytes());
        let deflate_cfg = self.config.deflate.clone();
        let ref mut buf = self.input.as_mut()
            .expect("buffer still exists")
            .in_buf;
        let (res, bytes) = {
            let mut vec;
            let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
            let (code, reason, headers, bytes) = {
                let mut raw = httparse::Response::new(&mut headers);
                let mut result = raw.parse(&buf[..]);
                if matches!(result, Err(httparse::Error::TooManyHeaders)) {
                    vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
                    raw = httparse::Response::new(&mut vec);
                    result = raw.parse(&buf[..]);
                }
                match result? {
                    httparse::Status::Complete(bytes) => {
                        if raw.version.unwrap() != 1 {
                            return Err(ErrorEnum::Handshake(
                                "response is not HTTP/1.1").into());
                        }
                        (raw.code.unwrap(), raw.reason.unwrap(),
                         raw.headers, bytes)
                    }
                    _ => return Ok(None),
                }
            };
            if code != 101 {
                return Err(ErrorEnum::BadStatus(code).into());
            }
            let mut upgrade = false;
            let mut connection = false;
            let mut accept = false;
            let mut extensions = None;
            for h in headers.iter() {
                if h.name.eq_ignore_ascii_case("Upgrade") {
                    if headers::contains_token(h.value, "websocket") {
                        upgrade = true;
                    }
                } else if h.name.eq_ignore_ascii_case("Connection") {
                    if headers::contains_token(h.value, "upgrade") {
                        connection = true;
                    }
                } else if h.name.eq_ignore_ascii_case(
                    "Sec-WebSocket-Accept")
                {
                    if expected.matches(headers::trim(h.value)) {
                        accept = true;
                    }
                } else if h.name.eq_ignore_ascii_case(
                    "Sec-WebSocket-Extensions")
                {
                    if extensions.is_some() {
                        return Err(ErrorEnum::ExtensionViolation.into());
                    }
                    if !deflate_cfg.client_enable {
                        return Err(ErrorEnum::ExtensionViolation.into());
                    }
                    extensions = Some(extension::parse_response(
                        h.value, &deflate_cfg)?);
                }
            }
            if !upgrade {
                return Err(ErrorEnum::Handshake(
                    "no Upgrade: websocket in response").into());
            }
            if !connection {
                return Err(ErrorEnum::Handshake(
                    "no Connection: upgrade in response").into());
            }
            if !accept {
                return Err(ErrorEnum::Handshake(
                    "Sec-WebSocket-Accept mismatch").into());
            }
            let head = ResponseHead {
                code: code,
                reason: reason,
                headers: headers,
            };
            let data = self.authorizer.headers_received(&head)?;
            ((data, extensions), bytes)
        };
        buf.consume(bytes);
        Ok(Some(res))
    }
}

impl<S, A> Future for HandshakeProto<S, A>
    where S: AsyncRead + AsyncWrite,
          A: Authorizer,
{
    type Item = (WebSocket<S>, A::Result);
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Error> {
        self.output.as_mut().expect("poll after complete")
            .flush().map_err(ErrorEnum::Io)?;
        self.input.as_mut().expect("poll after complete")
            .read().map_err(ErrorEnum::Io)?;
        if self.input.as_mut().expect("poll after complete").done() {
            return Err(ErrorEnum::PrematureEof.into());
        }
        match self.parse_headers()? {
            Some((data, params)) => {
                let inp = self.input.take().expect("input still here");
                let out = self.output.take().expect("output still here");
                let ws = WebSocket::from_parts(
                    out, inp, Role::Client, &self.config, params);
                Ok(Async::Ready((ws, data)))
            }
            None => Ok(Async::NotReady),
        }
    }
}
