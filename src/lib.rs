//! Byte-level HTTP/1 and websocket protocol engines for `tokio` tools
//!
//! This crate contains two protocol state machines that work over any
//! byte stream:
//!
//! * An incremental HTTP/1 message serializer: a message model, header
//!   normalization ([`prepare`](fn.prepare.html)) and a write engine
//!   ([`MessageWriter`](struct.MessageWriter.html)) that pushes a message
//!   into a stream one bounded step at a time.
//! * A websocket implementation in the [`websocket`](websocket/index.html)
//!   module: RFC 6455 framing, client and server handshakes,
//!   permessage-deflate, and read/write engines that may run concurrently
//!   on the two halves of a connection.
//!
//! Parsing of general HTTP messages, TLS, and connection management are
//! left to other crates.
#![recursion_limit="100"]

extern crate byteorder;
extern crate flate2;
extern crate futures;
extern crate httparse;
extern crate netbuf;
extern crate rand;
extern crate sha1;
extern crate tk_bufstream;
extern crate tokio_io;
extern crate url;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod websocket;
mod body;
mod enums;
mod headers;
mod message;
mod prepare;
mod serializer;

pub use body::{Batch, Body, BodyWriter};
pub use body::{BufferedBody, Empty, FileBody, StringBody};
pub use enums::{Method, Status, Version};
pub use message::{FieldIter, Head, HeaderError, Message};
pub use prepare::{prepare, PrepareError, PrepareOption};
pub use serializer::{write_message, MessageWriter, WriteError, WriteMessage};
