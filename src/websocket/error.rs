use std::fmt;
use std::io;

use httparse;

/// Websocket Error works both for client and server connections
pub struct Error(ErrorEnum);

quick_error! {
    /// Websocket error
    #[derive(Debug)]
    pub enum ErrorEnum {
        /// Socket IO error
        Io(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
        }
        /// Text message payload is not valid utf-8
        BadUtf8 {
            description("text message payload is not valid utf-8")
        }
        /// Got websocket frame with invalid opcode
        InvalidOpcode(code: u8) {
            description("opcode of the frame is invalid")
            display("opcode of the frame is invalid: {}", code)
        }
        /// Reserved frame bits set without a matching extension
        ReservedBits {
            description("reserved frame bits set without an extension")
        }
        /// Frame masking does not match the connection role
        BadMask {
            description("frame masking does not match the connection role")
        }
        /// Control frame with the fin bit clear
        FragmentedControl {
            description("received fragmented control frame")
        }
        /// Control frame with a payload longer than 125 bytes
        OversizedControl {
            description("received control frame with oversized payload")
        }
        /// Extended payload length that fits a shorter encoding
        NonMinimalLength {
            description("frame length is not minimally encoded")
        }
        /// 8-byte payload length with the high bit set
        InvalidLength {
            description("frame length is out of range")
        }
        /// Continuation frame without a message in progress
        UnexpectedContinuation {
            description("continuation frame without a fragmented message")
        }
        /// New data frame while another message is unfinished
        UnfinishedMessage {
            description("data frame interleaved into a fragmented message")
        }
        /// Received frame or message longer than the configured limit
        TooLong {
            description("received message that is too long")
        }
        /// Close frame with a one-byte or otherwise malformed payload
        BadCloseFrame {
            description("malformed close frame payload")
        }
        /// Close code that must not appear on the wire
        InvalidCloseCode(code: u16) {
            description("close code is invalid on the wire")
            display("close code is invalid on the wire: {}", code)
        }
        /// The close handshake is complete (or underway); not a failure
        Closed {
            description("connection closed by websocket handshake")
        }
        /// Error parsing http headers of the handshake
        HeaderError(err: httparse::Error) {
            description("parse error")
            display("parse error: {:?}", err)
            from()
        }
        /// Peer closed the transport in the middle of the handshake
        PrematureEof {
            description("connection closed before handshake finished")
        }
        /// The peer's handshake does not establish a websocket
        Handshake(reason: &'static str) {
            description("handshake failed")
            display("handshake failed: {}", reason)
        }
        /// Handshake response status is not 101
        BadStatus(code: u16) {
            description("unexpected handshake response status")
            display("unexpected handshake response status: {}", code)
        }
        /// The peer negotiated an extension outside the offer
        ExtensionViolation {
            description("peer violated extension negotiation rules")
        }
        /// The compression engine failed on a message
        Compression(msg: String) {
            description("compression engine error")
            display("compression engine error: {}", msg)
        }
        Custom(err: Box<::std::error::Error + Send + Sync>) {
            description("custom error")
            display("custom error: {}", err)
            cause(&**err)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl From<ErrorEnum> for Error {
    fn from(err: ErrorEnum) -> Self {
        Error(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error(ErrorEnum::Io(err))
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        Error(ErrorEnum::HeaderError(err))
    }
}

impl ::std::error::Error for Error {
    fn description(&self) -> &str {
        self.0.description()
    }
    fn cause(&self) -> Option<&::std::error::Error> {
        self.0.cause()
    }
}

impl Error {
    /// Create an error instance wrapping custom error
    pub fn custom<E: Into<Box<::std::error::Error + Send + Sync>>>(err: E)
        -> Error
    {
        Error(ErrorEnum::Custom(err.into()))
    }

    /// True when the error is the orderly-closure signal
    ///
    /// Reads and writes fail with this after the close handshake; it is
    /// the equivalent of end-of-stream, not a protocol failure.
    pub fn is_closed(&self) -> bool {
        matches!(self.0, ErrorEnum::Closed)
    }
}

#[test]
fn send_sync() {
    fn send_sync<T: Send+Sync>(_: T) {}
    send_sync(Error::from(ErrorEnum::TooLong));
}
