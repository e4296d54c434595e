use std::fmt;
use std::str::from_utf8_unchecked;

use rand::{thread_rng, Rng};
use sha1::Sha1;

/// WebSocket GUID constant (provided by spec)
pub const GUID: &'static str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const BASE64_CHARS: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                                      abcdefghijklmnopqrstuvwxyz\
                                      0123456789+/";

/// The `Sec-WebSocket-Key` header value: a fresh 16-byte nonce
///
/// You can add it using `head.format_field("Sec-WebSocket-Key", &key)`.
/// Or use any other thing that supports `Display`.
pub struct Key([u8; 16]);

/// The `Sec-WebSocket-Accept` header value
///
/// You can add it using `head.format_field("Sec-WebSocket-Accept", &accept)`.
/// Or use any other thing that supports `Display`.
pub struct Accept([u8; 20]);

impl Key {
    /// Create a new (random) key, eligible to use for client connection
    pub fn new() -> Key {
        let mut key = [0u8; 16];
        thread_rng().fill_bytes(&mut key);
        return Key(key);
    }
}

impl Accept {
    /// Create an Accept header value from a key received in header
    ///
    /// Note: key here is a key as passed in header value (base64-encoded)
    /// despite that it's accepted as bytes (not as 16 bytes stored in Key)
    ///
    /// Note 2: this does not validate a key (which is not required by spec)
    pub fn from_key_bytes(key: &[u8]) -> Accept {
        let mut sha1 = Sha1::new();
        sha1.update(key);
        sha1.update(GUID.as_bytes());
        Accept(sha1.digest().bytes())
    }

    /// Check a received `Sec-WebSocket-Accept` value against the sent key
    pub fn matches(&self, value: &[u8]) -> bool {
        let mut buf = [0u8; 28];
        let n = base64(&self.0, &mut buf);
        &buf[..n] == value
    }
}

// base64 with padding; out must hold 4 * ceil(data.len() / 3) bytes
fn base64(data: &[u8], out: &mut [u8]) -> usize {
    let mut o = 0;
    for group in data.chunks(3) {
        let n = ((group[0] as usize) << 16)
            | ((*group.get(1).unwrap_or(&0) as usize) << 8)
            | (*group.get(2).unwrap_or(&0) as usize);
        out[o] = BASE64_CHARS[(n >> 18) & 63];
        out[o+1] = BASE64_CHARS[(n >> 12) & 63];
        out[o+2] = if group.len() > 1 { BASE64_CHARS[(n >> 6) & 63] }
                   else { b'=' };
        out[o+3] = if group.len() > 2 { BASE64_CHARS[n & 63] }
                   else { b'=' };
        o += 4;
    }
    o
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut buf = [0u8; 24];
        let n = base64(&self.0, &mut buf);
        fmt::Write::write_str(f, unsafe {
            from_utf8_unchecked(&buf[..n])
        })
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "websocket::Key({})", self)
    }
}

impl fmt::Display for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut buf = [0u8; 28];
        let n = base64(&self.0, &mut buf);
        fmt::Write::write_str(f, unsafe {
            from_utf8_unchecked(&buf[..n])
        })
    }
}

impl fmt::Debug for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "websocket::Accept({})", self)
    }
}

#[cfg(test)]
mod test {
    use super::{Accept, Key};

    #[test]
    fn accept_rfc_vector() {
        // the sample from RFC 6455 section 1.3
        let accept = Accept::from_key_bytes(b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(format!("{}", accept), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(accept.matches(b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(!accept.matches(b"bogus"));
    }

    #[test]
    fn key_is_base64_of_16_bytes() {
        let key = format!("{}", Key::new());
        assert_eq!(key.len(), 24);
        assert!(key.ends_with("=="));
    }

    #[test]
    fn keys_are_random() {
        assert_ne!(format!("{}", Key::new()), format!("{}", Key::new()));
    }
}
