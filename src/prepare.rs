//! Header normalization before serialization
//!
//! `prepare` decides the body framing (`Content-Length` or
//! `Transfer-Encoding: chunked`) and owns the `Connection` header. It
//! must run once per message, before the write engine is constructed.

use body::Body;
use enums::{Method, Version};
use message::Message;

/// Connection behavior requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOption {
    /// Emit `Connection: keep-alive` (HTTP/1.0 with a known length only)
    KeepAlive,
    /// Emit `Connection: close` (HTTP/1.1 only; 1.0 closes by default)
    Close,
    /// Emit `Connection: upgrade` and skip body framing
    Upgrade,
}

quick_error! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum PrepareError {
        /// The `Connection` header is owned by prepare
        ConnectionIsSet {
            description("Connection must be set through prepare options")
        }
        ContentLengthIsSet {
            description("Content-Length is already present")
        }
        TransferEncodingIsSet {
            description("Transfer-Encoding already selects chunked")
        }
        UpgradeVersion {
            description("Connection: upgrade requires HTTP/1.1")
        }
    }
}

/// Normalize the headers of a message before sending
///
/// The rules, in order:
///
/// 1. The message must not carry `Connection`, `Content-Length`, or a
///    chunked `Transfer-Encoding` already.
/// 2. Unless upgrading: a known body length is emitted as
///    `Content-Length` (requests: when the length is non-zero or the
///    method is POST; responses: unless the status is 1xx, 204 or 304);
///    an unknown length selects chunked encoding on HTTP/1.1 and
///    close-delimited framing on HTTP/1.0.
/// 3. `Connection` is emitted per the options whose preconditions hold.
pub fn prepare<B: Body>(msg: &mut Message<B>, options: &[PrepareOption])
    -> Result<(), PrepareError>
{
    use self::PrepareOption::*;

    let content_length = msg.body.content_length();
    let head = &mut msg.head;
    if head.has_field("Connection") {
        return Err(PrepareError::ConnectionIsSet);
    }
    if head.has_field("Content-Length") {
        return Err(PrepareError::ContentLengthIsSet);
    }
    if head.field_contains_token("Transfer-Encoding", "chunked") {
        return Err(PrepareError::TransferEncodingIsSet);
    }
    let upgrade = options.contains(&Upgrade);
    if upgrade && head.version() == Version::Http10 {
        return Err(PrepareError::UpgradeVersion);
    }

    let mut length_known = false;
    if !upgrade {
        if let Some(len) = content_length {
            let emit = if head.is_request() {
                len > 0 || head.method() == Some(&Method::Post)
            } else {
                let code = head.code().unwrap_or(200);
                !(code >= 100 && code < 200) && code != 204 && code != 304
            };
            if emit {
                head.format_field("Content-Length", len).unwrap();
            }
            length_known = true;
        } else if head.version() == Version::Http11 {
            head.add_field("Transfer-Encoding", "chunked").unwrap();
        }
        // HTTP/1.0 without a length: the write engine delimits the body
        // by closing the connection
    }

    for opt in options {
        match *opt {
            Upgrade => {
                head.add_field("Connection", "upgrade").unwrap();
                break;
            }
            KeepAlive => {
                if head.version() == Version::Http10 && length_known {
                    head.add_field("Connection", "keep-alive").unwrap();
                    break;
                }
            }
            Close => {
                if head.version() == Version::Http11 {
                    head.add_field("Connection", "close").unwrap();
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use body::{BufferedBody, Empty, StringBody};
    use enums::{Method, Status, Version};
    use message::{Head, Message};
    use super::{prepare, PrepareError, PrepareOption};

    #[test]
    fn request_auto_length() {
        let mut msg = Message::new(
            Head::request(Method::Get, "/", Version::Http10),
            StringBody::new("*"));
        prepare(&mut msg, &[]).unwrap();
        assert_eq!(msg.head.field("Content-Length"), Some(&b"1"[..]));
        assert!(!msg.head.has_field("Connection"));
    }

    #[test]
    fn get_with_empty_body_has_no_length() {
        let mut msg = Message::new(
            Head::request(Method::Get, "/", Version::Http11), Empty);
        prepare(&mut msg, &[]).unwrap();
        assert!(!msg.head.has_field("Content-Length"));
        assert!(!msg.head.has_field("Transfer-Encoding"));
    }

    #[test]
    fn post_with_empty_body_has_length() {
        let mut msg = Message::new(
            Head::request(Method::Post, "/submit", Version::Http11), Empty);
        prepare(&mut msg, &[]).unwrap();
        assert_eq!(msg.head.field("Content-Length"), Some(&b"0"[..]));
    }

    #[test]
    fn unknown_length_selects_chunked_on_11() {
        let mut body = BufferedBody::new();
        body.push("*");
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http11),
            body.without_length());
        prepare(&mut msg, &[]).unwrap();
        assert_eq!(msg.head.field("Transfer-Encoding"), Some(&b"chunked"[..]));
        assert!(!msg.head.has_field("Content-Length"));
    }

    #[test]
    fn unknown_length_on_10_emits_nothing() {
        let mut body = BufferedBody::new();
        body.push("*");
        let mut msg = Message::new(
            Head::request(Method::Get, "/", Version::Http10),
            body.without_length());
        prepare(&mut msg, &[]).unwrap();
        assert!(!msg.head.has_field("Transfer-Encoding"));
        assert!(!msg.head.has_field("Content-Length"));
    }

    #[test]
    fn bodyless_statuses_suppress_length() {
        for status in [Status::Continue, Status::NoContent,
                       Status::NotModified].iter()
        {
            let mut msg = Message::new(
                Head::response(*status, Version::Http11), Empty);
            prepare(&mut msg, &[]).unwrap();
            assert!(!msg.head.has_field("Content-Length"),
                "status {}", status.code());
        }
    }

    #[test]
    fn prepare_twice_fails() {
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http11),
            StringBody::new("hello"));
        prepare(&mut msg, &[]).unwrap();
        assert_eq!(prepare(&mut msg, &[]),
                   Err(PrepareError::ContentLengthIsSet));
    }

    #[test]
    fn preset_connection_fails() {
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http11), Empty);
        msg.head.add_field("Connection", "close").unwrap();
        assert_eq!(prepare(&mut msg, &[]),
                   Err(PrepareError::ConnectionIsSet));
    }

    #[test]
    fn preset_chunked_fails() {
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http11), Empty);
        msg.head.add_field("Transfer-Encoding", "chunked").unwrap();
        assert_eq!(prepare(&mut msg, &[]),
                   Err(PrepareError::TransferEncodingIsSet));
    }

    #[test]
    fn upgrade_requires_11() {
        let mut msg = Message::new(
            Head::request(Method::Get, "/", Version::Http10), Empty);
        assert_eq!(prepare(&mut msg, &[PrepareOption::Upgrade]),
                   Err(PrepareError::UpgradeVersion));
    }

    #[test]
    fn upgrade_skips_framing() {
        let mut msg = Message::new(
            Head::request(Method::Get, "/chat", Version::Http11), Empty);
        prepare(&mut msg, &[PrepareOption::Upgrade]).unwrap();
        assert_eq!(msg.head.field("Connection"), Some(&b"upgrade"[..]));
        assert!(!msg.head.has_field("Content-Length"));
        assert!(!msg.head.has_field("Transfer-Encoding"));
    }

    #[test]
    fn keep_alive_only_on_10_with_length() {
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http10),
            StringBody::new("x"));
        prepare(&mut msg, &[PrepareOption::KeepAlive]).unwrap();
        assert_eq!(msg.head.field("Connection"), Some(&b"keep-alive"[..]));

        let mut body = BufferedBody::new();
        body.push("x");
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http10),
            body.without_length());
        prepare(&mut msg, &[PrepareOption::KeepAlive]).unwrap();
        assert!(!msg.head.has_field("Connection"));
    }

    #[test]
    fn close_only_on_11() {
        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http11),
            StringBody::new("x"));
        prepare(&mut msg, &[PrepareOption::Close]).unwrap();
        assert_eq!(msg.head.field("Connection"), Some(&b"close"[..]));

        let mut msg = Message::new(
            Head::response(Status::Ok, Version::Http10),
            StringBody::new("x"));
        prepare(&mut msg, &[PrepareOption::Close]).unwrap();
        assert!(!msg.head.has_field("Connection"));
    }
}
