//! HTTP message model: a start line plus an ordered multimap of fields
//!
//! The model is deliberately dumb: it stores what you put into it and
//! keeps field order. All protocol intelligence lives in `prepare` and in
//! the write engine.

use std::fmt::Display;
use std::slice::Iter as SliceIter;

use enums::{Method, Status, Version};
use headers;

quick_error! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum HeaderError {
        InvalidHeaderName {
            description("Header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("Header value contains invalid characters")
        }
    }
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    value: Vec<u8>,
}

#[derive(Debug, Clone)]
enum StartLine {
    Request { method: Method, target: String },
    Response { code: u16, reason: Option<String> },
}

/// Message head: start line, version and fields
///
/// Field names compare case-insensitively, insertion order is preserved
/// and duplicate names are allowed. Names starting with a colon are
/// pseudo-fields: they may be stored but are never serialized.
#[derive(Debug, Clone)]
pub struct Head {
    line: StartLine,
    version: Version,
    fields: Vec<Field>,
}

/// A message ready for serialization: a head and a body value
#[derive(Debug)]
pub struct Message<B> {
    pub head: Head,
    pub body: B,
}

impl<B> Message<B> {
    pub fn new(head: Head, body: B) -> Message<B> {
        Message { head: head, body: body }
    }
}

fn valid_name(name: &str) -> bool {
    // a leading colon marks a pseudo-field, the rest must be a token
    let name = if name.starts_with(':') { &name[1..] } else { name };
    name.len() > 0 && name.bytes().all(|ch| {
        ch > 0x20 && ch < 0x7F && ch != b':'
    })
}

fn valid_value(value: &[u8]) -> bool {
    !value.iter().any(|&ch| ch == b'\r' || ch == b'\n')
}

impl Head {
    /// Create a request head
    pub fn request<T>(method: Method, target: T, version: Version) -> Head
        where T: Into<String>,
    {
        Head {
            line: StartLine::Request {
                method: method,
                target: target.into(),
            },
            version: version,
            fields: Vec::new(),
        }
    }

    /// Create a response head with the canonical reason phrase
    pub fn response(status: Status, version: Version) -> Head {
        Head {
            line: StartLine::Response {
                code: status.code(),
                reason: None,
            },
            version: version,
            fields: Vec::new(),
        }
    }

    /// Create a response head with a custom status line
    pub fn response_custom<R>(code: u16, reason: R, version: Version) -> Head
        where R: Into<String>,
    {
        Head {
            line: StartLine::Response {
                code: code,
                reason: Some(reason.into()),
            },
            version: version,
            fields: Vec::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_request(&self) -> bool {
        matches!(self.line, StartLine::Request { .. })
    }

    /// Request method, `None` for responses
    pub fn method(&self) -> Option<&Method> {
        match self.line {
            StartLine::Request { ref method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Request target, `None` for responses
    pub fn target(&self) -> Option<&str> {
        match self.line {
            StartLine::Request { ref target, .. } => Some(&target[..]),
            StartLine::Response { .. } => None,
        }
    }

    /// Response status code, `None` for requests
    pub fn code(&self) -> Option<u16> {
        match self.line {
            StartLine::Request { .. } => None,
            StartLine::Response { code, .. } => Some(code),
        }
    }

    /// Response reason phrase, derived from the code when not set
    pub fn reason(&self) -> Option<&str> {
        match self.line {
            StartLine::Request { .. } => None,
            StartLine::Response { ref reason, code } => {
                Some(reason.as_ref().map(|x| &x[..]).unwrap_or_else(|| {
                    Status::from_code(code).map(|s| s.reason())
                        .unwrap_or("Unknown")
                }))
            }
        }
    }

    /// Append a field, keeping insertion order
    pub fn add_field<V: AsRef<[u8]>>(&mut self, name: &str, value: V)
        -> Result<(), HeaderError>
    {
        let value = value.as_ref();
        if !valid_name(name) {
            return Err(HeaderError::InvalidHeaderName);
        }
        if !valid_value(value) {
            return Err(HeaderError::InvalidHeaderValue);
        }
        self.fields.push(Field {
            name: name.to_string(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Same as `add_field` but formats the value in place
    ///
    /// Useful for numeric headers and strongly typed wrappers like
    /// `websocket::Accept`.
    pub fn format_field<D: Display>(&mut self, name: &str, value: D)
        -> Result<(), HeaderError>
    {
        self.add_field(name, format!("{}", value).as_bytes())
    }

    /// First value of the field, compared case-insensitively
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| &f.value[..])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// True if any value of the field lists the comma-separated token
    pub fn field_contains_token(&self, name: &str, token: &str) -> bool {
        self.fields.iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name))
            .any(|f| headers::contains_token(&f.value, token))
    }

    /// Remove all values of the field, returning how many were removed
    pub fn remove_field(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    /// Iterate over fields in insertion order
    pub fn fields(&self) -> FieldIter {
        FieldIter(self.fields.iter())
    }
}

/// Iterator over `(name, value)` pairs of a head
pub struct FieldIter<'a>(SliceIter<'a, Field>);

impl<'a> Iterator for FieldIter<'a> {
    type Item = (&'a str, &'a [u8]);
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|f| (&f.name[..], &f.value[..]))
    }
}

#[cfg(test)]
mod test {
    use enums::{Method, Status, Version};
    use super::{Head, HeaderError};

    #[test]
    fn multimap_order() {
        let mut h = Head::request(Method::Get, "/", Version::Http11);
        h.add_field("Set-Thing", "a").unwrap();
        h.add_field("Other", "x").unwrap();
        h.add_field("set-thing", "b").unwrap();
        assert_eq!(h.field("SET-THING"), Some(&b"a"[..]));
        let values: Vec<_> = h.fields()
            .filter(|&(n, _)| n.eq_ignore_ascii_case("set-thing"))
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(h.remove_field("set-THING"), 2);
        assert!(!h.has_field("Set-Thing"));
        assert!(h.has_field("Other"));
    }

    #[test]
    fn derived_reason() {
        let h = Head::response(Status::Ok, Version::Http11);
        assert_eq!(h.reason(), Some("OK"));
        let h = Head::response_custom(799, "Odd", Version::Http11);
        assert_eq!(h.reason(), Some("Odd"));
        assert_eq!(h.code(), Some(799));
    }

    #[test]
    fn field_validation() {
        let mut h = Head::request(Method::Get, "/", Version::Http11);
        assert_eq!(h.add_field("Bad Name", "x"),
                   Err(HeaderError::InvalidHeaderName));
        assert_eq!(h.add_field("", "x"),
                   Err(HeaderError::InvalidHeaderName));
        assert_eq!(h.add_field("Name", "bad\r\nvalue"),
                   Err(HeaderError::InvalidHeaderValue));
        assert!(h.add_field(":pseudo", "x").is_ok());
        assert!(h.has_field(":pseudo"));
    }

    #[test]
    fn token_scan() {
        let mut h = Head::request(Method::Get, "/", Version::Http11);
        h.add_field("Connection", "keep-alive, Upgrade").unwrap();
        assert!(h.field_contains_token("connection", "upgrade"));
        assert!(!h.field_contains_token("connection", "close"));
    }
}
