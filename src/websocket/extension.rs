//! `Sec-WebSocket-Extensions` negotiation for permessage-deflate (RFC 7692)
//!
//! The server walks the client's offers and picks the first one it can
//! satisfy under its own configuration; the client validates that the
//! server's acceptance stays inside what was offered.

use std::str::from_utf8;

use websocket::config::DeflateConfig;
use websocket::error::ErrorEnum;

const NAME: &'static str = "permessage-deflate";

/// Negotiated permessage-deflate parameters
///
/// Window bits are from the wire (8..=15); widening 8 to the 9 bits zlib
/// insists on happens when the streams are built, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateParams {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
}

struct Param<'a> {
    name: &'a str,
    value: Option<&'a str>,
}

// one extension element: name followed by `;`-separated parameters
fn parse_element(element: &str) -> Option<(&str, Vec<Param>)> {
    let mut items = element.split(';').map(|x| x.trim());
    let name = items.next()?;
    let mut params = Vec::new();
    for item in items {
        if item.is_empty() {
            return None;
        }
        let mut kv = item.splitn(2, '=');
        let pname = kv.next().unwrap().trim();
        let value = kv.next().map(|v| v.trim().trim_matches('"'));
        params.push(Param { name: pname, value: value });
    }
    Some((name, params))
}

fn parse_window_bits(value: Option<&str>) -> Option<u8> {
    let bits: u8 = value?.parse().ok()?;
    if bits >= 8 && bits <= 15 {
        Some(bits)
    } else {
        None
    }
}

// the raw parameters of a single permessage-deflate element
#[derive(Default)]
struct Offer {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: Option<u8>,
    /// `Some(None)` is the bare parameter (value left to the server)
    client_max_window_bits: Option<Option<u8>>,
}

fn parse_params(params: Vec<Param>) -> Option<Offer> {
    let mut offer = Offer::default();
    for p in params {
        match p.name {
            "server_no_context_takeover" => {
                if p.value.is_some() || offer.server_no_context_takeover {
                    return None;
                }
                offer.server_no_context_takeover = true;
            }
            "client_no_context_takeover" => {
                if p.value.is_some() || offer.client_no_context_takeover {
                    return None;
                }
                offer.client_no_context_takeover = true;
            }
            "server_max_window_bits" => {
                if offer.server_max_window_bits.is_some() {
                    return None;
                }
                offer.server_max_window_bits =
                    Some(parse_window_bits(p.value)?);
            }
            "client_max_window_bits" => {
                if offer.client_max_window_bits.is_some() {
                    return None;
                }
                offer.client_max_window_bits = Some(match p.value {
                    Some(v) => Some(parse_window_bits(Some(v))?),
                    None => None,
                });
            }
            _ => return None,
        }
    }
    Some(offer)
}

/// Server side: pick the first acceptable offer from one header value
pub fn negotiate_offer(value: &[u8], cfg: &DeflateConfig)
    -> Option<DeflateParams>
{
    if !cfg.server_enable {
        return None;
    }
    let value = match from_utf8(value) {
        Ok(v) => v,
        Err(_) => return None,
    };
    for element in value.split(',') {
        let (name, params) = match parse_element(element) {
            Some(x) => x,
            None => continue,
        };
        if !name.eq_ignore_ascii_case(NAME) {
            continue;
        }
        let offer = match parse_params(params) {
            Some(o) => o,
            None => continue,
        };
        let server_bits = match offer.server_max_window_bits {
            Some(w) if w < cfg.server_max_window_bits => w,
            _ => cfg.server_max_window_bits,
        };
        let client_bits = match offer.client_max_window_bits {
            // the parameter was not offered, the client window
            // cannot be restricted
            None => 15,
            Some(None) => cfg.client_max_window_bits,
            Some(Some(w)) if w < cfg.client_max_window_bits => w,
            Some(Some(_)) => cfg.client_max_window_bits,
        };
        return Some(DeflateParams {
            server_no_context_takeover: offer.server_no_context_takeover
                || cfg.server_no_context_takeover,
            client_no_context_takeover: offer.client_no_context_takeover
                || cfg.client_no_context_takeover,
            server_max_window_bits: server_bits,
            client_max_window_bits: client_bits,
        });
    }
    None
}

/// Server side: format the accepted parameters for the 101 response
pub fn format_accept(params: &DeflateParams) -> String {
    let mut out = String::from(NAME);
    if params.server_no_context_takeover {
        out.push_str("; server_no_context_takeover");
    }
    if params.client_no_context_takeover {
        out.push_str("; client_no_context_takeover");
    }
    if params.server_max_window_bits < 15 {
        out.push_str(&format!("; server_max_window_bits={}",
            params.server_max_window_bits));
    }
    if params.client_max_window_bits < 15 {
        out.push_str(&format!("; client_max_window_bits={}",
            params.client_max_window_bits));
    }
    out
}

/// Client side: format the offer for the upgrade request
pub fn format_offer(cfg: &DeflateConfig) -> String {
    let mut out = String::from(NAME);
    if cfg.client_no_context_takeover {
        out.push_str("; client_no_context_takeover");
    }
    if cfg.server_no_context_takeover {
        out.push_str("; server_no_context_takeover");
    }
    if cfg.server_max_window_bits < 15 {
        out.push_str(&format!("; server_max_window_bits={}",
            cfg.server_max_window_bits));
    }
    if cfg.client_max_window_bits < 15 {
        out.push_str(&format!("; client_max_window_bits={}",
            cfg.client_max_window_bits));
    } else {
        // bare parameter: we can handle any window the server picks
        out.push_str("; client_max_window_bits");
    }
    out
}

/// Client side: validate the parameters the server accepted
pub fn parse_response(value: &[u8], cfg: &DeflateConfig)
    -> Result<DeflateParams, ErrorEnum>
{
    let value = from_utf8(value)
        .map_err(|_| ErrorEnum::ExtensionViolation)?;
    let mut elements = value.split(',');
    let element = elements.next()
        .ok_or(ErrorEnum::ExtensionViolation)?;
    if elements.next().is_some() {
        // we offered exactly one extension
        return Err(ErrorEnum::ExtensionViolation);
    }
    let (name, params) = parse_element(element)
        .ok_or(ErrorEnum::ExtensionViolation)?;
    if !name.eq_ignore_ascii_case(NAME) {
        return Err(ErrorEnum::ExtensionViolation);
    }
    let offer = parse_params(params)
        .ok_or(ErrorEnum::ExtensionViolation)?;
    let server_bits = match offer.server_max_window_bits {
        Some(w) => {
            if w > cfg.server_max_window_bits {
                return Err(ErrorEnum::ExtensionViolation);
            }
            w
        }
        None => 15,
    };
    let client_bits = match offer.client_max_window_bits {
        Some(Some(w)) => {
            if w > cfg.client_max_window_bits {
                return Err(ErrorEnum::ExtensionViolation);
            }
            w
        }
        // bare parameter is not allowed in a response
        Some(None) => return Err(ErrorEnum::ExtensionViolation),
        None => 15,
    };
    Ok(DeflateParams {
        server_no_context_takeover: offer.server_no_context_takeover,
        client_no_context_takeover: offer.client_no_context_takeover,
        server_max_window_bits: server_bits,
        client_max_window_bits: client_bits,
    })
}

#[cfg(test)]
mod test {
    use websocket::config::DeflateConfig;
    use super::{format_accept, format_offer, negotiate_offer,
                parse_response, DeflateParams};

    fn enabled() -> DeflateConfig {
        let mut cfg = DeflateConfig::default();
        cfg.server_enable = true;
        cfg.client_enable = true;
        cfg
    }

    #[test]
    fn plain_offer() {
        let params = negotiate_offer(b"permessage-deflate", &enabled())
            .unwrap();
        assert_eq!(params, DeflateParams {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
        });
        assert_eq!(format_accept(&params), "permessage-deflate");
    }

    #[test]
    fn disabled_ignores_offer() {
        assert_eq!(
            negotiate_offer(b"permessage-deflate", &DeflateConfig::default()),
            None);
    }

    #[test]
    fn offer_with_parameters() {
        let params = negotiate_offer(
            b"permessage-deflate; client_max_window_bits; \
              server_max_window_bits=10; server_no_context_takeover",
            &enabled()).unwrap();
        assert!(params.server_no_context_takeover);
        assert!(!params.client_no_context_takeover);
        assert_eq!(params.server_max_window_bits, 10);
        assert_eq!(params.client_max_window_bits, 15);
        assert_eq!(format_accept(&params),
            "permessage-deflate; server_no_context_takeover; \
             server_max_window_bits=10");
    }

    #[test]
    fn bad_offer_falls_through_to_next() {
        let params = negotiate_offer(
            b"permessage-deflate; frob=1, permessage-deflate",
            &enabled()).unwrap();
        assert_eq!(params.server_max_window_bits, 15);
    }

    #[test]
    fn unknown_extension_skipped() {
        assert_eq!(negotiate_offer(b"x-webkit-deflate-frame", &enabled()),
            None);
    }

    #[test]
    fn bad_window_bits_rejected() {
        assert_eq!(negotiate_offer(
            b"permessage-deflate; server_max_window_bits=16", &enabled()),
            None);
        assert_eq!(negotiate_offer(
            b"permessage-deflate; server_max_window_bits=7", &enabled()),
            None);
    }

    #[test]
    fn offer_format() {
        let mut cfg = enabled();
        assert_eq!(format_offer(&cfg),
            "permessage-deflate; client_max_window_bits");
        cfg.client_no_context_takeover = true;
        cfg.server_max_window_bits = 12;
        assert_eq!(format_offer(&cfg),
            "permessage-deflate; client_no_context_takeover; \
             server_max_window_bits=12; client_max_window_bits");
    }

    #[test]
    fn response_roundtrip() {
        let cfg = enabled();
        let params = parse_response(
            b"permessage-deflate; server_no_context_takeover; \
              client_max_window_bits=10",
            &cfg).unwrap();
        assert!(params.server_no_context_takeover);
        assert_eq!(params.client_max_window_bits, 10);
        assert_eq!(params.server_max_window_bits, 15);
    }

    #[test]
    fn response_violations() {
        let cfg = enabled();
        assert!(parse_response(b"permessage-deflate; frob", &cfg).is_err());
        assert!(parse_response(b"x-unknown", &cfg).is_err());
        assert!(parse_response(
            b"permessage-deflate, permessage-deflate", &cfg).is_err());
        assert!(parse_response(
            b"permessage-deflate; client_max_window_bits", &cfg).is_err());
        let mut cfg = cfg;
        cfg.server_max_window_bits = 10;
        assert!(parse_response(
            b"permessage-deflate; server_max_window_bits=12", &cfg).is_err());
    }
}
