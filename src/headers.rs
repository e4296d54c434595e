// header values are byte sequences
// comparisons are case insensitive and surrounding whitespace is ignored

/// Strip linear whitespace from both ends of a header value
pub fn trim(mut val: &[u8]) -> &[u8] {
    while val.len() > 0 && matches!(val[0], b'\r' | b'\n' | b' ' | b'\t') {
        val = &val[1..];
    }
    while val.len() > 0 &&
        matches!(val[val.len()-1], b'\r' | b'\n' | b' ' | b'\t')
    {
        val = &val[..val.len()-1];
    }
    return val;
}

/// Check whether a comma-separated header value contains the token
pub fn contains_token(val: &[u8], token: &str) -> bool {
    val.split(|&x| x == b',')
        .any(|item| trim(item).eq_ignore_ascii_case(token.as_bytes()))
}

pub fn is_close(val: &[u8]) -> bool {
    contains_token(val, "close")
}

pub fn is_chunked(val: &[u8]) -> bool {
    // chunked must be the last encoding applied to the body
    val.split(|&x| x == b',').last()
        .map(|enc| trim(enc).eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false)
}
