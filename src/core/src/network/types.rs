use chrono::Utc;
use std::net::SocketAddr;

/// Remote address as recorded in events: IP only, IPv4-mapped IPv6 unwrapped.
pub fn client_address(peer: SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

/// Unix seconds, the timestamp unit of every captured event.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// `content-type` -> `Content-Type`: first letter and every letter after a
/// dash upper-cased, the rest lower-cased. Names holding anything other than
/// letters, digits or `!#$%&'*+-.^_`|~` are returned untouched.
pub fn canonical_header_key(name: &str) -> String {
    let is_token = |c: char| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c);
    if name.is_empty() || !name.chars().all(is_token) {
        return name.to_string();
    }

    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}
