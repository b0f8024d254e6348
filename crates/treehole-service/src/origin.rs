use std::net::IpAddr;

use axum::http::HeaderMap;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const UNKNOWN_ORIGIN: &str = "unknown";

/// Origin string used to group submissions for the daily limit.
///
/// The first `x-forwarded-for` entry wins over the socket peer. That header is
/// client-suppliable unless a trusted proxy overwrites it, so the origin can be
/// forged; the limit is only as strong as this value.
#[must_use]
pub fn client_origin(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());

    match (forwarded, peer) {
        (Some(first), _) => first.to_string(),
        (None, Some(peer)) => peer.to_string(),
        (None, None) => UNKNOWN_ORIGIN.to_string(),
    }
}
