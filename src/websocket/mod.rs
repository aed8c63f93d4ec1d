// src/websocket/mod.rs
//
// WebSocket upgrade handshake, RFC 6455 frame codec and session handle.
// Handshake validation steps grounded on tomaka-rouille's
// `websocket::start()`: method must be GET, `Connection` must include
// `upgrade`, `Upgrade` must include `websocket`, `Sec-WebSocket-Version`
// must be `13`, and the accept key is `base64(sha1(key + GUID))`. The
// source used `rustc_serialize::base64` (long deprecated); we use the
// `base64` and `sha1` crates instead, see DESIGN.md.

pub mod frame;
pub mod session;

use crate::http::Request;
use base64::Engine;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    NotGet,
    MissingConnectionUpgrade,
    MissingUpgradeHeader,
    UnsupportedVersion,
    MissingKey,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            HandshakeError::NotGet => "websocket upgrade must use GET",
            HandshakeError::MissingConnectionUpgrade => "Connection header must include 'upgrade'",
            HandshakeError::MissingUpgradeHeader => "Upgrade header must include 'websocket'",
            HandshakeError::UnsupportedVersion => "Sec-WebSocket-Version must be 13",
            HandshakeError::MissingKey => "missing Sec-WebSocket-Key header",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for HandshakeError {}

/// Validates an upgrade request and computes the `Sec-WebSocket-Accept`
/// value the 101 response must carry.
pub fn validate_and_accept_key(req: &Request) -> Result<String, HandshakeError> {
    if req.method != crate::parser::Method::Get {
        return Err(HandshakeError::NotGet);
    }
    let has_upgrade_conn = req
        .header("Connection")
        .map(|h| h.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    if !has_upgrade_conn {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }
    let has_ws_upgrade = req
        .header("Upgrade")
        .map(|h| h.to_ascii_lowercase().contains("websocket"))
        .unwrap_or(false);
    if !has_ws_upgrade {
        return Err(HandshakeError::MissingUpgradeHeader);
    }
    match req.header("Sec-WebSocket-Version") {
        Some("13") => {}
        _ => return Err(HandshakeError::UnsupportedVersion),
    }
    let key = req.header("Sec-WebSocket-Key").ok_or(HandshakeError::MissingKey)?;
    Ok(accept_key(key))
}

fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn upgrade_req(key: Option<&str>) -> Request {
        let mut headers = HashMap::new();
        headers.insert("Connection".to_string(), "Upgrade".to_string());
        headers.insert("Upgrade".to_string(), "websocket".to_string());
        headers.insert("Sec-WebSocket-Version".to_string(), "13".to_string());
        if let Some(k) = key {
            headers.insert("Sec-WebSocket-Key".to_string(), k.to_string());
        }
        Request::new(crate::parser::Method::Get, "/ws", headers, HashMap::new(), Vec::new(), "127.0.0.1")
    }

    #[test]
    fn known_rfc6455_example_key_produces_known_accept() {
        // The canonical example from RFC 6455 §1.3.
        let req = upgrade_req(Some("dGhlIHNhbXBsZSBub25jZQ=="));
        let accept = validate_and_accept_key(&req).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn missing_key_is_rejected() {
        let req = upgrade_req(None);
        assert_eq!(validate_and_accept_key(&req), Err(HandshakeError::MissingKey));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut req = upgrade_req(Some("dGhlIHNhbXBsZSBub25jZQ=="));
        req.headers.insert("Sec-WebSocket-Version".to_string(), "8".to_string());
        assert_eq!(validate_and_accept_key(&req), Err(HandshakeError::UnsupportedVersion));
    }

    #[test]
    fn non_get_method_is_rejected() {
        let mut req = upgrade_req(Some("dGhlIHNhbXBsZSBub25jZQ=="));
        req.method = crate::parser::Method::Post;
        assert_eq!(validate_and_accept_key(&req), Err(HandshakeError::NotGet));
    }
}
