// src/json.rs
//
// Thin `serde_json` wrapper. The source reached for its own `kowito_json`
// crate (scanner + `KView` zero-copy accessor); that crate isn't part of
// this workspace, so JSON bodies are represented with `serde_json::Value`
// throughout — see DESIGN.md.

pub use serde_json::Value;

use crate::error::ChopinError;
use crate::http::Response;

/// Parses a JSON body, mapping a parse failure onto the taxonomy's
/// `TypeMismatch` error rather than leaking `serde_json::Error` past the
/// request/response boundary.
pub fn parse(body: &[u8]) -> Result<Value, ChopinError> {
    serde_json::from_slice(body).map_err(|_| ChopinError::TypeMismatch("body".to_string()))
}

/// Serializes any `Serialize` value straight onto a finalized `Response`,
/// setting `Content-Type: application/json`.
pub fn to_response<T: serde::Serialize>(val: &T, chunk_threshold: usize) -> Result<Response, ChopinError> {
    let mut res = Response::new();
    res.content_type("application/json")?;
    res.set_body(serde_json::to_value(val).map_err(|e| ChopinError::Other(e.to_string()))?)?;
    res.finalize(chunk_threshold)?;
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(matches!(parse(b"{not json"), Err(ChopinError::TypeMismatch(_))));
    }

    #[test]
    fn parse_accepts_well_formed_json() {
        let v = parse(br#"{"a":1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn to_response_sets_json_content_type() {
        let res = to_response(&serde_json::json!({"ok": true}), 1_048_576).unwrap();
        assert_eq!(res.body_bytes(), br#"{"ok":true}"#);
    }
}
