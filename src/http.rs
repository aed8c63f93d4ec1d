// src/http.rs
use crate::error::ChopinError;
use std::collections::HashMap;

pub use crate::parser::Method;

/// Immutable request view handed to middleware and handlers.
///
/// Constructed once by the dispatcher from a [`crate::parser::ParsedRequest`]
/// plus the route parameters extracted during resolution. Never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path with the query string stripped.
    pub path: String,
    /// Case-sensitive header map, last-write-wins on duplicates.
    pub headers: HashMap<String, String>,
    /// Ordered values per query-parameter name.
    pub query: HashMap<String, Vec<String>>,
    /// Route parameters bound by the matching trie.
    pub params: HashMap<String, String>,
    pub body: Vec<u8>,
    pub client_addr: String,
}

impl Request {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers: HashMap<String, String>,
        query: HashMap<String, Vec<String>>,
        body: Vec<u8>,
        client_addr: impl Into<String>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            query,
            params: HashMap::new(),
            body,
            client_addr: client_addr.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        // Case-sensitive per the data model, but header *names* are
        // conventionally compared case-insensitively on the wire; we expose
        // both: exact lookup first, then a case-insensitive fallback.
        if let Some(v) = self.headers.get(name) {
            return Some(v.as_str());
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// First value bound to a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn query_all(&self, name: &str) -> &[String] {
        self.query.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn body_str(&self) -> Result<&str, ChopinError> {
        std::str::from_utf8(&self.body)
            .map_err(|_| ChopinError::Other("request body is not valid UTF-8".into()))
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        let has_upgrade_conn = self
            .header("Connection")
            .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("Upgrade")))
            .unwrap_or(false);
        let has_ws_upgrade = self
            .header("Upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        has_upgrade_conn && has_ws_upgrade
    }
}

/// Tagged body value a handler's return is converted into.
///
/// Mirrors the source's dynamic-dispatch return type (`Object`), modeled
/// here as a closed variant set instead of `Box<dyn Any>`.
#[derive(Debug, Clone)]
pub enum BodyValue {
    Empty,
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl From<String> for BodyValue {
    fn from(s: String) -> Self {
        BodyValue::Text(s)
    }
}
impl From<&str> for BodyValue {
    fn from(s: &str) -> Self {
        BodyValue::Text(s.to_string())
    }
}
impl From<Vec<u8>> for BodyValue {
    fn from(b: Vec<u8>) -> Self {
        BodyValue::Bytes(b)
    }
}
impl From<serde_json::Value> for BodyValue {
    fn from(v: serde_json::Value) -> Self {
        BodyValue::Json(v)
    }
}

/// Status line reason-phrase table (closed, per spec).
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "Unknown Status",
    }
}

fn is_binary_content_type(ct: &str) -> bool {
    ct == "application/octet-stream"
        || ct.starts_with("image/")
        || ct.starts_with("video/")
        || ct.starts_with("audio/")
        || ct == "application/pdf"
}

fn is_text_content_type(ct: &str) -> bool {
    ct.starts_with("text/")
        || ct == "application/javascript"
        || ct == "application/x-www-form-urlencoded"
        || ct == "multipart/form-data"
        || ct == "application/xml"
}

/// Builder-style HTTP response. Mutable until [`Response::finalize`] is
/// called; every setter fails with [`ChopinError::AlreadyFinalized`]
/// afterwards.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    content_type: Option<String>,
    headers: HashMap<String, String>,
    body: BodyValue,
    finalized: bool,
    serialized: Option<Vec<u8>>,
    chunked: bool,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            content_type: None,
            headers: HashMap::new(),
            body: BodyValue::Empty,
            finalized: false,
            serialized: None,
            chunked: false,
        }
    }

    pub fn status(&mut self, code: u16) -> Result<&mut Self, ChopinError> {
        self.guard()?;
        self.status = code;
        Ok(self)
    }

    pub fn content_type(&mut self, ct: impl Into<String>) -> Result<&mut Self, ChopinError> {
        self.guard()?;
        self.content_type = Some(ct.into());
        Ok(self)
    }

    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, ChopinError> {
        self.guard()?;
        self.headers.insert(name.into(), value.into());
        Ok(self)
    }

    pub fn set_body(&mut self, body: impl Into<BodyValue>) -> Result<&mut Self, ChopinError> {
        self.guard()?;
        self.body = body.into();
        Ok(self)
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    fn guard(&self) -> Result<(), ChopinError> {
        if self.finalized {
            Err(ChopinError::AlreadyFinalized)
        } else {
            Ok(())
        }
    }

    /// Compute the serialized body bytes exactly once, dispatching on
    /// content type, and freeze the response. `chunk_threshold` selects
    /// `Transfer-Encoding: chunked` when the serialized body exceeds it.
    pub fn finalize(&mut self, chunk_threshold: usize) -> Result<(), ChopinError> {
        if self.finalized {
            return Ok(());
        }

        let ct = self
            .content_type
            .clone()
            .unwrap_or_else(|| "text/plain".to_string());

        let body_bytes: Vec<u8> = if ct == "application/json" {
            match &self.body {
                BodyValue::Json(v) => {
                    serde_json::to_vec(v).map_err(|e| ChopinError::Other(e.to_string()))?
                }
                BodyValue::Text(s) => s.clone().into_bytes(),
                BodyValue::Empty => b"null".to_vec(),
                BodyValue::Bytes(_) => return Err(ChopinError::UnsupportedBody(ct)),
            }
        } else if is_text_content_type(&ct) {
            match &self.body {
                BodyValue::Text(s) => s.clone().into_bytes(),
                BodyValue::Empty => Vec::new(),
                BodyValue::Json(v) => v.to_string().into_bytes(),
                BodyValue::Bytes(_) => return Err(ChopinError::UnsupportedBody(ct)),
            }
        } else if is_binary_content_type(&ct) {
            match &self.body {
                BodyValue::Bytes(b) => b.clone(),
                BodyValue::Empty => Vec::new(),
                _ => return Err(ChopinError::UnsupportedBody(ct)),
            }
        } else {
            // Unknown content type: only a string/empty body is compatible.
            match &self.body {
                BodyValue::Text(s) => s.clone().into_bytes(),
                BodyValue::Empty => Vec::new(),
                _ => return Err(ChopinError::UnsupportedBody(ct)),
            }
        };

        self.content_type = Some(ct.clone());
        self.headers
            .entry("Content-Type".to_string())
            .or_insert(ct);

        self.chunked = body_bytes.len() > chunk_threshold;
        if self.chunked {
            self.headers.remove("Content-Length");
            self.headers
                .insert("Transfer-Encoding".to_string(), "chunked".to_string());
        } else {
            self.headers.remove("Transfer-Encoding");
            self.headers
                .insert("Content-Length".to_string(), body_bytes.len().to_string());
        }

        self.serialized = Some(body_bytes);
        self.finalized = true;
        Ok(())
    }

    /// The finalized body bytes (empty before finalization).
    pub fn body_bytes(&self) -> &[u8] {
        self.serialized.as_deref().unwrap_or(&[])
    }

    /// Serialize the status line + headers + body. Idempotent once
    /// finalized: repeated calls return byte-equal output.
    pub fn serialize_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status,
                reason_phrase(self.status)
            )
            .as_bytes(),
        );
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", k, v).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Full serialized response (head + body), for the non-chunked path.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.serialize_head();
        out.extend_from_slice(self.body_bytes());
        out
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a finalized, chunk-eligible body into `<=max_chunk` chunks encoded
/// as `<hex-size>\r\n<bytes>\r\n`, terminated by `0\r\n\r\n`.
pub fn encode_chunks(body: &[u8], max_chunk: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / max_chunk.max(1) * 8 + 8);
    for chunk in body.chunks(max_chunk.max(1)) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Inverse of [`encode_chunks`], used by tests to verify round-tripping.
pub fn decode_chunks(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    loop {
        let line_end = data[cursor..].windows(2).position(|w| w == b"\r\n")? + cursor;
        let size_str = std::str::from_utf8(&data[cursor..line_end]).ok()?;
        let size = usize::from_str_radix(size_str.trim(), 16).ok()?;
        cursor = line_end + 2;
        if size == 0 {
            return Some(out);
        }
        out.extend_from_slice(&data[cursor..cursor + size]);
        cursor += size + 2; // skip trailing CRLF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_sets_content_length() {
        let mut r = Response::new();
        r.content_type("text/plain").unwrap();
        r.set_body("hello").unwrap();
        r.finalize(1024).unwrap();
        assert_eq!(r.body_bytes(), b"hello");
        assert!(!r.is_chunked());
    }

    #[test]
    fn finalize_is_idempotent_for_serialize() {
        let mut r = Response::new();
        r.set_body("abc").unwrap();
        r.finalize(1024).unwrap();
        let a = r.serialize();
        let b = r.serialize();
        assert_eq!(a, b);
    }

    #[test]
    fn setters_fail_after_finalize() {
        let mut r = Response::new();
        r.finalize(1024).unwrap();
        assert!(matches!(r.status(201), Err(ChopinError::AlreadyFinalized)));
    }

    #[test]
    fn large_body_triggers_chunked() {
        let mut r = Response::new();
        r.content_type("application/octet-stream").unwrap();
        r.set_body(vec![0u8; 10]).unwrap();
        r.finalize(5).unwrap();
        assert!(r.is_chunked());
    }

    #[test]
    fn chunk_round_trip() {
        let body = vec![7u8; 200_000];
        let chunks = encode_chunks(&body, 65536);
        let decoded = decode_chunks(&chunks).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn unknown_content_type_with_bytes_body_fails() {
        let mut r = Response::new();
        r.content_type("application/x-custom").unwrap();
        r.set_body(vec![1u8, 2, 3]).unwrap();
        assert!(matches!(
            r.finalize(1024),
            Err(ChopinError::UnsupportedBody(_))
        ));
    }
}
