// src/parser.rs
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("incomplete request")]
    Incomplete,
    #[error("malformed request line or headers")]
    InvalidFormat,
    #[error("unsupported HTTP method")]
    UnsupportedMethod,
    #[error("request exceeds configured limits")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Before,
    After,
    AfterAfter,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        Some(match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"CONNECT" => Method::Connect,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Before => "BEFORE",
            Method::After => "AFTER",
            Method::AfterAfter => "AFTERAFTER",
        }
    }
}

/// A parsed HTTP request head plus whatever body bytes followed the blank
/// line in the buffer that was handed in.
pub struct ParsedRequest {
    pub method: Method,
    /// Path with the query string stripped.
    pub path: String,
    pub query: HashMap<String, Vec<String>>,
    /// Case-sensitive header map, last-write-wins on duplicate names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Find `\r\n\r\n` or a bare `\n\n` (LF-only headers are tolerated on input).
fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2)
}

fn content_length(headers: &HashMap<String, String>) -> Option<usize> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
}

/// Used by the connection loop before attempting a full parse: is there a
/// complete request in `buf` yet?
pub fn is_request_complete(buf: &[u8]) -> bool {
    let Some(header_end) = find_header_end(buf) else {
        return false;
    };
    let head = &buf[..header_end];
    let headers = match parse_header_lines(head) {
        Ok(h) => h,
        Err(_) => return true, // let the real parser surface the error
    };
    match content_length(&headers) {
        Some(n) => buf.len() - header_end >= n,
        None => true,
    }
}

fn split_lines(head: &[u8]) -> Vec<&[u8]> {
    // Accept CRLF or bare LF line endings.
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < head.len() {
        if head[i] == b'\n' {
            let mut end = i;
            if end > start && head[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(&head[start..end]);
            start = i + 1;
        }
        i += 1;
    }
    if start < head.len() {
        lines.push(&head[start..]);
    }
    lines
}

fn parse_header_lines(head: &[u8]) -> Result<HashMap<String, String>, ParseError> {
    let lines = split_lines(head);
    let mut headers = HashMap::new();
    // lines[0] is the request line; header lines follow until a blank one.
    for line in lines.iter().skip(1) {
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidFormat)?;
        if let Some(idx) = line.find(':') {
            let name = line[..idx].trim();
            let mut value = &line[idx + 1..];
            value = value.strip_prefix(' ').unwrap_or(value);
            if name.is_empty() {
                continue; // malformed line, skip
            }
            headers.insert(name.to_string(), value.to_string());
        }
        // lines without a colon are malformed and skipped, per spec.
    }
    Ok(headers)
}

fn parse_query(qs: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for pair in qs.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let Some(value) = parts.next() else {
            continue; // missing '=' is ignored
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_string()).or_default().push(value.to_string());
    }
    out
}

/// Parse a fully- (or partially-) buffered HTTP request.
pub fn parse_request(buf: &[u8]) -> Result<ParsedRequest, ParseError> {
    let header_end = find_header_end(buf).ok_or(ParseError::Incomplete)?;
    let head = &buf[..header_end];
    let lines = split_lines(head);
    let request_line = lines.first().ok_or(ParseError::InvalidFormat)?;
    let request_line = std::str::from_utf8(request_line).map_err(|_| ParseError::InvalidFormat)?;

    let mut parts = request_line.split(' ');
    let method_tok = parts.next().ok_or(ParseError::InvalidFormat)?;
    let target = parts.next().ok_or(ParseError::InvalidFormat)?;
    let _version = parts.next().ok_or(ParseError::InvalidFormat)?;

    let method = Method::from_bytes(method_tok.as_bytes()).ok_or(ParseError::UnsupportedMethod)?;

    let (path, query) = match target.find('?') {
        Some(idx) => (target[..idx].to_string(), parse_query(&target[idx + 1..])),
        None => (target.to_string(), HashMap::new()),
    };

    let headers = parse_header_lines(head)?;

    let body_start = header_end;
    let rest = &buf[body_start..];
    let body = match content_length(&headers) {
        Some(n) => {
            if rest.len() < n {
                return Err(ParseError::Incomplete);
            }
            rest[..n].to_vec()
        }
        None => rest.to_vec(),
    };

    Ok(ParsedRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_request() {
        let req = b"GET /some/path?foo=bar HTTP/1.1\r\nHost: localhost\r\nKeep-Alive: true\r\n\r\nBodyContent";
        let parsed = parse_request(req).unwrap();
        assert_eq!(parsed.method, Method::Get);
        assert_eq!(parsed.path, "/some/path");
        assert_eq!(parsed.query.get("foo"), Some(&vec!["bar".to_string()]));
        assert_eq!(parsed.headers.get("Host").map(String::as_str), Some("localhost"));
        assert_eq!(parsed.body, b"BodyContent");
    }

    #[test]
    fn incomplete_request_line_is_incomplete() {
        let req = b"GET /some/path?foo=bar HTT";
        assert_eq!(parse_request(req).unwrap_err(), ParseError::Incomplete);
    }

    #[test]
    fn unsupported_method_errors() {
        let req = b"FOO / HTTP/1.1\r\n\r\n";
        assert_eq!(parse_request(req).unwrap_err(), ParseError::UnsupportedMethod);
    }

    #[test]
    fn duplicate_headers_last_write_wins() {
        let req = b"GET / HTTP/1.1\r\nX-Tag: a\r\nX-Tag: b\r\n\r\n";
        let parsed = parse_request(req).unwrap();
        assert_eq!(parsed.headers.get("X-Tag").map(String::as_str), Some("b"));
    }

    #[test]
    fn content_length_gates_completeness() {
        let partial = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(!is_request_complete(partial));
        let full = b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        assert!(is_request_complete(full));
    }

    #[test]
    fn missing_equals_in_query_is_ignored() {
        let req = b"GET /p?a=1&bflag&c=2 HTTP/1.1\r\n\r\n";
        let parsed = parse_request(req).unwrap();
        assert!(parsed.query.get("bflag").is_none());
        assert_eq!(parsed.query.get("a"), Some(&vec!["1".to_string()]));
    }

    #[test]
    fn malformed_header_line_is_skipped() {
        let req = b"GET / HTTP/1.1\r\nNoColonHere\r\nHost: x\r\n\r\n";
        let parsed = parse_request(req).unwrap();
        assert_eq!(parsed.headers.len(), 1);
        assert_eq!(parsed.headers.get("Host").map(String::as_str), Some("x"));
    }
}
