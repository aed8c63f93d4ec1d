// src/multipart.rs
//
// `multipart/form-data` body parsing, kept from the source's
// boundary-scanning `Multipart` iterator over `&[u8]`, with one addition:
// `MultipartParser` extracts the boundary from the `Content-Type` header
// and classifies each part as a text field or an uploaded file per
// whether `filename` is present, per spec.md §4.6. Multipart is parsed
// from a fully-buffered body only — no streaming.

use crate::error::ChopinError;

#[derive(Debug)]
pub struct Part<'a> {
    pub name: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

pub struct Multipart<'a> {
    body: &'a [u8],
    boundary_marker: Vec<u8>,
}

impl<'a> Multipart<'a> {
    pub fn new(body: &'a [u8], boundary: &str) -> Self {
        let mut marker = Vec::with_capacity(boundary.len() + 2);
        marker.extend_from_slice(b"--");
        marker.extend_from_slice(boundary.as_bytes());
        Self { body, boundary_marker: marker }
    }

    fn find(data: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        data.windows(needle.len()).position(|w| w == needle)
    }
}

impl<'a> Iterator for Multipart<'a> {
    type Item = Result<Part<'a>, ChopinError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.is_empty() {
            return None;
        }

        let mut start = Self::find(self.body, &self.boundary_marker)?;
        start += self.boundary_marker.len();

        if self.body.len() >= start + 2 && self.body[start] == b'-' && self.body[start + 1] == b'-' {
            self.body = &[];
            return None;
        }

        if self.body.len() >= start + 2 && self.body[start] == b'\r' && self.body[start + 1] == b'\n' {
            start += 2;
        }

        let header_end = match Self::find(&self.body[start..], b"\r\n\r\n") {
            Some(pos) => pos,
            None => {
                self.body = &[];
                return Some(Err(ChopinError::MalformedMultipart("part has no header terminator".into())));
            }
        };
        let header_slice = &self.body[start..start + header_end];
        let body_start = start + header_end + 4;

        let end_boundary_pos = Self::find(&self.body[body_start..], &self.boundary_marker);
        let body_end = match end_boundary_pos {
            Some(pos) => body_start + pos,
            None => {
                self.body = &[];
                return Some(Err(ChopinError::MalformedMultipart("part has no closing boundary".into())));
            }
        };

        let actual_body_end =
            if body_end >= 2 && self.body[body_end - 2] == b'\r' && self.body[body_end - 1] == b'\n' {
                body_end - 2
            } else {
                body_end
            };

        let body_slice = &self.body[body_start..actual_body_end];
        self.body = &self.body[body_end..];

        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        let Ok(headers_str) = std::str::from_utf8(header_slice) else {
            return Some(Err(ChopinError::MalformedMultipart("part headers are not valid UTF-8".into())));
        };
        for line in headers_str.split("\r\n") {
            let lower = line.to_lowercase();
            if lower.starts_with("content-disposition:") {
                if let Some(idx) = lower.find("name=\"") {
                    let rest = &line[idx + 6..];
                    if let Some(end) = rest.find('"') {
                        name = Some(&rest[..end]);
                    }
                }
                if let Some(idx) = lower.find("filename=\"") {
                    let rest = &line[idx + 10..];
                    if let Some(end) = rest.find('"') {
                        filename = Some(&rest[..end]);
                    }
                }
            } else if lower.starts_with("content-type:") {
                content_type = Some(line[13..].trim());
            }
        }

        Some(Ok(Part { name, filename, content_type, body: body_slice }))
    }
}

/// A field extracted from a decoded multipart body.
#[derive(Debug, Clone)]
pub enum MultipartField {
    Text { name: String, value: String },
    File { name: String, filename: String, content_type: Option<String>, bytes: Vec<u8> },
}

/// Extracts the `boundary=` parameter from a `Content-Type` header value.
pub fn extract_boundary(content_type: &str) -> Result<&str, ChopinError> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .ok_or_else(|| ChopinError::MalformedMultipart("Content-Type has no boundary parameter".into()))
}

/// Parses a fully-buffered multipart body into its constituent fields,
/// per spec.md §4.6: a part with `filename` becomes a `File`, otherwise a
/// `Text` field. Body bytes that aren't valid UTF-8 for a text field are
/// lossily converted rather than rejected, since form fields are free text.
pub fn parse(content_type: &str, body: &[u8]) -> Result<Vec<MultipartField>, ChopinError> {
    let boundary = extract_boundary(content_type)?;
    let mut fields = Vec::new();
    for part in Multipart::new(body, boundary) {
        let part = part?;
        let Some(name) = part.name else { continue };
        match part.filename {
            Some(filename) => fields.push(MultipartField::File {
                name: name.to_string(),
                filename: filename.to_string(),
                content_type: part.content_type.map(str::to_string),
                bytes: part.body.to_vec(),
            }),
            None => fields.push(MultipartField::Text {
                name: name.to_string(),
                value: String::from_utf8_lossy(part.body).into_owned(),
            }),
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(boundary: &str, parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, filename, content) in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match filename {
                Some(fname) => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{fname}\"\r\n\r\n")
                        .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            out.extend_from_slice(content.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        out
    }

    #[test]
    fn extracts_boundary_from_content_type() {
        assert_eq!(extract_boundary("multipart/form-data; boundary=XYZ").unwrap(), "XYZ");
    }

    #[test]
    fn missing_boundary_is_malformed() {
        assert!(matches!(extract_boundary("multipart/form-data"), Err(ChopinError::MalformedMultipart(_))));
    }

    #[test]
    fn parses_mixed_text_and_file_fields() {
        let b = body("B", &[("title", None, "hello"), ("upload", Some("a.txt"), "file contents")]);
        let fields = parse("multipart/form-data; boundary=B", &b).unwrap();
        assert_eq!(fields.len(), 2);
        assert!(matches!(&fields[0], MultipartField::Text { name, value } if name == "title" && value == "hello"));
        assert!(matches!(&fields[1], MultipartField::File { name, filename, .. }
            if name == "upload" && filename == "a.txt"));
    }

    #[test]
    fn trailing_terminator_does_not_produce_a_part() {
        let b = body("B", &[("a", None, "1")]);
        let fields = parse("multipart/form-data; boundary=B", &b).unwrap();
        assert_eq!(fields.len(), 1);
    }
}
