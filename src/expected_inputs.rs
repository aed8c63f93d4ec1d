// src/expected_inputs.rs
//
// Declarative input requirements a handler states up front, validated by
// the dispatcher before `Handler::handle` runs (spec.md §4.7). Supersedes
// the source's `extract.rs` trait-based extractors: instead of pulling
// values lazily inside the handler body (where a missing field surfaces as
// a panic or an ad-hoc `Option` check deep in handler logic), a handler
// declares its inputs once and the dispatcher validates them all before
// the handler ever runs.

use crate::error::ChopinError;
use crate::http::Request;

/// One of the nine typed accessors a declared input can be validated
/// against, plus a JSON passthrough for values not worth narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    String,
    Integer,
    Long,
    Double,
    Float,
    Boolean,
    Byte,
    Short,
    Char,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Query,
    JsonBody,
    UploadedFile,
}

/// One declared input: where it comes from, what name it's bound under,
/// what type it must parse as, and whether its absence is an error.
#[derive(Debug, Clone)]
pub struct ExpectedInput {
    pub name: String,
    pub source: InputSource,
    pub kind: InputKind,
    pub required: bool,
}

impl ExpectedInput {
    pub fn query(name: impl Into<String>, kind: InputKind) -> Self {
        Self { name: name.into(), source: InputSource::Query, kind, required: true }
    }

    pub fn json_field(name: impl Into<String>, kind: InputKind) -> Self {
        Self { name: name.into(), source: InputSource::JsonBody, kind, required: true }
    }

    pub fn uploaded_file(name: impl Into<String>) -> Self {
        Self { name: name.into(), source: InputSource::UploadedFile, kind: InputKind::String, required: true }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Validates every declared input against a request before the handler
/// runs. On the first missing-or-mismatched required input, returns the
/// taxonomy error the dispatcher turns into a 400 response — the handler
/// body never has to check for it again.
pub fn validate(
    inputs: &[ExpectedInput],
    req: &Request,
    uploaded_files: &[String],
) -> Result<(), ChopinError> {
    for input in inputs {
        match input.source {
            InputSource::Query => {
                let Some(raw) = req.query_param(&input.name) else {
                    if input.required {
                        return Err(ChopinError::MissingParameter(input.name.clone()));
                    }
                    continue;
                };
                check_kind(&input.name, raw, input.kind)?;
            }
            InputSource::JsonBody => {
                let value = req
                    .body_str()
                    .ok()
                    .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok());
                let Some(field) = value.as_ref().and_then(|v| v.get(&input.name)) else {
                    if input.required {
                        return Err(ChopinError::MissingField(input.name.clone()));
                    }
                    continue;
                };
                check_json_kind(&input.name, field, input.kind)?;
            }
            InputSource::UploadedFile => {
                if !uploaded_files.iter().any(|f| f == &input.name) && input.required {
                    return Err(ChopinError::MissingFile(input.name.clone()));
                }
            }
        }
    }
    Ok(())
}

fn check_kind(name: &str, raw: &str, kind: InputKind) -> Result<(), ChopinError> {
    let ok = match kind {
        InputKind::String => true,
        InputKind::Integer => raw.parse::<i32>().is_ok(),
        InputKind::Long => raw.parse::<i64>().is_ok(),
        InputKind::Double => raw.parse::<f64>().is_ok(),
        InputKind::Float => raw.parse::<f32>().is_ok(),
        InputKind::Byte => raw.parse::<i8>().is_ok(),
        InputKind::Short => raw.parse::<i16>().is_ok(),
        InputKind::Char => raw.chars().count() == 1,
        InputKind::Boolean => matches!(raw, "true" | "false" | "1" | "0"),
        InputKind::Json => serde_json::from_str::<serde_json::Value>(raw).is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(ChopinError::TypeMismatch(name.to_string()))
    }
}

fn check_json_kind(name: &str, value: &serde_json::Value, kind: InputKind) -> Result<(), ChopinError> {
    let ok = match kind {
        InputKind::String => value.is_string(),
        InputKind::Integer => value.as_i64().is_some_and(|n| i32::try_from(n).is_ok()),
        InputKind::Long => value.is_i64() || value.is_u64(),
        InputKind::Double => value.is_f64() || value.is_i64() || value.is_u64(),
        InputKind::Float => value
            .as_f64()
            .is_some_and(|n| n >= f32::MIN as f64 && n <= f32::MAX as f64),
        InputKind::Byte => value.as_i64().is_some_and(|n| i8::try_from(n).is_ok()),
        InputKind::Short => value.as_i64().is_some_and(|n| i16::try_from(n).is_ok()),
        InputKind::Char => value.as_str().is_some_and(|s| s.chars().count() == 1),
        InputKind::Boolean => value.is_boolean(),
        InputKind::Json => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ChopinError::TypeMismatch(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn req_with_query(name: &str, value: &str) -> Request {
        let mut query = HashMap::new();
        query.insert(name.to_string(), vec![value.to_string()]);
        Request::new(crate::parser::Method::Get, "/x", HashMap::new(), query, Vec::new(), "127.0.0.1")
    }

    #[test]
    fn missing_required_query_param_errors() {
        let req = Request::new(crate::parser::Method::Get, "/x", HashMap::new(), HashMap::new(), Vec::new(), "127.0.0.1");
        let inputs = vec![ExpectedInput::query("id", InputKind::String)];
        assert!(matches!(validate(&inputs, &req, &[]), Err(ChopinError::MissingParameter(_))));
    }

    #[test]
    fn optional_query_param_missing_is_fine() {
        let req = Request::new(crate::parser::Method::Get, "/x", HashMap::new(), HashMap::new(), Vec::new(), "127.0.0.1");
        let inputs = vec![ExpectedInput::query("id", InputKind::String).optional()];
        assert!(validate(&inputs, &req, &[]).is_ok());
    }

    #[test]
    fn integer_kind_rejects_non_numeric() {
        let req = req_with_query("age", "not-a-number");
        let inputs = vec![ExpectedInput::query("age", InputKind::Integer)];
        assert!(matches!(validate(&inputs, &req, &[]), Err(ChopinError::TypeMismatch(_))));
    }

    #[test]
    fn missing_uploaded_file_errors() {
        let req = Request::new(crate::parser::Method::Post, "/x", HashMap::new(), HashMap::new(), Vec::new(), "127.0.0.1");
        let inputs = vec![ExpectedInput::uploaded_file("avatar")];
        assert!(matches!(validate(&inputs, &req, &[]), Err(ChopinError::MissingFile(_))));
        assert!(validate(&inputs, &req, &["avatar".to_string()]).is_ok());
    }

    #[test]
    fn long_double_float_byte_short_char_kinds_accept_valid_input() {
        let cases = [
            (InputKind::Long, "9223372036854775807"),
            (InputKind::Double, "3.14159"),
            (InputKind::Float, "2.5"),
            (InputKind::Byte, "127"),
            (InputKind::Short, "32000"),
            (InputKind::Char, "x"),
        ];
        for (kind, value) in cases {
            let req = req_with_query("v", value);
            let inputs = vec![ExpectedInput::query("v", kind)];
            assert!(validate(&inputs, &req, &[]).is_ok(), "{kind:?} should accept {value:?}");
        }
    }

    #[test]
    fn byte_kind_rejects_out_of_range_value() {
        let req = req_with_query("v", "200");
        let inputs = vec![ExpectedInput::query("v", InputKind::Byte)];
        assert!(matches!(validate(&inputs, &req, &[]), Err(ChopinError::TypeMismatch(_))));
    }

    #[test]
    fn char_kind_rejects_multi_character_value() {
        let req = req_with_query("v", "ab");
        let inputs = vec![ExpectedInput::query("v", InputKind::Char)];
        assert!(matches!(validate(&inputs, &req, &[]), Err(ChopinError::TypeMismatch(_))));
    }
}
