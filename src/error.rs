use crate::parser::ParseError;
use std::io;
use thiserror::Error;

/// Central error type for the HTTP/WebSocket core engine.
///
/// One variant per category in the error taxonomy: parse, validation,
/// routing, lifecycle, handler, transport, websocket-protocol.
#[derive(Debug, Error)]
pub enum ChopinError {
    #[error("malformed request: {0:?}")]
    Parse(#[from] ParseError),

    #[error("missing query parameter: {0}")]
    MissingParameter(String),

    #[error("missing body field: {0}")]
    MissingField(String),

    #[error("missing uploaded file: {0}")]
    MissingFile(String),

    #[error("type mismatch for input: {0}")]
    TypeMismatch(String),

    #[error("malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("no route matched {method} {path}")]
    Unmatched { method: String, path: String },

    #[error("response already finalized")]
    AlreadyFinalized,

    #[error("duplicate route registration: {0}")]
    DuplicateRoute(String),

    #[error("unsupported response body for content type {0}")]
    UnsupportedBody(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("websocket protocol error: {0}")]
    WsProtocolError(String),

    #[error("websocket message too big: {0} bytes")]
    WsMessageTooBig(usize),

    #[error("websocket unsupported opcode: {0}")]
    WsUnsupportedData(u8),

    #[error("connection slab is full")]
    SlabFull,

    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    #[error("{0}")]
    Other(String),
}

impl ChopinError {
    /// HTTP status code this error maps to when surfaced to a client.
    pub fn status_code(&self) -> u16 {
        match self {
            ChopinError::Parse(_) => 400,
            ChopinError::MissingParameter(_)
            | ChopinError::MissingField(_)
            | ChopinError::MissingFile(_)
            | ChopinError::TypeMismatch(_)
            | ChopinError::MalformedMultipart(_) => 400,
            ChopinError::Unmatched { .. } => 404,
            ChopinError::AlreadyFinalized | ChopinError::DuplicateRoute(_) => 500,
            ChopinError::UnsupportedBody(_) => 500,
            ChopinError::Handler(_) => 500,
            _ => 500,
        }
    }

    /// Taxonomy token used in the `{"error": "<message>"}` JSON body.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChopinError::Parse(_) => "MalformedRequest",
            ChopinError::MissingParameter(_) => "MissingParameter",
            ChopinError::MissingField(_) => "MissingField",
            ChopinError::MissingFile(_) => "MissingFile",
            ChopinError::TypeMismatch(_) => "TypeMismatch",
            ChopinError::MalformedMultipart(_) => "MalformedMultipart",
            ChopinError::Unmatched { .. } => "Unmatched",
            ChopinError::AlreadyFinalized => "AlreadyFinalized",
            ChopinError::DuplicateRoute(_) => "DuplicateRoute",
            ChopinError::UnsupportedBody(_) => "UnsupportedBody",
            ChopinError::Handler(_) => "HandlerError",
            ChopinError::Io(_) => "ReadFailed",
            ChopinError::ConnectionClosed => "ConnectionClosed",
            ChopinError::WriteFailed(_) => "WriteFailed",
            ChopinError::WsProtocolError(_) => "ProtocolError",
            ChopinError::WsMessageTooBig(_) => "MessageTooBig",
            ChopinError::WsUnsupportedData(_) => "UnsupportedData",
            ChopinError::SlabFull => "SlabFull",
            ChopinError::WorkerPanic(_) => "WorkerPanic",
            ChopinError::Other(_) => "Error",
        }
    }

    /// Whether this is a validation-class error (reported as 400 JSON).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChopinError::MissingParameter(_)
                | ChopinError::MissingField(_)
                | ChopinError::MissingFile(_)
                | ChopinError::TypeMismatch(_)
        )
    }
}

pub type ChopinResult<T> = Result<T, ChopinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ChopinError::MissingParameter("id".into()).status_code(), 400);
        assert_eq!(
            ChopinError::Unmatched { method: "GET".into(), path: "/x".into() }.status_code(),
            404
        );
        assert_eq!(ChopinError::Handler("boom".into()).status_code(), 500);
    }

    #[test]
    fn error_codes_are_stable_tokens() {
        assert_eq!(ChopinError::MissingField("x".into()).error_code(), "MissingField");
        assert_eq!(ChopinError::WsMessageTooBig(10).error_code(), "MessageTooBig");
    }
}
