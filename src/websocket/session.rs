// src/websocket/session.rs
//
// Per-connection WebSocket session state machine sitting on top of the
// frame codec: accumulates fragmented messages, answers pings, and turns
// a decoded close frame into a terminal state the connection loop can act
// on without reaching back into frame-level details.

use super::frame::{self, CloseCode, Frame, Opcode};
use crate::error::ChopinError;

pub enum SessionEvent {
    /// A complete text message, ready for the handler.
    Text(String),
    /// A complete binary message, ready for the handler.
    Binary(Vec<u8>),
    /// A pong reply that must be written back immediately.
    ReplyWithPong(Vec<u8>),
    /// The peer asked to close. `code`/`reason` are what the peer actually
    /// sent (code 1005 with an empty reason if it sent none, per RFC 6455
    /// §7.1.5 — that code is never itself put on the wire); `echo` is the
    /// close frame to write back and shut down after.
    Close { code: u16, reason: String, echo: Vec<u8> },
    /// Not enough data buffered yet, or a frame handled internally
    /// (e.g. a pong with nothing further to do).
    None,
}

#[derive(Default)]
pub struct Session {
    fragments: Vec<u8>,
    fragment_opcode: Option<Opcode>,
    closed: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Decode and process as many complete frames as `buf` holds.
    /// Returns the number of bytes consumed and the events produced, in
    /// order. Stops at the first incomplete frame.
    pub fn feed(&mut self, buf: &[u8], max_message_size: usize) -> Result<(usize, Vec<SessionEvent>), ChopinError> {
        let mut consumed = 0;
        let mut events = Vec::new();

        loop {
            match frame::decode_frame(&buf[consumed..], max_message_size) {
                Ok(Some((frame, n))) => {
                    consumed += n;
                    events.push(self.handle_frame(frame, max_message_size)?);
                }
                Ok(None) => break,
                Err(e) => return Err(e),
            }
        }

        Ok((consumed, events))
    }

    fn handle_frame(&mut self, frame: Frame, max_message_size: usize) -> Result<SessionEvent, ChopinError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if !frame.fin {
                    self.fragment_opcode = Some(frame.opcode);
                    self.fragments = frame.payload;
                    return Ok(SessionEvent::None);
                }
                self.finish_message(frame.opcode, frame.payload)
            }
            Opcode::Continuation => {
                let Some(opcode) = self.fragment_opcode else {
                    return Err(ChopinError::WsProtocolError("continuation with no prior fragment".into()));
                };
                self.fragments.extend_from_slice(&frame.payload);
                if self.fragments.len() > max_message_size {
                    return Err(ChopinError::WsMessageTooBig(self.fragments.len()));
                }
                if !frame.fin {
                    return Ok(SessionEvent::None);
                }
                let payload = std::mem::take(&mut self.fragments);
                self.fragment_opcode = None;
                self.finish_message(opcode, payload)
            }
            Opcode::Ping => Ok(SessionEvent::ReplyWithPong(frame.payload)),
            Opcode::Pong => Ok(SessionEvent::None),
            Opcode::Close => {
                self.closed = true;
                let (code, reason) = parse_close_payload(&frame.payload)?;
                // Echo the peer's own code back; 1005 is a local sentinel
                // for "no code was sent" and must never appear on the
                // wire, so fall back to a plain Normal closure for it.
                let echo_code = if code == 1005 { CloseCode::Normal as u16 } else { code };
                let echo = frame::encode_close_raw(echo_code, "");
                Ok(SessionEvent::Close { code, reason, echo })
            }
        }
    }

    fn finish_message(&self, opcode: Opcode, payload: Vec<u8>) -> Result<SessionEvent, ChopinError> {
        match opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload)
                    .map_err(|_| ChopinError::WsProtocolError("text frame payload is not valid UTF-8".into()))?;
                Ok(SessionEvent::Text(text))
            }
            Opcode::Binary => Ok(SessionEvent::Binary(payload)),
            _ => unreachable!("finish_message only called for Text/Binary"),
        }
    }

    pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
        frame::encode_pong(payload)
    }

    pub fn encode_text(text: &str) -> Vec<u8> {
        frame::encode_text(text)
    }

    pub fn encode_binary(data: &[u8]) -> Vec<u8> {
        frame::encode_binary(data)
    }
}

/// Extracts the close code and reason from a close frame's payload, per
/// RFC 6455 §5.5.1/§7.1.5: a 2-byte big-endian code followed by a UTF-8
/// reason, or no code at all (reported as 1005, which is never itself
/// sent on the wire).
fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), ChopinError> {
    if payload.is_empty() {
        return Ok((1005, String::new()));
    }
    if payload.len() < 2 {
        return Err(ChopinError::WsProtocolError("close frame payload too short for a status code".into()));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Ok((code, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mask_key = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let mut b0 = opcode.as_byte_for_test();
        if fin {
            b0 |= 0x80;
        }
        let mut out = vec![b0, 0x80 | payload.len() as u8];
        out.extend_from_slice(&mask_key);
        let start = out.len();
        out.extend_from_slice(payload);
        for i in start..out.len() {
            out[i] ^= mask_key[(i - start) % 4];
        }
        out
    }

    impl Opcode {
        fn as_byte_for_test(self) -> u8 {
            match self {
                Opcode::Continuation => 0x0,
                Opcode::Text => 0x1,
                Opcode::Binary => 0x2,
                Opcode::Close => 0x8,
                Opcode::Ping => 0x9,
                Opcode::Pong => 0xA,
            }
        }
    }

    #[test]
    fn single_frame_text_message_yields_text_event() {
        let mut session = Session::new();
        let buf = masked_frame(Opcode::Text, true, b"hi");
        let (consumed, events) = session.feed(&buf, 1 << 20).unwrap();
        assert_eq!(consumed, buf.len());
        assert!(matches!(&events[0], SessionEvent::Text(s) if s == "hi"));
    }

    #[test]
    fn fragmented_message_reassembles_across_frames() {
        let mut session = Session::new();
        let mut buf = masked_frame(Opcode::Text, false, b"hel");
        buf.extend(masked_frame(Opcode::Continuation, true, b"lo"));
        let (_, events) = session.feed(&buf, 1 << 20).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::None));
        assert!(matches!(&events[1], SessionEvent::Text(s) if s == "hello"));
    }

    #[test]
    fn ping_produces_pong_reply() {
        let mut session = Session::new();
        let buf = masked_frame(Opcode::Ping, true, b"ping-data");
        let (_, events) = session.feed(&buf, 1 << 20).unwrap();
        assert!(matches!(&events[0], SessionEvent::ReplyWithPong(p) if p == b"ping-data"));
    }

    #[test]
    fn close_frame_with_no_payload_marks_session_closed() {
        let mut session = Session::new();
        let buf = masked_frame(Opcode::Close, true, b"");
        let (_, events) = session.feed(&buf, 1 << 20).unwrap();
        match &events[0] {
            SessionEvent::Close { code, reason, .. } => {
                assert_eq!(*code, 1005);
                assert_eq!(reason, "");
            }
            _ => panic!("expected Close event"),
        }
        assert!(session.is_closed());
    }

    #[test]
    fn close_frame_surfaces_client_code_and_reason() {
        let mut session = Session::new();
        let mut payload = 1002u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bad juju");
        let buf = masked_frame(Opcode::Close, true, &payload);
        let (_, events) = session.feed(&buf, 1 << 20).unwrap();
        match &events[0] {
            SessionEvent::Close { code, reason, echo } => {
                assert_eq!(*code, 1002);
                assert_eq!(reason, "bad juju");
                let echoed_code = u16::from_be_bytes([echo[2], echo[3]]);
                assert_eq!(echoed_code, 1002);
            }
            _ => panic!("expected Close event"),
        }
    }

    #[test]
    fn close_frame_with_truncated_code_is_rejected() {
        let mut session = Session::new();
        let buf = masked_frame(Opcode::Close, true, &[0x01]);
        assert!(matches!(session.feed(&buf, 1 << 20), Err(ChopinError::WsProtocolError(_))));
    }
}
