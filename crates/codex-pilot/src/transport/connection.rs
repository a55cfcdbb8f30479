use tracing::debug;

use super::Endpoint;
use super::frame::{FrameDecoder, Opcode, encode_masked};
use super::handshake::{HandshakeOutcome, generate_key, parse_upgrade_response, upgrade_request};

pub const SERVER_CLOSED_REASON: &str = "Server closed connection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Opened,
    Text(String),
    /// Bytes to write back to the socket (pong replies).
    Outbound(Vec<u8>),
    Closed { reason: String },
    Failed { reason: String },
}

/// Sans-IO WebSocket client connection: handshake gate, receive buffer and
/// control-frame handling. The socket task feeds it bytes and writes whatever
/// it hands back.
#[derive(Debug, Default)]
pub struct WsConnection {
    handshake_complete: bool,
    handshake_buffer: Vec<u8>,
    decoder: FrameDecoder,
    fragments: Option<Vec<u8>>,
    closed: bool,
}

impl WsConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the server accepted the upgrade, even if it closed since.
    pub fn was_opened(&self) -> bool {
        self.handshake_complete
    }

    pub fn is_open(&self) -> bool {
        self.handshake_complete && !self.closed
    }

    /// Start a fresh handshake and return the upgrade request bytes.
    pub fn handshake_request(&mut self, endpoint: &Endpoint) -> Vec<u8> {
        self.reset();
        let key = generate_key();
        upgrade_request(&endpoint.host, endpoint.port, &endpoint.path, &key).into_bytes()
    }

    pub fn receive(&mut self, bytes: &[u8]) -> Vec<WsEvent> {
        if self.closed {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.handshake_complete {
            self.handshake_buffer.extend_from_slice(bytes);
            match parse_upgrade_response(&self.handshake_buffer) {
                HandshakeOutcome::Incomplete => return events,
                HandshakeOutcome::Rejected(reason) => {
                    self.closed = true;
                    self.handshake_buffer.clear();
                    events.push(WsEvent::Failed { reason });
                    return events;
                }
                HandshakeOutcome::Accepted { consumed } => {
                    self.handshake_complete = true;
                    let leftover = self.handshake_buffer.split_off(consumed);
                    self.handshake_buffer.clear();
                    self.decoder.extend(&leftover);
                    events.push(WsEvent::Opened);
                }
            }
        } else {
            self.decoder.extend(bytes);
        }

        self.drain_frames(&mut events);
        events
    }

    /// Masked text frame, or `None` while the handshake is still pending.
    pub fn encode_text(&self, text: &str) -> Option<Vec<u8>> {
        if !self.is_open() {
            return None;
        }
        Some(encode_masked(Opcode::Text, text.as_bytes()))
    }

    pub fn encode_close(&self) -> Option<Vec<u8>> {
        if !self.is_open() {
            return None;
        }
        Some(encode_masked(Opcode::Close, &1000u16.to_be_bytes()))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn drain_frames(&mut self, events: &mut Vec<WsEvent>) {
        loop {
            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(err) => {
                    self.closed = true;
                    self.decoder.clear();
                    events.push(WsEvent::Failed {
                        reason: err.to_string(),
                    });
                    return;
                }
            };
            match frame.opcode {
                Opcode::Text if frame.fin => {
                    events.push(WsEvent::Text(
                        String::from_utf8_lossy(&frame.payload).into_owned(),
                    ));
                }
                Opcode::Text => self.fragments = Some(frame.payload),
                Opcode::Continuation => {
                    let Some(buffer) = self.fragments.as_mut() else {
                        debug!("continuation frame without a started message");
                        continue;
                    };
                    buffer.extend_from_slice(&frame.payload);
                    if frame.fin {
                        let payload = self.fragments.take().unwrap_or_default();
                        events.push(WsEvent::Text(String::from_utf8_lossy(&payload).into_owned()));
                    }
                }
                Opcode::Ping => {
                    events.push(WsEvent::Outbound(encode_masked(Opcode::Pong, &frame.payload)));
                }
                Opcode::Close => {
                    self.closed = true;
                    events.push(WsEvent::Closed {
                        reason: close_reason(&frame.payload),
                    });
                    return;
                }
                Opcode::Pong | Opcode::Binary | Opcode::Reserved(_) => {
                    debug!(opcode = ?frame.opcode, "ignoring websocket frame");
                }
            }
        }
    }
}

fn close_reason(payload: &[u8]) -> String {
    let text = payload
        .get(2..)
        .map(|reason| String::from_utf8_lossy(reason).trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        SERVER_CLOSED_REASON.to_string()
    } else {
        format!("{SERVER_CLOSED_REASON}: {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::encode_frame;
    use pretty_assertions::assert_eq;

    const ACCEPT: &[u8] =
        b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

    fn endpoint() -> Endpoint {
        Endpoint::parse("ws://127.0.0.1:8080").expect("endpoint")
    }

    fn opened() -> WsConnection {
        let mut connection = WsConnection::new();
        let _ = connection.handshake_request(&endpoint());
        assert_eq!(connection.receive(ACCEPT), vec![WsEvent::Opened]);
        connection
    }

    #[test]
    fn send_is_gated_on_handshake() {
        let mut connection = WsConnection::new();
        let _ = connection.handshake_request(&endpoint());
        assert_eq!(connection.encode_text("{}"), None);

        assert_eq!(connection.receive(ACCEPT), vec![WsEvent::Opened]);
        let frame = connection.encode_text("{}").expect("open connection encodes");
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 0x80 | 2);
    }

    #[test]
    fn frames_coalesced_with_handshake_response_are_decoded() {
        let mut connection = WsConnection::new();
        let _ = connection.handshake_request(&endpoint());

        let mut bytes = ACCEPT.to_vec();
        bytes.extend(encode_frame(Opcode::Text, br#"{"id":1,"result":{}}"#, None));
        assert_eq!(
            connection.receive(&bytes),
            vec![
                WsEvent::Opened,
                WsEvent::Text(r#"{"id":1,"result":{}}"#.to_string())
            ]
        );
    }

    #[test]
    fn handshake_split_across_reads() {
        let mut connection = WsConnection::new();
        let _ = connection.handshake_request(&endpoint());
        assert!(connection.receive(&ACCEPT[..10]).is_empty());
        assert_eq!(connection.receive(&ACCEPT[10..]), vec![WsEvent::Opened]);
    }

    #[test]
    fn rejected_handshake_fails_and_stays_closed() {
        let mut connection = WsConnection::new();
        let _ = connection.handshake_request(&endpoint());
        let events = connection.receive(b"HTTP/1.1 403 Forbidden\r\n\r\n");
        assert!(matches!(events.as_slice(), [WsEvent::Failed { .. }]));
        assert!(!connection.was_opened());
        assert_eq!(connection.encode_text("x"), None);
    }

    #[test]
    fn ping_is_answered_with_masked_pong_echo() {
        let mut connection = opened();
        let events = connection.receive(&encode_frame(Opcode::Ping, b"beat", None));
        let [WsEvent::Outbound(bytes)] = events.as_slice() else {
            panic!("expected a single pong, got {events:?}");
        };

        let mut decoder = FrameDecoder::new();
        decoder.extend(bytes);
        let pong = decoder.next_frame().expect("decode").expect("pong frame");
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, b"beat".to_vec());
        assert_eq!(bytes[1] & 0x80, 0x80);
    }

    #[test]
    fn close_frame_ends_the_connection() {
        let mut connection = opened();
        let mut bytes = encode_frame(Opcode::Close, &1000u16.to_be_bytes(), None);
        bytes.extend(encode_frame(Opcode::Text, b"late", None));

        assert_eq!(
            connection.receive(&bytes),
            vec![WsEvent::Closed {
                reason: SERVER_CLOSED_REASON.to_string()
            }]
        );
        assert!(connection.was_opened());
        assert!(!connection.is_open());
        assert!(connection.receive(&encode_frame(Opcode::Text, b"more", None)).is_empty());
    }

    #[test]
    fn absurd_frame_length_fails_the_connection() {
        let mut connection = opened();
        let mut header = vec![0x81, 127];
        header.extend_from_slice(&(1u64 << 62).to_be_bytes());

        let events = connection.receive(&header);
        assert!(matches!(
            events.as_slice(),
            [WsEvent::Failed { reason }] if reason.contains("too large")
        ));
        assert!(!connection.is_open());
        assert!(connection.receive(&[0u8; 64]).is_empty());
    }

    #[test]
    fn fragmented_text_is_reassembled() {
        let mut connection = opened();
        let mut first = encode_frame(Opcode::Text, b"hel", None);
        first[0] &= 0x7F;
        let last = encode_frame(Opcode::Continuation, b"lo", None);

        assert!(connection.receive(&first).is_empty());
        assert_eq!(connection.receive(&last), vec![WsEvent::Text("hello".to_string())]);
    }

    #[test]
    fn reset_behaves_like_a_fresh_instance() {
        let mut connection = opened();
        connection.receive(&[0x81]);
        connection.reset();

        assert!(!connection.was_opened());
        assert_eq!(connection.encode_text("x"), None);
        let _ = connection.handshake_request(&endpoint());
        assert_eq!(connection.receive(ACCEPT), vec![WsEvent::Opened]);
    }
}
