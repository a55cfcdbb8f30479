//! WebSocket opening handshake.
//!
//! The upgrade request never offers `Sec-WebSocket-Extensions`: the app-server
//! rejects permessage-deflate negotiation, which stock clients add by default.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Random base64 `Sec-WebSocket-Key` (16 random bytes).
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

pub fn upgrade_request(host: &str, port: u16, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The response head has not fully arrived yet.
    Incomplete,
    /// Upgrade accepted; `consumed` bytes belong to the HTTP response head.
    Accepted { consumed: usize },
    Rejected(String),
}

pub fn parse_upgrade_response(buf: &[u8]) -> HandshakeOutcome {
    let Some(end) = find_subsequence(buf, HEADER_TERMINATOR) else {
        if buf.len() > MAX_RESPONSE_HEAD {
            return HandshakeOutcome::Rejected("Handshake response head too large".to_string());
        }
        return HandshakeOutcome::Incomplete;
    };

    let head = String::from_utf8_lossy(&buf[..end]);
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default().trim().to_string();
    let status_code = status_line.split_whitespace().nth(1);
    if status_code != Some("101") {
        return HandshakeOutcome::Rejected(format!(
            "Unexpected handshake response: {status_line}"
        ));
    }

    let upgraded = lines
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        });
    if !upgraded {
        return HandshakeOutcome::Rejected(
            "Handshake response missing Upgrade: websocket".to_string(),
        );
    }

    HandshakeOutcome::Accepted {
        consumed: end + HEADER_TERMINATOR.len(),
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
