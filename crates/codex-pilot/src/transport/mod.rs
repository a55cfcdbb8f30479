//! Frame transport: WebSocket over a raw TCP (or TLS) stream.
//!
//! The handshake is written by hand so that no extension negotiation is ever
//! offered. Everything above this module sees text messages and
//! open/disconnect events only.

mod connection;
pub mod frame;
pub mod handshake;
mod socket;

pub use connection::{SERVER_CLOSED_REASON, WsConnection, WsEvent};
pub use socket::{TransportCommand, TransportEvent, TransportEventKind, TransportHandle};

use url::Url;

use crate::error::{PilotError, Result};

/// Where to connect, derived from a `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)?;
        let tls = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(PilotError::InvalidUrl(format!(
                    "URL must use ws:// or wss:// scheme, got: {other}"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| PilotError::InvalidUrl(format!("URL has no host: {raw}")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            path,
            tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_endpoint_with_port() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:8080").expect("endpoint");
        assert_eq!(
            endpoint,
            Endpoint {
                host: "127.0.0.1".to_string(),
                port: 8080,
                path: "/".to_string(),
                tls: false,
            }
        );
    }

    #[test]
    fn secure_endpoint_defaults_to_443_and_keeps_query() {
        let endpoint = Endpoint::parse("wss://codex.example.com/rpc?token=abc").expect("endpoint");
        assert_eq!(endpoint.port, 443);
        assert!(endpoint.tls);
        assert_eq!(endpoint.path, "/rpc?token=abc");
    }

    #[test]
    fn rejects_non_websocket_schemes() {
        assert!(matches!(
            Endpoint::parse("http://localhost:8080"),
            Err(PilotError::InvalidUrl(_))
        ));
    }
}
