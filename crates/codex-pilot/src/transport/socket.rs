use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::connection::{SERVER_CLOSED_REASON, WsConnection, WsEvent};
use super::Endpoint;
use crate::error::{PilotError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 16 * 1024;

type TransportReader = Box<dyn AsyncRead + Send + Unpin>;
type TransportWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug)]
pub enum TransportCommand {
    Send(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Message(String),
    Disconnected { reason: String },
    ConnectFailed { reason: String },
}

/// Event from one socket, tagged with the epoch it was opened under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub epoch: u64,
    pub kind: TransportEventKind,
}

/// Owner-side handle of one socket task. Socket IO runs on its own task and
/// reports back through the event channel only.
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn open(
        endpoint: Endpoint,
        epoch: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            info!(host = %endpoint.host, port = endpoint.port, tls = endpoint.tls, "opening app-server socket");
            match timeout(CONNECT_TIMEOUT, connect_stream(&endpoint)).await {
                Ok(Ok((reader, writer))) => {
                    run_connection(reader, writer, &endpoint, epoch, events, command_rx).await;
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "app-server connect failed");
                    let _ = events.send(TransportEvent {
                        epoch,
                        kind: TransportEventKind::ConnectFailed {
                            reason: err.to_string(),
                        },
                    });
                }
                Err(_) => {
                    warn!("app-server connect timed out");
                    let _ = events.send(TransportEvent {
                        epoch,
                        kind: TransportEventKind::ConnectFailed {
                            reason: "Connection timeout".to_string(),
                        },
                    });
                }
            }
        });

        Self {
            commands,
            task: Some(task),
        }
    }

    /// Wrap an already-connected stream pair (tests, custom tunnels).
    pub fn with_io<R, W>(
        reader: R,
        writer: W,
        endpoint: Endpoint,
        epoch: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            run_connection(reader, writer, &endpoint, epoch, events, command_rx).await;
        });
        Self {
            commands,
            task: Some(task),
        }
    }

    /// Queue a text message. Dropped silently until the handshake completes.
    pub fn send(&self, text: String) {
        let _ = self.commands.send(TransportCommand::Send(text));
    }

    /// Send a close frame and let the socket task wind down on its own.
    pub fn close(mut self) {
        let _ = self.commands.send(TransportCommand::Close);
        self.task.take();
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn connect_stream(endpoint: &Endpoint) -> Result<(TransportReader, TransportWriter)> {
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    tcp.set_nodelay(true)?;

    if !endpoint.tls {
        let (reader, writer) = tcp.into_split();
        return Ok((Box::new(reader), Box::new(writer)));
    }

    let connector = tls_connector()?;
    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|err| PilotError::Tls(format!("invalid server name: {err}")))?;
    let stream = connector.connect(server_name, tcp).await?;
    let (reader, writer) = tokio::io::split(stream);
    Ok((Box::new(reader), Box::new(writer)))
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|err| PilotError::Tls(err.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

async fn run_connection<R, W>(
    mut reader: R,
    mut writer: W,
    endpoint: &Endpoint,
    epoch: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut connection = WsConnection::new();
    let request = connection.handshake_request(endpoint);
    let emit = |kind: TransportEventKind| {
        let _ = events.send(TransportEvent { epoch, kind });
    };

    if let Err(err) = writer.write_all(&request).await {
        emit(TransportEventKind::ConnectFailed {
            reason: err.to_string(),
        });
        return;
    }

    let mut buf = vec![0u8; READ_CHUNK];
    let reason = loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let count = match read {
                    Ok(0) => break SERVER_CLOSED_REASON.to_string(),
                    Ok(count) => count,
                    Err(err) => break err.to_string(),
                };
                if let Err(reason) =
                    forward_events(connection.receive(&buf[..count]), &mut writer, &emit).await
                {
                    break reason;
                }
            }
            command = commands.recv() => match command {
                Some(TransportCommand::Send(text)) => {
                    let Some(bytes) = connection.encode_text(&text) else {
                        debug!("dropping outbound message before websocket handshake");
                        continue;
                    };
                    if let Err(err) = writer.write_all(&bytes).await {
                        break err.to_string();
                    }
                }
                Some(TransportCommand::Close) | None => {
                    if let Some(bytes) = connection.encode_close() {
                        let _ = writer.write_all(&bytes).await;
                    }
                    let _ = writer.shutdown().await;
                    debug!("app-server socket closed locally");
                    return;
                }
            }
        }
    };

    if connection.was_opened() {
        info!(%reason, "app-server socket disconnected");
        emit(TransportEventKind::Disconnected { reason });
    } else {
        warn!(%reason, "app-server handshake failed");
        emit(TransportEventKind::ConnectFailed { reason });
    }
}

async fn forward_events<W, F>(
    ws_events: Vec<WsEvent>,
    writer: &mut W,
    emit: &F,
) -> std::result::Result<(), String>
where
    W: AsyncWrite + Unpin,
    F: Fn(TransportEventKind),
{
    for event in ws_events {
        match event {
            WsEvent::Opened => emit(TransportEventKind::Opened),
            WsEvent::Text(text) => emit(TransportEventKind::Message(text)),
            WsEvent::Outbound(bytes) => {
                writer.write_all(&bytes).await.map_err(|err| err.to_string())?;
            }
            WsEvent::Closed { reason } | WsEvent::Failed { reason } => return Err(reason),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::{FrameDecoder, Opcode, encode_frame};
    use tokio::io::duplex;

    const ACCEPT: &[u8] =
        b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

    async fn read_request_head<R: AsyncRead + Unpin>(reader: &mut R) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            reader.read_exact(&mut byte).await.expect("request byte");
            head.push(byte[0]);
        }
        String::from_utf8(head).expect("utf8 head")
    }

    #[tokio::test]
    async fn handshake_messages_and_server_close_flow_through_events() {
        let (client_io, server_io) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (mut server_read, mut server_write) = tokio::io::split(server_io);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::parse("ws://127.0.0.1:8080").expect("endpoint");

        let handle = TransportHandle::with_io(client_read, client_write, endpoint, 7, events_tx);
        handle.send("before-open".to_string());

        let head = read_request_head(&mut server_read).await;
        assert!(head.contains("Sec-WebSocket-Version: 13"));

        let mut reply = ACCEPT.to_vec();
        reply.extend(encode_frame(Opcode::Text, b"hello", None));
        server_write.write_all(&reply).await.expect("server write");

        let opened = events_rx.recv().await.expect("opened");
        assert_eq!(opened.epoch, 7);
        assert_eq!(opened.kind, TransportEventKind::Opened);
        assert_eq!(
            events_rx.recv().await.map(|event| event.kind),
            Some(TransportEventKind::Message("hello".to_string()))
        );

        handle.send("after-open".to_string());
        let mut decoder = FrameDecoder::new();
        let frame = loop {
            if let Some(frame) = decoder.next_frame().expect("decode") {
                break frame;
            }
            let mut chunk = [0u8; 256];
            let count = server_read.read(&mut chunk).await.expect("server read");
            decoder.extend(&chunk[..count]);
        };
        assert_eq!(frame.payload, b"after-open".to_vec());

        drop(server_write);
        drop(server_read);
        assert_eq!(
            events_rx.recv().await.map(|event| event.kind),
            Some(TransportEventKind::Disconnected {
                reason: SERVER_CLOSED_REASON.to_string()
            })
        );
    }

    #[tokio::test]
    async fn rejected_upgrade_reports_connect_failure() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (mut server_read, mut server_write) = tokio::io::split(server_io);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::parse("ws://127.0.0.1:8080").expect("endpoint");

        let _handle = TransportHandle::with_io(client_read, client_write, endpoint, 1, events_tx);
        let _ = read_request_head(&mut server_read).await;
        server_write
            .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
            .await
            .expect("server write");

        let event = events_rx.recv().await.expect("failure event");
        assert!(matches!(
            event.kind,
            TransportEventKind::ConnectFailed { ref reason } if reason.contains("400")
        ));
    }
}
