//! WebSocket transport for one diagram session.
//!
//! Owns the socket and nothing else: frames go out as JSON text, inbound
//! frames are decoded into [`InboundEvent`]s and handed to the runtime over
//! an mpsc channel. Join sequencing, suppression and reconnect policy live
//! above this layer.
//!
//! ```text
//!  send() ──► outgoing mpsc ──► writer task ──► socket
//!                                                 │
//!  take_event_rx() ◄── event mpsc ◄── reader task ◄┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError};

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Inbound(InboundEvent),
}

pub struct SyncClient {
    url: String,
    token: Option<String>,
    connected: Arc<AtomicBool>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
    event_tx: mpsc::Sender<ChannelEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            url: url.into(),
            token,
            connected: Arc::new(AtomicBool::new(false)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            tasks: Vec::new(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the socket and spawn the reader and writer tasks. Any previous
    /// connection is torn down first.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.disconnect();

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::ConnectFailed(e.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ProtocolError::ConnectFailed(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ProtocolError::ConnectFailed(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        // Writer task: forward outgoing channel to the socket
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        self.connected.store(true, Ordering::Release);
        let _ = self.event_tx.send(ChannelEvent::Connected).await;

        // Reader task: decode inbound frames
        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match InboundEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(ChannelEvent::Inbound(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Dropping undecodable frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            connected.store(false, Ordering::Release);
            let _ = event_tx.send(ChannelEvent::Disconnected).await;
        });

        self.tasks = vec![writer, reader];
        log::info!("Connected to {}", self.url);
        Ok(())
    }

    /// Queue one event for the writer task.
    pub async fn send(&self, event: &OutboundEvent) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let encoded = event.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Drop the socket without reporting `Disconnected`.
    pub fn disconnect(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outgoing_tx = None;
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
