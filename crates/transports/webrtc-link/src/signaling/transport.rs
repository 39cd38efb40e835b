//! WebSocket transport for the signaling channel
//!
//! A connected socket is exposed as a pair of queues: text frames to send and
//! frames received. The channel never sees the socket itself, so tests can
//! substitute an in-memory connector.

use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Frame delivered by a connected socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame
    Text(String),
    /// Socket closed, with the close reason or transport error if any
    Closed(Option<String>),
}

/// A live socket as a pair of queues
///
/// Dropping the connection closes the socket.
#[derive(Debug)]
pub struct WsConnection {
    /// Text frames to transmit
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Opens signaling sockets
#[async_trait]
pub trait WsConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<WsConnection>;
}

/// tokio-tungstenite connector
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<WsConnection> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(sender_task(write, outbound_rx));
        tokio::spawn(receiver_task(read, inbound_tx));

        Ok(WsConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Sender task: sends queued text frames to the WebSocket
///
/// Closes the socket once the queue's sender is dropped.
async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = write.send(Message::Text(text)).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
    }

    if let Err(e) = write.close().await {
        debug!("WebSocket close failed: {}", e);
    }

    debug!("Sender task terminated");
}

/// Receiver task: forwards text frames until the socket or the reader goes away
async fn receiver_task(
    mut read: futures::stream::SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<InboundFrame>,
) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if tx.send(InboundFrame::Text(text)).is_err() {
                    debug!("Signaling reader dropped");
                    return;
                }
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => {
                    if tx.send(InboundFrame::Text(text)).is_err() {
                        return;
                    }
                }
                Err(_) => warn!("Dropping non-UTF-8 binary signaling frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!("WebSocket connection closed");
                break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
            }
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break Some(e.to_string());
            }
            None => break None,
            Some(Ok(_)) => {}
        }
    };

    let _ = tx.send(InboundFrame::Closed(reason));
    debug!("Receiver task terminated");
}
