//! Local WebSocket signaling server double

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Accepts signaling clients and exposes their frames to the test
pub struct SignalingServer {
    url: String,
    received: mpsc::UnboundedReceiver<Value>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl SignalingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind signaling server");
        let addr = listener.local_addr().expect("local addr");

        let (received_tx, received) = mpsc::unbounded_channel();
        let clients = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let clients = clients.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        continue;
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);

                    let (tx, rx) = mpsc::unbounded_channel();
                    clients.lock().push(tx);
                    tokio::spawn(serve_client(ws, rx, received_tx.clone()));
                }
            })
        };

        Self {
            url: format!("ws://{}", addr),
            received,
            clients,
            accepted,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Send a JSON frame to every connected client
    pub fn broadcast(&self, frame: Value) {
        let text = frame.to_string();
        self.clients
            .lock()
            .retain(|tx| tx.send(Message::Text(text.clone())).is_ok());
    }

    /// Close every client connection from the server side
    pub fn drop_clients(&self) {
        for tx in self.clients.lock().drain(..) {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Next frame from any client
    pub async fn recv(&mut self, timeout: Duration) -> Option<Value> {
        tokio::time::timeout(timeout, self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame whose `type` is `kind`, skipping others
    pub async fn recv_type(&mut self, kind: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.recv(remaining).await?;
            if frame["type"] == kind {
                return Some(frame);
            }
        }
    }
}

impl Drop for SignalingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_client(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    received: mpsc::UnboundedSender<Value>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(Message::Close(frame)) => {
                    let _ = write.send(Message::Close(frame)).await;
                    break;
                }
                Some(msg) => {
                    if write.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = received.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
