//! In-memory connector for driving connections without sockets.
//!
//! Each successful dial yields a [`ServerEnd`] on the channel returned by
//! [`MemoryConnector::new`]; the test plays the exchange through it.

use crate::error::{WsError, WsResult};
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use futures_util::{sink, stream};
use mdstream_core::StreamKey;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

/// Exchange side of one in-memory session.
pub struct ServerEnd {
    pub key: StreamKey,
    to_client: mpsc::UnboundedSender<WsResult<Message>>,
    from_client: mpsc::UnboundedReceiver<Message>,
}

impl ServerEnd {
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(Message::Text(text.into()))).is_ok()
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Server-initiated close frame.
    pub fn close(&self) -> bool {
        self.to_client.send(Ok(Message::Close(None))).is_ok()
    }

    /// Transport-level read error.
    pub fn fail(&self, reason: &str) -> bool {
        self.to_client
            .send(Err(WsError::ConnectionFailed(reason.to_string())))
            .is_ok()
    }

    /// Next frame the client wrote (text, ping, close...).
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.from_client.try_recv().ok()
    }
}

/// Connector whose sessions live entirely in memory.
pub struct MemoryConnector {
    sessions: mpsc::UnboundedSender<ServerEnd>,
    /// Outcomes for upcoming dials; empty means "accept".
    plan: Mutex<VecDeque<bool>>,
    refuse_all: Mutex<bool>,
    auto_pong: bool,
    connects: AtomicUsize,
    dial_times: Mutex<Vec<Instant>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: tx,
                plan: Mutex::new(VecDeque::new()),
                refuse_all: Mutex::new(false),
                auto_pong: true,
                connects: AtomicUsize::new(0),
                dial_times: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    /// Do not answer pings; lets tests exercise the heartbeat timeout.
    pub fn without_auto_pong(mut self) -> Self {
        self.auto_pong = false;
        self
    }

    /// Refuse the next `n` dials.
    pub fn refuse_next(&self, n: usize) {
        self.plan.lock().extend(std::iter::repeat(false).take(n));
    }

    pub fn refuse_all(&self, refuse: bool) {
        *self.refuse_all.lock() = refuse;
    }

    /// Dials observed so far, successful or not.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// When each dial happened, on the Tokio clock.
    pub fn dial_times(&self) -> Vec<Instant> {
        self.dial_times.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, key: &StreamKey) -> WsResult<Transport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.dial_times.lock().push(Instant::now());

        let accept = !*self.refuse_all.lock() && self.plan.lock().pop_front().unwrap_or(true);
        if !accept {
            return Err(WsError::ConnectionFailed("connection refused".to_string()));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel::<WsResult<Message>>();
        let (client_tx, from_client) = mpsc::unbounded_channel::<Message>();

        // Weak so dropping the ServerEnd ends the client's stream.
        let pong_tx = to_client.downgrade();
        let auto_pong = self.auto_pong;
        let frame_sink = sink::unfold(client_tx, move |tx, msg: Message| {
            let pong_tx = pong_tx.clone();
            async move {
                if let (true, Message::Ping(payload)) = (auto_pong, &msg) {
                    if let Some(pong_tx) = pong_tx.upgrade() {
                        let _ = pong_tx.send(Ok(Message::Pong(payload.clone())));
                    }
                }
                let _ = tx.send(msg);
                Ok::<_, WsError>(tx)
            }
        });
        let frame_stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });

        let _ = self.sessions.send(ServerEnd {
            key: key.clone(),
            to_client,
            from_client,
        });

        Ok(Transport::new(Box::pin(frame_sink), Box::pin(frame_stream)))
    }
}
