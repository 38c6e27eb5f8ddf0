//! Mock exchange WebSocket server for integration tests.
//!
//! - Accepts connections and records the request path of each
//! - Pushes scripted text frames to every open connection
//! - Can drop every open connection to simulate an outage
//! - Records frames sent by clients

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCmd {
    Push(String),
    Kick,
}

#[derive(Default)]
struct Recorded {
    paths: Vec<String>,
    received: Vec<String>,
    closes: u32,
    open: u32,
}

pub struct MockWsServer {
    addr: SocketAddr,
    cmds: broadcast::Sender<ServerCmd>,
    recorded: Arc<Mutex<Recorded>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (cmds, _) = broadcast::channel(256);
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let accept_cmds = cmds.clone();
        let accept_recorded = recorded.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    accept_cmds.subscribe(),
                    accept_recorded.clone(),
                ));
            }
        });

        Self {
            addr,
            cmds,
            recorded,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.cmds.send(ServerCmd::Push(text.into()));
    }

    /// Drop every open connection without a close handshake.
    pub fn kick_all(&self) {
        let _ = self.cmds.send(ServerCmd::Kick);
    }

    pub fn paths(&self) -> Vec<String> {
        self.recorded.lock().paths.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.recorded.lock().paths.len()
    }

    pub fn open_connections(&self) -> u32 {
        self.recorded.lock().open
    }

    pub fn close_frames(&self) -> u32 {
        self.recorded.lock().closes
    }

    pub fn received(&self) -> Vec<String> {
        self.recorded.lock().received.clone()
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
        self.kick_all();
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut cmds: broadcast::Receiver<ServerCmd>,
    recorded: Arc<Mutex<Recorded>>,
) {
    let path_log = recorded.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path_log.lock().paths.push(req.uri().path().to_string());
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };
    recorded.lock().open += 1;

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => recorded.lock().received.push(text),
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    recorded.lock().closes += 1;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            cmd = cmds.recv() => match cmd {
                Ok(ServerCmd::Push(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCmd::Kick) | Err(_) => break,
            },
        }
    }
    recorded.lock().open -= 1;
}
