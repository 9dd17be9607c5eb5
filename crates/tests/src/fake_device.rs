//! In-process stand-in for a Maxx amplifier
//!
//! Serves the `/socket/level` and `/socket/datapoll` WebSocket endpoints and
//! the ampenable REST route. Tests push telemetry frames and inspect the
//! commands the service sent.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const TOKEN: &str = "secret";

/// A command received on the REST endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub device_id: usize,
    pub token: Option<String>,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Close,
}

#[derive(Clone)]
struct Rest {
    received: Arc<Mutex<Vec<Received>>>,
    status: Arc<AtomicU16>,
}

pub struct FakeDevice {
    ws_addr: String,
    rest_addr: String,
    pushers: HashMap<&'static str, broadcast::Sender<Push>>,
    connections: Arc<Mutex<HashMap<String, usize>>>,
    rest: Rest,
}

impl FakeDevice {
    pub async fn start() -> Self {
        let mut pushers = HashMap::new();
        pushers.insert("/socket/level", broadcast::channel(16).0);
        pushers.insert("/socket/datapoll", broadcast::channel(16).0);

        let connections = Arc::new(Mutex::new(HashMap::new()));
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_ws(ws_listener, pushers.clone(), connections.clone()));

        let rest = Rest {
            received: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(AtomicU16::new(StatusCode::NO_CONTENT.as_u16())),
        };
        let app = Router::new()
            .route("/rest-api/settings/channel/{id}/ampenable", put(ampenable))
            .with_state(rest.clone());
        let rest_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rest_addr = rest_listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(rest_listener, app).await.unwrap();
        });

        Self {
            ws_addr,
            rest_addr,
            pushers,
            connections,
            rest,
        }
    }

    pub fn ws_addr(&self) -> &str {
        &self.ws_addr
    }

    pub fn rest_addr(&self) -> &str {
        &self.rest_addr
    }

    /// Number of WebSocket connections accepted on `path` so far
    pub fn connections(&self, path: &str) -> usize {
        self.connections.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Send a text frame to every open connection on `path`
    pub fn push(&self, path: &str, message: impl Into<String>) {
        // No subscribers just means nobody is connected yet
        let _ = self.pushers[path].send(Push::Text(message.into()));
    }

    /// Close every open connection on `path`
    pub fn disconnect(&self, path: &str) {
        let _ = self.pushers[path].send(Push::Close);
    }

    pub fn set_status(&self, status: StatusCode) {
        self.rest.status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Received> {
        self.rest.received.lock().unwrap().clone()
    }
}

async fn serve_ws(
    listener: TcpListener,
    pushers: HashMap<&'static str, broadcast::Sender<Push>>,
    connections: Arc<Mutex<HashMap<String, usize>>>,
) {
    while let Ok((tcp, _)) = listener.accept().await {
        tokio::spawn(serve_connection(tcp, pushers.clone(), connections.clone()));
    }
}

async fn serve_connection(
    tcp: TcpStream,
    pushers: HashMap<&'static str, broadcast::Sender<Push>>,
    connections: Arc<Mutex<HashMap<String, usize>>>,
) {
    let mut path = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let Ok(mut ws) = accept_hdr_async(tcp, callback).await else {
        return;
    };
    let Some(pusher) = pushers.get(path.as_str()) else {
        return;
    };

    // Subscribe before the connection becomes visible to tests
    let mut rx = pusher.subscribe();
    *connections.lock().unwrap().entry(path).or_default() += 1;

    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Ok(Push::Text(text)) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Close) | Err(_) => {
                    let _ = ws.close(None).await;
                    while ws.next().await.is_some() {}
                    return;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

async fn ampenable(
    State(rest): State<Rest>,
    Path(device_id): Path<usize>,
    headers: HeaderMap,
    Json(value): Json<serde_json::Value>,
) -> StatusCode {
    let token = headers
        .get("token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    rest.received.lock().unwrap().push(Received {
        device_id,
        token,
        value,
    });

    StatusCode::from_u16(rest.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

/// Poll `condition` until it holds, panicking after `timeout`
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn level(levels: &[f64]) -> String {
    let level: Vec<Vec<f64>> = levels.iter().map(|l| vec![*l; 4]).collect();
    serde_json::json!({ "level": level, "reduction": [], "psu": 48.1, "thermo": 39.5 }).to_string()
}

pub fn datapoll(enabled: &[bool]) -> String {
    let channel: Vec<_> = enabled
        .iter()
        .map(|e| serde_json::json!({ "ampenable": { "value": e }, "mute": { "value": false } }))
        .collect();
    serde_json::json!({ "settings": { "channel": channel } }).to_string()
}
