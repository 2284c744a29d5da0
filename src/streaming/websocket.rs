// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! WebSocket server for live view and the event feed
//!
//! - `/live/{camera_id}` binary JPEG frames, `?overlay=1` draws detections
//! - `/events` JSON detection, health and alert messages

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::hub::{BroadcastHub, LiveFrame};
use super::LiveConfig;
use crate::core::EventBus;
use crate::events::draw_detections;
use crate::stream::encode_jpeg;

/// Endpoint a client asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Live { camera_id: String, overlay: bool },
    Events,
}

/// Parse a request path with optional query string
pub fn parse_route(path: &str) -> Option<Route> {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path, ""),
    };
    let path = path.trim_end_matches('/');

    if path == "/events" {
        return Some(Route::Events);
    }

    let camera_id = path.strip_prefix("/live/")?;
    if camera_id.is_empty() || camera_id.contains('/') {
        return None;
    }

    let overlay = query
        .split('&')
        .any(|kv| kv == "overlay" || kv == "overlay=1" || kv == "overlay=true");

    Some(Route::Live {
        camera_id: camera_id.to_string(),
        overlay,
    })
}

struct ClientHandle {
    addr: SocketAddr,
    /// `None` until the handshake completes
    route: Option<Route>,
}

/// WebSocket server over the broadcast hub and the event bus
pub struct LiveViewServer {
    port: u16,
    max_clients: usize,
    jpeg_quality: u8,
    hub: Arc<BroadcastHub>,
    bus: Arc<EventBus>,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
}

impl LiveViewServer {
    pub fn new(config: &LiveConfig, hub: Arc<BroadcastHub>, bus: Arc<EventBus>) -> Self {
        Self {
            port: config.websocket_port,
            max_clients: config.websocket_max_clients,
            jpeg_quality: config.jpeg_quality,
            hub,
            bus,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind and serve in the background until `shutdown` fires. Returns the bound address.
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<SocketAddr> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;

        info!("Live view listening on ws://{}", local);

        let clients = self.clients.clone();
        let max_clients = self.max_clients;
        let hub = self.hub.clone();
        let bus = self.bus.clone();
        let quality = self.jpeg_quality;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                // the slot is held from accept, handshake included
                                let client_id = {
                                    let mut clients = clients.write().await;
                                    if clients.len() >= max_clients {
                                        warn!("Max clients reached, rejecting connection from {}", addr);
                                        continue;
                                    }
                                    let client_id = uuid::Uuid::new_v4().to_string();
                                    clients.insert(client_id.clone(), ClientHandle { addr, route: None });
                                    client_id
                                };

                                tokio::spawn(handle_connection(
                                    stream,
                                    addr,
                                    client_id,
                                    clients.clone(),
                                    hub.clone(),
                                    bus.clone(),
                                    quality,
                                ));
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Live view server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of viewers per camera
    pub async fn viewers(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for client in self.clients.read().await.values() {
            if let Some(Route::Live { camera_id, .. }) = &client.route {
                *counts.entry(camera_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub async fn client_addrs(&self) -> Vec<SocketAddr> {
        self.clients.read().await.values().map(|c| c.addr).collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    client_id: String,
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
    hub: Arc<BroadcastHub>,
    bus: Arc<EventBus>,
    quality: u8,
) {
    serve_client(stream, addr, &client_id, &clients, &hub, &bus, quality).await;
    clients.write().await.remove(&client_id);
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    client_id: &str,
    clients: &RwLock<HashMap<String, ClientHandle>>,
    hub: &BroadcastHub,
    bus: &EventBus,
    quality: u8,
) {
    let mut route = None;

    let ws_stream = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        let path = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        match parse_route(&path) {
            Some(r) => {
                route = Some(r);
                Ok(resp)
            }
            None => {
                let mut err = ErrorResponse::new(Some(format!("no such endpoint: {}", path)));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        }
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let route = match route {
        Some(r) => r,
        None => return,
    };

    info!("New WebSocket connection from {} (id: {}, {:?})", addr, client_id, route);

    if let Some(client) = clients.write().await.get_mut(client_id) {
        client.route = Some(route.clone());
    }

    match route {
        Route::Live { camera_id, overlay } => {
            serve_live(ws_stream, addr, client_id, &camera_id, overlay, hub, quality).await
        }
        Route::Events => serve_events(ws_stream, addr, client_id, bus).await,
    }

    info!("WebSocket client {} disconnected", addr);
}

/// Handle a text or control message from the client. Returns false when the client is gone.
async fn handle_incoming(
    ws: &mut WebSocketStream<TcpStream>,
    addr: SocketAddr,
    msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> bool {
    match msg {
        Some(Ok(Message::Text(text))) => {
            debug!("Received from {}: {}", addr, text);
            if let Ok(cmd) = serde_json::from_str::<serde_json::Value>(&text) {
                if cmd.get("type").and_then(|v| v.as_str()) == Some("ping") {
                    let pong = serde_json::json!({"type": "pong"});
                    let _ = ws.send(Message::Text(pong.to_string())).await;
                }
            }
            true
        }
        Some(Ok(Message::Ping(data))) => {
            let _ = ws.send(Message::Pong(data)).await;
            true
        }
        Some(Ok(Message::Close(_))) => {
            info!("WebSocket closed by client {}", addr);
            false
        }
        Some(Err(e)) => {
            warn!("WebSocket error from {}: {}", addr, e);
            false
        }
        None => false,
        _ => true,
    }
}

async fn serve_live(
    mut ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    client_id: &str,
    camera_id: &str,
    overlay: bool,
    hub: &BroadcastHub,
    quality: u8,
) {
    let mut sub = hub.subscribe(camera_id, overlay);

    let welcome = serde_json::json!({
        "type": "welcome",
        "client_id": client_id,
        "camera_id": camera_id,
        "overlay": overlay,
        "server": "Vigil",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if let Err(e) = ws.send(Message::Text(welcome.to_string())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws.next() => {
                if !handle_incoming(&mut ws, addr, msg).await {
                    break;
                }
            }
            live = sub.recv() => {
                let live = match live {
                    Some(l) => l,
                    None => {
                        warn!(camera = %camera_id, "Viewer {} fell behind and was dropped", addr);
                        let _ = ws.send(Message::Close(None)).await;
                        break;
                    }
                };

                let jpeg = match tokio::task::spawn_blocking(move || render(live, quality)).await {
                    Ok(Ok(bytes)) => bytes,
                    Ok(Err(e)) => {
                        debug!(camera = %camera_id, "Skipping frame for viewer: {}", e);
                        continue;
                    }
                    Err(e) => {
                        warn!("Render task failed: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws.send(Message::Binary(jpeg)).await {
                    warn!("Failed to send to {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    hub.unsubscribe(sub.id());
}

/// JPEG bytes for a viewer, with boxes drawn when detections are attached
fn render(live: LiveFrame, quality: u8) -> Result<Vec<u8>> {
    match live.detections {
        Some(detections) if !detections.is_empty() => {
            let mut image = (*live.frame.image).clone();
            draw_detections(&mut image, &detections);
            encode_jpeg(&image, quality)
        }
        _ => Ok(live.frame.jpeg(quality)?.as_ref().clone()),
    }
}

async fn serve_events(mut ws: WebSocketStream<TcpStream>, addr: SocketAddr, client_id: &str, bus: &EventBus) {
    let mut rx = bus.subscribe_all();

    let welcome = serde_json::json!({
        "type": "welcome",
        "client_id": client_id,
        "server": "Vigil",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if let Err(e) = ws.send(Message::Text(welcome.to_string())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws.next() => {
                if !handle_incoming(&mut ws, addr, msg).await {
                    break;
                }
            }
            message = rx.recv() => {
                match message {
                    Ok(message) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to encode bus message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws.send(Message::Text(json)).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event feed client {} lagged, skipped {} messages", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tokio_tungstenite::connect_async;
    use crate::stream::Frame;

    #[test]
    fn test_parse_route() {
        assert_eq!(parse_route("/events"), Some(Route::Events));
        assert_eq!(
            parse_route("/live/front-door"),
            Some(Route::Live {
                camera_id: "front-door".into(),
                overlay: false
            })
        );
        assert_eq!(
            parse_route("/live/yard?overlay=1"),
            Some(Route::Live {
                camera_id: "yard".into(),
                overlay: true
            })
        );
        assert_eq!(parse_route("/live/"), None);
        assert_eq!(parse_route("/live/a/b"), None);
        assert_eq!(parse_route("/admin"), None);
    }

    #[test]
    fn test_render_reuses_source_jpeg() {
        let live = LiveFrame {
            frame: Frame::new("cam", RgbImage::new(8, 8)).with_encoded(vec![0xFF, 0xD8, 0xFF, 0xD9]),
            detections: None,
        };
        assert_eq!(render(live, 75).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_live_client_receives_frames() {
        let config = LiveConfig {
            websocket_port: 0,
            ..Default::default()
        };
        let hub = Arc::new(BroadcastHub::new(&config));
        let server = LiveViewServer::new(&config, hub.clone(), Arc::new(EventBus::new(16)));
        let (_tx, rx) = broadcast::channel(1);
        let addr = server.start(rx).await.unwrap();

        let url = format!("ws://127.0.0.1:{}/live/cam", addr.port());
        let (mut client, _) = connect_async(url).await.unwrap();

        // welcome first, then frames once the subscription is in place
        let welcome = client.next().await.unwrap().unwrap();
        assert!(matches!(welcome, Message::Text(_)));
        assert_eq!(hub.subscriber_count("cam"), 1);

        hub.publish("cam", Frame::new("cam", RgbImage::new(16, 16)));
        match client.next().await.unwrap().unwrap() {
            Message::Binary(bytes) => assert_eq!(&bytes[..2], &[0xFF, 0xD8]),
            other => panic!("expected binary frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_path_rejected() {
        let config = LiveConfig {
            websocket_port: 0,
            ..Default::default()
        };
        let hub = Arc::new(BroadcastHub::new(&config));
        let server = LiveViewServer::new(&config, hub, Arc::new(EventBus::new(16)));
        let (_tx, rx) = broadcast::channel(1);
        let addr = server.start(rx).await.unwrap();

        let url = format!("ws://127.0.0.1:{}/admin", addr.port());
        assert!(connect_async(url).await.is_err());
    }

    async fn wait_for_clients(server: &LiveViewServer, count: usize) {
        for _ in 0..200 {
            if server.client_count().await == count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {} client(s), have {}", count, server.client_count().await);
    }

    #[tokio::test]
    async fn test_client_cap_counts_pending_handshakes() {
        let config = LiveConfig {
            websocket_port: 0,
            websocket_max_clients: 2,
            ..Default::default()
        };
        let hub = Arc::new(BroadcastHub::new(&config));
        let server = LiveViewServer::new(&config, hub, Arc::new(EventBus::new(16)));
        let (_tx, rx) = broadcast::channel(1);
        let addr = server.start(rx).await.unwrap();
        let target = format!("127.0.0.1:{}", addr.port());

        // connections that never finish the handshake still take a slot
        let mut idle = Vec::new();
        for _ in 0..4 {
            idle.push(TcpStream::connect(&target).await.unwrap());
        }
        wait_for_clients(&server, 2).await;

        let url = format!("ws://{}/events", target);
        assert!(connect_async(url.clone()).await.is_err());
        assert_eq!(server.client_count().await, 2);

        drop(idle);
        wait_for_clients(&server, 0).await;
        assert!(connect_async(url).await.is_ok());
    }
}
