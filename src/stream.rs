use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use tokio::sync::broadcast;

// ── Broadcast hub ────────────────────────────────────────────────────────────
// Fan-out over a bounded tokio broadcast channel. The payload is serialized
// once by the caller; a subscriber that cannot keep up lags and loses backlog
// instead of blocking the ingest pipeline.

pub struct Broadcaster {
    tx: broadcast::Sender<String>,
    clients: AtomicUsize,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Broadcaster {
            tx,
            clients: AtomicUsize::new(0),
        }
    }

    pub fn send_message(&self, msg: &str) {
        // Err only means no subscriber is listening right now.
        let _ = self.tx.send(msg.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn register(&self) -> usize {
        self.clients.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn unregister(&self) -> usize {
        self.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

// ── WebSocket session actor ──────────────────────────────────────────────────

pub struct LogStreamSession {
    rx: Option<broadcast::Receiver<String>>,
    broadcaster: Arc<Broadcaster>,
}

impl Actor for LogStreamSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let clients = self.broadcaster.register();
        log::info!("[WS] Client connected. Total: {}", clients);

        // Handshake before any alert traffic.
        let handshake = serde_json::json!({
            "type": "connected",
            "message": "Argus live stream active. Monitoring for threats.",
            "clients": clients,
            "timestamp": Utc::now().to_rfc3339(),
        });
        ctx.text(handshake.to_string());

        if let Some(mut rx) = self.rx.take() {
            let addr = ctx.address();
            let fut = async move {
                loop {
                    match rx.recv().await {
                        Ok(msg) => addr.do_send(AlertMessage(msg)),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            log::warn!("[WS] Slow subscriber lagged, {} events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            ctx.spawn(actix::fut::wrap_future(fut));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let clients = self.broadcaster.unregister();
        log::info!("[WS] Client disconnected. Total: {}", clients);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct AlertMessage(String);

impl Handler<AlertMessage> for LogStreamSession {
    type Result = ();

    fn handle(&mut self, msg: AlertMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LogStreamSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                // Application-level keepalive.
                if text.trim() == "ping" {
                    let pong = serde_json::json!({
                        "type": "pong",
                        "timestamp": Utc::now().to_rfc3339(),
                    });
                    ctx.text(pong.to_string());
                }
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(_) => ctx.stop(),
            _ => (),
        }
    }
}

// ── HTTP upgrade endpoint (/ws/logs) ─────────────────────────────────────────

pub async fn ws_logs_route(
    req: HttpRequest,
    stream: web::Payload,
    broadcaster: web::Data<Arc<Broadcaster>>,
) -> Result<HttpResponse, Error> {
    let rx = broadcaster.subscribe();
    ws::start(
        LogStreamSession {
            rx: Some(rx),
            broadcaster: broadcaster.get_ref().clone(),
        },
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_count_tracks_register_unregister() {
        let b = Broadcaster::new();
        assert_eq!(b.client_count(), 0);
        assert_eq!(b.register(), 1);
        assert_eq!(b.register(), 2);
        assert_eq!(b.unregister(), 1);
        assert_eq!(b.client_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_messages_in_order() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.send_message("first");
        b.send_message("second");
        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");
    }

    #[test]
    fn send_without_subscribers_does_not_fail() {
        let b = Broadcaster::new();
        b.send_message("nobody listening");
    }
}
