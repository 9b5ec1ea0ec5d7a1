//! HTTP protocol: every node serves `POST /message` and `GET /health` and
//! posts to the endpoints registered for its peers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use hsp_primitives::BROADCAST_RECIPIENT;
use hyper::body::HttpBody;
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::http_client::JsonPoster;
use crate::protocol::ProtocolCore;
use crate::{
    FallbackError, FallbackHandler, FallbackMessage, FallbackProtocol, FallbackResult,
    ProtocolStats, ProtocolStatus,
};

/// Default request timeout for outgoing posts.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default limit on inbound `POST /message` bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// HTTP based fallback protocol.
#[derive(Debug)]
pub struct HttpProtocol {
    core: Arc<ProtocolCore>,
    host: String,
    port: u16,
    local_addr: Mutex<Option<SocketAddr>>,
    endpoints: RwLock<HashMap<String, String>>,
    poster: JsonPoster,
    max_body_bytes: usize,
}

impl HttpProtocol {
    /// Creates a protocol that will listen on `host:port` (port 0 picks a free port).
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            core: ProtocolCore::new("http"),
            host: host.into(),
            port,
            local_addr: Mutex::new(None),
            endpoints: RwLock::new(HashMap::new()),
            poster: JsonPoster::new(DEFAULT_REQUEST_TIMEOUT),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Overrides the largest accepted inbound message body. Larger requests
    /// are answered with `413 Payload Too Large`.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Overrides the outgoing request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.poster = JsonPoster::new(request_timeout);
        self
    }

    /// Registers the base URL (e.g. `http://10.0.0.2:8765`) of a peer node.
    pub fn add_endpoint(&self, node_id: impl Into<String>, endpoint: impl Into<String>) {
        let endpoint = endpoint.into().trim_end_matches('/').to_owned();
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.into(), endpoint);
    }

    /// Address the server is bound to, once initialized.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn targets(&self, recipient: &str) -> Vec<String> {
        let endpoints = self.endpoints.read().unwrap_or_else(PoisonError::into_inner);
        if recipient == BROADCAST_RECIPIENT {
            endpoints.values().cloned().collect()
        } else {
            endpoints.get(recipient).cloned().into_iter().collect()
        }
    }

    async fn post(&self, endpoint: &str, body: Vec<u8>) -> FallbackResult<()> {
        let url = format!("{endpoint}/message");
        let (status, response) = self.poster.post(&url, body).await?;
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(FallbackError::http(format!(
                "{url} returned {status}: {}",
                String::from_utf8_lossy(&response)
            )))
        }
    }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}

/// Buffers `body`, giving up with `None` once it exceeds `limit` bytes.
async fn read_limited(mut body: Body, limit: usize) -> Result<Option<Vec<u8>>, hyper::Error> {
    let limit_u64 = u64::try_from(limit).unwrap_or(u64::MAX);
    let hint = body.size_hint();
    if hint.lower() > limit_u64 || hint.upper().is_some_and(|upper| upper > limit_u64) {
        return Ok(None);
    }

    let mut buffer = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Some(buffer))
}

async fn route(
    core: Arc<ProtocolCore>,
    max_body_bytes: usize,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let response = match (request.method(), request.uri().path()) {
        (&Method::POST, "/message") => match read_limited(request.into_body(), max_body_bytes).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<FallbackMessage>(&bytes) {
                Ok(message) => {
                    core.deliver(message);
                    json_response(StatusCode::OK, &json!({"status": "ok"}))
                }
                Err(err) => {
                    core.record_error();
                    json_response(StatusCode::BAD_REQUEST, &json!({"error": err.to_string()}))
                }
            },
            Ok(None) => {
                warn!(limit = max_body_bytes, "rejected oversized fallback message");
                core.record_error();
                json_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &json!({"error": format!("body exceeds {max_body_bytes} bytes")}),
                )
            }
            Err(err) => json_response(StatusCode::BAD_REQUEST, &json!({"error": err.to_string()})),
        },
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            &json!({"status": core.status(), "stats": core.stats()}),
        ),
        _ => json_response(StatusCode::NOT_FOUND, &json!({"error": "not found"})),
    };
    Ok(response)
}

#[async_trait]
impl FallbackProtocol for HttpProtocol {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn initialize(&self) -> FallbackResult<()> {
        if self.core.is_listening() {
            return Ok(());
        }

        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                self.core.set_status(ProtocolStatus::Failed);
                FallbackError::http(format!("cannot resolve {}:{}", self.host, self.port))
            })?;

        let builder = Server::try_bind(&addr).map_err(|err| {
            self.core.set_status(ProtocolStatus::Failed);
            FallbackError::http(format!("failed to bind {addr}: {err}"))
        })?;

        let core = Arc::clone(&self.core);
        let max_body_bytes = self.max_body_bytes;
        let service = make_service_fn(move |_| {
            let core = Arc::clone(&core);
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    route(Arc::clone(&core), max_body_bytes, request)
                }))
            }
        });
        let server = builder.serve(service);
        let bound = server.local_addr();

        self.core.begin_listening();
        let mut shutdown = self.core.shutdown_signal();
        let graceful = server.with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        });
        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                warn!(%err, "fallback http server failed");
            }
        });
        self.core.set_listener(handle);

        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(bound);
        self.core.set_status(ProtocolStatus::Active);
        info!(protocol = self.core.name(), %bound, "fallback protocol initialized");
        Ok(())
    }

    async fn start(&self) -> FallbackResult<()> {
        // The server accepts requests as soon as it is bound.
        self.core.ensure_active()
    }

    async fn shutdown(&self) {
        self.core.stop_listening().await;
        self.core.set_status(ProtocolStatus::Disabled);
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn send(&self, message: &FallbackMessage) -> FallbackResult<()> {
        self.core.ensure_active()?;
        let targets = self.targets(&message.recipient_id);
        if targets.is_empty() {
            return Err(FallbackError::NoEndpoint {
                recipient: message.recipient_id.clone(),
            });
        }

        let body = serde_json::to_vec(message)?;
        let mut last_error = None;
        let mut delivered = 0_usize;
        for endpoint in &targets {
            match self.post(endpoint, body.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(endpoint, %err, "http fallback post failed");
                    self.core.record_error();
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if delivered == 0 => Err(err),
            _ => {
                self.core.record_sent();
                debug!(message_id = %message.id, delivered, "message posted");
                Ok(())
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.core.is_active() && self.core.is_listening()
    }

    fn register_handler(&self, message_type: &str, handler: FallbackHandler) {
        self.core.register_handler(message_type, handler);
    }

    fn status(&self) -> ProtocolStatus {
        self.core.status()
    }

    fn stats(&self) -> ProtocolStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use hyper::body::to_bytes;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{ANY_MESSAGE_TYPE, MessagePriority};

    #[tokio::test]
    async fn posts_between_two_servers() {
        let alice = HttpProtocol::new("127.0.0.1", 0);
        let bob = HttpProtocol::new("127.0.0.1", 0);
        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();

        let (tx, mut rx) = unbounded_channel();
        bob.register_handler(
            ANY_MESSAGE_TYPE,
            Arc::new(move |message: FallbackMessage| {
                let _ = tx.send(message);
            }),
        );
        let bob_addr = bob.local_addr().unwrap();
        alice.add_endpoint("bob", format!("http://{bob_addr}/"));

        let message = FallbackMessage::new("alice", "bob", "t", json!({"k": "v"}), MessagePriority::Normal);
        alice.send(&message).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, message.id);
        assert_eq!(alice.stats().messages_sent, 1);
        assert_eq!(bob.stats().messages_received, 1);

        alice.shutdown().await;
        bob.shutdown().await;
        assert!(!bob.health_check().await);
    }

    #[tokio::test]
    async fn unknown_recipient_fails() {
        let protocol = HttpProtocol::new("127.0.0.1", 0);
        protocol.initialize().await.unwrap();
        let message = FallbackMessage::new("a", "nobody", "t", json!({}), MessagePriority::Normal);

        let err = protocol.send(&message).await.unwrap_err();
        assert!(matches!(err, FallbackError::NoEndpoint { recipient } if recipient == "nobody"));
        protocol.shutdown().await;
    }

    #[tokio::test]
    async fn health_endpoint_reports_status() {
        let protocol = HttpProtocol::new("127.0.0.1", 0);
        protocol.initialize().await.unwrap();
        let addr = protocol.local_addr().unwrap();

        let response = hyper::Client::new()
            .get(format!("http://{addr}/health").parse().unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&to_bytes(response.into_body()).await.unwrap()).unwrap();
        assert_eq!(body["status"], "active");
        protocol.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let protocol = HttpProtocol::new("127.0.0.1", 0).with_max_body_bytes(256);
        protocol.initialize().await.unwrap();
        let (tx, mut rx) = unbounded_channel();
        protocol.register_handler(
            ANY_MESSAGE_TYPE,
            Arc::new(move |message: FallbackMessage| {
                let _ = tx.send(message);
            }),
        );
        let uri: hyper::Uri = format!("http://{}/message", protocol.local_addr().unwrap())
            .parse()
            .unwrap();

        let sized = Request::post(uri.clone())
            .body(Body::from(vec![b' '; 1024]))
            .unwrap();
        let response = hyper::Client::new().request(sized).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let (mut sender, streamed) = Body::channel();
        tokio::spawn(async move {
            for _ in 0..8 {
                if sender.send_data(vec![b' '; 64].into()).await.is_err() {
                    break;
                }
            }
        });
        let chunked = Request::post(uri.clone()).body(streamed).unwrap();
        let response = hyper::Client::new().request(chunked).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let message = FallbackMessage::new("a", "b", "t", json!({}), MessagePriority::Normal);
        let small = Request::post(uri)
            .body(Body::from(serde_json::to_vec(&message).unwrap()))
            .unwrap();
        let response = hyper::Client::new().request(small).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, message.id);
        assert_eq!(protocol.stats().errors, 2);

        protocol.shutdown().await;
    }
}
