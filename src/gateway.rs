//! Relay gateway
//!
//! HTTP surface for callers that want to message a user by phone number:
//!
//! - `POST <base>/v1/message` with `Authorization: <secret>` and
//!   `{"phone": "...", "text": "..."}`; 202 once the chat platform accepted
//!   the message
//! - `<base>/ping` liveness probe, any method

use crate::channels::ChatConnector;
use crate::context::CallContext;
use crate::error::Error;
use crate::logging::Logger;
use crate::store::{canonical_phone, redact_phone, MappingStore};
use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted relay body; anything bigger is a 400
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Slack between a request's own deadline and the outer timeout layer
const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Shared state for gateway handlers
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<dyn MappingStore>,
    pub connector: Arc<dyn ChatConnector>,
    pub secret: Arc<str>,
    pub request_timeout: Duration,
    /// Process token; request contexts are derived from it
    pub shutdown: CancellationToken,
    pub log: Logger,
}

/// Body of a relay request
#[derive(Debug, Deserialize)]
struct RelayRequest {
    phone: String,
    text: String,
}

/// Build the gateway router, mounted under `base_path` when non-empty.
pub fn gateway_router(state: GatewayState, base_path: &str) -> Router {
    let timeout = state.request_timeout;
    let routes = Router::new()
        .route("/v1/message", any(relay_message))
        .route("/ping", any(ping))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let base = base_path.trim_end_matches('/');
    let router = if base.is_empty() {
        routes
    } else {
        Router::new().nest(base, routes)
    };

    router
        .layer(TimeoutLayer::new(timeout + TIMEOUT_MARGIN))
        .layer(TraceLayer::new_for_http())
}

/// /ping
async fn ping() -> StatusCode {
    StatusCode::OK
}

/// Check the `Authorization` header against the shared secret.
fn authenticate(headers: &HeaderMap, secret: &str) -> Result<(), Error> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .ok_or(Error::AuthRejected("API key is missing"))?;

    if bool::from(provided.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(Error::AuthRejected("Invalid API key"))
    }
}

/// POST /v1/message
async fn relay_message(
    State(state): State<GatewayState>,
    method: Method,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    if let Err(e) = authenticate(&headers, &state.secret) {
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }

    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let body = match body {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
    };

    let request: RelayRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let phone = canonical_phone(&request.phone).unwrap_or(request.phone);
    let ctx = CallContext::new(state.shutdown.child_token()).with_timeout(state.request_timeout);

    let chat = match state.store.lookup_chat_by_phone(&ctx, &phone).await {
        Ok(chat) => chat,
        Err(Error::NotFound) => {
            return (StatusCode::NOT_FOUND, "Phone not found").into_response();
        }
        Err(e) => {
            state.log.error(format_args!(
                "Failed to resolve phone {}: {}",
                redact_phone(&phone),
                e
            ));
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    if let Err(e) = state.connector.send_text(&ctx, chat, &request.text).await {
        state
            .log
            .error(format_args!("Failed to relay message to chat {}: {}", chat, e));
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    state.log.debug(format_args!(
        "Relayed message for {} to chat {}",
        redact_phone(&phone),
        chat
    ));
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{BotCommand, BotIdentity, ChatEvent, OutboundMessage};
    use crate::error::Result;
    use crate::store::MemoryMappingStore;
    use crate::ChatId;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Mutex};
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    /// Store that counts calls and delegates to an in-memory store
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryMappingStore,
        calls: AtomicUsize,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl MappingStore for CountingStore {
        async fn lookup_chat_by_phone(&self, ctx: &CallContext, phone: &str) -> Result<ChatId> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::StoreUnavailable("disk on fire".into()));
            }
            if self.hang {
                return ctx.run(std::future::pending::<Result<ChatId>>()).await;
            }
            self.inner.lookup_chat_by_phone(ctx, phone).await
        }
        async fn lookup_phone_by_chat(&self, ctx: &CallContext, chat: ChatId) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.lookup_phone_by_chat(ctx, chat).await
        }
        async fn upsert_mapping(&self, ctx: &CallContext, phone: &str, chat: ChatId) -> Result<()> {
            self.inner.upsert_mapping(ctx, phone, chat).await
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        sent: Mutex<Vec<OutboundMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatConnector for RecordingConnector {
        fn name(&self) -> &str {
            "recording"
        }
        async fn connect(&self, _ctx: &CallContext) -> Result<BotIdentity> {
            Ok(BotIdentity {
                id: 1,
                username: "test_bot".into(),
            })
        }
        async fn set_commands(&self, _ctx: &CallContext, _commands: &[BotCommand]) -> Result<()> {
            Ok(())
        }
        async fn run(
            &self,
            _events: mpsc::Sender<ChatEvent>,
            shutdown: CancellationToken,
        ) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn send_message(&self, _ctx: &CallContext, message: OutboundMessage) -> Result<()> {
            if self.fail {
                return Err(Error::Connector("Bad Request: chat not found".into()));
            }
            self.sent.lock().await.push(message);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    async fn setup(
        store: CountingStore,
        connector: RecordingConnector,
        base_path: &str,
    ) -> (Router, Arc<CountingStore>, Arc<RecordingConnector>) {
        setup_with_timeout(store, connector, base_path, Duration::from_secs(5)).await
    }

    async fn setup_with_timeout(
        store: CountingStore,
        connector: RecordingConnector,
        base_path: &str,
        request_timeout: Duration,
    ) -> (Router, Arc<CountingStore>, Arc<RecordingConnector>) {
        store
            .inner
            .upsert_mapping(&CallContext::background(), "+15551230000", 42)
            .await
            .unwrap();
        let store = Arc::new(store);
        let connector = Arc::new(connector);
        let state = GatewayState {
            store: store.clone(),
            connector: connector.clone(),
            secret: Arc::from(SECRET),
            request_timeout,
            shutdown: CancellationToken::new(),
            log: Logger::new("test"),
        };
        (gateway_router(state, base_path), store, connector)
    }

    fn relay(method: &str, uri: &str, auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    const BODY: &str = r#"{"phone":"+15551230000","text":"hi"}"#;

    #[tokio::test]
    async fn test_relay_accepted() {
        let (app, _, connector) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(body_text(resp).await.is_empty());
        assert_eq!(
            *connector.sent.lock().await,
            vec![OutboundMessage::text(42, "hi")]
        );
    }

    #[tokio::test]
    async fn test_relay_canonicalizes_phone() {
        let (app, _, connector) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        let body = r#"{"phone":"1 (555) 123-0000","text":"hi"}"#;
        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), body))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(connector.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_auth_gate_precedes_everything() {
        for (method, auth, body, expected) in [
            ("POST", None, BODY, "API key is missing"),
            ("POST", Some("wrong"), BODY, "Invalid API key"),
            ("GET", None, "", "API key is missing"),
            ("POST", Some("wrong"), "not json", "Invalid API key"),
        ] {
            let (app, store, connector) =
                setup(CountingStore::default(), RecordingConnector::default(), "").await;

            let resp = app
                .oneshot(relay(method, "/v1/message", auth, body))
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_text(resp).await, expected);
            assert_eq!(store.calls.load(Ordering::SeqCst), 0);
            assert!(connector.sent.lock().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_non_post_is_rejected_after_auth() {
        let (app, store, _) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        let resp = app
            .oneshot(relay("GET", "/v1/message", Some(SECRET), ""))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, store, _) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), r#"{"phone":42"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!body_text(resp).await.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_phone_is_not_found() {
        let (app, _, connector) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        let body = r#"{"phone":"+19990000000","text":"hi"}"#;
        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), body))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(resp).await, "Phone not found");
        assert!(connector.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let store = CountingStore {
            fail: true,
            ..Default::default()
        };
        let (app, _, connector) = setup(store, RecordingConnector::default(), "").await;

        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.contains("disk on fire"));
        assert!(connector.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_internal_error() {
        let connector = RecordingConnector {
            fail: true,
            ..Default::default()
        };
        let (app, _, _) = setup(CountingStore::default(), connector, "").await;

        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.contains("chat not found"));
    }

    #[tokio::test]
    async fn test_ping_needs_no_auth() {
        let (app, store, _) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        for method in ["GET", "HEAD", "POST"] {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/ping")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{} /ping", method);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_is_internal_error() {
        let store = CountingStore {
            hang: true,
            ..Default::default()
        };
        let (app, _, connector) = setup_with_timeout(
            store,
            RecordingConnector::default(),
            "",
            Duration::from_millis(200),
        )
        .await;

        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), BODY))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.contains("timed out"));
        assert!(connector.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_bad_request() {
        let (app, store, connector) =
            setup(CountingStore::default(), RecordingConnector::default(), "").await;

        let text = "x".repeat(MAX_BODY_BYTES);
        let body = format!(r#"{{"phone":"+15551230000","text":"{}"}}"#, text);
        let resp = app
            .clone()
            .oneshot(relay("POST", "/v1/message", Some(SECRET), &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(connector.sent.lock().await.is_empty());

        let resp = app
            .oneshot(relay("POST", "/v1/message", None, &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_base_path_prefixes_routes() {
        let (app, _, connector) =
            setup(CountingStore::default(), RecordingConnector::default(), "/relay/").await;

        let resp = app
            .clone()
            .oneshot(relay("POST", "/relay/v1/message", Some(SECRET), BODY))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(connector.sent.lock().await.len(), 1);

        let resp = app
            .oneshot(relay("POST", "/v1/message", Some(SECRET), BODY))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
