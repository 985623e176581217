//! Webhook listener for Telegram updates
//!
//! Plain mode serves behind a TLS-terminating proxy with `axum::serve`.
//! Custom-certificate mode terminates TLS itself: each accepted TCP stream
//! goes through a rustls acceptor and is then served by hyper.

use super::message::ChatEvent;
use super::telegram::parse_update;
use crate::error::{Error, Result};
use crate::logging::Logger;
use axum::{extract::State, http::StatusCode, routing::post, Router};
use bytes::Bytes;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Clone)]
struct WebhookState {
    events: mpsc::Sender<ChatEvent>,
    verbose: bool,
    log: Logger,
}

/// Router accepting update POSTs on any path
pub(super) fn webhook_router(
    events: mpsc::Sender<ChatEvent>,
    verbose: bool,
    log: Logger,
) -> Router {
    Router::new()
        .route("/", post(receive_update))
        .route("/*path", post(receive_update))
        .with_state(WebhookState {
            events,
            verbose,
            log,
        })
}

async fn receive_update(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let update: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            state
                .log
                .warn(format_args!("Malformed Telegram update: {}", e));
            return StatusCode::BAD_REQUEST;
        }
    };

    if state.verbose {
        state.log.debug(format_args!("Telegram update: {}", update));
    }

    if let Some(event) = parse_update(&update) {
        if state.events.send(event).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}

/// Serve the webhook over plain HTTP until `halt` fires.
pub(super) async fn serve_plain(
    listen: &str,
    router: Router,
    halt: CancellationToken,
    log: &Logger,
) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    log.info(format_args!("Telegram webhook listening on {}", listen));

    axum::serve(listener, router)
        .with_graceful_shutdown(halt.cancelled_owned())
        .await?;

    log.info("Telegram webhook stopped");
    Ok(())
}

/// Load a rustls server config from PEM files.
pub(super) fn load_tls_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("no certificate found in {}", cert_path)));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| Error::Config(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", key_path)))?;

    rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Config(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| Error::Config(e.to_string()))
}

/// Serve the webhook over TLS until `halt` fires.
pub(super) async fn serve_tls(
    listen: &str,
    tls: rustls::ServerConfig,
    router: Router,
    halt: CancellationToken,
    log: &Logger,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(Arc::new(tls));
    let listener = TcpListener::bind(listen).await?;
    log.info(format_args!("Telegram TLS webhook listening on {}", listen));

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    log.warn(format_args!("Webhook accept failed: {}", e));
                    continue;
                }
            },
            _ = halt.cancelled() => break,
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        let halt = halt.clone();
        let log = log.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    log.debug(format_args!("TLS handshake with {} failed: {}", peer, e));
                    return;
                }
            };

            let service = hyper::service::service_fn(
                move |request: hyper::Request<hyper::body::Incoming>| {
                    router.clone().oneshot(request)
                },
            );
            let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection(TokioIo::new(stream), service);

            tokio::select! {
                served = connection => {
                    if let Err(e) = served {
                        log.debug(format_args!("Webhook connection from {} failed: {}", peer, e));
                    }
                }
                _ = halt.cancelled() => {}
            }
        });
    }

    log.info("Telegram TLS webhook stopped");
    Ok(())
}
