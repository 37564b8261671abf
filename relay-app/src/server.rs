//! Relay HTTP server.
//!
//! Builds the `Relay` from config and mounts the routes behind the tracing,
//! request-id, timeout and concurrency layers.

use crate::config::RelayConfig;
use crate::relay::Relay;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const NOTIFICATION_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct AppState {
    pub relay: Relay,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = RelayConfig::load_with_path(config_path).await?;
    let bind_addr = cfg.server.socket_addr()?;
    let api_key_configured = cfg.llm.api_key().is_some();
    let notifications_configured = cfg.notify.pushover_credentials().is_some();
    tracing::info!(
        config_path = ?path,
        provider = %cfg.llm.provider,
        model = %cfg.llm.model(),
        api_base = %cfg.llm.api_base(),
        api_key_configured,
        notifications_configured,
        trigger_keywords = ?cfg.notify.trigger_keywords,
        bind_addr = %bind_addr,
        "config ok"
    );
    if !api_key_configured {
        return Err(anyhow::anyhow!(
            "{} is not set and llm.api_key is empty",
            cfg.llm.provider.api_key_env()
        ));
    }
    Ok(())
}

pub async fn ask_one_shot(config_path: Option<PathBuf>, command: &str) -> Result<String> {
    let cfg = RelayConfig::load(config_path).await?;
    let relay = Relay::from_config(&cfg)?;
    let result = relay.ask(command).await;
    relay.drain_notifications().await;
    result.map_err(|e| anyhow::anyhow!("{}", e.public_message()))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = RelayConfig::load_with_path(config_path).await?;
    let addr = cfg.server.socket_addr()?;
    tracing::info!(
        config_path = ?cfg_path,
        bind_addr = %addr,
        provider = %cfg.llm.provider,
        model = %cfg.llm.model(),
        api_base = %cfg.llm.api_base(),
        http_timeout_seconds = cfg.server.request_timeout_seconds,
        http_max_in_flight = cfg.server.max_in_flight,
        notify_enabled = cfg.notify.enabled,
        notify_on_error = cfg.notify.notify_on_error,
        trigger_keyword_count = cfg.notify.trigger_keywords.len(),
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let state = Arc::new(AppState {
        relay: Relay::from_config(&cfg)?,
        started_at: Instant::now(),
    });
    let app = build_app(state.clone(), &cfg);

    tracing::info!(%addr, "jarvis-relay serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");

    let abandoned = state
        .relay
        .shutdown_notifications(NOTIFICATION_SHUTDOWN_GRACE)
        .await;
    if abandoned > 0 {
        tracing::warn!(abandoned, "notifications cut off at shutdown");
    } else {
        tracing::info!("pending notifications drained");
    }
    Ok(())
}

pub fn build_app(state: Arc<AppState>, cfg: &RelayConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.request_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("received ctrl-c; beginning graceful shutdown");
                }
                _ = terminate.recv() => {
                    tracing::warn!("received SIGTERM; beginning graceful shutdown");
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; waiting for ctrl-c only");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
        Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
    }
}
