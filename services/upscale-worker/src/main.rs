//! Upscale worker
//!
//! Single-binary service that:
//! 1. Loads configuration and obtains an Astra access credential
//! 2. Accepts upscale jobs over HTTP, charging per-user daily quotas
//! 3. Runs admitted jobs through the remote upload / poll / download lifecycle
//! 4. Stores results locally and exposes job state, usage, health, and metrics

mod board;
mod config;
mod error;
mod metrics;
mod remote_impl;
mod storage;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use astra_auth::{CredentialManager, SessionLogin, SessionLoginConfig, StaticToken, TokenSource};
use astra_client::AstraClient;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use job_engine::{Admission, Backends, Dispatcher, Quality, RateLimiter, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::board::JobBoard;
use crate::config::{Config, CredentialSource};
use crate::error::{ApiError, ApiResult};
use crate::remote_impl::AstraRemote;
use crate::storage::{FsInputResolver, FsResultStore};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    board: Arc<JobBoard>,
    credentials: Arc<CredentialManager>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently handled HTTP requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/jobs", post(submit_handler))
        .route("/jobs/{id}", get(job_handler))
        .route("/users/{id}/usage", get(usage_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn token_source(config: &Config, http: &reqwest::Client) -> Result<Arc<dyn TokenSource>> {
    let source: Arc<dyn TokenSource> = match config.credential_source()? {
        CredentialSource::Static(token) => Arc::new(StaticToken::new(token.clone())),
        CredentialSource::Session {
            login_url,
            session_url,
            username,
            password,
        } => Arc::new(SessionLogin::new(
            http.clone(),
            SessionLoginConfig {
                login_url: login_url.to_string(),
                session_url: session_url.to_string(),
                username: username.to_string(),
                password: password.clone(),
                session_field: config.credentials.session_field.clone(),
                token_field: config.credentials.token_field.clone(),
                timeout: config.request_timeout(),
            },
        )),
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting upscale-worker");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        max_concurrent_jobs = config.queue.max_concurrent_jobs,
        user_daily_limit = config.queue.user_daily_limit,
        max_wait_secs = config.queue.max_wait_secs,
        token_max_uses = config.credentials.max_uses,
        "configuration loaded"
    );

    let http = reqwest::Client::new();
    let source = token_source(&config, &http)?;
    info!(source = source.id(), "credential source configured");
    let credentials = Arc::new(CredentialManager::new(source, config.credentials.max_uses));

    // Warm the credential so the first job does not pay for the login round trip
    if let Err(e) = credentials.force_refresh().await {
        warn!(error = %e, "initial credential fetch failed, jobs will retry on demand");
    }

    let client = Arc::new(AstraClient::new(
        http,
        credentials.clone(),
        config.client_config(),
    ));

    let dispatcher = Arc::new(Dispatcher::start(
        config.dispatcher_config(),
        Arc::new(RateLimiter::new(config.queue.user_daily_limit)),
        Backends {
            api: Arc::new(AstraRemote::new(client)),
            resolver: Arc::new(FsInputResolver::new(&config.storage.input_dir)),
            store: Arc::new(FsResultStore::new(&config.storage.output_dir)),
        },
    ));

    let app_state = AppState {
        dispatcher: dispatcher.clone(),
        board: Arc::new(JobBoard::new(config.server.max_tracked_jobs)),
        credentials,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting jobs");

    // Graceful shutdown:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. the dispatcher closes intake and finishes queued jobs
    // Steps 2 and 3 share the drain timeout, which starts at signal receipt.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    let drain_timeout = config.drain_timeout();
    let drain = async {
        match server_handle.await {
            Ok(Ok(())) => info!("http listener stopped"),
            Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
            Err(e) => error!(error = %e, "server task panicked"),
        }
        dispatcher.shutdown().await;
    };

    match tokio::time::timeout(drain_timeout, drain).await {
        Ok(()) => info!("all queued jobs drained"),
        Err(_) => {
            let stats = dispatcher.stats();
            warn!(
                active = stats.active,
                queued = stats.queued,
                drain_timeout_secs = drain_timeout.as_secs(),
                "drain timeout exceeded, abandoning remaining jobs"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SubmitJob {
    user_id: UserId,
    /// Path of the input media relative to the input directory
    input: String,
    /// `q30` (default) or `q60`
    #[serde(default)]
    quality: Option<String>,
}

/// Admit a job: 202 with its id, or the rejection reason.
async fn submit_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let input = request.input.trim();
    if input.is_empty() {
        metrics::record_intake(StatusCode::BAD_REQUEST.as_u16());
        return Err(ApiError::BadRequest("input must not be empty".into()));
    }
    let quality = match request.quality.as_deref() {
        None => Quality::default(),
        Some(raw) => raw.parse::<Quality>().map_err(|e| {
            metrics::record_intake(StatusCode::BAD_REQUEST.as_u16());
            ApiError::BadRequest(e)
        })?,
    };

    let admission = state
        .dispatcher
        .submit_request(
            request.user_id,
            input.to_string(),
            quality,
            state.board.clone(),
        )
        .await;

    match admission {
        Admission::Accepted { job_id } => {
            state.board.queued(job_id, request.user_id, quality).await;
            metrics::record_intake(StatusCode::ACCEPTED.as_u16());
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "job_id": job_id.to_string(),
                    "state": "queued",
                    "quality": quality.label(),
                })),
            ))
        }
        Admission::Rejected(reason) => {
            let error = ApiError::Rejected(reason);
            metrics::record_intake(error.status().as_u16());
            Err(error)
        }
    }
}

/// Latest delivery record of a job.
async fn job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<board::JobRecord>> {
    let job_id = uuid::Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {id}")))?;
    state
        .board
        .get(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))
}

/// Today's quota usage for one user.
async fn usage_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<serde_json::Value> {
    let usage = state.dispatcher.limiter().usage(user_id).await;
    Json(serde_json::json!({
        "user_id": user_id,
        "used": usage.used,
        "limit": usage.limit,
        "remaining": usage.remaining,
        "day": usage.day,
    }))
}

/// Dispatcher and credential state. 503 once intake is closed.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.dispatcher.stats();
    let credential = state.credentials.snapshot().await;

    let (status_code, status) = if stats.accepting {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    };

    let body = serde_json::json!({
        "status": status,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "dispatcher": {
            "max_concurrent": stats.max_concurrent,
            "active": stats.active,
            "queued": stats.queued,
            "accepted_total": stats.accepted_total,
            "rejected_total": stats.rejected_total,
            "completed_total": stats.completed_total,
            "failed_total": stats.failed_total,
        },
        "credential": {
            "has_token": credential.has_token,
            "uses": credential.uses,
            "max_uses": credential.max_uses,
            "refreshes": credential.refreshes,
            "fetched_at_unix": credential.fetched_at_unix,
        },
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
