//! HTTP surface of the Tree Hole.
//!
//! Visitors submit letters under a per-origin daily limit; the operator, holding
//! the shared `x-admin-token` secret, lists letters, replies, and tunes the limit.
//! All state lives in the `SQLite` database behind [`TreeholeStore`]; handlers
//! run store work on the blocking pool with a per-operation timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use treehole_core::DailyLimit;
use treehole_store_sqlite::{SqliteTreeholeStore, TreeholeStore};

pub mod config;
pub mod gate;
pub mod origin;
pub mod routes;
pub mod telemetry;

use config::ServiceConfig;
use gate::AdminGate;
use telemetry::{FailureCode, ServiceTelemetry};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceState {
    store: TreeholeStore,
    gate: AdminGate,
    operation_timeout: Duration,
    telemetry: Arc<ServiceTelemetry>,
}

/// Request-scoped failure rendered as `{ "error": message }`.
#[derive(Debug, Clone)]
pub struct ServiceFailure {
    pub status: StatusCode,
    pub code: FailureCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl ServiceFailure {
    fn new(status: StatusCode, code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, FailureCode::Validation, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            FailureCode::Unauthorized,
            "Unauthorized",
        )
    }

    #[must_use]
    pub fn quota_exceeded(daily_limit: DailyLimit) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            FailureCode::QuotaExceeded,
            format!(
                "You reached today's sharing limit of {daily_limit}. \
                 Please return tomorrow--your feelings matter."
            ),
        )
    }

    /// Generic 500; the cause is logged, never returned.
    #[must_use]
    pub fn internal(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            FailureCode::Internal,
            message,
        )
    }
}

impl ServiceState {
    #[must_use]
    pub fn new(store: TreeholeStore, gate: AdminGate, operation_timeout: Duration) -> Self {
        Self {
            store,
            gate,
            operation_timeout,
            telemetry: Arc::new(ServiceTelemetry::default()),
        }
    }

    #[must_use]
    pub fn telemetry(&self) -> &ServiceTelemetry {
        &self.telemetry
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Counts `failure` once and hands it back for the handler to return.
    fn reject(&self, failure: ServiceFailure) -> ServiceFailure {
        self.telemetry.record_failure(failure.code, false);
        failure
    }

    /// Runs `op` against a fresh store connection on the blocking pool.
    ///
    /// A timed-out operation keeps running to completion in the background;
    /// every store write is a single transaction, so it either lands whole or
    /// not at all.
    async fn run_blocking<T, F>(
        &self,
        failure_message: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(SqliteTreeholeStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let handle = tokio::task::spawn_blocking(move || op(store.open()?));

        let join_result = tokio::time::timeout(self.operation_timeout, handle)
            .await
            .map_err(|_| {
                self.telemetry.record_failure(FailureCode::Internal, true);
                error!(
                    operation = operation_label,
                    timeout_ms = self.timeout_ms(),
                    "store operation timed out"
                );
                ServiceFailure::internal(failure_message)
            })?;

        let op_result = join_result.map_err(|err| {
            error!(operation = operation_label, error = %err, "store operation join failure");
            self.reject(ServiceFailure::internal(failure_message))
        })?;

        op_result.map_err(|err| {
            let detail = format!("{err:#}");
            error!(operation = operation_label, error = %detail, "store operation failed");
            self.reject(ServiceFailure::internal(failure_message))
        })
    }
}

pub fn app(state: ServiceState) -> Router {
    let admin = Router::new()
        .route("/letters", get(routes::admin_letters))
        .route("/letters/:id/reply", post(routes::admin_reply))
        .route("/settings", get(routes::admin_settings))
        .route("/settings/daily-limit", post(routes::admin_set_daily_limit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            routes::require_admin,
        ));

    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/letters", post(routes::submit_letter))
        .route("/api/settings/public", get(routes::public_settings))
        .nest("/api/admin", admin)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::track_request,
        ))
        .with_state(state)
}

/// Applies the schema, serves until a shutdown signal, then checkpoints the
/// database. Returns early, before binding, if the schema cannot be applied.
pub async fn serve(config: ServiceConfig) -> Result<()> {
    let db_path = config.db_path.clone();
    info!(db_path = %db_path.display(), "applying database schema");
    let store = tokio::task::spawn_blocking(move || TreeholeStore::connect(db_path))
        .await
        .context("schema migration task failed")??;

    let state = ServiceState::new(
        store.clone(),
        AdminGate::new(&config.admin_token),
        config.operation_timeout,
    );

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(bind = %config.bind, "tree hole listening");

    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated with an error")?;

    info!("server stopped, checkpointing database");
    tokio::task::spawn_blocking(move || store.shutdown())
        .await
        .context("database checkpoint task failed")??;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(err) => {
                error!(error = %err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(err) => {
                error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
