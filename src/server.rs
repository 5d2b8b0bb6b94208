use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;
use tracing::info;

use crate::{
    boundary::{ErrorPolicy, with_error_boundary},
    config::ServerConfig,
    database::ConnectionFactory,
    error::Fault,
};

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionFactory>,
    stopping: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(connections: Arc<ConnectionFactory>) -> Self {
        Self { connections, stopping: Arc::new(AtomicBool::new(false)) }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: String,
    schema: Option<String>,
}

/// Health and readiness routes plus `endpoints`, all behind the error boundary.
pub fn build_router(state: AppState, policy: ErrorPolicy, endpoints: Router<AppState>) -> Router {
    let routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(endpoints)
        .with_state(state);

    with_error_boundary(routes, policy)
}

/// Serves the router until [`GiveServer::shutdown`] is called on any clone.
#[derive(Clone)]
pub struct GiveServer {
    config: ServerConfig,
    policy: ErrorPolicy,
    stop: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl GiveServer {
    pub fn new(config: ServerConfig, policy: ErrorPolicy) -> Self {
        GiveServer {
            config,
            policy,
            stop: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Returns once shutdown was requested and in-flight requests finished.
    pub async fn run(
        &self,
        connections: Arc<ConnectionFactory>,
        endpoints: Router<AppState>,
    ) -> std::io::Result<()> {
        let state = AppState { connections, stopping: self.stopping.clone() };
        let app = build_router(state, self.policy, endpoints);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(
            suppress_server_errors = self.policy.suppress_server_errors,
            "GIVE server listening on {}",
            listener.local_addr()?
        );

        let stop = self.stop.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop.notified().await;
                info!("Server received shutdown signal");
            })
            .await?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Reports not ready for the configured grace period, then stops accepting
    /// connections.
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        info!(grace_seconds = grace.as_secs(), "Server draining before shutdown");
        tokio::time::sleep(grace).await;

        // Keeps a permit if `run` is not waiting yet
        self.stop.notify_one();
    }
}

// Liveness probe - just checks if the service is running
async fn health_check(State(state): State<AppState>) -> Response {
    if state.is_stopping() {
        info!("Health check returning unhealthy because service is shutting down");
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    (StatusCode::OK, "healthy").into_response()
}

// Readiness probe - opens and closes a session on the default schema
async fn readiness_check(State(state): State<AppState>) -> Result<Response, Fault> {
    if state.is_stopping() {
        info!("Readiness check returning not ready because service is shutting down");
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse { status: "shutting_down".to_string(), schema: None }),
        )
            .into_response());
    }

    let conn = state.connections.connect_default().await?;
    let schema = conn.schema().to_string();
    conn.close().await?;

    Ok((StatusCode::OK, Json(ReadinessResponse { status: "ready".to_string(), schema: Some(schema) }))
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn connections() -> Arc<ConnectionFactory> {
        Arc::new(ConnectionFactory::new(&DatabaseConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_health_routes_fail_while_stopping() {
        let state = AppState::new(connections());
        state.stopping.store(true, Ordering::SeqCst);
        let app = build_router(state, ErrorPolicy::default(), Router::new());

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let ready = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let response = app.oneshot(ready).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_server() {
        let config = ServerConfig { host: "127.0.0.1".to_string(), port: 0, shutdown_grace_seconds: 0 };
        let server = GiveServer::new(config, ErrorPolicy::default());

        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run(connections(), Router::new()).await }
        });
        server.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert!(server.is_stopping());
    }
}
