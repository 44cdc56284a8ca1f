//! The SPARQL HTTP endpoint server (EP, §4.10).

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handler::{get_handler, post_handler, status_handler};
use crate::connection::Connection;

/// Serves one [`Connection`] over HTTP at `GET`/`POST /sparql`.
pub struct HttpServer {
    conn: Arc<Connection>,
    port: u16,
}

impl HttpServer {
    pub fn new(conn: Arc<Connection>, port: u16) -> Self {
        Self { conn, port }
    }

    /// Start the HTTP server. Runs until the listener is closed; callers
    /// that want graceful shutdown should race this future against a
    /// cancellation signal of their own (this crate's `CancellationToken`
    /// governs individual queries, not the listener's own lifetime).
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = Router::new()
            .route("/sparql", get(get_handler).post(post_handler))
            .route("/status", get(status_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.conn));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("SPARQL endpoint listening at http://{}/sparql", addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
