use std::sync::Arc;

use axum::{Json, Router, routing::get};
use tokio::{sync::watch, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_scalar::{Scalar, Servable};

use crate::queue::manager::QueueManager;

use super::routes::{system, transaction};

#[derive(Clone)]
pub struct EngineServerState {
    pub queue_manager: Arc<QueueManager>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Transaction Queue Engine",
        description = "Queue, track and cancel EVM transactions sent from backend wallets"
    ),
    tags(
        (name = "Transaction", description = "Enqueue, status and cancellation"),
        (name = "System", description = "Liveness"),
    )
)]
struct ApiDoc;

pub struct EngineServer {
    handle: Option<JoinHandle<Result<(), std::io::Error>>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    app: Router,
}

impl EngineServer {
    pub async fn new(state: EngineServerState) -> Self {
        Self {
            handle: None,
            shutdown_tx: None,
            app: Self::router(state),
        }
    }

    /// The full application router, usable without binding a socket
    pub fn router(state: EngineServerState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false);

        let (router, api) = OpenApiRouter::<EngineServerState>::with_openapi(ApiDoc::openapi())
            .routes(routes!(transaction::enqueue_transaction))
            .routes(routes!(transaction::get_transaction_status))
            .routes(routes!(transaction::cancel_transaction))
            .routes(routes!(system::health))
            .split_for_parts();

        let openapi_json = Arc::new(api.clone());

        router
            .route(
                "/api/openapi.json",
                get(move || {
                    let doc = openapi_json.clone();
                    async move { Json(doc.as_ref().clone()) }
                }),
            )
            .merge(Scalar::with_url("/reference", api))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub fn start(&mut self, listener: tokio::net::TcpListener) -> Result<(), std::io::Error> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = self.app.clone();
        let local_addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            tracing::info!("HTTP server starting on {}", local_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let mut rx = shutdown_rx;
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    tracing::info!("HTTP server shutting down");
                })
                .await
        });

        self.handle = Some(handle);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(true).is_err() {
                tracing::error!("Failed to send shutdown signal to HTTP server");
            }
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(result) => {
                    if let Err(e) = result {
                        tracing::error!("HTTP server error during shutdown: {}", e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to join HTTP server task: {}", e);
                    return Err(std::io::Error::other(format!("Task join error: {}", e)));
                }
            }
        }

        Ok(())
    }
}
