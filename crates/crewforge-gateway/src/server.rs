use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crewforge_core::config::GatewayConfig;
use crewforge_crew::WorkflowService;

use crate::routes;
use crate::state::AppState;

/// Every route of the HTTP API over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/healthz", get(routes::health))
        // Tool catalog
        .route("/tools", get(routes::list_tools))
        .route("/tools/{id}", get(routes::get_tool))
        // Workflows
        .route(
            "/workflows",
            get(routes::list_workflows).post(routes::create_workflow),
        )
        .route(
            "/workflows/{id}",
            get(routes::get_workflow).put(routes::replace_workflow),
        )
        .route("/workflows/{id}/update", post(routes::update_workflow))
        .route("/workflows/{id}/delete", post(routes::delete_workflow))
        .route("/workflows/{id}/plan", post(routes::plan_workflow))
        .route("/workflows/{id}/run", post(routes::run_workflow))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    service: Arc<WorkflowService>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, service: Arc<WorkflowService>) -> Self {
        Self { config, service }
    }

    /// Serve until the cancellation token is triggered. In-flight runs
    /// observe the same token.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            service: self.service.clone(),
            shutdown: shutdown.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
