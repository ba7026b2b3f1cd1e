use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crewforge_core::config::GatewayConfig;
use crewforge_crew::WorkflowService;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub service: Arc<WorkflowService>,
    /// Parent token for run cancellation.
    pub shutdown: CancellationToken,
}
