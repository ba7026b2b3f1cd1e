use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crewforge_core::error::{CrewForgeError, ErrorClass, Result};
use crewforge_core::traits::WorkflowStore;
use crewforge_core::types::RunId;
use crewforge_core::workflow::{
    ListQuery, NewWorkflow, RunOutcome, RunRequest, Workflow, WorkflowNode, WorkflowPatch,
};

use crate::builder::{CrewBuilder, ExecutionPlan};
use crate::injection::InjectionTable;

/// Workflow CRUD plus plan and run, shared by the HTTP API and the CLI.
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    builder: Arc<CrewBuilder>,
    injection: InjectionTable,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, builder: Arc<CrewBuilder>) -> Self {
        Self {
            store,
            builder,
            injection: InjectionTable::default(),
        }
    }

    pub fn with_injection(mut self, injection: InjectionTable) -> Self {
        self.injection = injection;
        self
    }

    pub fn builder(&self) -> &Arc<CrewBuilder> {
        &self.builder
    }

    pub async fn create(&self, workflow: NewWorkflow) -> Result<Workflow> {
        let created = self.store.create(workflow).await?;
        info!(workflow_id = %created.id, nodes = created.nodes.len(), "Workflow created");
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Workflow> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CrewForgeError::WorkflowNotFound(id.to_string()))
    }

    pub async fn list(&self, query: ListQuery) -> Result<Vec<Workflow>> {
        self.store.list(query).await
    }

    /// Replace name, description and nodes.
    pub async fn replace(&self, id: &str, workflow: NewWorkflow) -> Result<Workflow> {
        self.update(id, workflow.into()).await
    }

    pub async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let updated = self
            .store
            .update(id, patch)
            .await?
            .ok_or_else(|| CrewForgeError::WorkflowNotFound(id.to_string()))?;
        info!(workflow_id = %id, "Workflow updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.store.soft_delete(id).await? {
            return Err(CrewForgeError::WorkflowNotFound(id.to_string()));
        }
        info!(workflow_id = %id, "Workflow deleted");
        Ok(())
    }

    /// Compile a stored workflow without running it.
    pub async fn plan(&self, id: &str) -> Result<ExecutionPlan> {
        let workflow = self.get(id).await?;
        Ok(self.builder.compile(&workflow.nodes)?.plan())
    }

    /// Run a stored workflow. A missing workflow is an error; every failure
    /// after loading is reported in the outcome.
    pub async fn run(
        &self,
        id: &str,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let workflow = self.get(id).await?;
        Ok(self
            .run_nodes(&workflow.id, workflow.nodes, &request, cancel)
            .await)
    }

    /// Inject request parameters into `nodes`, then compile and run them.
    pub async fn run_nodes(
        &self,
        workflow_id: &str,
        mut nodes: Vec<WorkflowNode>,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let run_id = RunId::new();
        let start = Instant::now();
        let injected = self
            .injection
            .apply(&mut nodes, request, self.builder.registry());
        info!(
            workflow_id = %workflow_id,
            run_id = %run_id,
            nodes = nodes.len(),
            injected,
            "Run started"
        );

        match self.builder.build_and_run(&nodes, &run_id, cancel).await {
            Ok(output) => {
                info!(
                    workflow_id = %workflow_id,
                    run_id = %run_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Run finished"
                );
                RunOutcome::success(workflow_id, run_id, output)
            }
            Err(e) => {
                let class = e.class();
                match class {
                    ErrorClass::Execution => {
                        error!(workflow_id = %workflow_id, run_id = %run_id, error = %e, "Run failed")
                    }
                    _ => {
                        warn!(workflow_id = %workflow_id, run_id = %run_id, class = %class, error = %e, "Run rejected")
                    }
                }
                RunOutcome::failed(workflow_id, run_id, e.to_string(), class)
            }
        }
    }
}
