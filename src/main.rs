mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crewforge_core::config::AppConfig;
use crewforge_core::types::RunId;
use crewforge_core::workflow::{RunRequest, WorkflowNode};
use crewforge_crew::{CrewBuilder, InjectionTable, WorkflowService};
use crewforge_store::SqliteWorkflowStore;

#[derive(Parser)]
#[command(name = "crewforge", version, about = "Compile and run agent workflows built from node graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "crewforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve,
    /// List the tool catalog with aliases
    Tools,
    /// Compile a node-list file and print the execution order
    Plan {
        /// JSON file holding a node array or an object with `nodes`
        graph: PathBuf,
    },
    /// Compile and run a node-list file
    Run {
        /// JSON file holding a node array or an object with `nodes`
        graph: PathBuf,
        #[arg(long, default_value = "")]
        prompt: String,
        #[arg(long)]
        file_path: Option<String>,
        #[arg(long)]
        file_name: Option<String>,
        /// Search engine for the Web Search tool (serper, tavily)
        #[arg(long)]
        engine: Option<String>,
    },
    /// Check credentials, database and gateway settings
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crewforge=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Completions need no config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "crewforge", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::Tools => print_tools(&config),
        Commands::Plan { graph } => {
            let nodes = read_graph(&graph)?;
            let builder = CrewBuilder::from_config(&config);
            let plan = builder.compile(&nodes)?.plan();
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Run {
            graph,
            prompt,
            file_path,
            file_name,
            engine,
        } => {
            let mut nodes = read_graph(&graph)?;
            let request = RunRequest {
                prompt,
                file_path,
                file_name,
                vector_search_engine: engine,
            };
            let builder = CrewBuilder::from_config(&config);
            InjectionTable::with_overrides(&config.injection)?.apply(
                &mut nodes,
                &request,
                builder.registry(),
            );

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                ctrl_c.cancel();
            });

            let run_id = RunId::new();
            info!(run_id = %run_id, graph = %graph.display(), "Running workflow file");
            let output = builder.build_and_run(&nodes, &run_id, &cancel).await?;
            println!("{}", output);
        }
        Commands::Doctor => {
            println!("crewforge doctor");
            println!("  config: {}", cli.config.display());
            println!();
            if doctor::run_doctor(&config) > 0 {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let db_path = config.database.resolved_path();
    let store = SqliteWorkflowStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let builder = CrewBuilder::from_config(&config);
    let injection = InjectionTable::with_overrides(&config.injection)?;
    let service = WorkflowService::new(Arc::new(store), Arc::new(builder)).with_injection(injection);

    info!(
        bind = %config.gateway.bind,
        db = %db_path.display(),
        model = %config.model.model_id,
        "Starting gateway"
    );
    let server = crewforge_gateway::GatewayServer::new(config.gateway.clone(), Arc::new(service));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down gateway...");
        cancel_clone.cancel();
    });

    server.run(cancel).await
}

fn print_tools(config: &AppConfig) {
    let builder = CrewBuilder::from_config(config);
    for def in builder.registry().list_definitions() {
        println!("{:>3}  {:<22} {:<24} {}", def.alias, def.id, def.name, def.constructor);
    }
}

/// Nodes from a JSON file: either a bare array or `{"nodes": [...]}`.
fn read_graph(path: &Path) -> anyhow::Result<Vec<WorkflowNode>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_graph(&content).with_context(|| format!("parsing {}", path.display()))
}

fn parse_graph(content: &str) -> anyhow::Result<Vec<WorkflowNode>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let nodes = match value {
        serde_json::Value::Object(mut obj) => obj
            .remove("nodes")
            .context("object has no `nodes` field")?,
        other => other,
    };
    Ok(serde_json::from_value(nodes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_file_shapes() {
        let bare = r#"[{"id": "a1", "type": "agent"}]"#;
        assert_eq!(parse_graph(bare).unwrap().len(), 1);

        let wrapped = r#"{"name": "wf", "nodes": [{"id": "t1", "type": "task", "parents": ["a1"]}]}"#;
        assert_eq!(parse_graph(wrapped).unwrap()[0].parents, vec!["a1"]);

        assert!(parse_graph(r#"{"name": "wf"}"#).is_err());
    }
}
