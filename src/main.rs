use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use verbena_definition::{DefinitionRegistry, InMemoryDefinitionRegistry, WorkflowDefinition};
use verbena_dispatch::{DispatcherAggregator, InProcessDispatcher, TaskSigner};
use verbena_engine::{
  NodeOutcome, NodeResult, NoopNotifier, Orchestrator, OrchestratorConfig, OrchestratorSignal,
};
use verbena_history::InMemoryExecutionHistory;
use verbena_registry::{
  CommunicationType, ExecutorInfo, ExecutorRegistry, HealthMonitor, RoundRobin,
};
use verbena_run::InMemoryRunRepository;

/// Verbena - a multi-tenant workflow orchestration engine
#[derive(Parser)]
#[command(name = "verbena")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a workflow definition file
  Validate {
    /// Path to the definition file (JSON)
    definition_file: PathBuf,
  },

  /// Run a workflow definition to a terminal state with the in-process
  /// echo executor
  Run {
    /// Path to the definition file (JSON)
    definition_file: PathBuf,

    /// Run input as a JSON object
    #[arg(long)]
    input: Option<String>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  match cli.command {
    Commands::Validate { definition_file } => validate(&definition_file),
    Commands::Run {
      definition_file,
      input,
    } => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(&definition_file, input))
    }
  }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read definition file: {}", path.display()))?;
  serde_json::from_str(&content).context("failed to parse definition JSON")
}

fn validate(path: &Path) -> Result<()> {
  let definition = load_definition(path)?;
  definition
    .validate()
    .with_context(|| format!("definition '{}' is invalid", definition.definition_id))?;
  println!(
    "definition '{}' v{} is valid ({} nodes)",
    definition.definition_id,
    definition.version,
    definition.nodes.len()
  );
  Ok(())
}

async fn run(path: &Path, input: Option<String>) -> Result<()> {
  let definition = load_definition(path)?;
  let tenant = definition.tenant.clone();
  let definition_id = definition.definition_id.clone();
  let outputs = definition.outputs.clone();

  let input: HashMap<String, serde_json::Value> = match input {
    Some(raw) => serde_json::from_str(&raw).context("failed to parse --input JSON")?,
    None => HashMap::new(),
  };

  // Wire the engine against in-memory collaborators and one in-process
  // executor that echoes an acknowledgement per node.
  let definitions = Arc::new(InMemoryDefinitionRegistry::new());
  definitions
    .register(definition)
    .await
    .context("definition rejected at registration")?;

  let registry = Arc::new(ExecutorRegistry::new(Arc::new(RoundRobin::new())));
  registry.register(ExecutorInfo {
    executor_id: "local".to_string(),
    executor_type: "generic".to_string(),
    communication_type: CommunicationType::InProcess,
    endpoint: "mem://local".to_string(),
    timeout_ms: None,
    metadata: HashMap::new(),
  });

  let (dispatcher, mut task_rx) = InProcessDispatcher::channel(64);
  let aggregator = Arc::new(DispatcherAggregator::new(vec![Arc::new(dispatcher)]));

  let orchestrator = Orchestrator::new(OrchestratorConfig {
    definitions,
    runs: Arc::new(InMemoryRunRepository::new()),
    history: Arc::new(InMemoryExecutionHistory::new()),
    registry: registry.clone(),
    aggregator,
    signer: TaskSigner::new(b"verbena-local-secret".to_vec()),
    notifier: Arc::new(NoopNotifier),
  });
  let manager = orchestrator.manager();

  // Echo executor: acknowledges every task with a per-node marker output.
  let executor_sender = orchestrator.sender();
  tokio::spawn(async move {
    while let Some(task) = task_rx.recv().await {
      if task.compensation {
        continue;
      }
      let result = NodeResult {
        run_id: task.run_id.clone(),
        node_id: task.node_id.clone(),
        attempt: task.attempt,
        token: task.token.clone(),
        executor_id: Some("local".to_string()),
        outcome: NodeOutcome::Completed {
          output: HashMap::from([(
            format!("{}_result", task.node_id),
            serde_json::json!("ok"),
          )]),
        },
      };
      if executor_sender
        .send(OrchestratorSignal::ResultReceived(result))
        .await
        .is_err()
      {
        break;
      }
    }
  });

  let cancel = CancellationToken::new();
  tokio::spawn(HealthMonitor::new(registry).run(cancel.clone()));
  tokio::spawn(orchestrator.start(cancel.clone()));

  let run = manager.create_run(&tenant, &definition_id, input).await?;
  manager.start_run(&run.run_id).await?;

  // Poll until the run reaches a terminal state.
  let run = loop {
    let current = manager.run(&run.run_id).await?;
    if current.status.is_terminal() {
      break current;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  };
  cancel.cancel();

  let declared: HashMap<&str, &serde_json::Value> = outputs
    .iter()
    .filter_map(|(name, output)| {
      let source = output.source.as_deref().unwrap_or(name);
      run.variables.get(source).map(|value| (name.as_str(), value))
    })
    .collect();

  println!(
    "{}",
    serde_json::to_string_pretty(&serde_json::json!({
      "run_id": run.run_id,
      "status": run.status,
      "reason": run.terminal_reason,
      "execution_path": run.execution_path,
      "outputs": declared,
    }))?
  );
  Ok(())
}
