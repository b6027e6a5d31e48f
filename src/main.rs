mod plan_file;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dialtone_config::Lifecycle;
use dialtone_plan::Plan;
use dialtone_runtime::{ChannelNotifier, ExecutionEvent, Executor, ExecutorConfig, RunReport};
use dialtone_store::{FsStateStore, ResultStore, StateStore};
use dialtone_transport::{HttpTransport, HttpTransportConfig, RetryPolicy};

/// Dialtone - provision external resources from a dependency-ordered plan
#[derive(Parser)]
#[command(name = "dialtone")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.dialtone)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log at debug level (RUST_LOG takes precedence)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a plan file and print its execution order
  Plan {
    #[command(flatten)]
    source: PlanSource,
  },

  /// Create every resource of a plan
  Apply {
    #[command(flatten)]
    run: RunArgs,
  },

  /// Run the update hooks of a previously applied plan
  Update {
    #[command(flatten)]
    run: RunArgs,
  },

  /// Delete every resource of a plan, in reverse order
  Destroy {
    #[command(flatten)]
    run: RunArgs,
  },

  /// Print the saved state of a plan
  Show {
    /// Plan name, as given by the plan file's `name`
    name: String,
  },
}

#[derive(Args)]
struct PlanSource {
  /// Path to the plan file (JSON)
  plan_file: PathBuf,

  /// Override a plan variable (name=value), may be repeated
  #[arg(long = "var", value_name = "NAME=VALUE")]
  vars: Vec<String>,

  /// JSON file of plan variables; --var wins over it
  #[arg(long = "vars", value_name = "FILE")]
  vars_file: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
  #[command(flatten)]
  source: PlanSource,

  /// Base URL of the management API
  #[arg(long)]
  endpoint: String,

  /// Most operations in flight at once
  #[arg(long, default_value_t = 4)]
  max_parallel: usize,

  /// Attempts per call for retryable transport failures
  #[arg(long, default_value_t = 3)]
  retry_attempts: u32,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".dialtone"),
  };

  match cli.command {
    Some(Commands::Plan { source }) => show_plan(&source),
    Some(Commands::Apply { run }) => run_lifecycle(run, Lifecycle::Create, data_dir),
    Some(Commands::Update { run }) => run_lifecycle(run, Lifecycle::Update, data_dir),
    Some(Commands::Destroy { run }) => run_lifecycle(run, Lifecycle::Delete, data_dir),
    Some(Commands::Show { name }) => show_state(name, data_dir),
    None => {
      println!("dialtone - use --help to see available commands");
      Ok(())
    }
  }
}

fn init_logging(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn load_plan(source: &PlanSource) -> Result<Plan> {
  let mut vars: HashMap<String, String> = match &source.vars_file {
    Some(path) => plan_file::read_vars_file(path)?,
    None => HashMap::new(),
  };
  vars.extend(plan_file::parse_vars(&source.vars)?);
  plan_file::load_file(&source.plan_file, &vars)
}

fn show_plan(source: &PlanSource) -> Result<()> {
  let plan = load_plan(source)?;

  eprintln!("Plan '{}' has {} operations", plan.name(), plan.len());

  let order: Vec<serde_json::Value> = plan
    .operations()
    .iter()
    .map(|op| {
      serde_json::json!({
        "id": op.id,
        "action": op.action,
        "variant": op.variant,
        "depends_on": plan.prerequisites(&op.id, Lifecycle::Create.into()),
      })
    })
    .collect();

  println!("{}", serde_json::to_string_pretty(&order)?);
  Ok(())
}

fn run_lifecycle(args: RunArgs, lifecycle: Lifecycle, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_lifecycle_async(args, lifecycle, data_dir).await })
}

async fn run_lifecycle_async(args: RunArgs, lifecycle: Lifecycle, data_dir: PathBuf) -> Result<()> {
  let plan = load_plan(&args.source)?;
  eprintln!("Loaded plan: {} ({} operations)", plan.name(), plan.len());

  // Earlier runs provide cached keys and responses
  let state = FsStateStore::new(data_dir.join("state"));
  let store = match state
    .load(plan.name())
    .await
    .context("failed to load plan state")?
  {
    Some(prior) => ResultStore::with_prior(prior),
    None => ResultStore::new(),
  };

  let transport = HttpTransport::new(HttpTransportConfig {
    retry: RetryPolicy {
      max_attempts: args.retry_attempts.max(1),
      ..RetryPolicy::default()
    },
    ..HttpTransportConfig::new(args.endpoint)
  })
  .context("failed to create transport")?;

  let cancel = CancellationToken::new();
  let ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Interrupted, waiting for in-flight operations");
      ctrl_c.cancel();
    }
  });

  let (tx, rx) = mpsc::unbounded_channel();
  let progress = tokio::spawn(print_progress(rx));

  let executor = Executor::new(Arc::new(transport))
    .with_config(ExecutorConfig {
      max_parallel: args.max_parallel,
    })
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));

  let result = executor
    .run_with_store(&plan, lifecycle, store, cancel)
    .await
    .context("provisioning run failed");
  // The executor owns the only sender; dropping it ends the progress task
  drop(executor);
  let _ = progress.await;
  let report = result?;

  if lifecycle == Lifecycle::Delete && report.is_success() {
    state
      .remove(plan.name())
      .await
      .context("failed to remove plan state")?;
  } else {
    state
      .save(&report.snapshot())
      .await
      .context("failed to save plan state")?;
  }

  println!("{}", serde_json::to_string_pretty(&summary(&report))?);

  if !report.is_success() {
    bail!(
      "{} run of '{}' did not complete ({} failed{})",
      lifecycle,
      plan.name(),
      report.failed().count(),
      if report.cancelled { ", cancelled" } else { "" }
    );
  }
  Ok(())
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<ExecutionEvent>) {
  while let Some(event) = rx.recv().await {
    match event {
      ExecutionEvent::NodeStarted {
        operation, action, ..
      } => eprintln!("  {} ... {}", operation, action),
      ExecutionEvent::NodeSucceeded { operation, .. } => eprintln!("  {} ok", operation),
      ExecutionEvent::NodeFailed {
        operation, error, ..
      } => eprintln!("  {} FAILED: {}", operation, error),
      ExecutionEvent::NodeSkipped {
        operation, reason, ..
      } => eprintln!("  {} skipped ({})", operation, reason),
      ExecutionEvent::RunStarted { .. } | ExecutionEvent::RunCompleted { .. } => {}
    }
  }
}

fn summary(report: &RunReport) -> serde_json::Value {
  let outcomes: Vec<serde_json::Value> = report
    .outcomes
    .iter()
    .map(|o| {
      serde_json::json!({
        "operation": o.operation,
        "state": o.state.to_string(),
        "idempotency_key": o.idempotency_key,
        "error": o.error.as_ref().map(ToString::to_string),
      })
    })
    .collect();

  serde_json::json!({
    "run_id": report.run_id,
    "plan": report.plan,
    "lifecycle": report.lifecycle,
    "success": report.is_success(),
    "cancelled": report.cancelled,
    "outcomes": outcomes,
  })
}

fn show_state(name: String, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { show_state_async(name, data_dir).await })
}

async fn show_state_async(name: String, data_dir: PathBuf) -> Result<()> {
  let state = FsStateStore::new(data_dir.join("state"));
  match state
    .load(&name)
    .await
    .context("failed to load plan state")?
  {
    Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
    None => eprintln!("No saved state for plan '{}'", name),
  }
  Ok(())
}
