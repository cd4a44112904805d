use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowgraph::{load_flows_from_file, FlowManager, ManagerConfig, StepRegistry};
use std::path::{Path, PathBuf};
use stepcore::{JsonOptions, LifecycleEvent, Step, StepState};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow composition CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a flow file, start every flow and run until Ctrl-C
    Run {
        /// Path to flow definitions JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Give up starting a flow whose services do not appear within this time
        #[arg(long)]
        start_timeout_ms: Option<u64>,
    },

    /// Build every flow of a file without starting anything
    Validate {
        /// Path to flow definitions JSON file
        file: PathBuf,
    },

    /// Print the built flows as JSON
    Show {
        /// Path to flow definitions JSON file
        file: PathBuf,

        /// Include default descriptions and endpoints
        #[arg(long)]
        defaults: bool,

        /// Include names and states
        #[arg(long)]
        runtime: bool,
    },

    /// List available step types
    Types,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    stepnodes::register_all(&mut registry);
    registry
}

/// Manager that builds and registers flows but never starts them on its own.
fn passive_manager() -> FlowManager {
    let config = ManagerConfig {
        honor_autostart: false,
        ..Default::default()
    };
    FlowManager::with_registry(registry(), config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            verbose,
            start_timeout_ms,
        } => {
            init_logging(verbose);
            run_flows(&file, start_timeout_ms).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_flows(&file).await?;
        }

        Commands::Show {
            file,
            defaults,
            runtime,
        } => {
            show_flows(&file, defaults, runtime).await?;
        }

        Commands::Types => {
            list_types();
        }
    }

    Ok(())
}

async fn run_flows(file: &Path, start_timeout_ms: Option<u64>) -> Result<()> {
    println!("🚀 Loading flows from: {}", file.display());

    let mut config = ManagerConfig::default();
    if let Some(ms) = start_timeout_ms {
        config.start_timeout_ms = ms;
    }
    let manager = FlowManager::with_registry(registry(), config);

    let mut events = manager.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LifecycleEvent::FlowRegistered { flow, .. } => {
                    println!("  📋 Registered flow: {}", flow);
                }
                LifecycleEvent::FlowStateChanged { flow, state, .. } => {
                    println!("  ⚡ Flow {} is {}", flow, state);
                }
                LifecycleEvent::FlowUnregistered { flow, .. } => {
                    println!("  🗑️  Unregistered flow: {}", flow);
                }
            }
        }
    });

    let flows = load_flows_from_file(&manager, file)
        .await
        .with_context(|| format!("loading {}", file.display()))?;

    for flow in &flows {
        if flow.state() == StepState::Stopped {
            manager
                .start_flow(flow)
                .await
                .with_context(|| format!("starting flow '{}'", flow.name()))?;
        }
    }

    println!();
    println!("▶️  {} flows running, press Ctrl-C to stop", flows.len());
    tokio::signal::ctrl_c().await?;

    println!();
    println!("⏹️  Shutting down");
    manager.shutdown().await?;

    // let the last state changes print
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    Ok(())
}

async fn validate_flows(file: &Path) -> Result<()> {
    println!("🔍 Validating flows: {}", file.display());

    let manager = passive_manager();
    let flows = load_flows_from_file(&manager, file).await?;

    println!("✅ {} flows are valid:", flows.len());
    for flow in &flows {
        println!("   {} ({} steps)", flow.name(), flow.steps().len());
        let pending = flow.pending_services();
        if !pending.is_empty() {
            println!("     waits for services: {}", pending.join(", "));
        }
    }

    Ok(())
}

async fn show_flows(file: &Path, defaults: bool, runtime: bool) -> Result<()> {
    let manager = passive_manager();
    let flows = load_flows_from_file(&manager, file).await?;

    let options = JsonOptions {
        include_name: runtime,
        include_runtime_info: runtime,
        include_defaults: defaults,
    };
    let document: serde_json::Map<String, serde_json::Value> = flows
        .iter()
        .map(|flow| (flow.name().to_string(), flow.to_json_with_options(&options)))
        .collect();

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn list_types() {
    println!("📦 Available Step Types:");
    println!();

    let registry = registry();
    for step_type in registry.list_step_types() {
        if let Some(metadata) = registry.get_metadata(&step_type) {
            println!("  • {} ({})", step_type, metadata.category);
            println!("    {}", metadata.description);
            for endpoint in &metadata.endpoints {
                println!(
                    "      {} [{}] {}",
                    endpoint.name,
                    endpoint.direction.as_str(),
                    endpoint.description
                );
            }
        } else {
            println!("  • {}", step_type);
        }
    }
}
