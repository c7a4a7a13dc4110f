use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use build_retention::{
    clock::SystemClock,
    config::ReconcilerConfig,
    observability,
    retention::{self, RetentionReconciler},
    store::{MemoryStore, StoreSnapshot},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// CLI arguments for the retention reconciler
#[derive(Parser, Debug)]
#[command(version, about = "Retention reconciler for build runs", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Apply retention once to a JSON snapshot of builds, runs and task runs
    ///
    /// Prints a JSON summary of deleted runs and runs with pending expiry.
    Sweep {
        /// Snapshot to load
        #[arg(long)]
        state: PathBuf,
        /// Write the resulting snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Log what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(args.config.as_deref());

    match args.command {
        Command::Sweep {
            state,
            output,
            dry_run,
        } => {
            run_sweep(config, &state, output.as_deref(), dry_run).await;
        }
        Command::CheckConfig => {
            run_check_config(&config, args.config.as_deref());
        }
    }
}

fn load_config(path: Option<&Path>) -> ReconcilerConfig {
    let Some(path) = path else {
        return ReconcilerConfig::default();
    };
    match ReconcilerConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn run_check_config(config: &ReconcilerConfig, path: Option<&Path>) {
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    println!("Configuration OK ({source})");
    println!(
        "  max_concurrent_reconciles = {}",
        config.controller.max_concurrent_reconciles
    );
    println!(
        "  reconcile_timeout_secs = {}",
        config.controller.reconcile_timeout_secs
    );
    println!("  dry_run = {}", config.deletion.dry_run);
    println!(
        "  legacy_policy_fallback = {}",
        config.controller.legacy_policy_fallback
    );
}

async fn run_sweep(
    mut config: ReconcilerConfig,
    state: &Path,
    output: Option<&Path>,
    dry_run: bool,
) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    config.deletion.dry_run |= dry_run;
    let dry_run = config.deletion.dry_run;

    let snapshot = match load_snapshot(state).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("Failed to load state from {}: {}", state.display(), e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        state = %state.display(),
        builds = snapshot.builds.len(),
        build_runs = snapshot.build_runs.len(),
        task_runs = snapshot.task_runs.len(),
        "Loaded state"
    );

    let store = Arc::new(MemoryStore::from_snapshot(snapshot));
    let reconciler = RetentionReconciler::new(
        store.clone(),
        Arc::new(SystemClock),
        config.controller.clone(),
        config.deletion.clone(),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping sweep");
            on_signal.cancel();
        }
    });

    let report = retention::sweep::run(&store, &reconciler, dry_run, &cancel).await;

    if let Some(output) = output
        && let Err(e) = write_snapshot(&store, output).await
    {
        eprintln!("Failed to write state to {}: {}", output.display(), e);
        std::process::exit(1);
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize sweep report: {}", e);
            std::process::exit(1);
        }
    }

    if report.has_failures() || cancel.is_cancelled() {
        std::process::exit(1);
    }
}

async fn load_snapshot(path: &Path) -> Result<StoreSnapshot, Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}

async fn write_snapshot(store: &MemoryStore, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&store.snapshot())?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
