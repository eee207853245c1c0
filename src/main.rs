use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use taskpulse_lib::config::{config_path, load_config, EngineConfig};
use taskpulse_lib::error::EngineErrorInfo;
use taskpulse_lib::reconciler::fetch_snapshots;
use taskpulse_lib::{
    recompute, CollectionPath, DataStore, DerivedState, EngineError, FsStore, LocationFilter,
    LocationFilterUpdate, RecomputeOptions, Reconciler,
};

#[derive(Debug, Parser)]
#[command(name = "taskpulse", version, about = "Personnel and task activity dashboard state")]
struct Cli {
    /// Config file (default ~/.taskpulse/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory with personnel.json, tasks.json and companies/
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    company: Option<String>,

    /// Restrict to one branch (only with --manager)
    #[arg(long, global = true)]
    branch: Option<String>,

    #[arg(long, global = true)]
    manager: bool,

    /// Days in the activity trend window
    #[arg(long, global = true)]
    lookback_days: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute the derived state once and print it as JSON
    Snapshot {
        #[arg(long)]
        pretty: bool,

        /// Map entries to keep (10, 20, 30, 50 or 100)
        #[arg(long)]
        max_count: Option<usize>,

        /// Only map entries for these personnel ids
        #[arg(long = "personnel")]
        personnel_ids: Vec<String>,

        /// Only map entries for these task ids
        #[arg(long = "task")]
        task_ids: Vec<String>,
    },
    /// Keep the state current and print a summary on every change
    Watch,
}

fn merged_config(cli: &Cli) -> Result<EngineConfig, EngineError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config_path()?,
    };
    let mut config = load_config(&path)?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(company) = &cli.company {
        config.company_id = Some(company.clone());
    }
    if let Some(branch) = &cli.branch {
        config.branch_id = Some(branch.clone());
    }
    if cli.manager {
        config.is_manager = true;
    }
    if let Some(days) = cli.lookback_days {
        config.trend_lookback_days = days;
    }
    Ok(config)
}

fn open_store(config: &EngineConfig) -> Result<FsStore, EngineError> {
    let store = FsStore::open(config.resolved_data_dir()?)?
        .with_debounce(Duration::from_millis(config.debounce_ms));
    log::info!("Reading collections from {}", store.data_dir().display());
    Ok(store)
}

fn report(err: &EngineError) {
    let info = EngineErrorInfo::from(err);
    if info.can_retry {
        log::error!("{} (retryable: {})", info.message, info.recovery_suggestion);
    } else {
        log::error!("{} ({})", info.message, info.recovery_suggestion);
    }
}

fn non_empty(ids: &[String]) -> Option<BTreeSet<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.iter().cloned().collect())
    }
}

async fn run_snapshot(
    config: &EngineConfig,
    pretty: bool,
    update: LocationFilterUpdate,
) -> Result<(), EngineError> {
    let mut filter = LocationFilter::default();
    filter.apply(update)?;

    let state = match &config.company_id {
        Some(company) => {
            let store = open_store(config)?;
            let raw = fetch_snapshots(&store, &CollectionPath::Company(company.clone())).await?;
            let options = RecomputeOptions {
                today: chrono::Local::now().date_naive(),
                trend_lookback_days: config.trend_lookback_days,
            };
            recompute(&raw, &config.scope(), &filter, &options)
        }
        None => {
            log::warn!("No company configured; printing empty state");
            DerivedState::default()
        }
    };

    let json = if pretty {
        serde_json::to_string_pretty(&state)
    } else {
        serde_json::to_string(&state)
    }
    .map_err(|e| EngineError::ParseError {
        what: "derived state".to_string(),
        message: e.to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn summary_line(state: &DerivedState) -> String {
    if state.is_empty() {
        return "no data".to_string();
    }
    format!(
        "personnel={} tasks={} completed={} active={} missed={} map={}/{}",
        state.stats.total_personnel,
        state.stats.total_tasks,
        state.stats.completed_tasks,
        state.stats.pending_tasks,
        state.all_missed.len(),
        state.location_filtered.len(),
        state.location_master.len(),
    )
}

async fn run_watch(config: &EngineConfig) -> Result<(), EngineError> {
    let store: Arc<dyn DataStore> = Arc::new(open_store(config)?);
    let reconciler =
        Reconciler::start(store, config.context(), config.reconciler_options()).await?;

    let subscription = reconciler.subscribe_to_derived_state(|state| {
        println!("{}", summary_line(&state));
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {}", e);
    }

    subscription.unsubscribe();
    reconciler.dispose();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match merged_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Snapshot {
            pretty,
            max_count,
            ref personnel_ids,
            ref task_ids,
        } => {
            let update = LocationFilterUpdate {
                max_count,
                personnel_ids: non_empty(personnel_ids),
                task_ids: non_empty(task_ids),
            };
            run_snapshot(&config, pretty, update).await
        }
        Command::Watch => run_watch(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}
