// crates/expunge-cli/src/main.rs
// ============================================================================
// Module: Expunge CLI Entry Point
// Description: Command dispatcher for the executor server and plan tooling.
// Purpose: Start the workers and API, or inspect plans offline.
// Dependencies: clap, expunge crates, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! `expunge serve` loads and validates the config, opens the store, wires the
//! dispatcher over its connector seams, starts the runner, scheduler, and
//! sweeper worker threads, and serves the REST API until interrupted. The
//! process exits non-zero on config validation failure and on unrecoverable
//! startup errors (store unreachable, plans root missing); everything after
//! startup is reported per run, in band.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use clap::Parser;
use clap::Subcommand;
use prometheus::Registry;
use serde_json::Value;
use serde_json::json;

use expunge_config::ExecutorConfig;
use expunge_config::load_config;
use expunge_connectors::ConnectorDispatcher;
use expunge_connectors::DispatcherSettings;
use expunge_connectors::FetchBrowser;
use expunge_connectors::InMemoryMailbox;
use expunge_connectors::SmtpMailTransport;
use expunge_core::PlanId;
use expunge_core::RunCreator;
use expunge_core::RunId;
use expunge_core::RunLaunch;
use expunge_core::Store;
use expunge_core::TaskDispatcher;
use expunge_engine::DeadLetterController;
use expunge_engine::EngineMetrics;
use expunge_engine::RetentionSweeper;
use expunge_engine::Runner;
use expunge_engine::RunnerSettings;
use expunge_engine::ScanScheduler;
use expunge_engine::launch_run;
use expunge_plans::check_plan_health;
use expunge_plans::hash_plan;
use expunge_plans::load_plan;
use expunge_server::ApiState;
use expunge_store_sqlite::SqliteStore;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Expunge erasure-run orchestrator.
#[derive(Debug, Parser)]
#[command(name = "expunge", version, about = "Erasure-run orchestrator")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Start the executor: workers plus the REST API.
    Serve {
        /// Path to the YAML config document.
        #[arg(long)]
        config: PathBuf,
    },
    /// Load a plan and report its structural health as JSON.
    CheckPlan {
        /// Plan identifier to resolve.
        plan_id: String,
        /// Root directory of plan files.
        #[arg(long)]
        plans_root: PathBuf,
    },
    /// Print the canonical hash of a plan.
    HashPlan {
        /// Plan identifier to resolve.
        plan_id: String,
        /// Root directory of plan files.
        #[arg(long)]
        plans_root: PathBuf,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
        } => serve(&config),
        Command::CheckPlan {
            plan_id,
            plans_root,
        } => check_plan(&plan_id, &plans_root),
        Command::HashPlan {
            plan_id,
            plans_root,
        } => print_plan_hash(&plan_id, &plans_root),
    }
}

/// Writes a JSON value to stdout.
fn emit(value: &Value) -> ExitCode {
    let mut stdout = std::io::stdout();
    match serde_json::to_string_pretty(value)
        .map_err(|err| err.to_string())
        .and_then(|text| writeln!(stdout, "{text}").map_err(|err| err.to_string()))
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// Writes an error line to stderr and fails the process.
fn fail(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "error: {message}");
    ExitCode::FAILURE
}

// ============================================================================
// SECTION: Plan Commands
// ============================================================================

/// Runs the structural health check for one plan.
fn check_plan(plan_id: &str, plans_root: &std::path::Path) -> ExitCode {
    let report = check_plan_health(plans_root, &PlanId::new(plan_id));
    match serde_json::to_value(&report) {
        Ok(value) => emit(&value),
        Err(error) => fail(&error.to_string()),
    }
}

/// Prints the canonical hash for one plan.
fn print_plan_hash(plan_id: &str, plans_root: &std::path::Path) -> ExitCode {
    let plan = match load_plan(plans_root, &PlanId::new(plan_id)) {
        Ok(plan) => plan,
        Err(error) => return fail(&error.to_string()),
    };
    match hash_plan(&plan) {
        Ok(hash) => emit(&json!({"plan_id": plan_id, "plan_hash": hash})),
        Err(error) => fail(&error.to_string()),
    }
}

// ============================================================================
// SECTION: Serve
// ============================================================================

/// Run-creation hook used by the scheduler: the in-process launch gate.
struct SchedulerLaunch {
    /// Shared store.
    store: Arc<dyn Store>,
    /// Root directory of plan files.
    plans_root: PathBuf,
}

impl RunCreator for SchedulerLaunch {
    fn create_run(&self, plan_id: &PlanId, params: Value) -> Option<RunId> {
        let launch = RunLaunch {
            plan_id: plan_id.clone(),
            params,
            requested_by: Some("scheduler".to_string()),
            idempotency_key: None,
        };
        match launch_run(self.store.as_ref(), &self.plans_root, false, &launch) {
            Ok(run) => Some(run.run_id),
            Err(error) => {
                tracing::error!(plan = plan_id.as_str(), error = %error, "scheduler.create_run_failed");
                None
            }
        }
    }
}

/// Starts workers and the API; blocks until interrupted.
fn serve(config_path: &std::path::Path) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return fail(&format!("config validation failed: {error}")),
    };
    if !config.plans_root.is_dir() {
        return fail(&format!("plans root missing: {}", config.plans_root.display()));
    }
    let store = match SqliteStore::open_at(&config.database_path) {
        Ok(store) => Arc::new(store),
        Err(error) => return fail(&format!("store unreachable: {error}")),
    };
    let store: Arc<dyn Store> = store;

    let registry = Registry::new();
    let metrics = match EngineMetrics::register(&registry) {
        Ok(metrics) => Arc::new(metrics),
        Err(error) => return fail(&format!("metrics registration failed: {error}")),
    };

    let dispatcher = build_dispatcher(&config);
    let dead_letter = Arc::new(DeadLetterController::new(
        Arc::clone(&store),
        config.dead_letter.max_failures,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();

    for index in 0..config.max_concurrent_runs.max(1) {
        let runner = Runner::new(
            RunnerSettings::from_config(&config),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&dead_letter),
            Arc::clone(&metrics),
        );
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("expunge-runner-{index}"))
            .spawn(move || runner.run(&stop_flag));
        match handle {
            Ok(handle) => workers.push(handle),
            Err(error) => return fail(&format!("runner thread spawn failed: {error}")),
        }
    }

    if config.scheduler.enabled {
        let scheduler = ScanScheduler::new(
            Arc::clone(&store),
            Arc::new(SchedulerLaunch {
                store: Arc::clone(&store),
                plans_root: config.plans_root.clone(),
            }),
            config.scheduler.poll_interval_seconds,
        );
        let stop_flag = Arc::clone(&stop);
        match std::thread::Builder::new()
            .name("expunge-scheduler".to_string())
            .spawn(move || scheduler.run(&stop_flag))
        {
            Ok(handle) => workers.push(handle),
            Err(error) => return fail(&format!("scheduler thread spawn failed: {error}")),
        }
    }

    let sweeper = RetentionSweeper::new(
        Arc::clone(&store),
        config.artifacts_root.clone(),
        config.retention.clone(),
    );
    let stop_flag = Arc::clone(&stop);
    match std::thread::Builder::new()
        .name("expunge-sweeper".to_string())
        .spawn(move || sweeper.run(&stop_flag))
    {
        Ok(handle) => workers.push(handle),
        Err(error) => return fail(&format!("sweeper thread spawn failed: {error}")),
    }

    let state = Arc::new(ApiState::new(
        Arc::clone(&store),
        config.plans_root.clone(),
        config.artifacts_root.clone(),
        &config.auth_token,
        config.policy.require_idempotency_key,
        registry,
    ));

    let outcome = run_server(&config, state);

    stop.store(true, Ordering::Relaxed);
    for handle in workers {
        let _ = handle.join();
    }
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => fail(&message),
    }
}

/// Builds the connector dispatcher from config.
fn build_dispatcher(config: &ExecutorConfig) -> Arc<dyn TaskDispatcher> {
    let browser = Arc::new(FetchBrowser::new(
        config.default_timeout_ms,
        config.browser.check_robots_txt,
    ));
    let transport = Arc::new(SmtpMailTransport::new(config.agent_email.clone()));
    let mailbox = Arc::new(InMemoryMailbox::new());
    Arc::new(ConnectorDispatcher::new(
        DispatcherSettings::from_config(config),
        browser,
        transport,
        mailbox,
    ))
}

/// Serves the API on a tokio runtime until ctrl-c.
fn run_server(config: &ExecutorConfig, state: Arc<ApiState>) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| format!("runtime build failed: {error}"))?;
    runtime.block_on(async move {
        tokio::select! {
            outcome = expunge_server::serve(state, &config.bind_host, config.bind_port) => outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown.signal");
                Ok(())
            }
        }
    })
}
