use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use flowrun_core::config::AppConfig;
use flowrun_core::event::EventBus;
use flowrun_core::traits::{SystemClock, WaitStore};
use flowrun_core::types::{ConversationScope, FlowEvent, Operator, TriggerEvent, TriggerType};

use flowrun_engine::{
    DagScheduler, DispatchOutcome, Dispatcher, EngineServices, NodeRegistry, RoutineScheduler,
    WaitReaper,
};
use flowrun_store::{FileFlowCatalog, SqliteWaitStore};

#[derive(Parser)]
#[command(name = "flowrun", version, about = "Conversational flow execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowrun.toml", env = "FLOWRUN_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver one trigger event (resumes a waiting run when one matches)
    Run {
        /// Flow code to run
        #[arg(long)]
        flow: String,
        /// Flow version (latest when omitted)
        #[arg(long)]
        flow_version: Option<String>,
        /// Trigger type: chat_message, open_chat_window, add_friend, param_call, routine
        #[arg(long, default_value = "chat_message")]
        trigger: TriggerType,
        #[arg(long)]
        organization: String,
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        topic: Option<String>,
        /// Trigger payload as JSON
        #[arg(long)]
        payload: Option<String>,
        /// Shorthand for a chat payload `{"message": ...}`
        #[arg(long, conflicts_with = "payload")]
        message: Option<String>,
        /// Operator uid
        #[arg(long)]
        operator: Option<String>,
    },
    /// List wait records for a conversation
    Waits {
        #[arg(long)]
        organization: String,
        #[arg(long)]
        conversation: String,
    },
    /// Remove expired wait records once
    Reap,
    /// Check every flow in the flows directory against the node registry
    Validate,
    /// Run the wait reaper and routine triggers until Ctrl-C
    Daemon,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Everything a command needs to talk to the engine.
struct Engine {
    scheduler: Arc<DagScheduler>,
    catalog: Arc<FileFlowCatalog>,
    store: Arc<dyn WaitStore>,
}

fn build_engine(config: &AppConfig) -> anyhow::Result<Engine> {
    let clock = Arc::new(SystemClock);

    let store: Arc<dyn WaitStore> = match config.store.resolved_path() {
        Some(path) => Arc::new(
            SqliteWaitStore::open(&path, clock.clone())
                .with_context(|| format!("opening wait store at {}", path.display()))?,
        ),
        None => {
            warn!("No store.path configured, wait records are kept in memory only");
            Arc::new(SqliteWaitStore::in_memory(clock.clone())?)
        }
    };

    let flows_dir = config.flows.resolved_dir();
    let catalog = Arc::new(
        FileFlowCatalog::open(&flows_dir)
            .with_context(|| format!("loading flows from {}", flows_dir.display()))?,
    );

    let services = EngineServices::new(store.clone(), catalog.clone())
        .with_clock(clock)
        .with_event_bus(Arc::new(EventBus::default()));
    let registry =
        NodeRegistry::with_builtins().with_version_fallback(config.engine.allow_version_fallback);
    let scheduler = Arc::new(DagScheduler::new(registry, services, config.engine.clone()));

    Ok(Engine {
        scheduler,
        catalog,
        store,
    })
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        Ok(AppConfig::load(path)?)
    } else {
        Ok(AppConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowrun", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.config.exists() {
        debug!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            flow,
            flow_version,
            trigger,
            organization,
            conversation,
            topic,
            payload,
            message,
            operator,
        } => {
            let engine = build_engine(&config)?;
            let mut scope = ConversationScope::new(organization, conversation);
            if let Some(topic) = topic {
                scope = scope.with_topic(topic);
            }

            let mut event = TriggerEvent::new(trigger, scope);
            if let Some(raw) = payload {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--payload is not valid JSON")?;
                event = event.with_payload(value);
            } else if let Some(text) = message {
                event = event.with_payload(serde_json::json!({ "message": text }));
            }
            if let Some(uid) = operator {
                event = event.with_operator(Operator::new(uid));
            }

            let dispatcher = Dispatcher::new(engine.scheduler.clone());
            let outcome = dispatcher
                .dispatch(&flow, flow_version.as_deref(), event)
                .await?;
            print_outcome(&outcome)?;
        }
        Commands::Waits {
            organization,
            conversation,
        } => {
            let engine = build_engine(&config)?;
            let scope = ConversationScope::new(organization, conversation);
            let records = engine.store.list_by_scope(&scope).await?;
            if records.is_empty() {
                println!("No wait records.");
            }
            let now = chrono::Utc::now();
            for record in records {
                let timeout = match record.timeout_at {
                    Some(t) => chrono::DateTime::from_timestamp(t, 0)
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| t.to_string()),
                    None => "never".to_string(),
                };
                println!(
                    "{}  flow={}@{}  created={}  timeout={}{}",
                    record.waiting_node_id,
                    record.flow_code,
                    record.flow_version,
                    record.created_at.to_rfc3339(),
                    timeout,
                    if record.is_expired(now) { "  (expired)" } else { "" },
                );
            }
        }
        Commands::Reap => {
            let engine = build_engine(&config)?;
            let reaper = WaitReaper::new(
                engine.scheduler.services(),
                &config.reaper,
                CancellationToken::new(),
            );
            let reaped = reaper.reap_once().await?;
            println!("Reaped {} expired wait record(s).", reaped.len());
            for record in reaped {
                println!("  {}  flow={}", record.key(), record.flow_code);
            }
        }
        Commands::Validate => {
            let engine = build_engine(&config)?;
            let flows = engine.catalog.flows();
            if flows.is_empty() {
                println!("No flows found in {}", engine.catalog.dir().display());
                return Ok(());
            }

            let mut failed = 0;
            for flow in flows {
                match engine.scheduler.check_flow(&flow) {
                    Ok(()) => println!("  [ok]   {}@{} ({} nodes)", flow.code, flow.version, flow.nodes.len()),
                    Err(e) => {
                        failed += 1;
                        println!("  [FAIL] {}@{}: {}", flow.code, flow.version, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} flow(s) failed validation", failed);
            }
        }
        Commands::Daemon => {
            info!("Starting flowrun daemon");
            let engine = build_engine(&config)?;
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down daemon...");
                cancel_clone.cancel();
            });

            let mut tasks = Vec::new();

            let log_bus = engine.scheduler.services().event_bus.clone();
            let log_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                log_events(log_bus, log_cancel).await;
            }));

            if config.reaper.enabled {
                let reaper =
                    WaitReaper::new(engine.scheduler.services(), &config.reaper, cancel.clone());
                tasks.push(tokio::spawn(async move {
                    reaper.run().await;
                }));
                info!("Wait reaper started");
            }

            if let Some(ref routine_config) = config.routine {
                let dispatcher = Arc::new(Dispatcher::new(engine.scheduler.clone()));
                let routines = RoutineScheduler::new(routine_config, dispatcher, cancel.clone());
                tasks.push(tokio::spawn(async move {
                    routines.run().await;
                }));
                info!("Routine scheduler started");
            }

            cancel.cancelled().await;
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Daemon task panicked");
                }
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn print_outcome(outcome: &DispatchOutcome) -> anyhow::Result<()> {
    match outcome {
        DispatchOutcome::Dropped => {
            println!("{}", serde_json::json!({ "status": "dropped" }));
        }
        DispatchOutcome::Ran(run) | DispatchOutcome::Resumed(run) => {
            println!("{}", serde_json::to_string_pretty(run)?);
        }
    }
    Ok(())
}

/// Mirror engine events into the log until cancelled.
async fn log_events(bus: Arc<EventBus>, cancel: CancellationToken) {
    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(FlowEvent::RunFailed { run_id, flow_code, node_id, reason }) => {
                    warn!(%run_id, %flow_code, %node_id, %reason, "Run failed");
                }
                Ok(FlowEvent::WaitExpired { conversation_id, node_id, flow_code }) => {
                    info!(%conversation_id, %node_id, %flow_code, "Wait expired");
                }
                Ok(other) => debug!(event = ?other, "Flow event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}
