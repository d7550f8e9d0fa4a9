//! Camera-trap pipeline worker binary.

mod cli;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trapdata_ml::{InferenceClient, ModelRegistry};
use trapdata_models::{ImageId, Scope, SessionId, Stage};
use trapdata_queue::{QueueSelector, QueueStatus};
use trapdata_store::{discover_images, RecordStore, RunLock, SqliteStore, StoreConfig};
use trapdata_worker::{metrics, Orchestrator, PipelineConfig, DEFAULT_LOCK_TTL};

use cli::{scope, Cli, Commands};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trapdata=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => match metrics::init_metrics(addr) {
                Ok(()) => info!("Serving metrics on {}", addr),
                Err(e) => warn!("Failed to install metrics exporter: {}", e),
            },
            Err(e) => warn!("Ignoring invalid METRICS_ADDR '{}': {}", addr, e),
        }
    }

    if let Err(e) = execute(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[derive(Serialize)]
struct StatusReport {
    running: bool,
    lock: Option<RunLock>,
    queue: QueueStatus,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(cli: &Cli) -> anyhow::Result<Arc<SqliteStore>> {
    let config = match &cli.db {
        Some(path) => StoreConfig {
            path: path.clone(),
            ..StoreConfig::from_env()
        },
        None => StoreConfig::from_env(),
    };
    let path = config.path.display().to_string();
    let store = SqliteStore::open(config).with_context(|| format!("opening {}", path))?;
    Ok(Arc::new(store))
}

fn orchestrator(store: Arc<SqliteStore>, registry: ModelRegistry) -> Orchestrator {
    let ttl = std::env::var("TRAPDATA_LOCK_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LOCK_TTL);
    Orchestrator::new(store, registry).with_lock_ttl(ttl)
}

fn registry() -> anyhow::Result<ModelRegistry> {
    let client = InferenceClient::from_env().context("creating inference client")?;
    Ok(ModelRegistry::with_inference_service(Arc::new(client)))
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli)?;

    match cli.command {
        Commands::Discover { dir, enqueue } => {
            let report = discover_images(store.as_ref(), &dir)
                .with_context(|| format!("scanning {}", dir.display()))?;
            if enqueue {
                let selector = QueueSelector::new(store.clone());
                for session in &report.sessions {
                    selector.enqueue(&Scope::Session(*session), None)?;
                }
            }
            print_json(&report)
        }

        Commands::Enqueue {
            session,
            limit,
            sample,
            image,
        } => {
            let selector = QueueSelector::new(store);
            let queued = if !image.is_empty() {
                let ids: Vec<ImageId> = image.into_iter().map(ImageId).collect();
                selector.enqueue_images(&ids)?
            } else if let Some(size) = sample {
                selector.enqueue_sample(&scope(session), size)?
            } else {
                selector.enqueue(&scope(session), limit)?
            };
            info!(queued, "Images queued");
            print_json(&selector.status(&scope(session))?)
        }

        Commands::Run {
            session,
            batch_timeout_secs,
            cpu,
        } => {
            let mut config = PipelineConfig::from_env();
            if let Some(secs) = batch_timeout_secs {
                config.batch_timeout = Some(Duration::from_secs(secs));
            }
            if cpu {
                config.use_accelerated_compute = false;
            }
            info!("Pipeline config: {:?}", config);

            let orchestrator = orchestrator(store, registry()?);
            let mut handle = orchestrator.start(scope(session), config)?;

            tokio::select! {
                joined = &mut handle => {
                    let summary = joined.context("run task panicked")??;
                    print_json(&summary)
                }
                _ = tokio::signal::ctrl_c() => {
                    handle.abort();
                    let _ = handle.await;
                    warn!("Run interrupted, the in-flight batch stays queued");
                    Ok(())
                }
            }
        }

        Commands::Status { session } => {
            let orchestrator = orchestrator(store, ModelRegistry::new());
            print_json(&StatusReport {
                running: orchestrator.is_running(),
                lock: orchestrator.run_lock()?,
                queue: orchestrator.queue_status(&scope(session))?,
            })
        }

        Commands::Clear { session } => {
            let orchestrator = orchestrator(store, ModelRegistry::new());
            print_json(&orchestrator.clear_queue(&scope(session))?)
        }

        Commands::Summarize {
            session,
            threshold,
            examples,
        } => {
            let summary =
                trapdata_report::summarize(store.as_ref(), &scope(session), threshold, examples)?;
            print_json(&summary)
        }

        Commands::Export { session, output } => match session {
            Some(id) => {
                let path = trapdata_report::export_session(
                    store.as_ref(),
                    SessionId(id),
                    &output,
                    chrono::Utc::now(),
                )?;
                println!("{}", path.display());
                Ok(())
            }
            None => {
                let records = trapdata_report::collect_records(store.as_ref(), &Scope::All)?;
                trapdata_report::export_records(&records, &output)?;
                println!("{}", output.display());
                Ok(())
            }
        },

        Commands::Sessions => print_json(&store.sessions()?),

        Commands::Models => {
            let registry = registry()?;
            let models: BTreeMap<Stage, Vec<&str>> = Stage::ALL
                .iter()
                .map(|stage| (*stage, registry.models(*stage)))
                .collect();
            print_json(&models)
        }
    }
}
