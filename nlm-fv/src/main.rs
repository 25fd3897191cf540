//! Form View service (nlm-fv) - Main entry point
//!
//! Accepts view notifications from embedded subscription forms and records
//! them through the view batcher. On SIGINT/SIGTERM the HTTP server stops
//! accepting requests and the batcher flushes what it still holds.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nlm_common::config::{
    database_path, ensure_root_folder, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV,
};
use nlm_fv::batcher::ViewBatcher;
use nlm_fv::config::{
    resolve_batcher_config, resolve_bind_addr, startup_form_keys, BatcherOverrides,
};
use nlm_fv::store::{FormStore, MemoryFormStore, SqliteFormStore};
use nlm_fv::{build_router, AppState};

/// Command-line arguments for nlm-fv
#[derive(Parser, Debug)]
#[command(name = "nlm-fv")]
#[command(about = "Form view batching service")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "NLM_FV_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "NLM_FV_PORT")]
    port: Option<u16>,

    /// Root folder holding nlm.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: <config dir>/nlm/nlm-fv.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Views that trigger an immediate flush
    #[arg(long, env = "NLM_FV_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Milliseconds between the first queued view and its flush
    #[arg(long, env = "NLM_FV_PROCESSING_INTERVAL_MS")]
    processing_interval_ms: Option<u64>,

    /// Upper bound on the shutdown flush in milliseconds
    #[arg(long, env = "NLM_FV_SHUTDOWN_TIMEOUT_MS")]
    shutdown_timeout_ms: Option<u64>,

    /// Register a form key at startup (repeatable)
    #[arg(long = "form", value_name = "FORM_KEY")]
    forms: Vec<String>,

    /// Keep form counters in memory instead of nlm.db
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlm_fv=info,nlm_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting NLM Form View service (nlm-fv) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let toml_config = match &args.config {
        Some(path) => TomlConfig::load(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => TomlConfig::load_for_module("nlm-fv").context("Failed to load config file")?,
    };

    let form_keys = startup_form_keys(&args.forms, &toml_config);

    let (store, pool) = if args.memory {
        warn!("Running with in-memory form store; counters are lost on exit");
        if form_keys.is_empty() {
            warn!("No forms registered (--form or `forms` in TOML); every view will be dropped");
        }
        let memory = MemoryFormStore::with_forms(&form_keys)
            .context("Failed to register forms")?;
        info!(forms = form_keys.len(), "Registered forms in memory");
        let store: Arc<dyn FormStore> = Arc::new(memory);
        (store, None)
    } else {
        let root_folder =
            resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, &toml_config);
        ensure_root_folder(&root_folder).context("Failed to initialize root folder")?;

        let db_path = database_path(&root_folder);
        info!("Database path: {}", db_path.display());

        let pool = nlm_common::db::init_database(&db_path)
            .await
            .context("Failed to open database")?;
        info!("✓ Connected to database");

        let sqlite = SqliteFormStore::new(pool.clone());
        for form_key in &form_keys {
            sqlite
                .ensure_form(form_key)
                .await
                .with_context(|| format!("Failed to register form '{}'", form_key))?;
        }
        if !form_keys.is_empty() {
            info!(forms = form_keys.len(), "Registered startup forms");
        }

        let store: Arc<dyn FormStore> = Arc::new(sqlite);
        (store, Some(pool))
    };

    let overrides = BatcherOverrides {
        batch_size: args.batch_size,
        processing_interval_ms: args.processing_interval_ms,
        shutdown_timeout_ms: args.shutdown_timeout_ms,
    };
    let batcher_config = resolve_batcher_config(pool.as_ref(), &toml_config, &overrides)
        .await
        .context("Failed to resolve batcher settings")?;
    info!(
        batch_size = batcher_config.batch_size,
        processing_interval_ms = batcher_config.processing_interval.as_millis() as u64,
        "View batcher configured"
    );

    let shutdown_timeout = batcher_config.shutdown_timeout;
    let batcher = ViewBatcher::with_tokio(batcher_config, store.clone());

    let app = build_router(AppState::new(batcher.clone(), store));

    let addr = resolve_bind_addr(args.host.as_deref(), args.port, &toml_config);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("nlm-fv listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!(queued = batcher.queued(), "HTTP server stopped, flushing queued views");
    if let Err(e) = batcher.shutdown(shutdown_timeout).await {
        warn!("{}", e);
    }

    if let Some(pool) = pool {
        pool.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
