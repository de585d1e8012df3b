use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqrun_core::exec::CommandExecutor;
use seqrun_core::store::TaskStore;
use seqrun_core::template::TemplateRegistry;
use seqrun_worker::config::{LogFormat, WorkerConfig};
use seqrun_worker::router::CommandRouter;
use seqrun_worker::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "seqrun_worker=debug,seqrun_core=info,seqrun_db=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
    tracing::info!(
        runner = config.runner.as_str(),
        threads = config.threads,
        pending_slack = config.pending_slack,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = seqrun_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    seqrun_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    seqrun_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let store: Arc<dyn TaskStore> = Arc::new(seqrun_db::PgTaskStore::new(pool));

    // --- Templates ---
    let mut templates = TemplateRegistry::builtin(config.runner);
    if let Some(dir) = &config.template_dir {
        let loaded = templates
            .load_dir(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), loaded, "Loaded command template overrides");
    }

    // --- Directories ---
    for dir in [&config.staging_dir, &config.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // --- Scheduler ---
    let router = CommandRouter::new(
        Arc::clone(&store),
        Arc::new(templates),
        config.command_context(),
        CommandExecutor::new(),
    );
    let scheduler = Scheduler::new(store, Arc::new(router), config.scheduler_config());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    scheduler.run(shutdown).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
