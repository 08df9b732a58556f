mod api;
mod config;
mod error;
mod evaluator;
mod languages;
mod models;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::api::JudgeApi;
use crate::config::WorkerConfig;
use crate::evaluator::ConfineEvaluator;
use crate::languages::LanguageTable;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("jury=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;

    // Load language configurations
    let languages = match &config.languages_config {
        Some(path) => {
            let table = LanguageTable::from_file(path)?;
            info!("Loaded language configurations from {}", path.display());
            table
        }
        None => LanguageTable::builtin()?,
    };
    info!("Supported languages: {}", languages.supported().join(", "));

    info!("Starting Jury worker against {}", config.judge_url);

    let api = Arc::new(JudgeApi::from_config(&config, Arc::new(languages)));
    if api.refresh_problems().await {
        info!("Loaded {} problems", api.problems().len().await);
    } else {
        warn!("Initial problem load failed; problems will be fetched on demand");
    }

    let evaluator = ConfineEvaluator::from_config(&config);
    let worker = Worker::new(api, evaluator, config.idle_poll());

    tokio::select! {
        _ = worker.run() => {}
        _ = shutdown_signal() => {
            warn!("Shutting down...");
            worker.release_current().await;
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
