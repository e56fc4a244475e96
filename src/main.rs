mod cache;
mod compilers;
mod config;
mod core;
mod invoker;
mod models;
mod problems;
mod safeexec;
mod storage;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::compilers::CompilerImageManager;
use crate::config::Config;
use crate::invoker::Invoker;
use crate::problems::ProblemPackageManager;
use crate::storage::{blob_storage, FileManager};
use crate::store::Core;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("invoker=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::load().context("Cannot load config")?;
    info!("Starting invoker...");

    let core = Core::redis(&config.redis.url)
        .await
        .context("Cannot connect to Redis")?;
    info!("Connected to Redis at {}", config.redis.url);

    let blobs = blob_storage(&config.storage)
        .await
        .context("Cannot init file storage")?;
    let files = FileManager::new(core.files.clone(), blobs);

    let safeexec = Arc::new(safeexec::Manager::new(&config.safeexec).context("Cannot init safeexec")?);
    let compiler_images =
        CompilerImageManager::new(files.clone(), safeexec, config.cache.compilers_dir.clone())
            .context("Cannot init compiler cache")?;
    let problem_packages =
        ProblemPackageManager::new(files.clone(), config.cache.problems_dir.clone())
            .context("Cannot init problem cache")?;

    let invoker = Arc::new(Invoker::new(core, files, compiler_images, problem_packages));
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                signal.cancel();
            }
            Err(err) => error!("Cannot listen for shutdown signal: {}", err),
        }
    });

    invoker.run(config.worker_count(), shutdown).await;
    Ok(())
}
