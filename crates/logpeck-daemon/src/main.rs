// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logpeck::pecker::Pecker;
use logpeck::store::SledStore;

mod config;
mod http;

use config::Config;
use http::ApiState;

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("logpeck: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("logpeck: {e:#}");
        return ExitCode::FAILURE;
    }

    let shutdown = CancellationToken::new();
    match run(config, shutdown.clone()).await {
        Ok(()) if shutdown.is_cancelled() => {
            error!("Stopped after an unrecoverable error");
            ExitCode::FAILURE
        }
        Ok(()) => {
            info!("Stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let env_filter = format!("h2=off,hyper=off,rustls=off,sled=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse LOGPECK_LOG_LEVEL")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    debug!("Logging subsystem enabled");
    Ok(())
}

/// Runs until ctrl-c, or until the registry reports an unrecoverable error and cancels
/// `shutdown`.
async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let store = SledStore::open(&config.db_path)
        .with_context(|| format!("unable to open store at {}", config.db_path.display()))?;
    info!("Opened task store at {}", config.db_path.display());

    let pecker = Arc::new(
        Pecker::new(Arc::new(store), config.send_timeout)
            .await
            .context("unable to restore peck tasks")?,
    );
    pecker.start().await?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("unable to listen on {addr}"))?;
    info!("Listening on {addr}");

    let router = http::router(ApiState {
        pecker: Arc::clone(&pecker),
        shutdown: shutdown.clone(),
    });
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(graceful_shutdown(shutdown.clone()))
        .await;

    pecker.shutdown().await;
    served.context("HTTP server failed")
}

async fn graceful_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        () = shutdown.cancelled() => debug!("Unrecoverable error, shutting down"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => {
                error!("Unable to listen for ctrl-c: {e}");
                shutdown.cancelled().await;
            }
        },
    }
}
