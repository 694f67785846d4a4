/*
 * 5D Labs Kiln Platform - Staging Server
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Staging Server - HTTP front for application staging
//!
//! This service:
//! - Accepts stage requests and submits Tekton `PipelineRun`s
//! - Waits for submitted runs to complete on request
//! - Provides health and readiness endpoints

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kiln_controller::api;
use kiln_controller::staging::s3::S3Connector;
use kiln_controller::{KubeResources, StagingConfig, StagingCoordinator};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Kiln staging server v{}", env!("CARGO_PKG_VERSION"));

    let config = load_staging_config();
    config.validate().context("invalid staging configuration")?;
    let config = Arc::new(config);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let resources = KubeResources::detect(client)
        .await
        .context("detecting the pipeline engine API")?;

    let coordinator = StagingCoordinator::new(
        Arc::new(resources),
        Arc::new(S3Connector::default()),
        config.clone(),
    );
    let app = api::router(coordinator);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_address).await?;
    info!("Staging server listening on {}", config.server.listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Staging server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kiln_controller=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_staging_config() -> StagingConfig {
    let override_path = std::env::var("KILN_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or(DEFAULT_CONFIG_PATH);

    match StagingConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded staging configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            let mut cfg = StagingConfig::default();
            cfg.apply_env_overrides();
            cfg
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
