/*
 * 5D Labs Kiln Platform - Command Line Client
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

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod client;
mod commands;
mod terminal;
mod ui;

use client::{ApiClient, Endpoint};
use commands::app::AppCommand;

/// Kiln - build and run applications on Kubernetes
#[derive(Parser)]
#[command(
    name = "kiln",
    version,
    about = "Kiln application platform CLI",
    long_about = "Stage application sources into container images and attach to\n\
                  running workloads through the Kiln API server."
)]
#[command(propagate_version = true)]
struct Cli {
    /// API server base URL
    #[arg(
        long,
        global = true,
        env = "KILN_API_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    /// WebSocket base URL for live sessions, derived from the API URL when unset
    #[arg(long, global = true, env = "KILN_WS_URL")]
    ws_url: Option<String>,

    /// User name for basic authentication
    #[arg(long, global = true, env = "KILN_USER", default_value = "admin")]
    user: String,

    #[arg(long, global = true, env = "KILN_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Target namespace
    #[arg(
        short,
        long,
        global = true,
        env = "KILN_NAMESPACE",
        default_value = "workspace"
    )]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage applications
    #[command(subcommand)]
    App(AppCommand),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let endpoint = Endpoint::new(&cli.api_url, cli.ws_url.as_deref(), &cli.user, &cli.password)?;
    let client = ApiClient::new(endpoint)?;

    let result = match cli.command {
        Commands::App(cmd) => cmd.run(&client, &cli.namespace).await,
    };
    if let Err(e) = &result {
        ui::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    result
}
