use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use kiln_controller::AppRef;
use kiln_session::transport::connect;
use kiln_session::{LogPrinter, LogStreamRelay, SessionMultiplexer, Subprotocol};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ApiClient;
use crate::terminal::RawModeGuard;
use crate::ui;

#[derive(Subcommand)]
pub enum AppCommand {
    /// Build an uploaded source blob into an image
    Stage(StageArgs),

    /// Wait for a stage to finish
    Staged(StagedArgs),

    /// Open an interactive shell in a running application
    Exec(ExecArgs),

    /// Print application or staging logs
    Logs(LogsArgs),
}

#[derive(Args)]
pub struct StageArgs {
    /// Application name
    pub name: String,

    /// Id of the uploaded source blob
    #[arg(long)]
    pub blob: String,

    /// Builder image used to produce the application image
    #[arg(long, default_value = "paketobuildpacks/builder:full")]
    pub builder_image: String,

    /// Wait for the build to finish
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args)]
pub struct StagedArgs {
    /// Stage id returned by `kiln app stage`
    pub stage_id: String,
}

#[derive(Args)]
pub struct ExecArgs {
    /// Application name
    pub name: String,
}

#[derive(Args)]
pub struct LogsArgs {
    /// Application name
    pub name: String,

    /// Keep streaming new lines
    #[arg(short, long)]
    pub follow: bool,

    /// Show the logs of this staging run instead of the running application
    #[arg(long)]
    pub staging_id: Option<String>,
}

impl AppCommand {
    pub async fn run(self, client: &ApiClient, namespace: &str) -> Result<()> {
        match self {
            Self::Stage(args) => stage(client, namespace, args).await,
            Self::Staged(args) => staged(client, namespace, &args.stage_id).await,
            Self::Exec(args) => exec(client, namespace, &args.name).await,
            Self::Logs(args) => logs(client, namespace, args).await,
        }
    }
}

async fn stage(client: &ApiClient, namespace: &str, args: StageArgs) -> Result<()> {
    let app = AppRef::new(args.name, namespace);
    ui::print_info(&format!("Staging {app}"));

    let response = client.stage(&app, &args.blob, &args.builder_image).await?;
    ui::print_field("Stage", &response.stage.id);
    ui::print_field("Image", &response.image_url);

    if args.wait {
        staged(client, namespace, &response.stage.id).await?;
    } else {
        ui::print_success("Stage started");
    }
    Ok(())
}

async fn staged(client: &ApiClient, namespace: &str, stage_id: &str) -> Result<()> {
    ui::print_info(&format!("Waiting for stage {stage_id}"));
    client.staged(namespace, stage_id).await?;
    ui::print_success(&format!("Stage {stage_id} complete"));
    Ok(())
}

async fn exec(client: &ApiClient, namespace: &str, name: &str) -> Result<()> {
    let app = AppRef::new(name, namespace);
    let url = client.exec_url(&app);
    let authorization = client.endpoint().authorization();

    let connection = connect(
        &url,
        &[Subprotocol::BASE64_NAME, Subprotocol::BINARY_NAME],
        Some(&authorization),
    )
    .await
    .with_context(|| format!("Failed to open exec session for {app}"))?;
    let protocol = connection
        .protocol
        .as_deref()
        .and_then(Subprotocol::from_name)
        .unwrap_or_default();
    debug!(protocol = protocol.name(), "Exec session open");

    let guard = RawModeGuard::enter()?;
    let result = SessionMultiplexer::new(protocol)
        .run(
            Box::new(connection.sink),
            connection.source,
            tokio::io::stdin(),
            tokio::io::stdout(),
            CancellationToken::new(),
        )
        .await;
    drop(guard);

    result.with_context(|| format!("Exec session for {app} failed"))?;
    // The stdin reader thread stays blocked until the next keypress
    std::process::exit(0);
}

async fn logs(client: &ApiClient, namespace: &str, args: LogsArgs) -> Result<()> {
    let app = AppRef::new(args.name, namespace);
    let url = client.logs_url(&app, args.staging_id.as_deref(), args.follow);
    let authorization = client.endpoint().authorization();

    let connection = connect(&url, &[], Some(&authorization))
        .await
        .with_context(|| format!("Failed to open log stream for {app}"))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, closing log stream");
            on_interrupt.cancel();
        }
    });

    let mut printer = LogPrinter::stdout();
    LogStreamRelay::default()
        .run(
            Box::new(connection.sink),
            connection.source,
            &mut printer,
            cancel,
        )
        .await
        .with_context(|| format!("Log stream for {app} failed"))
}
