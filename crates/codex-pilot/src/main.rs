use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use codex_pilot::logging::{LogFormat, init_tracing};
use codex_pilot::{PersonaMood, PilotClient, PilotConfig, Snapshot};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "codex-pilot",
    about = "Drive a Codex app-server session from the terminal",
    version
)]
struct Opts {
    /// App-server WebSocket URL (overrides the config file)
    #[arg(long)]
    url: Option<String>,

    /// Config file path (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append every frame to this JSONL file
    #[arg(long)]
    wire_log: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_filter: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Stay connected and log session changes until Ctrl-C
    Watch,
    /// Print the thread list once
    Threads {
        /// Seconds to wait for the list
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Start a new thread with a prompt and follow it until the turn ends
    Summon { prompt: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_tracing(&opts.log_filter, opts.log_format);

    let mut config = match &opts.config {
        Some(path) => PilotConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PilotConfig::load().context("failed to load config")?,
    };
    if let Some(url) = opts.url.clone() {
        config = config.with_url(url);
    }
    if let Some(path) = opts.wire_log.clone() {
        config = config.with_wire_log(path);
    }

    info!(url = %config.url, "starting codex-pilot");
    let client = PilotClient::spawn(config).context("invalid app-server URL")?;
    client.connect()?;

    let result = match opts.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(&client).await,
        Command::Threads { timeout } => threads(&client, Duration::from_secs(timeout)).await,
        Command::Summon { prompt } => summon(&client, prompt).await,
    };

    client.shutdown().await;
    result
}

async fn watch(client: &PilotClient) -> anyhow::Result<()> {
    let mut snapshots = client.subscribe();
    let mut last = client.snapshot();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            changed = snapshots.changed() => {
                changed.context("session runtime stopped")?;
                let next = snapshots.borrow_and_update().clone();
                report_changes(&last, &next);
                last = next;
            }
        }
    }
}

fn report_changes(last: &Snapshot, next: &Snapshot) {
    if last.status != next.status {
        info!(status = ?next.status, "connection status");
    }
    if last.last_error != next.last_error {
        if let Some(error) = &next.last_error {
            info!(%error, "session error");
        }
    }
    let seen = last.events.last().map(|event| event.at);
    for event in &next.events {
        if seen.is_some_and(|at| event.at <= at) {
            continue;
        }
        info!(method = %event.method, "{}", event.summary);
    }
    for persona in &next.personas {
        let previous = last.persona(&persona.thread_id).map(|p| p.mood);
        if previous != Some(persona.mood) {
            info!(
                thread = %persona.thread_id,
                name = %persona.identity.name,
                mood = persona.mood.as_str(),
                "persona"
            );
        }
    }
}

async fn threads(client: &PilotClient, wait: Duration) -> anyhow::Result<()> {
    let snapshot = tokio::time::timeout(wait, client.wait_for(|s| !s.threads.is_empty()))
        .await
        .unwrap_or_else(|_| Ok(client.snapshot()))?;
    if !snapshot.status.is_connected() {
        bail!(
            "not connected: {}",
            snapshot.last_error.as_deref().unwrap_or("no response")
        );
    }
    for thread in &snapshot.threads {
        println!(
            "{}\t{}\t{}",
            thread.id,
            thread.status,
            thread.display_name()
        );
    }
    Ok(())
}

async fn summon(client: &PilotClient, prompt: String) -> anyhow::Result<()> {
    client.summon_fairy(prompt)?;
    let snapshot = tokio::select! {
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        snapshot = client.wait_for(|s| {
            s.personas.iter().any(|p| {
                p.summoned && matches!(p.mood, PersonaMood::Done | PersonaMood::Error)
            })
        }) => snapshot?,
    };
    for persona in snapshot.personas.iter().filter(|p| p.summoned) {
        println!(
            "{} ({}) {}: {}",
            persona.identity.name,
            persona.thread_id,
            persona.mood.as_str(),
            persona.preview
        );
    }
    Ok(())
}
