mod config;
mod render;
mod timespec;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use crossterm::style::Stylize;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use cwtail_source::{CloudWatchClient, Resolution, SourceCatalog, pick_candidate, resolve};
use cwtail_tail::{BackoffPolicy, SourceSpec, SystemClock, TailConfig, TailSession};

use crate::config::Config;
use crate::render::{Renderer, describe_warning};

/// cwtail - Tail CloudWatch log groups as one merged, time-ordered stream
#[derive(Parser, Debug)]
#[command(name = "cwtail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log group name, part of one, or a log set name (with --set)
    #[arg(value_name = "IDENTIFIER")]
    identifier: String,

    /// Only show records since this time (duration like 10m, or a timestamp)
    #[arg(long, default_value = "100000s")]
    since: String,

    /// Stop once records up to this time have been shown
    #[arg(long)]
    to: Option<String>,

    /// Filter pattern, passed to CloudWatch as-is
    #[arg(long, default_value = "")]
    filter: String,

    /// Exit after catching up instead of keeping the log open
    #[arg(long)]
    disable_keep_open: bool,

    /// Use the identifier as the exact log group name
    #[arg(short, long)]
    exact: bool,

    /// Treat the identifier as a log set name from the config file
    #[arg(short, long)]
    set: bool,

    /// Config file (defaults to <config dir>/cwtail/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Pause between polls
    #[arg(long)]
    interval: Option<String>,

    /// Longest delay before CloudWatch makes a record visible; output trails by this much
    #[arg(long)]
    lookback: Option<String>,

    /// Consecutive failures tolerated per log group before it is dropped
    #[arg(long, default_value = "8")]
    max_retries: u32,

    /// AWS region (defaults to the standard AWS configuration chain)
    #[arg(long)]
    region: Option<String>,

    /// Show Lambda START/END/REPORT lines
    #[arg(long)]
    show_metadata: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args_os().len() == 1 {
        print_setup_help();
        return Ok(());
    }

    let args = Args::parse();

    // Initialize tracing for debugging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Run the application
    if let Err(e) = run_app(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_app(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    let now = Utc::now().timestamp_millis();
    let since_millis = timespec::parse_time_spec(&args.since, now)?;
    let to_millis = args
        .to
        .as_deref()
        .map(|to| timespec::parse_time_spec(to, now))
        .transpose()?;
    if let Some(to) = to_millis {
        if to <= since_millis {
            anyhow::bail!("--to must be later than --since");
        }
    }

    let poll_interval = setting_duration(args.interval.as_deref(), config.settings.interval.as_deref(), "1s")?;
    let lookback = setting_duration(args.lookback.as_deref(), config.settings.lookback.as_deref(), "10s")?;
    let region = args.region.clone().or_else(|| config.settings.region.clone());

    let client = CloudWatchClient::new(region).await;
    let sources = resolve_sources(&args, &config, &client).await?;
    tracing::info!(
        sources = ?sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        since_millis,
        ?to_millis,
        "starting tail"
    );

    let tail_config = TailConfig {
        since_millis,
        to_millis,
        filter_pattern: Some(args.filter.clone()).filter(|f| !f.is_empty()),
        keep_open: !args.disable_keep_open,
        poll_interval,
        lookback,
        backoff: BackoffPolicy {
            max_retries: args.max_retries,
            ..BackoffPolicy::default()
        },
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let session = TailSession::new(Arc::new(client), Arc::new(SystemClock), sources.clone(), tail_config)?
        .with_cancellation(cancel.clone());
    let mut renderer = Renderer::stdout(&sources, !args.no_color, args.show_metadata);
    let mut batches = pin!(session.into_stream());

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = batches.next() => next,
        };
        let Some(batch) = next else {
            break;
        };
        let batch = batch?;

        for warning in &batch.warnings {
            if let Some(message) = describe_warning(warning) {
                eprintln!("{} {}", "warning:".yellow(), message);
            }
        }
        renderer
            .render_batch(&batch.records)
            .context("Failed to write log output")?;
    }

    Ok(())
}

/// Flag value, else config value, else default
fn setting_duration(flag: Option<&str>, setting: Option<&str>, default: &str) -> Result<Duration> {
    let raw = flag.or(setting).unwrap_or(default);
    Ok(timespec::parse_duration(raw)?)
}

/// Turn the identifier into concrete log groups
async fn resolve_sources(
    args: &Args,
    config: &Config,
    catalog: &dyn SourceCatalog,
) -> Result<Vec<SourceSpec>> {
    if args.set {
        return Ok(config.log_set(&args.identifier)?);
    }

    if args.exact {
        return Ok(vec![SourceSpec::named(args.identifier.as_str())]);
    }

    let available = catalog
        .list_sources(Some(&args.identifier))
        .await
        .context("Failed to list log groups")?;

    match resolve(&args.identifier, false, &available) {
        Resolution::Resolved(source) => Ok(vec![source]),
        Resolution::NotFound => anyhow::bail!("No log groups found matching '{}'", args.identifier),
        Resolution::Ambiguous(candidates) => Ok(vec![prompt_for_candidate(&candidates)?]),
    }
}

/// Print numbered candidates and read the user's choice
fn prompt_for_candidate(candidates: &[String]) -> Result<SourceSpec> {
    let mut stdout = io::stdout();
    for (i, candidate) in candidates.iter().enumerate() {
        writeln!(stdout, "{} {}", format!("[{i}]").cyan(), candidate.as_str().green())?;
    }
    write!(stdout, "Which log group would you like to tail? ")?;
    stdout.flush()?;

    let mut choice = String::new();
    io::stdin()
        .lock()
        .read_line(&mut choice)
        .context("Failed to read selection")?;

    pick_candidate(candidates, &choice)
        .with_context(|| format!("Invalid choice '{}'", choice.trim()))
}

fn print_setup_help() {
    let path = Config::default_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<config dir>/cwtail/config.toml".to_string());

    println!("Usage: cwtail <IDENTIFIER> [--since 10m] [--filter PATTERN] [-e] [-s]");
    println!();
    println!("Define log sets in {path} and tail them merged with `cwtail <set name> -s`:");
    println!();
    println!("  [sets.backend]");
    println!("  log_groups = [");
    println!("      {{ alias = \"api\", name = \"/aws/lambda/backend-api\" }},");
    println!("      {{ alias = \"worker\", name = \"/aws/lambda/backend-worker\" }},");
    println!("  ]");
    println!();
    println!("Run `cwtail --help` for all options.");
}
