use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use presence_agent::agent::{AgentCommand, AgentEvent, AgentSettings, PresenceAgent};
use presence_agent::config::{ConfigStore, default_config_path};
use presence_agent::foreground::{ForegroundResolver, MacOsUsageSource};
use presence_agent::power::MacOsPowerSource;
use presence_agent::report::{SendOutcome, StatusReporter};
use presence_agent::scheduler::{CadenceConfig, SleepPolicy};
use presence_agent::screen_watch::spawn_screen_watch;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "presence-agent")]
#[command(about = "Report screen state and foreground app to a remote collector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the presence monitor until interrupted.
    Run(RunArgs),
    /// Send a single report now and exit.
    Once(CommonArgs),
}

#[derive(Debug, Args, Clone)]
struct CommonArgs {
    /// Path to the collector config (endpoint_url, secret, device_id).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Report interval while the screen is on.
    #[arg(long, default_value = "2m", value_parser = parse_duration)]
    active_every: Duration,

    /// Wake-poll interval while the screen is off.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    sleep_every: Duration,

    /// Keep reporting (at the slow interval) while the screen is off
    /// instead of going quiet.
    #[arg(long, action = ArgAction::SetTrue)]
    report_while_sleeping: bool,

    /// Stop after this long instead of running until interrupted.
    #[arg(long = "for", value_parser = parse_duration)]
    run_for: Option<Duration>,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_monitor(args).await,
        Commands::Once(common) => report_once(common).await,
    }
}

fn build_agent(common: &CommonArgs) -> PresenceAgent {
    let config_path = common
        .config
        .clone()
        .unwrap_or_else(default_config_path);
    let store = ConfigStore::new(config_path);
    let resolver = ForegroundResolver::new(Arc::new(MacOsUsageSource));
    PresenceAgent::new(
        store,
        StatusReporter::new(),
        resolver,
        Arc::new(MacOsPowerSource),
    )
}

async fn report_once(common: CommonArgs) -> Result<()> {
    let agent = build_agent(&common);
    match agent.report_once().await.context("report failed")? {
        SendOutcome::Success => {
            println!("report delivered");
            Ok(())
        }
        SendOutcome::RetryableFailure { reason } => bail!("report not delivered: {reason}"),
        SendOutcome::FatalFailure { reason } => bail!("report impossible: {reason}"),
    }
}

async fn run_monitor(args: RunArgs) -> Result<()> {
    let agent = build_agent(&args.common);

    let settings = AgentSettings {
        cadence: CadenceConfig {
            active_every: args.active_every,
            sleeping_every: args.sleep_every,
            sleep_policy: if args.report_while_sleeping {
                SleepPolicy::ReportSlowly
            } else {
                SleepPolicy::SkipReports
            },
        },
        run_for: args.run_for,
    };

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    if spawn_screen_watch(command_tx.clone()).is_none() {
        eprintln!("screen-state events unavailable on this platform; fixed cadence only");
    }

    let interrupt_tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt_tx.send(AgentCommand::Stop);
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let summary = agent.run(settings, Some(command_rx), Some(event_tx)).await?;
    drop(command_tx);

    printer.await.context("event printer failed")?;

    println!(
        "done: {} cadence reports, {} expedited, {} dropped, {} mode changes over {} ticks",
        summary.cadence_dispatches,
        summary.expedited_dispatches,
        summary.dropped_expedited,
        summary.mode_changes,
        summary.ticks
    );
    Ok(())
}

fn print_event(event: &AgentEvent) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    match event {
        AgentEvent::Started => println!("[{timestamp}] monitor started"),
        AgentEvent::ModeChanged { mode } => println!("[{timestamp}] mode: {mode:?}"),
        AgentEvent::ReportDispatched { expedited: true } => {
            println!("[{timestamp}] expedited report dispatched")
        }
        AgentEvent::ReportDispatched { expedited: false } => {
            println!("[{timestamp}] report dispatched")
        }
        AgentEvent::ReportSuperseded => {
            println!("[{timestamp}] queued report superseded by a newer one")
        }
        AgentEvent::ReportDropped => {
            println!("[{timestamp}] expedited report dropped (one already in flight)")
        }
        AgentEvent::ReportSkipped { reason } => {
            // Printed every tick until the config is fixed; intentionally
            // persistent, never fatal.
            eprintln!("[{timestamp}] report skipped: {reason}")
        }
        AgentEvent::ReportFinished { expedited, outcome } => match outcome {
            SendOutcome::Success => {
                let kind = if *expedited { "expedited report" } else { "report" };
                println!("[{timestamp}] {kind} delivered")
            }
            SendOutcome::RetryableFailure { reason } => {
                eprintln!("[{timestamp}] report failed (will retry on next tick): {reason}")
            }
            SendOutcome::FatalFailure { reason } => {
                eprintln!("[{timestamp}] report failed permanently: {reason}")
            }
        },
        AgentEvent::ResolverDegraded { degraded: true } => {
            eprintln!(
                "[{timestamp}] usage source unavailable (permission?); reporting cached app label"
            )
        }
        AgentEvent::ResolverDegraded { degraded: false } => {
            println!("[{timestamp}] usage source recovered")
        }
        AgentEvent::Stopped => println!("[{timestamp}] monitor stopping"),
        AgentEvent::Completed { summary: _ } => {}
    }
}
