use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clawmon_core::tmux::TmuxClient;
use clawmon_core::{
    AcquireError, DirectInvoke, OneShotPty, PollOutcome, Scheduler, Settings, Source, Strategy,
    StrategyChoice, TerminalSession, UsageStore,
};

mod config;
use config::{Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    let mut settings = cli.to_settings();
    settings.validate();

    match cli.command {
        Some(Command::Status) => cmd_status(&settings),
        Some(Command::Teardown) => cmd_teardown(&settings),
        Some(Command::Fetch) => cmd_fetch(settings).await,
        None => run_monitor(settings).await,
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("clawmon=debug,clawmon_core=debug")
    } else {
        EnvFilter::new("clawmon=info,clawmon_core=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Pick a strategy per the configuration. `auto` prefers the persistent
/// session and falls back to one-shot PTY when tmux is missing; a failed
/// authentication check is fatal either way.
async fn select_strategy(settings: &Settings) -> Result<Strategy> {
    match settings.strategy {
        StrategyChoice::Direct => Ok(Strategy::Direct(DirectInvoke::new(settings))),
        StrategyChoice::Pty => Ok(Strategy::Pty(OneShotPty::new(settings))),
        StrategyChoice::Session => {
            let session = TerminalSession::init(settings)
                .await
                .context("Failed to initialize persistent-session strategy")?;
            Ok(Strategy::Session(session))
        }
        StrategyChoice::Auto => match TerminalSession::init(settings).await {
            Ok(session) => Ok(Strategy::Session(session)),
            Err(AcquireError::CapabilityMissing(what)) => {
                info!("{} not available; falling back to one-shot PTY", what);
                Ok(Strategy::Pty(OneShotPty::new(settings)))
            }
            Err(e) => Err(e).context("Failed to initialize acquisition strategy"),
        },
    }
}

/// Run the polling monitor until interrupted.
async fn run_monitor(settings: Settings) -> Result<()> {
    let strategy = select_strategy(&settings).await?;
    let (scheduler, handle) = Scheduler::new(strategy, &settings);

    info!(
        "Monitoring usage into {:?} (ctrl-c to stop)",
        settings.data_dir
    );

    let mut run = tokio::spawn(scheduler.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received; shutting down");
            handle.shutdown();
            run.await?;
        }
        res = &mut run => {
            res?;
        }
    }

    Ok(())
}

/// One acquisition cycle: poll, print the snapshot as JSON, exit non-zero
/// when nothing usable came back.
async fn cmd_fetch(settings: Settings) -> Result<()> {
    let strategy = select_strategy(&settings).await?;
    let (mut scheduler, _handle) = Scheduler::new(strategy, &settings);

    match scheduler.poll_once().await {
        PollOutcome::Updated(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        PollOutcome::NoSignal => anyhow::bail!(
            "Could not parse usage from the tool's output (raw text kept in {:?})",
            settings.data_dir.join("debug-output.txt")
        ),
        PollOutcome::Failed => anyhow::bail!("Usage acquisition failed"),
        PollOutcome::Skipped => unreachable!("single poll cannot overlap itself"),
    }
}

/// Print the last persisted snapshot.
fn cmd_status(settings: &Settings) -> Result<()> {
    let store = UsageStore::new(&settings.data_dir);
    if !store.path().exists() {
        anyhow::bail!("No usage snapshot recorded yet at {:?}", store.path());
    }

    let snapshot = store.read_or_default(Source::DirectInvoke);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Kill the persistent tmux session. The monitor never does this on its
/// own; stopping it leaves the session running.
fn cmd_teardown(settings: &Settings) -> Result<()> {
    let tmux = TmuxClient::new();
    if !tmux.is_available() {
        anyhow::bail!("tmux is not installed");
    }

    tmux.kill_session(&settings.session_name)?;
    info!("Session {} torn down", settings.session_name);
    Ok(())
}
