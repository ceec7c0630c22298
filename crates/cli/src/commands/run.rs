//! `breakout run`: one trading session, start to summary.

use std::sync::Arc;

use anyhow::{Context, Result};
use breakout_core::{
    AppConfig, EventSink, ExecutionMode, FanoutSink, JournalSink, MarketClock, SummaryFormatter,
    TracingSink,
};
use breakout_openalgo::{BrokerApi, LtpStream, LtpStreamConfig, OpenAlgoClient, PaperBroker};
use breakout_options_manager::{stop_channel, SessionCoordinator};
use clap::Args;
use tracing::{info, warn};

use super::load_config;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Profile merged over the base file, e.g. `sensex` for `Config.sensex.toml`
    #[arg(short, long, env = "BREAKOUT_PROFILE")]
    pub profile: Option<String>,

    /// Simulate orders locally regardless of `orders.mode`
    #[arg(long)]
    pub paper: bool,
}

/// Runs a session until every leg has finished or a shutdown signal arrives.
///
/// # Errors
/// Returns an error if configuration fails to load, the broker client cannot
/// be built, or the session aborts during startup.
pub async fn run_session(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.config, args.profile.as_deref())?;
    if args.paper {
        config.orders.mode = ExecutionMode::Paper;
    }

    info!(
        config = %args.config,
        profile = args.profile.as_deref().unwrap_or("-"),
        strategy = %config.strategy.name,
        underlying = %config.strategy.underlying,
        mode = %config.orders.mode,
        legs = config.enabled_legs().count(),
        "Starting breakout session"
    );
    if config.orders.mode == ExecutionMode::Live {
        warn!("LIVE mode: orders will be sent to the broker");
    }

    let broker = build_broker(&config)?;
    let sink = build_sink(&config)?;
    let clock = MarketClock::system(config.strategy.timezone);

    let stream = config
        .feed
        .enabled
        .then(|| LtpStream::spawn(LtpStreamConfig::from_config(&config.feed, &config.api)));
    if stream.is_none() {
        info!("Streaming feed disabled, polling quotes");
    }

    let (stop_handle, stop) = stop_channel();
    let mut coordinator = SessionCoordinator::new(config, broker, sink, clock).with_stop(stop);
    if let Some(stream) = &stream {
        coordinator = coordinator.with_feed(Arc::new(stream.clone()));
    }
    info!(session_id = %coordinator.session_id(), "Session created");

    let shutdown = tokio::spawn(async move {
        wait_for_shutdown().await;
        stop_handle.stop();
    });

    let result = coordinator.run().await;

    shutdown.abort();
    if let Some(stream) = stream {
        stream.shutdown();
    }

    let summary = result.context("Session aborted during startup")?;
    println!("{}", SummaryFormatter::format(&summary));
    Ok(())
}

fn build_broker(config: &AppConfig) -> Result<Arc<dyn BrokerApi>> {
    let client: Arc<dyn BrokerApi> =
        Arc::new(OpenAlgoClient::new(&config.api).context("Failed to build OpenAlgo client")?);

    Ok(match config.orders.mode {
        ExecutionMode::Live => client,
        ExecutionMode::Paper => {
            info!("Paper trading: orders are simulated, quotes come from OpenAlgo");
            Arc::new(PaperBroker::new(client))
        }
    })
}

fn build_sink(config: &AppConfig) -> Result<Arc<dyn EventSink>> {
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(path) = &config.journal.path {
        let journal = JournalSink::open(path)?;
        info!(path = %path, "Journaling session events");
        sink = sink.with(Arc::new(journal));
    }
    Ok(Arc::new(sink))
}

/// Resolves on SIGTERM or Ctrl+C. Never resolves if no handler can be installed.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, stopping session");
                    }
                    () = ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping session"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakout_core::{EventRecord, JournalReader, SessionEvent, SessionStatus};
    use rust_decimal::Decimal;

    #[test]
    fn sink_without_journal_only_traces() {
        let config = AppConfig::default();
        assert!(build_sink(&config).is_ok());
    }

    #[test]
    fn sink_writes_configured_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal").join("events.jsonl");
        let mut config = AppConfig::default();
        config.journal.path = Some(path.to_string_lossy().into_owned());

        let sink = build_sink(&config).unwrap();
        sink.publish(&EventRecord {
            session_id: "s-1".to_string(),
            at: chrono::Utc::now(),
            event: SessionEvent::SessionClosed {
                status: SessionStatus::Completed,
                total_pnl: Decimal::ZERO,
            },
        });

        let records = JournalReader::new(&path).records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, "s-1");
    }

    #[test]
    fn paper_mode_builds_without_network() {
        let config = AppConfig::default();
        assert_eq!(config.orders.mode, ExecutionMode::Paper);
        assert!(build_broker(&config).is_ok());
    }
}
