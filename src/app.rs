use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use log::{debug, error, info, warn};
use std::time::Duration;

use crate::actions::PlayerCountAction;
use crate::compositor::BitmapCompositor;
use crate::config::PluginConfig;
use crate::managers::refresh::RefreshCoordinator;
use crate::roblox_client::RobloxClient;
use crate::streamdeck::{self, LaunchInfo};
use crate::utils::logging::init_logging;

/// Flags the Stream Deck application passes with a single dash.
const LAUNCH_FLAGS: [&str; 4] = ["-port", "-pluginUUID", "-registerEvent", "-info"];
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    port: u16,

    #[arg(long = "pluginUUID")]
    plugin_uuid: String,

    #[arg(long = "registerEvent")]
    register_event: String,

    /// Host and device description as JSON. Only logged.
    #[arg(long)]
    info: Option<String>,

    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,
}

impl Args {
    fn launch_info(&self) -> LaunchInfo {
        LaunchInfo {
            port: self.port,
            plugin_uuid: self.plugin_uuid.clone(),
            register_event: self.register_event.clone(),
        }
    }

    fn cli_level(&self) -> Option<log::LevelFilter> {
        self.verbose
            .is_present()
            .then(|| self.verbose.log_level_filter())
    }
}

fn normalize_launch_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if LAUNCH_FLAGS.contains(&arg.as_str()) {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

pub fn run() {
    let args = Args::parse_from(normalize_launch_args(std::env::args()));

    let (config, config_error) = match PluginConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (PluginConfig::default(), Some(e)),
    };
    init_logging(args.cli_level(), &config);
    if let Some(e) = config_error {
        warn!("Ignoring config file, using defaults: {:#}", e);
    }

    info!("Starting rbx-player-count {}", env!("CARGO_PKG_VERSION"));
    if let Some(host_info) = &args.info {
        debug!("Host info: {}", host_info);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to build async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_plugin(args.launch_info(), config)) {
        error!("{:#}", e);
        eprintln!("rbx-player-count failed: {:#}", e);
        std::process::exit(1);
    }
    info!("Shutdown complete");
}

async fn run_plugin(launch: LaunchInfo, config: PluginConfig) -> Result<()> {
    // The host starts plugins from their own directory.
    let plugin_dir = std::env::current_dir().context("Failed to read plugin directory")?;
    let api = RobloxClient::new(&config)?;
    let (host, mut events, writer) = streamdeck::connect(&launch, plugin_dir).await?;

    let coordinator = RefreshCoordinator::new(
        api,
        host.clone(),
        BitmapCompositor,
        config.refresh_interval(),
    );
    let action = PlayerCountAction::new(coordinator.clone(), config);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        error!("Failed to set Ctrl-C handler: {}", e);
    }

    loop {
        tokio::select! {
            event = events.next_event() => match event {
                Some(event) => action.handle(event),
                None => {
                    info!("Stream Deck connection ended");
                    break;
                }
            },
            Some(()) = shutdown_rx.recv() => break,
        }
    }

    coordinator.shutdown();
    host.close();
    log_writer_exit(tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await);
    Ok(())
}

/// Returns whether the writer drained its queue and exited on its own.
fn log_writer_exit(
    outcome: Result<Result<(), tokio::task::JoinError>, tokio::time::error::Elapsed>,
) -> bool {
    match outcome {
        Ok(Ok(())) => {
            debug!("Stream Deck writer finished");
            true
        }
        Ok(Err(e)) => {
            warn!("Stream Deck writer did not finish cleanly: {}", e);
            false
        }
        Err(_) => {
            warn!("Timed out flushing messages to Stream Deck");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_stream_deck_launch_line() {
        let args = Args::parse_from(normalize_launch_args(argv(&[
            "rbx-player-count",
            "-port",
            "28196",
            "-pluginUUID",
            "ABC123",
            "-registerEvent",
            "registerPlugin",
            "-info",
            r#"{"application":{"version":"6.4"}}"#,
        ])));

        assert_eq!(
            args.launch_info(),
            LaunchInfo {
                port: 28196,
                plugin_uuid: "ABC123".to_string(),
                register_event: "registerPlugin".to_string(),
            }
        );
        assert!(args.info.is_some());
        assert_eq!(args.cli_level(), None);
    }

    #[test]
    fn double_dash_and_verbosity_are_accepted() {
        let args = Args::parse_from(normalize_launch_args(argv(&[
            "rbx-player-count",
            "--port",
            "1",
            "--pluginUUID",
            "u",
            "--registerEvent",
            "r",
            "-vv",
        ])));
        assert_eq!(args.port, 1);
        assert_eq!(args.cli_level(), Some(log::LevelFilter::Trace));
    }

    #[test]
    fn missing_port_is_rejected() {
        let result = Args::try_parse_from(normalize_launch_args(argv(&[
            "rbx-player-count",
            "-pluginUUID",
            "u",
            "-registerEvent",
            "r",
        ])));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn writer_exit_is_reported_for_every_outcome() {
        let finished = tokio::spawn(async {});
        assert!(log_writer_exit(
            tokio::time::timeout(WRITER_FLUSH_TIMEOUT, finished).await
        ));

        let aborted = tokio::spawn(std::future::pending::<()>());
        aborted.abort();
        let outcome = tokio::time::timeout(WRITER_FLUSH_TIMEOUT, aborted).await;
        assert!(matches!(&outcome, Ok(Err(e)) if e.is_cancelled()));
        assert!(!log_writer_exit(outcome));

        let stuck = tokio::spawn(std::future::pending::<()>());
        let outcome = tokio::time::timeout(Duration::from_millis(10), stuck).await;
        assert!(outcome.is_err());
        assert!(!log_writer_exit(outcome));
    }

    #[test]
    fn only_known_flags_are_rewritten() {
        assert_eq!(
            normalize_launch_args(argv(&["-port", "-v", "-q", "-portal", "value"])),
            argv(&["--port", "-v", "-q", "-portal", "value"])
        );
    }
}
