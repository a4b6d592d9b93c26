mod baseline;
mod core;
mod feedback;
mod fetch;
mod http;
mod idle;
mod mpv;
mod overlay;
mod player;
mod scanner;

use anyhow::Context;
use clap::Parser;
use kiosk_proto::config::Config;
use kiosk_proto::debug_log::DebugLog;
use kiosk_proto::platform;
use kiosk_proto::recognizer::RecognizerRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::player::Player;

/// Scan-to-play video kiosk.
#[derive(Parser, Debug)]
#[command(name = "kiosk-daemon")]
#[command(version)]
struct Args {
    /// Settings file (created with defaults if missing)
    #[arg(long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the log, history and generated idle screen
    #[arg(long, env = "KIOSK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Don't listen on an input device; only the web form queues videos
    #[arg(long)]
    no_scanner: bool,
}

/// A custom tracing layer that copies warnings and errors into the debug
/// overlay buffer.
struct DebugLogLayer {
    log: DebugLog,
}

impl<S> tracing_subscriber::Layer<S> for DebugLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        self.log.append(message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(data_dir: &Path, debug_log: DebugLog) -> anyhow::Result<PathBuf> {
    let log_path = data_dir.join("kiosk.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    // Create layers: file writer + stderr (journald) + overlay buffer
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(DebugLogLayer { log: debug_log })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,kiosk_daemon=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(dir) = &args.data_dir {
        platform::set_data_dir(dir.clone());
    }
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    // Created before logging so warnings from startup reach the overlay.
    let debug_log = DebugLog::new();
    let log_path = init_logging(&data_dir, debug_log.clone())?;
    info!("Log file: {:?}", log_path);

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Config loaded from: {:?}", config_path);

    // All inputs funnel into the dispatcher through this queue
    let (scan_tx, scan_rx) = core::scan_queue();

    let _http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        http::HttpState::new(config_path.clone(), scan_tx.clone(), debug_log.clone()),
    );

    let baseline = baseline::resolve(config.display.baseline_image.as_deref(), &data_dir).await?;
    let mpv_binary =
        platform::find_mpv_binary().unwrap_or_else(|| PathBuf::from(platform::mpv_binary_name()));
    let spec = mpv::LaunchSpec {
        binary: mpv_binary.clone(),
        socket_base: config.paths.mpv_socket.clone(),
        connectors: config.display_connectors(),
    };
    let controller = Arc::new(
        mpv::MpvController::start(&spec, baseline)
            .await
            .context("Failed to start mpv")?,
    );
    controller.restore_baseline().await;
    info!("Displays: {:?}", controller.display_states());
    let player: Arc<dyn Player> = controller.clone();

    tokio::spawn(idle::IdleSupervisor::new(player.clone()).run());
    tokio::spawn(overlay::OverlayFeed::new(config_path.clone(), debug_log.clone(), player.clone()).run());

    if args.no_scanner {
        info!("Scanner listener disabled");
    } else {
        scanner::spawn(config.scanner_device().map(str::to_string), scan_tx.clone());
    }
    drop(scan_tx);

    let dispatcher = core::Dispatcher::new(
        config_path,
        RecognizerRegistry::with_defaults(),
        player,
        Arc::new(fetch::YtDlpFetcher::discover()),
        Arc::new(feedback::SoundCues::new(mpv_binary, config.paths.sounds_dir.clone())),
        debug_log,
        scan_rx,
    );

    let result = tokio::select! {
        r = dispatcher.run() => r.map_err(anyhow::Error::from),
        _ = shutdown_signal() => Ok(()),
    };

    info!("Shutting down...");
    controller.shutdown().await;
    result
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
