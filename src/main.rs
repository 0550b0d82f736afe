use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emotion_relay::config::AppConfig;
use emotion_relay::inference::InferenceEngine;
use emotion_relay::state::AppState;
use emotion_relay::utils::bind_tcp_listener;
use emotion_relay::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// emotion-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "emotion-relay")]
#[command(version, about = "Real-time emotion inference over WebRTC", long_about = None)]
struct CliArgs {
    /// Listen address (overrides HOST)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides PORT)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Minimum milliseconds between processed frames of one track (overrides THROTTLE_MS)
    #[arg(long, value_name = "MS")]
    throttle_ms: Option<u64>,

    /// Assets directory holding the model files (overrides EMOTION_ASSETS_DIR)
    #[arg(long, value_name = "DIR")]
    assets_dir: Option<PathBuf>,

    /// Face detector ONNX model (overrides FACE_DETECTOR_MODEL)
    #[arg(long, value_name = "FILE")]
    detector_model: Option<PathBuf>,

    /// JSON configuration file, applied before environment variables
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_format);

    tracing::info!("Starting emotion-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    tracing::info!(
        throttle_ms = config.stream.throttle_ms,
        ice_servers = config.stream.ice_servers.len(),
        assets_dir = %config.models.assets_dir.display(),
        "Configuration loaded"
    );

    // No session can be processed without both stages, so refuse to listen
    let engine = Arc::new(InferenceEngine::from_config(&config.models));
    if let Err(e) = engine.warm_up().await {
        tracing::error!("failed to initialize inference engine: {}", e);
        return Err(e).context("inference engine startup failed");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(config, engine, shutdown_tx.clone());

    let app = web::create_router(state.clone());

    let web_config = &state.config.web;
    let listener = bind_tcp_listener(&web_config.bind_address, web_config.http_port)
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                web_config.bind_address, web_config.http_port
            )
        })?;
    tracing::info!("Starting HTTP server on http://{}", listener.local_addr()?);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;
    if let Err(e) = &result {
        tracing::error!("HTTP server error: {}", e);
    }

    cleanup(&state).await;

    tracing::info!("Server shutdown complete");
    result.map_err(Into::into)
}

/// Defaults, then the config file, then environment, then CLI flags
fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());

    if let Some(addr) = &args.address {
        config.web.bind_address = addr.clone();
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(ms) = args.throttle_ms {
        config.stream.throttle_ms = ms;
    }
    if let Some(dir) = &args.assets_dir {
        config.models.assets_dir = dir.clone();
    }
    if let Some(path) = &args.detector_model {
        config.models.detector_model = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Close every peer connection so each session's cleanup runs before exit
async fn cleanup(state: &Arc<AppState>) {
    if tokio::time::timeout(Duration::from_secs(5), state.negotiator.close_all())
        .await
        .is_err()
    {
        tracing::warn!("Timed out closing peer connections");
    }
}

fn init_logging(level: LogLevel, verbose_count: u8, format: LogFormat) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "emotion_relay=error,tower_http=error",
        LogLevel::Warn => "emotion_relay=warn,tower_http=warn",
        LogLevel::Info => "emotion_relay=info,tower_http=info",
        LogLevel::Verbose => "emotion_relay=debug,tower_http=info",
        LogLevel::Debug => "emotion_relay=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "emotion_relay=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
