//! Scan Trader - trading host CLI
//!
//! Loads configuration, registers the configured paper exchanges, then runs
//! the scan loop until Ctrl+C.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use scan_trader::config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH};
use scan_trader::host::TradingHost;
use tokio::{signal, task};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Scan and log candidates without creating strategies
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    let _log_guard = init_tracing(&config.logging)?;

    info!("📈 Starting Scan Trader v{}", env!("CARGO_PKG_VERSION"));
    info!("📊 Configuration: {}", args.config);
    info!("🏖️  Dry run: {}", args.dry_run);

    // Initialize Prometheus metrics recorder
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let metrics_handle = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder))
        .map_err(|e| anyhow!("failed to set metrics recorder: {e}"))?;
    info!("✅ Prometheus metrics recorder initialized");

    let host = TradingHost::from_config(&config)?;
    host.start()?;
    info!("✅ Trading host started");

    let scanner = host.scanner(config.scanner.clone());
    let mut scan_timer = interval(Duration::from_secs(config.scanner.interval_secs.max(1)));
    scan_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_timer = interval(Duration::from_secs(config.logging.status_interval_secs.max(1)));
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = scan_timer.tick() => {
                // Scans and strategy callbacks are synchronous; keep them off
                // the reactor so the signal and status arms stay responsive
                if args.dry_run {
                    for candidate in task::block_in_place(|| scanner.scan()) {
                        info!(
                            symbol = %candidate.symbol,
                            rank = candidate.rank,
                            change_pct = %candidate.change_pct,
                            exchange = ?candidate.exchange,
                            "scan candidate"
                        );
                    }
                } else {
                    task::block_in_place(|| host.run_scan_cycle(&scanner));
                }
            }
            _ = status_timer.tick() => {
                info!("📡 {}", host.status());
            }
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("📡 Received shutdown signal (Ctrl+C)"),
                    Err(err) => error!("💥 Failed to listen for shutdown signal: {:?}", err),
                }
                break;
            }
        }
    }

    info!("🛑 Shutting down Scan Trader...");
    task::block_in_place(|| host.stop());
    debug!(metrics = %metrics_handle.render(), "final metrics");
    info!("✅ Scan Trader shut down gracefully ({})", host.status());

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Daily rolling file, always JSON
    let file_appender = tracing_appender::rolling::daily(&logging.directory, "scan-trader.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level_filter = match logging.level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        "info" => tracing::Level::INFO,
        other => {
            eprintln!("unknown log level '{other}', using info");
            tracing::Level::INFO
        }
    };
    let filter = || EnvFilter::from_default_env().add_directive(level_filter.into());

    let stdout_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(filter())
            .boxed()
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
