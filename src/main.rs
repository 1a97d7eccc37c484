//! OSC Sync - parameter synchronization for OSC control surfaces
//!
//! Loads devices and control groups from YAML, connects enabled devices,
//! pushes defaults, then serves the REPL until Ctrl-C or `quit`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use osc_sync::cli::{self, ReplCommand};
use osc_sync::config::{AppConfig, ConfigWatcher};
use osc_sync::{ControlEvent, DeviceTransport, ParameterState, Session, Subscription, SyncEngine};

/// OSC Sync - keep remote device parameters in step with the operator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "OSC_SYNC_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write JSON logs to daily files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Run without the interactive prompt
    #[arg(long)]
    no_repl: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    info!("Starting OSC Sync v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config.display());

    if args.check {
        let config = AppConfig::load(&args.config).await?;
        println!(
            "✅ {} is valid: {} devices, {} groups, {} parameters",
            args.config.display(),
            config.devices.len(),
            config.groups.len(),
            config.parameters().count()
        );
        return Ok(());
    }

    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let transport = Arc::new(DeviceTransport::simulated(initial_config.transport.clone()));
    let engine = Arc::new(SyncEngine::new(Arc::clone(&transport)));
    let session = Session::new(transport, engine);

    run_app(session, initial_config, config_watcher, !args.no_repl, shutdown_signal()).await?;

    info!("OSC Sync shutdown complete");
    Ok(())
}

async fn run_app(
    session: Session,
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    interactive: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    session.apply_config(&config).await;
    let mut _state_logs = log_state_changes(&session, &config);

    if session.selected_device().is_some() {
        if let Err(e) = session.handle(ControlEvent::SyncAll).await {
            warn!("Initial sync incomplete: {:#}", e);
        }
    } else {
        info!("No device selected, skipping initial sync");
    }

    let (repl_tx, mut repl_rx) = mpsc::channel::<ReplCommand>(32);
    let _repl = if interactive {
        Some(cli::spawn_repl(repl_tx))
    } else {
        drop(repl_tx);
        None
    };

    info!("Ready");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(cmd) = repl_rx.recv() => {
                if !cli::execute(&session, cmd).await {
                    info!("Quit requested");
                    break;
                }
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, reloading...");
                session.apply_config(&new_config).await;
                _state_logs = log_state_changes(&session, &new_config);
                info!("✅ Configuration reloaded");
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    session.transport().shutdown();
    Ok(())
}

/// Debug-log every status change of catalogue parameters
///
/// Returned subscriptions are unsubscribed when replaced on reload.
fn log_state_changes(session: &Session, config: &AppConfig) -> StateLogs {
    let subs = config
        .parameters()
        .map(|p| {
            session.engine().subscribe(p.id.clone(), |state: &ParameterState| {
                debug!(
                    "🎛️  {} = {} [{}]",
                    state.id, state.value, state.status
                );
            })
        })
        .collect();
    StateLogs(subs)
}

struct StateLogs(Vec<Subscription>);

impl Drop for StateLogs {
    fn drop(&mut self) {
        for sub in &self.0 {
            sub.unsubscribe();
        }
    }
}

fn init_logging(level: &str, log_dir: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "osc-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
