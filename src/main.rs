//! Binary entrypoint for the photobooth kiosk.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use photobooth::camera::LazyWebcam;
use photobooth::config::Config;
use photobooth::printer::ThermalPrinter;
use photobooth::session::SessionController;
use photobooth::store::PhotoStore;
use photobooth::{joystick, web};

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "photobooth", about = "Webcam-to-thermal-printer photobooth kiosk")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Override the web server port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Send a test receipt to the printer and exit
    #[arg(long)]
    test_print: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(
            format!("photobooth={level}")
                .parse()
                .unwrap_or_default(),
        )
        .add_directive("hyper=warn".parse().unwrap_or_default());
    fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = if cli.config.exists() {
        photobooth::config::from_yaml_file(&cli.config)
            .with_context(|| format!("loading config from {}", cli.config.display()))?
    } else {
        info!(path = %cli.config.display(), "config file not found; using defaults");
        Config::default()
    };
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }
    cfg.validate().context("validating configuration")?;

    if cli.test_print {
        return test_print(&cfg);
    }

    let store = PhotoStore::open(&cfg.storage.photos_dir).context("opening photo store")?;
    let camera = Box::new(LazyWebcam::new(cfg.camera.clone()));
    let printer = Box::new(ThermalPrinter::new(cfg.printer.clone()));
    let controller = SessionController::spawn(
        cfg.session.clone(),
        camera,
        printer,
        store.clone(),
        cfg.printer.dots_per_line,
        cfg.camera.frame_timeout,
    )
    .context("starting session worker")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        }
    });

    let joystick_task = tokio::spawn(joystick::run(
        cfg.joystick.clone(),
        controller.clone(),
        cancel.clone(),
    ));

    let addr = SocketAddr::new(
        cfg.server
            .bind_address
            .parse()
            .context("parsing server bind-address")?,
        cfg.server.port,
    );
    let state = web::AppState::new(controller, store, &cfg.auth);
    web::serve(state, addr, cancel.clone()).await?;

    cancel.cancel();
    if let Ok(Err(err)) = joystick_task.await {
        tracing::warn!(error = ?err, "joystick watcher exited with error");
    }
    Ok(())
}

/// Send a short text receipt so a freshly cabled printer can be verified
/// without going through a whole capture session.
fn test_print(cfg: &Config) -> Result<()> {
    use photobooth::printer::PrintDevice;

    let mut printer = ThermalPrinter::new(cfg.printer.clone());
    printer
        .print_text(&[
            "Printer test".to_string(),
            format!("Device {:04x}:{:04x}", cfg.printer.vendor_id, cfg.printer.product_id),
            format!("{} dots per line", cfg.printer.dots_per_line),
        ])
        .context("sending test receipt")?;
    info!("test receipt sent");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            term.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
