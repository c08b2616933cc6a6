use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use libfileset::{FilesetBackend, VolumeController};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;

mod cli;
mod server;

const LOG_FILE_NAME: &str = "fileset-plugin.log";

/// Contents of the file Docker reads to discover the plugin.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PluginSpec<'a> {
    name: &'a str,
    addr: &'a str,
}

/// Route logs to stdout and, when `log_path` is set, to a file in it.  The
/// returned guard flushes the file writer when dropped.
fn init_logging(args: &Args) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;

    let stdout = if args.log_json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    let (file, guard) = match &args.log_path {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()?;
    Ok(guard)
}

/// Write `<dir>/<name>.json` so Docker can find the plugin.
async fn write_spec_file(dir: &Path, name: &str, addr: &str) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create plugins directory {}", dir.display()))?;
    let path = dir.join(format!("{name}.json"));
    let spec = serde_json::to_vec(&PluginSpec { name, addr })?;
    tokio::fs::write(&path, spec)
        .await
        .with_context(|| format!("write plugin spec {}", path.display()))?;
    Ok(path)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    let config = args.backend_config();
    info!(
        filesystem = %config.filesystem,
        mountpoint = %config.mountpoint.display(),
        store = %config.store_dir.display(),
        "starting fileset volume plugin"
    );
    let backend = FilesetBackend::from_config(config);
    let controller = Arc::new(VolumeController::new(Arc::new(backend)));

    let listener = tokio::net::TcpListener::bind((args.listen_addr.as_str(), args.listen_port))
        .await
        .with_context(|| format!("bind {}:{}", args.listen_addr, args.listen_port))?;
    info!(addr = %listener.local_addr()?, "listening");

    let spec = write_spec_file(
        &args.plugins_directory,
        &args.plugin_name,
        &args.advertised_addr(),
    )
    .await?;
    info!(path = %spec.display(), "plugin spec written");

    axum::serve(listener, server::create_router(controller))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
