use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use docbridge_server::config::{BridgeConfig, LogFormat};
use docbridge_server::Bridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::parse();

    // Logs go to stderr: stdout carries the stdio transport's frames.
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Pretty => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let base = config.base_topic()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        base = %base,
        transport = ?config.transport,
        codec = ?config.codec,
        "docbridge starting"
    );

    let mut bridge = Bridge::new(
        base,
        config.codec(),
        config.pipeline(),
        config.backend()?,
        config.transport(),
    );
    bridge.start().await.context("bridge startup failed")?;
    bridge.serve(shutdown_signal()).await
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
