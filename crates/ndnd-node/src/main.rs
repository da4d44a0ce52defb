use std::path::PathBuf;

use clap::Parser;

use ndnd_node::{Daemon, DaemonConfig};

#[derive(Parser)]
#[command(name = "ndnd", about = "NDN forwarding daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/ndnd/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        ndnd_node::logging::init_json();
    } else {
        ndnd_node::logging::init();
    }

    let config = match DaemonConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    let mut daemon = match Daemon::new(config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to initialize daemon: {e}");
            std::process::exit(1);
        }
    };

    // Spawn SIGINT handler
    let handle = daemon.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    // Spawn SIGTERM handler
    #[cfg(unix)]
    {
        let handle = daemon.shutdown_handle();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            sigterm.recv().await;
            tracing::info!("received SIGTERM, shutting down");
            handle.shutdown();
        });
    }

    if let Err(e) = daemon.start().await {
        tracing::error!("failed to start daemon: {e}");
        std::process::exit(1);
    }

    daemon.run().await;
    daemon.shutdown().await;
}
