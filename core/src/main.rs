use std::net::TcpListener;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use eventhub::{
    cli::{Cli, Command},
    logging, Config, Hub,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Channels => {
            for channel in &cfg.channels {
                println!("{channel}");
            }
        }
        Command::Run => {
            logging::init(&cfg.log_filter, cfg.log_file.as_deref())?;
            info!(
                "=== eventhub {} at {} channels {:?} ===",
                env!("CARGO_PKG_VERSION"),
                cfg.bind(),
                cfg.channels
            );
            let listener =
                TcpListener::bind(cfg.bind()).with_context(|| format!("binding {}", cfg.bind()))?;
            let hub = Hub::start(&cfg);
            let token = hub.token();
            let ctrl_c = tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("ctrl-c received"),
                    Err(e) => {
                        warn!("cannot listen for ctrl-c: {e}");
                        std::future::pending::<()>().await;
                    }
                }
                token.cancel();
            });
            let served = hub.serve(listener).await;
            ctrl_c.abort();
            hub.shutdown().await;
            served?;
        }
    }
    Ok(())
}
