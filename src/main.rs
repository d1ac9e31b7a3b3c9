use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rust_of13::learning_switch::LearningSwitch;
use rust_of13::ofp_controller::openflow0x04::DeviceManager;
use rust_of13::ofp_controller::OfpController;

/// OpenFlow 1.3 learning-switch controller.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address and port to accept switch connections on.
    #[arg(long, default_value = "0.0.0.0:6653")]
    listen: SocketAddr,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(args.listen)
        .with_context(|| format!("binding listener on {}", args.listen))?;
    info!(listen = %args.listen, "controller listening");

    let manager = Arc::new(DeviceManager::new(LearningSwitch::new()));
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.handle_client_connected(stream));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
    Ok(())
}
