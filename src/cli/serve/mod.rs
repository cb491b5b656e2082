//! HTTP front end for identity reconciliation.

use anyhow::Result;
use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

mod server;
pub mod types;

pub use server::{IdentityServer, Reply};

use crate::config::{ServerConfig, StoreConfig, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_WORKERS};

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Worker threads handling requests
    #[arg(short, long, env = "WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
}

/// Run the server in the foreground until Ctrl+C.
pub fn run_serve(store: StoreConfig, args: ServeArgs) -> Result<()> {
    let config = ServerConfig::new(args.host, args.port, args.workers)?;
    let server = IdentityServer::new(store, config)?;
    let listener = server.bind()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc_handler(shutdown.clone());

    server.serve(listener, shutdown)
}

fn ctrlc_handler(shutdown: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        info!("received Ctrl+C, shutting down");
        shutdown.store(true, Ordering::SeqCst);
    });
}
