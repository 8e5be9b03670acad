//! Weft signaling relay binary.
//!
//! Runs a relay with its own overlay node bound, so connecting peers join a
//! live member of the network rather than a bare rendezvous.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use weft_overlay::{Identity, MemoryTransport, Node, NodeConfig, TransportBackend};
use weft_relay::SignalingRelay;

/// Signaling relay for the Weft overlay network.
#[derive(Debug, Parser)]
#[command(name = "weft-relay", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9040", env = "WEFT_RELAY_ADDR")]
    bind: SocketAddr,

    /// Enable verbose per-frame diagnostics.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let identity = Identity::generate();
    let backend: Arc<dyn TransportBackend> = Arc::new(MemoryTransport::new());
    let node = Node::with_identity(
        identity.clone(),
        NodeConfig::new().with_verbose(args.verbose),
        Arc::clone(&backend),
    );

    let relay = SignalingRelay::new(identity, backend, args.verbose);
    if let Err(e) = relay.connect_node(node) {
        error!(error = %e, "failed to bind node to relay");
        std::process::exit(1);
    }

    info!("relay identity: {}", relay.node().map_or_else(String::new, |n| n.public_key().to_string()));
    info!("signaling endpoint: ws://{}/signal", args.bind);

    if let Err(e) = relay.serve(args.bind).await {
        error!(error = %e, "relay error");
        std::process::exit(1);
    }
}
