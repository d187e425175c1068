//! Standalone replicating scene node.
//!
//! ```text
//! scenelink-node --rendezvous --listen 0.0.0.0:7000
//! scenelink-node --connect 10.0.0.5:7000 --load scene.sl --save-on-exit out.sl
//! ```
//!
//! Runs until Ctrl-C, then optionally saves the scene and tells peers it is
//! leaving. Set `RUST_LOG` to control logging.

use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use scenelink_core::SceneStore;
use scenelink_sync::{LoadOutcome, NodeConfig, NodeEvent, SceneNode};

#[derive(Parser, Debug)]
#[command(name = "scenelink-node", version, about = "Peer-to-peer scene replication node")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:0")]
    listen: String,

    /// Answer newcomers with the addresses of the other peers
    #[arg(long)]
    rendezvous: bool,

    /// Peer to connect to at startup (repeatable)
    #[arg(long, value_name = "HOST:PORT")]
    connect: Vec<String>,

    /// Scene file to load before connecting
    #[arg(long, value_name = "FILE")]
    load: Option<PathBuf>,

    /// Save the full scene here on exit
    #[arg(long, value_name = "FILE")]
    save_on_exit: Option<PathBuf>,

    /// Broadcast filters to accept (comma-separated)
    #[arg(long, value_delimiter = ',')]
    filter: Vec<String>,
}

fn split_addr(addr: &str) -> Result<(String, u16), String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("'{addr}' is not HOST:PORT"))?;
    let port = port
        .parse()
        .map_err(|e| format!("bad port in '{addr}': {e}"))?;
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = NodeConfig::from_env();
    config.listen_addr = args.listen;
    config.rendezvous = args.rendezvous;
    if !args.filter.is_empty() {
        config.broadcast_filters = args.filter;
    }
    let peers = args
        .connect
        .iter()
        .map(|a| split_addr(a))
        .collect::<Result<Vec<_>, _>>()?;

    let (node, handle, mut events) = SceneNode::bind(config).await?;
    info!("Starting scene node on port {}", node.local_port());
    let running = tokio::spawn(node.run());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                NodeEvent::ContextFailed { source, error } => warn!("context from {source} failed: {error}"),
                NodeEvent::Text { from, text } => info!("{from}: {text}"),
                other => log::debug!("{other:?}"),
            }
        }
    });

    if let Some(path) = &args.load {
        match handle.load(path).await? {
            LoadOutcome::Native(report) => info!("loaded {} records from {}", report.records, path.display()),
            LoadOutcome::Fallback { loader } => info!("loaded {} with {loader}", path.display()),
        }
    }
    for (host, port) in peers {
        let id = handle.connect(host.clone(), port).await?;
        info!("connected to {host}:{port} as peer {id}");
    }

    tokio::signal::ctrl_c().await?;
    let objects = handle.inspect(|s: &SceneStore| s.registry().len()).await?;
    info!("stopping with {objects} objects, {} peers", handle.peer_count().await?);

    if let Some(path) = &args.save_on_exit {
        let written = handle.save_full(path).await?;
        info!("saved {written} records to {}", path.display());
    }
    handle.shutdown().await?;
    running.await??;
    Ok(())
}
