//! CLI commands for the node
//!
//! Each handler takes a fully resolved [`NetworkConfig`]; argument parsing
//! and overrides live in the binary.

use crate::crypto::KeyPair;
use crate::network::{
    addr_info_to_string, advertised_addrs, reachable_addrs, AddrInfo, NetworkConfig,
    PeerEventType, Server,
};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Command-line overrides applied on top of the loaded configuration
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<SocketAddr>,
    pub max_peers: Option<usize>,
    pub max_inbound_peers: Option<usize>,
    pub max_outbound_peers: Option<usize>,
    pub no_discover: bool,
    pub nat: Option<IpAddr>,
    pub bootnodes: Vec<String>,
}

/// Load the config file (if any), then apply the command-line overrides.
/// Bootnodes given on the command line are appended to the file's list.
pub fn load_config(
    path: Option<&Path>,
    data_dir: &Path,
    overrides: Overrides,
) -> CliResult<NetworkConfig> {
    let mut config = match path {
        Some(path) => NetworkConfig::load(path)?,
        None => NetworkConfig::default(),
    };
    config.data_dir = data_dir.to_path_buf();

    if let Some(listen) = overrides.listen {
        config.listen_addr = listen;
    }
    if let Some(max) = overrides.max_peers {
        config.max_peers = max;
    }
    if overrides.max_inbound_peers.is_some() {
        config.max_inbound_peers = overrides.max_inbound_peers;
    }
    if overrides.max_outbound_peers.is_some() {
        config.max_outbound_peers = overrides.max_outbound_peers;
    }
    if overrides.no_discover {
        config.no_discover = true;
    }
    if overrides.nat.is_some() {
        config.nat_addr = overrides.nat;
    }
    config.bootnodes.extend(overrides.bootnodes);
    Ok(config)
}

/// Run a node until Ctrl+C, logging every peer event
pub async fn cmd_start(config: NetworkConfig) -> CliResult<()> {
    println!("🌐 Starting P2P node on {}...", config.listen_addr);
    let server = Server::new_tcp(config).await?;

    println!("🆔 Peer ID: {}", server.local_id());
    println!("📡 Dial string: {}", server.addr_info());
    if !server.bootnodes().is_empty() {
        println!("🥾 Bootnodes: {}", server.bootnodes().len());
    }

    let mut events = server.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n📴 Shutting down node...");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                match event.kind {
                    PeerEventType::Connected | PeerEventType::Disconnected => log::info!(
                        "{:?} {} ({} peers)",
                        event.kind,
                        event.peer_id,
                        server.num_peers().await
                    ),
                    _ => log::debug!("{:?} {}", event.kind, event.peer_id),
                }
            }
        }
    }

    server.close().await;
    Ok(())
}

/// Print this node's identity, creating the key if needed
pub fn cmd_identity(config: &NetworkConfig) -> CliResult<()> {
    let keypair = KeyPair::load_or_generate(&config.data_dir)?;
    let info = AddrInfo::new(
        keypair.peer_id(),
        advertised_addrs(&reachable_addrs(config.listen_addr), config.nat_addr),
    );

    println!("🆔 Peer ID:    {}", info.id);
    println!("🔑 Public key: {}", keypair.public_key_hex());
    println!("📁 Key file:   {}", KeyPair::key_path(&config.data_dir).display());
    println!("📡 Dial string: {}", addr_info_to_string(&info));
    Ok(())
}
