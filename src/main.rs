//! Mini-P2P node CLI
//!
//! Runs a networking node or prints its identity.

use clap::{Parser, Subcommand};
use mini_p2p::cli::{self, Overrides};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "p2p-node")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Peer-to-peer networking node", long_about = None)]
struct Cli {
    /// Data directory holding the node key
    #[arg(short, long, default_value = ".p2p_data")]
    data_dir: PathBuf,

    /// JSON config file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and log peer events until Ctrl+C
    Start {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Maximum number of connected peers
        #[arg(long)]
        max_peers: Option<usize>,

        /// Maximum number of inbound peers
        #[arg(long)]
        max_inbound: Option<usize>,

        /// Maximum number of outbound peers
        #[arg(long)]
        max_outbound: Option<usize>,

        /// Disable peer discovery
        #[arg(long)]
        no_discover: bool,

        /// Public IP to advertise instead of the listen address
        #[arg(long)]
        nat: Option<IpAddr>,

        /// Bootnode dial strings (comma-separated or repeated)
        #[arg(short, long, value_delimiter = ',')]
        bootnode: Vec<String>,
    },

    /// Show this node's identity and dial string
    Identity {
        /// Address the node would listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Public IP to advertise instead of the listen address
        #[arg(long)]
        nat: Option<IpAddr>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start {
            listen,
            max_peers,
            max_inbound,
            max_outbound,
            no_discover,
            nat,
            bootnode,
        } => {
            let config = cli::load_config(
                config_path,
                &cli.data_dir,
                Overrides {
                    listen,
                    max_peers,
                    max_inbound_peers: max_inbound,
                    max_outbound_peers: max_outbound,
                    no_discover,
                    nat,
                    bootnodes: bootnode,
                },
            )?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_start(config))?;
        }

        Commands::Identity { listen, nat } => {
            let config = cli::load_config(
                config_path,
                &cli.data_dir,
                Overrides {
                    listen,
                    nat,
                    ..Default::default()
                },
            )?;
            cli::cmd_identity(&config)?;
        }
    }

    Ok(())
}
