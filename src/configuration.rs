//! Configuration and CLI for LVE Node
//!
//! Serde-backed configuration with per-network presets and a clap CLI. The
//! precedence is: defaults for the chosen network, then the optional JSON
//! config file, then explicit CLI flags.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::amm::PoolToken;
use crate::crypto::Network;
use crate::ledger::{Amount, COIN, ChainParams};

/// Command-line interface of the node.
#[derive(Parser, Debug)]
#[command(name = "lve-node", version, about = "LVE proof-of-stake blockchain node")]
pub struct Cli {
    /// Network to run on (defaults to the config file's choice, else testnet)
    #[arg(long, global = true)]
    pub network: Option<Network>,
    /// Data directory (default ./data/<network>)
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,
    /// Path to a JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the node
    Start(StartArgs),
    /// Show the node identity, creating it if needed
    Identity {
        /// Print the identity file as JSON (includes the private key)
        #[arg(long)]
        export: bool,
    },
    /// Manage the reward address binding
    Reward {
        #[command(subcommand)]
        action: RewardCommand,
    },
    /// Inspect or administer the AMM pool
    Pool {
        #[command(subcommand)]
        action: PoolCommand,
    },
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Port for the external API front-end
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,
    /// P2P listen port
    #[arg(long, value_name = "PORT")]
    pub p2p: Option<u16>,
    /// Seed node URL(s) dialed at startup
    #[arg(long, value_name = "URL")]
    pub seed: Vec<String>,
    /// Run as a bootstrap node: listen without dialing any seeds
    #[arg(long)]
    pub bootstrap: bool,
}

#[derive(Subcommand, Debug)]
pub enum RewardCommand {
    /// Bind block rewards to an address
    Bind { address: String },
    /// Generate a fresh mnemonic and address suitable for binding
    Generate,
    /// Show the current binding
    Show,
}

#[derive(Subcommand, Debug)]
pub enum PoolCommand {
    /// Show pool reserves and LP supply
    Info,
    /// Preview a swap
    Quote {
        #[arg(long)]
        from: PoolToken,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    /// Add liquidity for an address
    Add {
        #[arg(long)]
        address: String,
        #[arg(long, value_parser = parse_amount)]
        lve: Amount,
        #[arg(long, value_parser = parse_amount)]
        uzs: Amount,
    },
    /// Remove liquidity for an address
    Remove {
        #[arg(long)]
        address: String,
        #[arg(long, value_parser = parse_amount)]
        lp: Amount,
    },
    /// Execute a swap for the node identity's address
    Swap {
        #[arg(long)]
        from: PoolToken,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
        #[arg(long = "min-out", value_parser = parse_amount)]
        min_out: Amount,
    },
}

/// Parse a decimal coin amount ("12", "0.5") into fixed-point units.
pub fn parse_amount(s: &str) -> Result<Amount, String> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > 9 {
        return Err("at most 9 decimal places".into());
    }
    let whole: Amount = whole.parse().map_err(|_| format!("bad amount: {s}"))?;
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<9}");
        padded.parse().map_err(|_| format!("bad amount: {s}"))?
    };
    whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(|| "amount overflows".into())
}

/// Node configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub chain: ChainConfig,
    pub network: NetworkConfig,
    pub consensus: ConsensusConfig,
    pub api: ApiConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    pub network: Network,
    pub data_dir: PathBuf,
}

/// P2P networking configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// Address the WebSocket listener binds.
    pub listen_addr: String,
    /// Seed peers dialed at startup and on peer shortage.
    pub bootstrap_peers: Vec<String>,
    /// Outbound dial timeout.
    pub dial_timeout_secs: u64,
    /// Grace window for a peer to complete the handshake.
    pub handshake_timeout_secs: u64,
    /// Interval of the peer maintenance task.
    pub maintenance_interval_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsensusConfig {
    pub slot_duration_ms: u64,
    pub epoch_duration: u64,
}

/// The external API front-end (out of process) reads this section.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceConfig {
    /// Periodic save interval for staking and pool state.
    pub save_interval_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6001".to_string(),
            bootstrap_peers: vec![],
            dial_timeout_secs: 30,
            handshake_timeout_secs: 10,
            maintenance_interval_secs: 45,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            slot_duration_ms: 30_000,
            epoch_duration: 100,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, port: 3000 }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { save_interval_secs: 60 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            network: NetworkConfig::default(),
            consensus: ConsensusConfig::default(),
            api: ApiConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration file.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Defaults, optionally overridden by a config file, then by CLI flags.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        if let Some(network) = cli.network {
            config.chain.network = network;
        }
        match config.chain.network {
            Network::Mainnet => config.apply_mainnet_preset(),
            Network::Testnet => config.apply_testnet_preset(),
        }
        if let Some(dir) = &cli.data_dir {
            config.chain.data_dir = dir.clone();
        }
        Ok(config)
    }

    /// Apply `start` subcommand flags.
    pub fn apply_start_args(&mut self, args: &StartArgs) {
        if let Some(port) = args.port {
            self.api.port = port;
        }
        if let Some(port) = args.p2p {
            let host = self
                .network
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.network.listen_addr = format!("{host}:{port}");
        }
        if !args.seed.is_empty() {
            self.network.bootstrap_peers = args.seed.clone();
        }
        if args.bootstrap {
            self.network.bootstrap_peers.clear();
        }
    }

    fn apply_mainnet_preset(&mut self) {
        if self.network.bootstrap_peers.is_empty() {
            self.network.bootstrap_peers = vec![
                "ws://seed1.lvenc.network:6001".to_string(),
                "ws://seed2.lvenc.network:6001".to_string(),
            ];
        }
    }

    fn apply_testnet_preset(&mut self) {
        if self.network.bootstrap_peers.is_empty() {
            self.network.bootstrap_peers = vec!["ws://testnet-seed.lvenc.network:6001".to_string()];
        }
    }

    /// Per-network directory holding identity and persisted state.
    pub fn network_data_dir(&self) -> PathBuf {
        self.chain.data_dir.join(self.chain.network.dir_name())
    }

    /// Chain parameters this configuration implies.
    pub fn chain_params(&self) -> ChainParams {
        let mut params = ChainParams::for_network(self.chain.network);
        params.slot_duration_ms = self.consensus.slot_duration_ms;
        params.epoch_duration = self.consensus.epoch_duration;
        params
    }

    /// Sanity checks before startup.
    pub fn validate(&self) -> bool {
        !self.network.listen_addr.is_empty()
            && self.consensus.slot_duration_ms >= 1_000
            && self.consensus.epoch_duration > 0
            && self.persistence.save_interval_secs > 0
    }
}
