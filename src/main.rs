//! Main entrypoint for LVE Node
//!
//! Parses the CLI, resolves configuration, and either runs the node (the
//! `start` subcommand wires the producer, networking, and persistence tasks
//! onto the Tokio runtime) or executes one of the administrative commands.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tracing::info;

use lve_node::amm::AmmState;
use lve_node::chaindb::ChainDB;
use lve_node::configuration::{Cli, Command, Config, PoolCommand, RewardCommand};
use lve_node::crypto;
use lve_node::handlers::Handlers;
use lve_node::identity::NodeIdentity;
use lve_node::ledger::format_amount;
use lve_node::networking::Network;
use lve_node::node::Node;
use lve_node::producer::BlockProducer;
use lve_node::tracing::Tracing;

fn main() {
    let cli = Cli::parse();
    let tracing = Tracing::init();
    if let Err(e) = run(cli, &tracing) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, tracing: &Tracing) -> Result<()> {
    let mut config = Config::resolve(&cli)?;
    if !config.validate() {
        bail!("invalid configuration");
    }
    let rt = Runtime::new().context("failed to start runtime")?;
    match cli.command {
        Command::Start(args) => {
            config.apply_start_args(&args);
            rt.block_on(run_node(config, tracing))
        }
        Command::Identity { export } => cmd_identity(&config, export),
        Command::Reward { action } => cmd_reward(&config, action),
        Command::Pool { action } => rt.block_on(cmd_pool(&config, action)),
    }
}

async fn run_node(config: Config, tracing: &Tracing) -> Result<()> {
    let data_dir = config.network_data_dir();
    let identity = NodeIdentity::load_or_create(&data_dir, config.chain.network)
        .context("node identity unavailable")?;
    info!(address = %identity.address(), network = config.chain.network.dir_name(), "identity loaded");

    // State loads before the P2P listener binds
    let node = Node::open(config.chain_params(), &data_dir)
        .await
        .context("failed to open chain state")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let network = Network::new(node.clone(), config.network.clone());
    network
        .start(shutdown_tx.clone())
        .await
        .context("failed to bind p2p listener")?;

    let producer_handle = tokio::spawn(
        BlockProducer::new(node.clone(), identity).run(shutdown_tx.subscribe()),
    );

    // Periodic persistence of staking and pool state
    let persist_node: Arc<Node> = node.clone();
    let mut persist_shutdown = shutdown_tx.subscribe();
    let save_interval = config.persistence.save_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(save_interval));
        loop {
            tokio::select! {
                _ = persist_shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = persist_node.persist().await {
                        tracing::warn!(error = %e, "periodic save failed");
                    }
                }
            }
        }
    });

    tracing.startup();
    let status = node
        .read(|state| lve_node::queries::Queries::node_status(state, lve_node::vrf::now_ms()))
        .await;
    info!(
        height = status.height,
        slot = status.current_slot,
        epoch = status.current_epoch,
        validators = status.active_validators,
        supply = %status.minted_supply,
        "node running"
    );
    Handlers::wait_for_shutdown_signal().await;

    // Stop the producer, drop peers, flush state, then exit
    let _ = shutdown_tx.send(());
    let _ = producer_handle.await;
    node.persist().await.context("final state flush failed")?;
    tracing.shutdown();
    Ok(())
}

fn cmd_identity(config: &Config, export: bool) -> Result<()> {
    let dir = config.network_data_dir();
    let identity = NodeIdentity::load_or_create(&dir, config.chain.network)?;
    if export {
        println!("{}", identity.export_json());
    } else {
        println!("address:        {}", identity.address());
        println!("public key:     {}", identity.public_key());
        println!(
            "reward address: {}",
            identity.reward_address().unwrap_or("(unbound, rewards go to the node address)")
        );
    }
    Ok(())
}

fn cmd_reward(config: &Config, action: RewardCommand) -> Result<()> {
    let dir = config.network_data_dir();
    match action {
        RewardCommand::Bind { address } => {
            let mut identity = NodeIdentity::load_or_create(&dir, config.chain.network)?;
            identity.bind_reward_address(&address)?;
            println!("rewards now credited to {address}");
        }
        RewardCommand::Generate => {
            let mnemonic = crypto::generate_mnemonic();
            let keys = crypto::keypair_from_mnemonic(&mnemonic, config.chain.network)?;
            println!("mnemonic: {mnemonic}");
            println!("address:  {}", keys.address);
            println!();
            println!("store the mnemonic securely, then run: lve-node reward bind {}", keys.address);
        }
        RewardCommand::Show => {
            let identity = NodeIdentity::load(&dir, config.chain.network)?;
            match identity.reward_address() {
                Some(address) => println!("rewards are credited to {address}"),
                None => println!("no reward address bound; rewards go to {}", identity.address()),
            }
        }
    }
    Ok(())
}

/// Pool administration against the persisted pool state. On a running node
/// pool mutations travel as transactions; these commands operate on the
/// on-disk state directly and are meant for offline administration.
async fn cmd_pool(config: &Config, action: PoolCommand) -> Result<()> {
    let db = ChainDB::open(config.network_data_dir()).await?;
    let params = config.chain_params();
    let mut pool = match db.load_pool().await? {
        Some(pool) => pool,
        None => AmmState::genesis(&params.genesis_uzs_allocations),
    };
    match action {
        PoolCommand::Info => {
            println!("reserve LVE: {}", format_amount(pool.reserve_lve));
            println!("reserve UZS: {}", format_amount(pool.reserve_uzs));
            println!("total LP:    {}", format_amount(pool.total_lp));
        }
        PoolCommand::Quote { from, amount } => {
            let quote = pool.quote(from, amount)?;
            println!(
                "{} {from} -> {} {}",
                format_amount(amount),
                format_amount(quote.amount_out),
                match from {
                    lve_node::amm::PoolToken::Lve => "UZS",
                    lve_node::amm::PoolToken::Uzs => "LVE",
                }
            );
            println!("fee:          {}", format_amount(quote.fee));
            println!("price impact: {:.4}%", quote.price_impact_percent);
        }
        PoolCommand::Add { address, lve, uzs } => {
            let minted = pool.add_liquidity(&address, lve, uzs)?;
            db.save_pool(&pool).await?;
            println!("minted {} LP to {address}", format_amount(minted));
        }
        PoolCommand::Remove { address, lp } => {
            let (lve_out, uzs_out) = pool.remove_liquidity(&address, lp)?;
            db.save_pool(&pool).await?;
            println!(
                "returned {} LVE and {} UZS to {address}",
                format_amount(lve_out),
                format_amount(uzs_out)
            );
        }
        PoolCommand::Swap { from, amount, min_out } => {
            let identity = NodeIdentity::load(&config.network_data_dir(), config.chain.network)?;
            let out = pool.swap(identity.address(), from, amount, min_out)?;
            db.save_pool(&pool).await?;
            println!("swapped {} {from} for {}", format_amount(amount), format_amount(out));
        }
    }
    Ok(())
}
