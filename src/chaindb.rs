//! Persistent on-disk state for LVE Node
//!
//! Chain, staking, and pool state live as JSON files under the per-network
//! data directory and are written with a tmp-file-and-rename so a crash
//! mid-save never leaves a torn file. Loading happens once at startup,
//! before the P2P listener binds; saving happens after every self-produced
//! block and on the periodic persistence task.

use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::amm::AmmState;
use crate::ledger::Block;
use crate::staking::StakingState;

const CHAIN_FILE: &str = "chain.json";
const STAKING_FILE: &str = "staking.json";
const POOL_FILE: &str = "pool.json";

/// JSON-file-backed store for node state.
pub struct ChainDB {
    path: Option<PathBuf>,
}

impl ChainDB {
    /// Open (creating if needed) the database directory.
    pub async fn open<P: Into<PathBuf>>(path: P) -> std::io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).await?;
        Ok(Self { path: Some(path) })
    }

    /// A database that never touches disk (tests, ephemeral tools).
    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> std::io::Result<()> {
        let Some(dir) = &self.path else {
            return Ok(());
        };
        let body = serde_json::to_vec(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = dir.join(format!("{file}.tmp"));
        let dest = dir.join(file);
        fs::write(&tmp, body).await?;
        fs::rename(tmp, dest).await
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> std::io::Result<Option<T>> {
        let Some(dir) = &self.path else {
            return Ok(None);
        };
        let dest = dir.join(file);
        match fs::read(&dest).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn save_chain(&self, chain: &[Block]) -> std::io::Result<()> {
        self.write_json(CHAIN_FILE, &chain).await
    }

    pub async fn load_chain(&self) -> std::io::Result<Option<Vec<Block>>> {
        self.read_json(CHAIN_FILE).await
    }

    pub async fn save_staking(&self, staking: &StakingState) -> std::io::Result<()> {
        self.write_json(STAKING_FILE, staking).await
    }

    pub async fn load_staking(&self) -> std::io::Result<Option<StakingState>> {
        self.read_json(STAKING_FILE).await
    }

    pub async fn save_pool(&self, pool: &AmmState) -> std::io::Result<()> {
        self.write_json(POOL_FILE, pool).await
    }

    pub async fn load_pool(&self) -> std::io::Result<Option<AmmState>> {
        self.read_json(POOL_FILE).await
    }
}
