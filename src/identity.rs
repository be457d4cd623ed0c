//! File-backed node identity for LVE Node
//!
//! Every node carries one Ed25519 keypair per network in
//! `<dataDir>/<network>/identity.key`. The public key is the validator
//! address material; the private key never leaves the node. Block signatures
//! are domain-separated over `chainId:index:blockHash` so a signature can
//! never be replayed in another context.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::crypto::{self, Network};

/// Current identity file format version.
const IDENTITY_VERSION: u32 = 1;
/// File name under the per-network data directory.
const IDENTITY_FILE: &str = "identity.key";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file not found at {0}")]
    Missing(PathBuf),
    #[error("identity file is corrupt: {0}; operator recovery required")]
    Corrupt(String),
    #[error("identity uses unsupported algorithm {0:?}")]
    UnsupportedAlgo(String),
    #[error("reward address {0} is not valid on this network")]
    InvalidRewardAddress(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// On-disk identity file body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    version: u32,
    algo: String,
    node_id: String,
    private_key: String,
    reward_address: Option<String>,
    created_at: u64,
}

/// A node's signing identity.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    network: Network,
    path: PathBuf,
    private_key: String,
    public_key: String,
    address: String,
    reward_address: Option<String>,
    created_at: u64,
}

impl NodeIdentity {
    /// Load the identity from `<dir>/identity.key`, failing if absent.
    pub fn load(dir: &Path, network: Network) -> Result<Self, IdentityError> {
        let path = dir.join(IDENTITY_FILE);
        if !path.exists() {
            return Err(IdentityError::Missing(path));
        }
        let content = fs::read_to_string(&path)?;
        let file: IdentityFile = serde_json::from_str(&content)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        if file.algo != "ed25519" {
            return Err(IdentityError::UnsupportedAlgo(file.algo));
        }
        let seed: [u8; 32] = hex::decode(&file.private_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| IdentityError::Corrupt("private key is not 32 hex bytes".into()))?;
        let material = crypto::ed25519_keypair_from_seed(seed, network);
        if material.public_key != file.node_id {
            return Err(IdentityError::Corrupt(
                "public key does not match private key".into(),
            ));
        }
        Ok(Self {
            network,
            path,
            private_key: material.private_key,
            public_key: material.public_key,
            address: material.address,
            reward_address: file.reward_address,
            created_at: file.created_at,
        })
    }

    /// Create a fresh identity at `<dir>/identity.key`.
    pub fn create(dir: &Path, network: Network) -> Result<Self, IdentityError> {
        fs::create_dir_all(dir)?;
        let material = crypto::generate_ed25519_keypair(network);
        let identity = Self {
            network,
            path: dir.join(IDENTITY_FILE),
            private_key: material.private_key,
            public_key: material.public_key,
            address: material.address,
            reward_address: None,
            created_at: chrono::Utc::now().timestamp_millis() as u64,
        };
        identity.save()?;
        warn!(
            address = %identity.address,
            "created new node identity without a reward address; \
             bind one with `lve-node reward bind <address>`"
        );
        Ok(identity)
    }

    /// Load the identity if present, otherwise create one.
    pub fn load_or_create(dir: &Path, network: Network) -> Result<Self, IdentityError> {
        match Self::load(dir, network) {
            Err(IdentityError::Missing(_)) => Self::create(dir, network),
            other => other,
        }
    }

    /// Persist the identity with owner-only file permissions.
    pub fn save(&self) -> Result<(), IdentityError> {
        let file = IdentityFile {
            version: IDENTITY_VERSION,
            algo: "ed25519".into(),
            node_id: self.public_key.clone(),
            private_key: self.private_key.clone(),
            reward_address: self.reward_address.clone(),
            created_at: self.created_at,
        };
        let body = serde_json::to_string_pretty(&file)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        fs::write(&self.path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Validator address derived from the node's public key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hex Ed25519 public key (the node id).
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Where block rewards for this validator are credited.
    pub fn reward_destination(&self) -> String {
        self.reward_address.clone().unwrap_or_else(|| self.address.clone())
    }

    pub fn reward_address(&self) -> Option<&str> {
        self.reward_address.as_deref()
    }

    /// Bind (or rebind) the reward address and persist.
    pub fn bind_reward_address(&mut self, address: &str) -> Result<(), IdentityError> {
        if !crypto::validate_address(self.network, address) {
            return Err(IdentityError::InvalidRewardAddress(address.to_string()));
        }
        self.reward_address = Some(address.to_string());
        self.save()
    }

    /// Signing material for transactions sent from the node's own account
    /// (staking, commission changes, pool administration).
    pub fn key_material(&self) -> crypto::KeyMaterial {
        crypto::KeyMaterial {
            private_key: self.private_key.clone(),
            public_key: self.public_key.clone(),
            address: self.address.clone(),
        }
    }

    /// Sign a block hash under the `chainId:index:hash` domain.
    pub fn sign_block(&self, chain_id: &str, index: u64, block_hash: &str) -> String {
        let message = format!("{chain_id}:{index}:{block_hash}");
        crypto::sign_message(&self.private_key, &self.public_key, message.as_bytes())
            .expect("node identity key is well-formed")
    }

    /// Export the identity file body as JSON (for `identity --export`).
    pub fn export_json(&self) -> String {
        serde_json::json!({
            "version": IDENTITY_VERSION,
            "algo": "ed25519",
            "nodeId": self.public_key,
            "privateKey": self.private_key,
            "rewardAddress": self.reward_address,
            "createdAt": self.created_at,
        })
        .to_string()
    }
}

/// Verify a block signature produced by [`NodeIdentity::sign_block`].
pub fn verify_block_signature(
    validator_public_key: &str,
    chain_id: &str,
    index: u64,
    block_hash: &str,
    signature_hex: &str,
) -> bool {
    let message = format!("{chain_id}:{index}:{block_hash}");
    crypto::verify_signature(validator_public_key, message.as_bytes(), signature_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let created = NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
        let loaded = NodeIdentity::load(dir.path(), Network::Testnet).unwrap();
        assert_eq!(created.address(), loaded.address());
        assert_eq!(created.public_key(), loaded.public_key());
        assert_eq!(loaded.reward_address(), None);
        assert_eq!(loaded.reward_destination(), loaded.address());
    }

    #[test]
    fn missing_identity_is_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        match NodeIdentity::load(dir.path(), Network::Testnet) {
            Err(IdentityError::Missing(_)) => {}
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_identity_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IDENTITY_FILE), "{not json").unwrap();
        match NodeIdentity::load(dir.path(), Network::Testnet) {
            Err(IdentityError::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn reward_binding_validates_network() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
        let reward = crypto::generate_ed25519_keypair(Network::Testnet);
        identity.bind_reward_address(&reward.address).unwrap();
        assert_eq!(identity.reward_destination(), reward.address);
        let mainnet = crypto::generate_ed25519_keypair(Network::Mainnet);
        assert!(identity.bind_reward_address(&mainnet.address).is_err());
        // Binding persists across reload
        let reloaded = NodeIdentity::load(dir.path(), Network::Testnet).unwrap();
        assert_eq!(reloaded.reward_destination(), reward.address);
    }

    #[test]
    fn block_signatures_are_domain_separated() {
        let dir = tempfile::tempdir().unwrap();
        let identity = NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
        let sig = identity.sign_block("lve-testnet", 7, "abc123");
        assert!(verify_block_signature(identity.public_key(), "lve-testnet", 7, "abc123", &sig));
        // Same hash under a different chain id or index must not verify
        assert!(!verify_block_signature(identity.public_key(), "lve-mainnet", 7, "abc123", &sig));
        assert!(!verify_block_signature(identity.public_key(), "lve-testnet", 8, "abc123", &sig));
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
        let mode = std::fs::metadata(dir.path().join(IDENTITY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
