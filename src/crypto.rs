//! Cryptographic primitives for LVE Node
//!
//! SHA-256 hashing, Ed25519 and secp256k1 signing, BIP-39 mnemonic key
//! derivation, and network-prefixed address encoding. All signatures are
//! hex-encoded on the wire; the signature scheme of a transaction key is
//! inferred from the public key length (32-byte Ed25519, 33-byte compressed
//! secp256k1).

use bip39::Mnemonic;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use secp256k1::{Message, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hex length of an Ed25519 public key (32 bytes).
const ED25519_PUBKEY_HEX_LEN: usize = 64;
/// Hex length of a compressed secp256k1 public key (33 bytes).
const SECP256K1_PUBKEY_HEX_LEN: usize = 66;
/// Address body length: first 40 hex chars of sha256(publicKey).
const ADDRESS_BODY_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid mnemonic phrase: {0}")]
    InvalidMnemonic(String),
    #[error("signature verification failed")]
    VerificationFailed,
}

/// The network a node (and every address on it) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
}

impl Network {
    /// Address prefix enforced by validation on this network.
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "LVE_",
            Network::Testnet => "tLVE_",
        }
    }

    /// Chain identifier embedded in every transaction and handshake.
    pub fn chain_id(&self) -> &'static str {
        match self {
            Network::Mainnet => "lve-mainnet",
            Network::Testnet => "lve-testnet",
        }
    }

    /// Directory name under the data dir holding this network's state.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Raw SHA-256 of arbitrary bytes.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Key material for a wallet or validator account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub private_key: String,
    pub public_key: String,
    pub address: String,
}

/// Generate a fresh 12-word BIP-39 mnemonic from OS entropy.
pub fn generate_mnemonic() -> String {
    let entropy: [u8; 16] = rand::random();
    // 16 bytes of entropy is always a valid 12-word phrase
    Mnemonic::from_entropy(&entropy)
        .expect("16-byte entropy is valid")
        .to_string()
}

/// Derive an Ed25519 keypair (and its address) from a BIP-39 mnemonic.
///
/// The 64-byte BIP-39 seed is compressed to a 32-byte Ed25519 seed with
/// SHA-256 so that the same phrase yields the same account everywhere.
pub fn keypair_from_mnemonic(phrase: &str, network: Network) -> Result<KeyMaterial, CryptoError> {
    let mnemonic =
        Mnemonic::parse(phrase).map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))?;
    let seed = mnemonic.to_seed("");
    let key_seed = sha256_bytes(&seed);
    Ok(ed25519_keypair_from_seed(key_seed, network))
}

/// Build an Ed25519 keypair from a 32-byte seed.
pub fn ed25519_keypair_from_seed(seed: [u8; 32], network: Network) -> KeyMaterial {
    let signing = SigningKey::from_bytes(&seed);
    let public_key = hex::encode(signing.verifying_key().as_bytes());
    let address = derive_address(network, &public_key);
    KeyMaterial {
        private_key: hex::encode(signing.to_bytes()),
        public_key,
        address,
    }
}

/// Generate a random Ed25519 keypair.
pub fn generate_ed25519_keypair(network: Network) -> KeyMaterial {
    ed25519_keypair_from_seed(rand::random(), network)
}

/// Generate a random secp256k1 keypair with a compressed public key.
pub fn generate_secp256k1_keypair(network: Network) -> Result<KeyMaterial, CryptoError> {
    let secp = Secp256k1::new();
    let secret_bytes: [u8; 32] = rand::random();
    let secret = secp256k1::SecretKey::from_slice(&secret_bytes)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let public = secret.public_key(&secp);
    let public_key = hex::encode(public.serialize());
    let address = derive_address(network, &public_key);
    Ok(KeyMaterial {
        private_key: hex::encode(secret.secret_bytes()),
        public_key,
        address,
    })
}

/// Derive the network-prefixed address of a hex public key.
///
/// Address = prefix || first 40 hex chars of sha256(publicKey bytes).
pub fn derive_address(network: Network, public_key_hex: &str) -> String {
    let key_bytes = hex::decode(public_key_hex).unwrap_or_else(|_| public_key_hex.into());
    let digest = sha256_hex(&key_bytes);
    format!("{}{}", network.address_prefix(), &digest[..ADDRESS_BODY_LEN])
}

/// Check that an address carries the active network's prefix and a 40-char
/// hex body.
pub fn validate_address(network: Network, address: &str) -> bool {
    let Some(body) = address.strip_prefix(network.address_prefix()) else {
        return false;
    };
    body.len() == ADDRESS_BODY_LEN && body.chars().all(|c| c.is_ascii_hexdigit())
}

/// The genesis faucet address for a network.
pub fn faucet_address(network: Network) -> String {
    format!("{}{:0>width$}", network.address_prefix(), "1", width = ADDRESS_BODY_LEN)
}

/// Sign a message with a hex private key; scheme chosen by key length of the
/// matching public key (Ed25519 signs the raw message, secp256k1 signs its
/// SHA-256 digest).
pub fn sign_message(
    private_key_hex: &str,
    public_key_hex: &str,
    message: &[u8],
) -> Result<String, CryptoError> {
    let key_bytes =
        hex::decode(private_key_hex).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
    match public_key_hex.len() {
        ED25519_PUBKEY_HEX_LEN => {
            let seed: [u8; 32] = key_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("ed25519 key must be 32 bytes".into()))?;
            let signing = SigningKey::from_bytes(&seed);
            Ok(hex::encode(signing.sign(message).to_bytes()))
        }
        SECP256K1_PUBKEY_HEX_LEN => {
            let secp = Secp256k1::new();
            let secret = secp256k1::SecretKey::from_slice(&key_bytes)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let digest = Message::from_digest(sha256_bytes(message));
            Ok(hex::encode(secp.sign_ecdsa(&digest, &secret).serialize_compact()))
        }
        other => Err(CryptoError::InvalidKey(format!(
            "unsupported public key length {other}"
        ))),
    }
}

/// Verify a hex signature against a hex public key; scheme inferred from the
/// public key length.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    match public_key_hex.len() {
        ED25519_PUBKEY_HEX_LEN => {
            let Ok(key_arr) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
                return false;
            };
            let Ok(verifying) = VerifyingKey::from_bytes(&key_arr) else {
                return false;
            };
            let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
                return false;
            };
            verifying.verify(message, &Signature::from_bytes(&sig_arr)).is_ok()
        }
        SECP256K1_PUBKEY_HEX_LEN => {
            let secp = Secp256k1::verification_only();
            let Ok(public) = secp256k1::PublicKey::from_slice(&key_bytes) else {
                return false;
            };
            let Ok(signature) = secp256k1::ecdsa::Signature::from_compact(&sig_bytes) else {
                return false;
            };
            let digest = Message::from_digest(sha256_bytes(message));
            secp.verify_ecdsa(&digest, &signature, &public).is_ok()
        }
        _ => false,
    }
}
