//! Peer table for LVE Node
//!
//! Tracks every live connection with its score, verification flag, and
//! rate-limit timestamps, plus the ban list and the set of dialable peer
//! URLs learned from configuration and peer exchange. Admission control
//! (bans, per-IP, per-/24, and total caps) lives here so the accept loop
//! stays a thin shell.
//!
//! The table sits behind its own mutex, acquired only for short critical
//! sections and never while the ledger lock is held.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use rand::seq::{IndexedRandom, IteratorRandom};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::message::Message;

/// Total verified connections.
pub const MAX_PEERS: usize = 50;
/// Connections per remote IP.
pub const MAX_PEERS_PER_IP: usize = 2;
/// Connections per /24 (v4) or /48 (v6) subnet.
pub const MAX_PEERS_PER_SUBNET: usize = 5;
/// Below this many verified peers the maintenance loop re-dials bootstrap.
pub const MIN_PEERS: usize = 3;
/// PEX response size cap.
pub const MAX_PEERS_TO_SHARE: usize = 10;
/// Minimum interval between QUERY_PEERS from the same peer.
pub const PEX_MIN_INTERVAL_MS: u64 = 30_000;
/// How long a ban lasts.
pub const BAN_DURATION_MS: u64 = 10 * 60 * 1000;

/// Neutral starting score for a fresh connection.
pub const INITIAL_SCORE: i32 = 50;
/// A completed handshake.
pub const SCORE_HANDSHAKE: i32 = 10;
/// A useful message (new block, sync response).
pub const SCORE_USEFUL: i32 = 2;
/// Parse failures and invalid payloads.
pub const SCORE_ERROR: i32 = -10;
/// Messages from an unverified peer, unknown tags.
pub const SCORE_PROTOCOL_VIOLATION: i32 = -20;
/// Rate-limit violations.
pub const SCORE_RATE_LIMIT: i32 = -5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("ip is banned")]
    Banned,
    #[error("too many connections from this ip")]
    TooManyFromIp,
    #[error("too many connections from this subnet")]
    TooManyFromSubnet,
    #[error("peer table is full")]
    TableFull,
}

pub type PeerId = u64;

/// One live connection.
pub struct Peer {
    pub id: PeerId,
    pub ip: IpAddr,
    /// Dialable URL, when we dialed it or learned it via PEX.
    pub url: Option<String>,
    pub verified: bool,
    pub score: i32,
    pub connected_at: u64,
    pub last_pex_at: Option<u64>,
    pub best_height: u64,
    pub sender: UnboundedSender<Message>,
}

impl Peer {
    /// Group key for the subnet diversity cap.
    pub fn subnet(ip: &IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                format!("{}.{}.{}", o[0], o[1], o[2])
            }
            IpAddr::V6(v6) => {
                let s = v6.segments();
                format!("{:x}:{:x}:{:x}", s[0], s[1], s[2])
            }
        }
    }
}

#[derive(Default)]
pub struct PeerTable {
    next_id: PeerId,
    peers: HashMap<PeerId, Peer>,
    /// IP → ban expiry (ms).
    banned: HashMap<IpAddr, u64>,
    /// Dialable URLs learned from config and PEX.
    known_urls: HashSet<String>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission control for an incoming or outgoing connection.
    pub fn admit(&self, ip: &IpAddr, now_ms: u64) -> Result<(), AdmissionError> {
        if self.banned.get(ip).is_some_and(|until| *until > now_ms) {
            return Err(AdmissionError::Banned);
        }
        let from_ip = self.peers.values().filter(|p| p.ip == *ip).count();
        if from_ip >= MAX_PEERS_PER_IP {
            return Err(AdmissionError::TooManyFromIp);
        }
        let subnet = Peer::subnet(ip);
        let from_subnet = self
            .peers
            .values()
            .filter(|p| Peer::subnet(&p.ip) == subnet)
            .count();
        if from_subnet >= MAX_PEERS_PER_SUBNET {
            return Err(AdmissionError::TooManyFromSubnet);
        }
        if self.verified_count() >= MAX_PEERS {
            return Err(AdmissionError::TableFull);
        }
        Ok(())
    }

    pub fn insert(
        &mut self,
        ip: IpAddr,
        url: Option<String>,
        sender: UnboundedSender<Message>,
        now_ms: u64,
    ) -> PeerId {
        self.next_id += 1;
        let id = self.next_id;
        if let Some(url) = &url {
            self.known_urls.insert(url.clone());
        }
        self.peers.insert(
            id,
            Peer {
                id,
                ip,
                url,
                verified: false,
                score: INITIAL_SCORE,
                connected_at: now_ms,
                last_pex_at: None,
                best_height: 0,
                sender,
            },
        );
        id
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn verified_count(&self) -> usize {
        self.peers.values().filter(|p| p.verified).count()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    /// Mark a peer verified after a successful handshake.
    pub fn mark_verified(&mut self, id: PeerId, best_height: u64) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.verified = true;
            peer.best_height = best_height;
            peer.score += SCORE_HANDSHAKE;
        }
    }

    /// Adjust a peer's score; a score below zero bans the IP and evicts the
    /// peer. Returns true when the peer was banned.
    pub fn adjust_score(&mut self, id: PeerId, delta: i32, now_ms: u64) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        peer.score += delta;
        if peer.score < 0 {
            let ip = peer.ip;
            self.peers.remove(&id);
            self.banned.insert(ip, now_ms + BAN_DURATION_MS);
            return true;
        }
        false
    }

    pub fn ban(&mut self, ip: IpAddr, now_ms: u64) {
        self.banned.insert(ip, now_ms + BAN_DURATION_MS);
        self.peers.retain(|_, p| p.ip != ip);
    }

    pub fn expire_bans(&mut self, now_ms: u64) {
        self.banned.retain(|_, until| *until > now_ms);
    }

    /// Enforce the per-peer PEX rate limit; returns false on violation.
    pub fn allow_pex(&mut self, id: PeerId, now_ms: u64) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        if peer
            .last_pex_at
            .is_some_and(|last| now_ms.saturating_sub(last) < PEX_MIN_INTERVAL_MS)
        {
            return false;
        }
        peer.last_pex_at = Some(now_ms);
        true
    }

    /// Senders of all verified peers, optionally excluding one.
    pub fn verified_senders(&self, except: Option<PeerId>) -> Vec<UnboundedSender<Message>> {
        self.peers
            .values()
            .filter(|p| p.verified && Some(p.id) != except)
            .map(|p| p.sender.clone())
            .collect()
    }

    /// One random verified peer's sender, for continuous sync.
    pub fn random_verified_sender(&self) -> Option<UnboundedSender<Message>> {
        let mut rng = rand::rng();
        self.peers
            .values()
            .filter(|p| p.verified)
            .choose(&mut rng)
            .map(|p| p.sender.clone())
    }

    pub fn learn_url(&mut self, url: &str) -> bool {
        self.known_urls.insert(url.to_string())
    }

    /// Whether a live connection already uses this dial URL.
    pub fn is_connected_url(&self, url: &str) -> bool {
        self.peers.values().any(|p| p.url.as_deref() == Some(url))
    }

    pub fn knows_url(&self, url: &str) -> bool {
        self.known_urls.contains(url)
    }

    /// Random sample of dialable URLs for a PEX response.
    pub fn share_urls(&self) -> Vec<String> {
        let mut rng = rand::rng();
        let urls: Vec<&String> = self.known_urls.iter().collect();
        urls.choose_multiple(&mut rng, MAX_PEERS_TO_SHARE)
            .map(|u| (*u).clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn ip(last: u8) -> IpAddr {
        format!("10.0.0.{last}").parse().unwrap()
    }

    fn insert(table: &mut PeerTable, ip: IpAddr) -> PeerId {
        let (tx, _rx) = unbounded_channel();
        table.insert(ip, None, tx, 0)
    }

    #[test]
    fn per_ip_cap_is_enforced() {
        let mut table = PeerTable::new();
        insert(&mut table, ip(1));
        insert(&mut table, ip(1));
        assert_eq!(table.admit(&ip(1), 0), Err(AdmissionError::TooManyFromIp));
        assert!(table.admit(&ip(2), 0).is_ok());
    }

    #[test]
    fn subnet_cap_is_enforced() {
        let mut table = PeerTable::new();
        for last in 1..=5 {
            assert!(table.admit(&ip(last), 0).is_ok());
            insert(&mut table, ip(last));
        }
        assert_eq!(table.admit(&ip(6), 0), Err(AdmissionError::TooManyFromSubnet));
        let other_subnet: IpAddr = "10.0.1.1".parse().unwrap();
        assert!(table.admit(&other_subnet, 0).is_ok());
    }

    #[test]
    fn score_below_zero_bans_and_evicts() {
        let mut table = PeerTable::new();
        let id = insert(&mut table, ip(1));
        assert!(!table.adjust_score(id, -10, 0));
        assert!(table.adjust_score(id, -100, 0));
        assert_eq!(table.connected_count(), 0);
        assert_eq!(table.admit(&ip(1), 1), Err(AdmissionError::Banned));
        // Bans expire
        table.expire_bans(BAN_DURATION_MS + 1);
        assert!(table.admit(&ip(1), BAN_DURATION_MS + 1).is_ok());
    }

    #[test]
    fn pex_rate_limit() {
        let mut table = PeerTable::new();
        let id = insert(&mut table, ip(1));
        assert!(table.allow_pex(id, 1_000));
        assert!(!table.allow_pex(id, 1_000 + PEX_MIN_INTERVAL_MS - 1));
        assert!(table.allow_pex(id, 1_000 + PEX_MIN_INTERVAL_MS));
    }

    #[test]
    fn verified_senders_excludes_origin_and_unverified() {
        let mut table = PeerTable::new();
        let a = insert(&mut table, ip(1));
        let b = insert(&mut table, ip(2));
        insert(&mut table, ip(3)); // stays unverified
        table.mark_verified(a, 5);
        table.mark_verified(b, 7);
        assert_eq!(table.verified_senders(None).len(), 2);
        assert_eq!(table.verified_senders(Some(a)).len(), 1);
        assert_eq!(table.verified_count(), 2);
    }

    #[test]
    fn share_urls_is_bounded() {
        let mut table = PeerTable::new();
        for i in 0..30 {
            table.learn_url(&format!("ws://peer-{i}:6001"));
        }
        let shared = table.share_urls();
        assert_eq!(shared.len(), MAX_PEERS_TO_SHARE);
        assert!(shared.iter().all(|u| table.knows_url(u)));
    }
}
