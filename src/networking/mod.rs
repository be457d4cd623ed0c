//! Peer-to-peer networking for LVE Node
//!
//! A WebSocket listener plus outbound dials, all speaking the JSON message
//! protocol in [`message`]. Connections start unverified; the versioned
//! handshake (protocol version, chain id, genesis hash) gates everything
//! else. Scoring, bans, and the subnet-diversity admission caps live in the
//! peer table; sync and gossip flow through the node's block pipeline.
//!
//! Message processing per socket is strictly serial (one read loop per
//! connection), so score changes and verification flags are race-free per
//! peer; broadcasts fan out over the senders of all verified peers.

pub mod message;
pub mod peer;

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tracing::{debug, info, warn};

use crate::configuration::NetworkConfig;
use crate::ledger::{Block, LedgerError};
use crate::node::{Node, NodeError, NodeEvent};
use crate::vrf;

use message::{BlocksRequest, BlocksResponse, Handshake, Message, PROTOCOL_VERSION, SYNC_CHUNK_SIZE, VersionReject};
use peer::{
    MIN_PEERS, PeerId, PeerTable, SCORE_ERROR, SCORE_PROTOCOL_VIOLATION, SCORE_RATE_LIMIT,
    SCORE_USEFUL,
};

/// Faults attributable to a single peer. Each carries its own score
/// penalty; a handshake failure closes the connection outright.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl NetworkError {
    fn score_delta(&self) -> i32 {
        match self {
            NetworkError::HandshakeFailed(_) => 0,
            NetworkError::ProtocolViolation(_) => SCORE_PROTOCOL_VIOLATION,
            NetworkError::RateLimited => SCORE_RATE_LIMIT,
            NetworkError::Malformed(_) => SCORE_ERROR,
        }
    }

    /// Whether the connection survives this fault at all.
    fn is_fatal(&self) -> bool {
        matches!(self, NetworkError::HandshakeFailed(_))
    }
}

pub struct Network {
    node: Arc<Node>,
    table: Arc<Mutex<PeerTable>>,
    config: NetworkConfig,
}

impl Network {
    pub fn new(node: Arc<Node>, config: NetworkConfig) -> Arc<Self> {
        let mut table = PeerTable::new();
        for url in &config.bootstrap_peers {
            table.learn_url(url);
        }
        Arc::new(Self {
            node,
            table: Arc::new(Mutex::new(table)),
            config,
        })
    }

    /// Bind the listener and spawn the accept, gossip, and maintenance
    /// tasks. Returns the bound address once the listener is up.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: broadcast::Sender<()>,
    ) -> std::io::Result<std::net::SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let bound = listener.local_addr()?;
        info!(addr = %bound, "p2p listening");

        let network = self.clone();
        let mut accept_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => network.clone().spawn_inbound(stream, addr.ip()),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        });

        let network = self.clone();
        let mut gossip_shutdown = shutdown.subscribe();
        let mut events = self.node.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = gossip_shutdown.recv() => break,
                    event = events.recv() => match event {
                        Ok(NodeEvent::BlockApplied(block)) => {
                            network.broadcast(Message::NewBlock(block), None);
                        }
                        Ok(NodeEvent::TxAdmitted(tx)) => {
                            network.broadcast(Message::NewTransaction(tx), None);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "gossip lagged behind node events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        let network = self.clone();
        let mut maintenance_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(network.config.maintenance_interval_secs));
            loop {
                tokio::select! {
                    _ = maintenance_shutdown.recv() => break,
                    _ = ticker.tick() => network.clone().maintain().await,
                }
            }
        });

        for url in self.config.bootstrap_peers.clone() {
            self.clone().spawn_dial(url);
        }
        Ok(bound)
    }

    /// Periodic upkeep: expire bans, refill peers, keep the tip fresh.
    async fn maintain(self: Arc<Self>) {
        let now = vrf::now_ms();
        let (verified, latest_sender) = {
            let mut table = self.table.lock().unwrap();
            table.expire_bans(now);
            (table.verified_count(), table.random_verified_sender())
        };
        if verified < MIN_PEERS {
            for url in self.config.bootstrap_peers.clone() {
                self.clone().spawn_dial(url);
            }
            self.broadcast(Message::QueryPeers, None);
        }
        if let Some(sender) = latest_sender {
            let _ = sender.send(Message::QueryLatest);
        }
    }

    fn spawn_inbound(self: Arc<Self>, stream: TcpStream, ip: IpAddr) {
        tokio::spawn(async move {
            {
                let table = self.table.lock().unwrap();
                if let Err(reason) = table.admit(&ip, vrf::now_ms()) {
                    debug!(%ip, %reason, "inbound connection rejected");
                    return;
                }
            }
            match accept_async(stream).await {
                Ok(ws) => self.handle_connection(ws, ip, None).await,
                Err(e) => debug!(%ip, error = %e, "websocket upgrade failed"),
            }
        });
    }

    fn spawn_dial(self: Arc<Self>, url: String) {
        tokio::spawn(async move {
            let already = {
                let table = self.table.lock().unwrap();
                table.is_connected_url(&url)
            };
            if already {
                return;
            }
            let dial_timeout = Duration::from_secs(self.config.dial_timeout_secs);
            match timeout(dial_timeout, connect_async(&url)).await {
                Ok(Ok((ws, _response))) => {
                    let ip = match ws.get_ref() {
                        MaybeTlsStream::Plain(stream) => stream
                            .peer_addr()
                            .map(|a| a.ip())
                            .unwrap_or(IpAddr::from([0, 0, 0, 0])),
                        _ => IpAddr::from([0, 0, 0, 0]),
                    };
                    {
                        let table = self.table.lock().unwrap();
                        if table.admit(&ip, vrf::now_ms()).is_err() {
                            return;
                        }
                    }
                    self.handle_connection(ws, ip, Some(url)).await;
                }
                Ok(Err(e)) => debug!(%url, error = %e, "dial failed"),
                Err(_) => debug!(%url, "dial timed out"),
            }
        });
    }

    async fn local_handshake(&self) -> Handshake {
        let (chain_id, genesis_hash, current_height) = self
            .node
            .read(|state| {
                (
                    state.params().chain_id.clone(),
                    state.ledger.genesis_hash().to_string(),
                    state.ledger.height(),
                )
            })
            .await;
        Handshake {
            protocol_version: PROTOCOL_VERSION,
            chain_id,
            genesis_hash,
            node_version: env!("CARGO_PKG_VERSION").to_string(),
            current_height,
        }
    }

    async fn verify_handshake(&self, hs: &Handshake) -> Result<(), VersionReject> {
        let local = self.local_handshake().await;
        if hs.protocol_version != local.protocol_version {
            return Err(VersionReject {
                reason: "protocol version mismatch".into(),
                expected: local.protocol_version.to_string(),
                got: hs.protocol_version.to_string(),
            });
        }
        if hs.chain_id != local.chain_id {
            return Err(VersionReject {
                reason: "chain id mismatch".into(),
                expected: local.chain_id,
                got: hs.chain_id.clone(),
            });
        }
        if hs.genesis_hash != local.genesis_hash {
            return Err(VersionReject {
                reason: "genesis hash mismatch".into(),
                expected: local.genesis_hash,
                got: hs.genesis_hash.clone(),
            });
        }
        Ok(())
    }

    /// Serve one connection to completion: register, handshake, then the
    /// serial message loop.
    async fn handle_connection<S>(
        self: Arc<Self>,
        ws: WebSocketStream<S>,
        ip: IpAddr,
        url: Option<String>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (sender, mut outbox) = mpsc::unbounded_channel::<Message>();
        let peer_id = {
            let mut table = self.table.lock().unwrap();
            table.insert(ip, url, sender.clone(), vrf::now_ms())
        };
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                if sink.send(WsMessage::Text(msg.encode())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let _ = sender.send(Message::Handshake(self.local_handshake().await));
        let handshake_deadline = Duration::from_secs(self.config.handshake_timeout_secs);

        loop {
            let verified = {
                let mut table = self.table.lock().unwrap();
                table.get_mut(peer_id).map(|p| p.verified).unwrap_or(false)
            };
            let next = if verified {
                stream.next().await
            } else {
                match timeout(handshake_deadline, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(%ip, "handshake timed out");
                        break;
                    }
                }
            };
            match next {
                Some(Ok(WsMessage::Text(text))) => {
                    if !self.handle_frame(peer_id, &text).await {
                        break;
                    }
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {
                    let fault = NetworkError::ProtocolViolation("binary frame".into());
                    if !self.penalize(peer_id, fault) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(%ip, error = %e, "read error");
                    break;
                }
            }
        }

        {
            let mut table = self.table.lock().unwrap();
            table.remove(peer_id);
        }
        writer.abort();
        debug!(%ip, "peer disconnected");
    }

    /// Dispatch one frame. Returns false when the connection must close.
    async fn handle_frame(self: &Arc<Self>, peer_id: PeerId, text: &str) -> bool {
        let now = vrf::now_ms();
        let msg = match Message::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                return self.penalize(peer_id, NetworkError::Malformed(e.to_string()));
            }
        };
        let verified = {
            let mut table = self.table.lock().unwrap();
            table.get_mut(peer_id).map(|p| p.verified).unwrap_or(false)
        };
        match msg {
            Message::Handshake(hs) => match self.verify_handshake(&hs).await {
                Ok(()) => {
                    {
                        let mut table = self.table.lock().unwrap();
                        table.mark_verified(peer_id, hs.current_height);
                    }
                    let local = self.local_handshake().await;
                    self.send_to(peer_id, Message::HandshakeAck(local));
                    self.send_to(peer_id, Message::QueryLatest);
                    self.send_to(peer_id, Message::QueryPeers);
                    true
                }
                Err(reject) => {
                    let fault = NetworkError::HandshakeFailed(reject.reason.clone());
                    self.send_to(peer_id, Message::VersionReject(reject));
                    self.penalize(peer_id, fault)
                }
            },
            Message::HandshakeAck(hs) => match self.verify_handshake(&hs).await {
                Ok(()) => {
                    {
                        let mut table = self.table.lock().unwrap();
                        table.mark_verified(peer_id, hs.current_height);
                    }
                    self.send_to(peer_id, Message::QueryLatest);
                    self.send_to(peer_id, Message::QueryPeers);
                    true
                }
                Err(reject) => {
                    self.penalize(peer_id, NetworkError::HandshakeFailed(reject.reason))
                }
            },
            Message::VersionReject(reject) => {
                warn!(peer_id, reason = %reject.reason, expected = %reject.expected, got = %reject.got, "peer rejected our version");
                false
            }
            // Everything below requires a completed handshake
            _ if !verified => self.penalize(
                peer_id,
                NetworkError::ProtocolViolation("message before handshake".into()),
            ),
            Message::QueryLatest => {
                let tip = self.node.read(|state| state.ledger.tip().clone()).await;
                self.send_to(peer_id, Message::ResponseBlockchain(vec![tip]));
                true
            }
            Message::QueryAll => {
                let chain = self.node.read(|state| state.ledger.chain().to_vec()).await;
                self.send_to(peer_id, Message::ResponseBlockchain(chain));
                true
            }
            Message::QueryBlocksFrom(req) => {
                let limit = req.limit.clamp(1, SYNC_CHUNK_SIZE);
                let (blocks, has_more) = self
                    .node
                    .read(|state| {
                        let blocks = state.ledger.blocks_from(req.from_height, limit).to_vec();
                        let has_more = req.from_height + blocks.len() as u64
                            <= state.ledger.height();
                        (blocks, has_more)
                    })
                    .await;
                self.send_to(peer_id, Message::ResponseBlocks(BlocksResponse { blocks, has_more }));
                true
            }
            Message::ResponseBlockchain(blocks) => {
                self.score(peer_id, SCORE_USEFUL);
                self.handle_chain_response(peer_id, blocks).await;
                true
            }
            Message::ResponseBlocks(resp) => {
                self.score(peer_id, SCORE_USEFUL);
                self.handle_blocks_response(peer_id, resp).await;
                true
            }
            Message::NewBlock(block) => self.handle_new_block(peer_id, block).await,
            Message::NewTransaction(tx) => {
                match self.node.submit_tx(tx).await {
                    Ok(()) => {}
                    Err(NodeError::Ledger(LedgerError::DuplicateTx(_))) => {}
                    Err(NodeError::Ledger(
                        LedgerError::InvalidChain { .. } | LedgerError::InvalidSignature(_),
                    )) => {
                        let mut table = self.table.lock().unwrap();
                        return !table.adjust_score(peer_id, SCORE_ERROR, now);
                    }
                    // Nonce races and balance misses are normal gossip noise
                    Err(_) => {}
                }
                true
            }
            Message::QueryTransactionPool => {
                let txs = self
                    .node
                    .read(|state| state.mempool.transactions().to_vec())
                    .await;
                self.send_to(peer_id, Message::ResponseTransactionPool(txs));
                true
            }
            Message::ResponseTransactionPool(txs) => {
                for tx in txs {
                    let _ = self.node.submit_tx(tx).await;
                }
                true
            }
            Message::QueryPeers => {
                let allowed = {
                    let mut table = self.table.lock().unwrap();
                    table.allow_pex(peer_id, now)
                };
                if allowed {
                    let urls = {
                        let table = self.table.lock().unwrap();
                        table.share_urls()
                    };
                    self.send_to(peer_id, Message::ResponsePeers(urls));
                    true
                } else {
                    self.penalize(peer_id, NetworkError::RateLimited)
                }
            }
            Message::ResponsePeers(urls) => {
                for url in urls.into_iter().take(peer::MAX_PEERS_TO_SHARE) {
                    let fresh = {
                        let mut table = self.table.lock().unwrap();
                        table.learn_url(&url)
                    };
                    if fresh {
                        self.clone().spawn_dial(url);
                    }
                }
                true
            }
        }
    }

    /// A `RESPONSE_BLOCKCHAIN` carries either just the peer's tip (answer to
    /// `QUERY_LATEST`) or the peer's full chain (answer to `QUERY_ALL`).
    async fn handle_chain_response(self: &Arc<Self>, peer_id: PeerId, blocks: Vec<Block>) {
        let Some(last) = blocks.last().cloned() else {
            return;
        };
        let (local_height, tip_hash) = self
            .node
            .read(|state| (state.ledger.height(), state.ledger.tip().hash.clone()))
            .await;
        if last.index <= local_height {
            return;
        }
        if last.previous_hash == tip_hash && last.index == local_height + 1 {
            match self.node.accept_block(&last).await {
                Ok(()) => self.score(peer_id, SCORE_USEFUL),
                Err(e) => debug!(peer_id, error = %e, "tip append failed"),
            }
        } else if blocks.len() == 1 {
            // Behind by more than one block: fetch history in chunks
            self.send_to(
                peer_id,
                Message::QueryBlocksFrom(BlocksRequest {
                    from_height: local_height.saturating_sub(1),
                    limit: SYNC_CHUNK_SIZE,
                }),
            );
        } else if let Err(e) = self.node.replace_chain(&blocks).await {
            debug!(peer_id, error = %e, "peer chain rejected");
        }
    }

    /// Apply a chunked-sync batch: extend in place when it lines up, or
    /// splice it onto our prefix and attempt a longest-chain replacement.
    async fn handle_blocks_response(self: &Arc<Self>, peer_id: PeerId, resp: BlocksResponse) {
        if resp.blocks.is_empty() {
            return;
        }
        let local = self.node.read(|state| state.ledger.chain().to_vec()).await;
        let mut fork = false;
        for block in &resp.blocks {
            match local.get(block.index as usize) {
                Some(existing) if existing.hash == block.hash => {}
                Some(_) => {
                    fork = true;
                    break;
                }
                None => {}
            }
        }
        if fork {
            let splice_at = (resp.blocks[0].index as usize).min(local.len());
            let mut candidate = local[..splice_at].to_vec();
            candidate.extend(resp.blocks.iter().cloned());
            if let Err(e) = self.node.replace_chain(&candidate).await {
                debug!(peer_id, error = %e, "fork candidate rejected");
                return;
            }
        } else {
            for block in &resp.blocks {
                if block.index <= local.last().map(|b| b.index).unwrap_or(0) {
                    continue;
                }
                if let Err(e) = self.node.accept_block(block).await {
                    debug!(peer_id, index = block.index, error = %e, "sync append failed");
                    break;
                }
            }
        }
        if resp.has_more {
            let next = self.node.read(|state| state.ledger.height()).await + 1;
            self.send_to(
                peer_id,
                Message::QueryBlocksFrom(BlocksRequest { from_height: next, limit: SYNC_CHUNK_SIZE }),
            );
        }
    }

    async fn handle_new_block(self: &Arc<Self>, peer_id: PeerId, block: Block) -> bool {
        // Re-broadcast echoes and stale heights are routine, not misbehavior
        let known = self
            .node
            .read(|state| {
                state
                    .ledger
                    .block_at(block.index)
                    .is_some_and(|b| b.hash == block.hash)
            })
            .await;
        if known {
            return true;
        }
        let local_height = self.node.read(|state| state.ledger.height()).await;
        if block.index <= local_height {
            // A signed sibling of an applied block is double-sign evidence;
            // accept_block records it and rejects
            let _ = self.node.accept_block(&block).await;
            return true;
        }
        match self.node.accept_block(&block).await {
            Ok(()) => {
                self.score(peer_id, SCORE_USEFUL);
                // The node event channel re-broadcasts to everyone; nothing
                // more to do here
                true
            }
            Err(NodeError::Ledger(
                LedgerError::GapDetected { .. } | LedgerError::ForkDetected { .. },
            )) => {
                let local_height = self.node.read(|state| state.ledger.height()).await;
                self.send_to(
                    peer_id,
                    Message::QueryBlocksFrom(BlocksRequest {
                        from_height: local_height.saturating_sub(1),
                        limit: SYNC_CHUNK_SIZE,
                    }),
                );
                true
            }
            Err(NodeError::DoubleSign { validator, slot }) => {
                warn!(%validator, slot, "peer relayed a double-signed block");
                true
            }
            Err(e) => {
                debug!(peer_id, error = %e, "invalid gossiped block");
                let mut table = self.table.lock().unwrap();
                !table.adjust_score(peer_id, SCORE_ERROR, vrf::now_ms())
            }
        }
    }

    /// Apply a peer fault's penalty. Returns false when the connection must
    /// close (fatal fault, or the penalty banned the peer).
    fn penalize(&self, peer_id: PeerId, fault: NetworkError) -> bool {
        debug!(peer_id, %fault, "peer fault");
        if fault.is_fatal() {
            return false;
        }
        let mut table = self.table.lock().unwrap();
        !table.adjust_score(peer_id, fault.score_delta(), vrf::now_ms())
    }

    fn send_to(&self, peer_id: PeerId, msg: Message) {
        let sender = {
            let mut table = self.table.lock().unwrap();
            table.get_mut(peer_id).map(|p| p.sender.clone())
        };
        if let Some(sender) = sender {
            let _ = sender.send(msg);
        }
    }

    /// Fan a message out to every verified peer (optionally excluding one).
    pub fn broadcast(&self, msg: Message, except: Option<PeerId>) {
        let senders = {
            let table = self.table.lock().unwrap();
            table.verified_senders(except)
        };
        for sender in senders {
            let _ = sender.send(msg.clone());
        }
    }

    fn score(&self, peer_id: PeerId, delta: i32) {
        let mut table = self.table.lock().unwrap();
        table.adjust_score(peer_id, delta, vrf::now_ms());
    }

    pub fn verified_peer_count(&self) -> usize {
        self.table.lock().unwrap().verified_count()
    }
}
