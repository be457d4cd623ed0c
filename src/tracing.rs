//! Tracing and logging for LVE Node
//!
//! Initializes the global `tracing` subscriber and provides a small
//! structured [`Tracer`] facade that subsystems use for node-level events.
//! Events are forwarded to the log and retained in a bounded in-memory
//! buffer for the status query surface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

/// How many recent events the in-memory buffer keeps.
const EVENT_BUFFER: usize = 256;

/// Structured trace events for the node.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Startup(String),
    Shutdown(String),
    BlockProduced(u64),
    BlockReceived(u64),
    TransactionReceived(String),
    PeerConnected(String),
    PeerDisconnected(String),
    PeerBanned(String),
    EpochTransition(u64),
    SlashApplied(String),
    ChainReplaced(u64),
    StateSaved(u64),
    Error(String),
}

/// Shared event sink. Cloning is cheap; all clones feed one buffer.
#[derive(Clone, Default)]
pub struct Tracer {
    events: Arc<Mutex<VecDeque<TraceEvent>>>,
}

impl Tracer {
    pub fn trace(&self, event: TraceEvent) {
        match &event {
            TraceEvent::Error(msg) => tracing::warn!("{msg}"),
            other => tracing::debug!(?other, "trace"),
        }
        let mut events = self.events.lock().unwrap();
        if events.len() >= EVENT_BUFFER {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the most recent events, newest last.
    pub fn recent(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }
}

/// Tracing/logging configuration and state.
pub struct Tracing {
    pub tracer: Tracer,
}

impl Tracing {
    /// Initialize the global subscriber. Call once, from the binary.
    pub fn init() -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
        Self { tracer: Tracer::default() }
    }

    pub fn startup(&self) {
        self.tracer.trace(TraceEvent::Startup("node startup complete".into()));
        tracing::info!("node startup complete");
    }

    pub fn shutdown(&self) {
        self.tracer.trace(TraceEvent::Shutdown("node shutdown complete".into()));
        tracing::info!("node shutdown complete");
    }
}
