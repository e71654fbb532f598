//! Web server shared state and stream session tracking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dns_lookup::lookup_addr;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::device::DeviceIdentity;
use crate::resolver::Resolver;

/// State handed to every HTTP handler. All fields are immutable after
/// startup except the session registry, which tracks live streams.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: Arc<DeviceIdentity>,
    pub resolver: Arc<Resolver>,
    pub sessions: Arc<SessionRegistry>,
}

/// Information about one active stream session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id, unique for the process lifetime.
    pub id: u64,
    /// Client address.
    pub addr: String,
    /// Client hostname (reverse DNS), when resolvable.
    pub host: Option<String>,
    /// Source URL the client asked for.
    pub source_url: String,
    /// URL the helper process was launched against.
    pub resolved_url: String,
    /// When the session started.
    #[serde(skip)]
    pub started_at: Instant,
    /// Bytes relayed to the client so far.
    pub bytes_sent: u64,
}

impl SessionInfo {
    pub fn connected_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Registry of active stream sessions.
///
/// Each `/stream` request registers exactly one entry and removes it on
/// every exit path; the entry itself is only ever mutated by the owning
/// relay task.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, SessionInfo>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id.
    pub async fn register(
        &self,
        client: Option<SocketAddr>,
        source_url: &str,
        resolved_url: &str,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        // Reverse DNS is synchronous and can block for the full resolver
        // timeout; keep it off the async worker threads.
        let host = match client {
            Some(addr) => {
                let ip = addr.ip();
                tokio::task::spawn_blocking(move || lookup_addr(&ip).ok())
                    .await
                    .ok()
                    .flatten()
            }
            None => None,
        };
        let info = SessionInfo {
            id,
            addr: client
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            host,
            source_url: source_url.to_string(),
            resolved_url: resolved_url.to_string(),
            started_at: Instant::now(),
            bytes_sent: 0,
        };
        self.sessions.write().await.insert(id, info);
        id
    }

    /// Account bytes relayed by a session.
    pub async fn add_bytes(&self, id: u64, n: u64) {
        if let Some(info) = self.sessions.write().await.get_mut(&id) {
            info.bytes_sent += n;
        }
    }

    /// Remove a session. Safe to call for an id that is already gone.
    pub async fn unregister(&self, id: u64) {
        self.sessions.write().await.remove(&id);
    }

    /// Snapshot of all active sessions.
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Number of active sessions (and therefore helper processes).
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
