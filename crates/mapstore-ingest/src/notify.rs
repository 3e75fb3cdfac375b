//! Refresh signal for downstream watchers (map editors, room servers).
//!
//! Fire-and-forget: events go out on a `tokio::sync::broadcast` channel and
//! are dropped when nobody listens. Lagging subscribers lose the oldest events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEvent {
    /// A `.wam` document was written (upload, synthesized default, or patch).
    MapChanged {
        tenant: String,
        path: String,
        timestamp: u64,
    },
    /// A `.wam` document was deleted.
    MapDeleted {
        tenant: String,
        path: String,
        timestamp: u64,
    },
}

impl MapEvent {
    pub fn path(&self) -> &str {
        match self {
            MapEvent::MapChanged { path, .. } | MapEvent::MapDeleted { path, .. } => path,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            MapEvent::MapChanged { .. } => "map_changed",
            MapEvent::MapDeleted { .. } => "map_deleted",
        }
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Clone)]
pub struct MapChangeNotifier {
    tx: broadcast::Sender<MapEvent>,
}

impl Default for MapChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MapChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.tx.subscribe()
    }

    pub fn notify(&self, tenant: &str, path: &str) {
        self.send(MapEvent::MapChanged {
            tenant: tenant.to_string(),
            path: path.to_string(),
            timestamp: MapEvent::now(),
        });
    }

    pub fn notify_deleted(&self, tenant: &str, path: &str) {
        self.send(MapEvent::MapDeleted {
            tenant: tenant.to_string(),
            path: path.to_string(),
            timestamp: MapEvent::now(),
        });
    }

    fn send(&self, event: MapEvent) {
        // Err only means there are no subscribers right now
        if self.tx.send(event.clone()).is_err() {
            debug!(path = event.path(), kind = event.event_type(), "no refresh subscribers");
        }
    }
}
