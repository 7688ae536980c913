use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::json;

use rbroker_conf::Direction;
use rbroker_utils::{AtomicTimestamp, Counter};

use crate::context::ServerContext;
use crate::throttle::ThrottleStats;

/// Monotonic event total
#[derive(Debug, Default)]
pub struct Total(AtomicU64);

impl Total {
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Serialize for Total {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(self.get())
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DestinationStats {
    pub subscriptions: Counter,
    pub received: Total,
    pub from_peers: Total,
    pub from_adapter: Total,
    pub delivered: Total,
    pub delivery_failures: Total,
    pub inbound_throttled: Total,
    pub outbound_throttled: Total,
    pub expired: Total,
    pub forwarded: Total,
    pub last_expired: AtomicTimestamp,
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub sessions: Counter,
    pub subscriptions: Counter,
}

impl ServerContext {
    /// Read-only management snapshot of every destination
    pub fn stats_json(&self) -> serde_json::Value {
        let destinations: serde_json::Map<String, serde_json::Value> = self
            .destinations()
            .map(|d| {
                let settings = d.throttle.settings();
                let inbound: ThrottleStats = d.throttle.stats(Direction::Inbound);
                let outbound: ThrottleStats = d.throttle.stats(Direction::Outbound);
                (
                    d.id.to_string(),
                    json!({
                        "started": d.is_started(),
                        "subscribers": d.registry.client_count(),
                        "stats": &d.stats,
                        "throttle": {
                            "inbound": { "enabled": settings.is_enabled(Direction::Inbound), "stats": inbound },
                            "outbound": { "enabled": settings.is_enabled(Direction::Outbound), "stats": outbound },
                        },
                        "remote_peers": d.remote.peers(),
                    }),
                )
            })
            .collect();
        json!({
            "node": self.settings.node.id,
            "sessions": &self.stats.sessions,
            "subscriptions": &self.stats.subscriptions,
            "destinations": destinations,
        })
    }
}
