// src/poll/watermarks.rs
//! Per-source last-poll watermarks.
//!
//! In-memory for the pipeline's lifetime. Persistence stays with the
//! caller: seed via `restore`, export via `snapshot`. Entries are only
//! advanced after a poll for their source completes and are never deleted
//! here.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cloneable handle over the watermark map. All writes go through the
/// single scheduling context, so the lock is uncontended in practice.
#[derive(Debug, Clone, Default)]
pub struct Watermarks {
    inner: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the map from externally persisted state.
    pub fn restore(snapshot: HashMap<String, DateTime<Utc>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn get(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(source_id).copied())
    }

    pub fn set(&self, source_id: &str, ts: DateTime<Utc>) {
        if let Ok(mut m) = self.inner.write() {
            m.insert(source_id.to_string(), ts);
        }
    }

    /// Copy of the whole map, for the caller to persist.
    pub fn snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.inner.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Most recent watermark across all sources, if any.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.values().max().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn restore_snapshot_roundtrip() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();

        let wm = Watermarks::new();
        assert_eq!(wm.get("geth"), None);
        assert_eq!(wm.latest(), None);

        wm.set("geth", t1);
        wm.set("bitcoin", t2);
        assert_eq!(wm.get("geth"), Some(t1));
        assert_eq!(wm.latest(), Some(t2));

        let restored = Watermarks::restore(wm.snapshot());
        assert_eq!(restored.get("bitcoin"), Some(t2));
    }
}
