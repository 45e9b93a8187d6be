// src/sink.rs
//! Sinks consume the pipeline's `DetectedUpdate` stream.
//!
//! Emission is at-least-once across restarts, so consumers dedupe by
//! source + tag. `MemorySink` shows the expected shape and doubles as the
//! recent-updates buffer behind the operational API.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::poll::types::{DetectedUpdate, Source};

#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn persist(&self, source: &Source, updates: &[DetectedUpdate]) -> Result<()>;
}

/// Logs each update as structured fields. Useful as a default sink and
/// for operating without external storage.
pub struct LogSink;

#[async_trait]
impl UpdateSink for LogSink {
    async fn persist(&self, source: &Source, updates: &[DetectedUpdate]) -> Result<()> {
        for u in updates {
            tracing::info!(
                target: "sink",
                source = %source.id,
                tag = %u.tag,
                hard_fork = u.hard_fork,
                confidence = u.confidence,
                fork_date = ?u.fork_date,
                "update detected"
            );
        }
        Ok(())
    }
}

/// Bounded in-memory sink, deduplicated by source + tag. Oldest entries
/// fall off when the capacity is reached.
pub struct MemorySink {
    capacity: usize,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    seen: HashSet<(String, String)>,
    updates: Vec<DetectedUpdate>,
}

impl MemorySink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Most recent `n` updates, newest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<DetectedUpdate> {
        match self.state.lock() {
            Ok(state) => state.updates.iter().rev().take(n).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.updates.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UpdateSink for MemorySink {
    async fn persist(&self, source: &Source, updates: &[DetectedUpdate]) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;
        for u in updates {
            let key = (source.id.clone(), u.tag.clone());
            if !state.seen.insert(key) {
                continue;
            }
            state.updates.push(u.clone());
            if state.updates.len() > self.capacity {
                let evicted = state.updates.remove(0);
                state.seen.remove(&(evicted.source_id.clone(), evicted.tag));
            }
        }
        Ok(())
    }
}

/// Fan-out over several sinks; one failing sink does not starve the rest.
pub struct SinkMux {
    sinks: Vec<std::sync::Arc<dyn UpdateSink>>,
}

impl SinkMux {
    pub fn new(sinks: Vec<std::sync::Arc<dyn UpdateSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl UpdateSink for SinkMux {
    async fn persist(&self, source: &Source, updates: &[DetectedUpdate]) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.persist(source, updates).await {
                failures.push(format!("{e:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} sink(s) failed: {}", failures.len(), failures.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ConfidenceTier, ParsedRelease, ReleaseType};
    use crate::poll::types::FetchMode;

    fn source() -> Source {
        Source {
            id: "geth".into(),
            name: "Geth".into(),
            repository_url: "https://github.com/ethereum/go-ethereum".into(),
            fetch_mode: FetchMode::Releases,
        }
    }

    fn update(tag: &str) -> DetectedUpdate {
        DetectedUpdate {
            source_id: "geth".into(),
            name: tag.into(),
            tag: tag.into(),
            url: None,
            notes: String::new(),
            hard_fork: false,
            fork_date: None,
            draft: false,
            prerelease: false,
            confidence: 0.0,
            analysis: ParsedRelease {
                has_hard_fork: false,
                fork_date: None,
                confidence: ConfidenceTier::None,
                indicators: vec![],
                dates: vec![],
                release_type: ReleaseType::Unknown,
            },
        }
    }

    #[tokio::test]
    async fn memory_sink_dedupes_by_source_and_tag() {
        let sink = MemorySink::with_capacity(10);
        let src = source();
        sink.persist(&src, &[update("v1.0.0"), update("v1.1.0")])
            .await
            .unwrap();
        // Tag-mode re-fetches replay the same items every cycle.
        sink.persist(&src, &[update("v1.0.0")]).await.unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest_and_allows_reinsert() {
        let sink = MemorySink::with_capacity(2);
        let src = source();
        sink.persist(&src, &[update("v1"), update("v2"), update("v3")])
            .await
            .unwrap();
        assert_eq!(sink.len(), 2);
        let tags: Vec<String> = sink
            .snapshot_last_n(10)
            .into_iter()
            .map(|u| u.tag)
            .collect();
        assert_eq!(tags, vec!["v3".to_string(), "v2".to_string()]);

        // Evicted keys may come back later.
        sink.persist(&src, &[update("v1")]).await.unwrap();
        assert_eq!(sink.snapshot_last_n(1)[0].tag, "v1");
    }
}
