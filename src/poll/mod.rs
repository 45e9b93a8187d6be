// src/poll/mod.rs
//! Poll coordinator: per-source orchestration of fetch -> classify -> emit.

pub mod config;
pub mod github;
pub mod scheduler;
pub mod types;
pub mod watermarks;

use anyhow::{bail, Result};
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::classifier;
use crate::poll::github::GithubClient;
use crate::poll::types::{DetectedUpdate, PollResult, RawItem, Source};
use crate::poll::watermarks::Watermarks;

/// Bounded backfill for a source we've never polled before.
pub const FIRST_POLL_LIMIT: usize = 100;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Completed polling cycles.");
        describe_counter!("poll_items_total", "Raw releases/tags fetched.");
        describe_counter!(
            "poll_updates_total",
            "DetectedUpdate records emitted to the sink."
        );
        describe_counter!(
            "poll_hard_forks_total",
            "Updates flagged as likely hard forks."
        );
        describe_counter!("poll_errors_total", "Fetch/classify errors (non-fatal).");
        describe_gauge!("poll_last_run_ts", "Unix ts when the last cycle ran.");
    });
}

/// Normalize release-note text before classification: decode HTML
/// entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_notes(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (release bodies are markdown but embed HTML)
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 20k chars, generous enough for long changelogs
    if out.chars().count() > 20_000 {
        out = out.chars().take(20_000).collect();
    }

    out
}

/// Per-source polling: decides first-poll vs incremental, fetches, runs
/// the classifier, and advances the watermark.
#[derive(Debug, Clone)]
pub struct PollCoordinator {
    client: GithubClient,
    watermarks: Watermarks,
    first_poll_limit: usize,
}

impl PollCoordinator {
    pub fn new(client: GithubClient, watermarks: Watermarks) -> Self {
        Self {
            client,
            watermarks,
            first_poll_limit: FIRST_POLL_LIMIT,
        }
    }

    pub fn watermarks(&self) -> &Watermarks {
        &self.watermarks
    }

    /// Poll one source. Never fails outright: fetch and per-item errors
    /// land in `PollResult::errors` next to whatever was salvaged.
    ///
    /// The watermark advances to the poll's start instant once at least
    /// one fetch attempt completed; a total failure leaves it untouched so
    /// the next cycle retries the same window.
    pub async fn poll_source(&self, source: &Source) -> PollResult {
        ensure_metrics_described();
        let started = Utc::now();
        let mut updates = Vec::new();
        let mut errors = Vec::new();

        let (owner, repo) = match github::parse_repo_url(&source.repository_url) {
            Ok(parts) => parts,
            Err(e) => {
                errors.push(format!("source `{}`: {e}", source.id));
                counter!("poll_errors_total").increment(1);
                return PollResult {
                    source: source.clone(),
                    updates,
                    errors,
                    completed_at: Utc::now(),
                };
            }
        };

        // A watermark in the future means clock skew or corrupted state;
        // treat it like a first poll.
        let since = self.watermarks.get(&source.id).filter(|ts| *ts <= started);
        let mut fetch_completed = false;

        if source.fetch_mode.wants_releases() {
            let fetched = match since {
                Some(ts) => self.client.fetch_releases_since(&owner, &repo, ts).await,
                None => {
                    self.client
                        .fetch_releases(&owner, &repo, 1, self.first_poll_limit)
                        .await
                }
            };
            match fetched {
                Ok(releases) => {
                    fetch_completed = true;
                    counter!("poll_items_total").increment(releases.len() as u64);
                    for release in releases {
                        self.collect(source, RawItem::Release(release), &mut updates, &mut errors);
                    }
                }
                Err(e) => {
                    errors.push(format!("releases fetch failed for `{}`: {e}", source.id));
                }
            }
        }

        if source.fetch_mode.wants_tags() {
            // Tags carry no publish timestamp upstream, so every cycle
            // re-fetches the same bounded page; the sink's dedupe by
            // source+tag absorbs the repeats.
            match self
                .client
                .fetch_tags(&owner, &repo, 1, self.first_poll_limit)
                .await
            {
                Ok(tags) => {
                    fetch_completed = true;
                    counter!("poll_items_total").increment(tags.len() as u64);
                    for tag in tags {
                        self.collect(source, RawItem::Tag(tag), &mut updates, &mut errors);
                    }
                }
                Err(e) => {
                    errors.push(format!("tags fetch failed for `{}`: {e}", source.id));
                }
            }
        }

        if fetch_completed {
            self.watermarks.set(&source.id, started);
        }

        counter!("poll_errors_total").increment(errors.len() as u64);
        counter!("poll_updates_total").increment(updates.len() as u64);
        let hard_forks = updates.iter().filter(|u| u.hard_fork).count();
        counter!("poll_hard_forks_total").increment(hard_forks as u64);

        tracing::info!(
            target: "poll",
            source = %source.id,
            updates = updates.len(),
            hard_forks,
            errors = errors.len(),
            incremental = since.is_some(),
            "source polled"
        );

        PollResult {
            source: source.clone(),
            updates,
            errors,
            completed_at: Utc::now(),
        }
    }

    /// Classify one raw item. Failures skip the item, never the source.
    fn collect(
        &self,
        source: &Source,
        item: RawItem,
        updates: &mut Vec<DetectedUpdate>,
        errors: &mut Vec<String>,
    ) {
        match analyze_item(source, &item) {
            Ok(update) => updates.push(update),
            Err(e) => errors.push(format!(
                "skipped item `{}` from `{}`: {e}",
                item.tag_name(),
                source.id
            )),
        }
    }
}

/// Build a `DetectedUpdate` from one fetched item.
pub fn analyze_item(source: &Source, item: &RawItem) -> Result<DetectedUpdate> {
    let tag = item.tag_name().trim();
    if tag.is_empty() {
        bail!("empty tag name");
    }

    let title = normalize_notes(item.title());
    let notes = normalize_notes(item.body());
    let parsed = classifier::classify(&title, &notes, tag, item.published_at());
    let confidence = classifier::confidence_score(&parsed);

    let (draft, prerelease) = match item {
        RawItem::Release(r) => (r.draft, r.prerelease),
        RawItem::Tag(_) => (false, false),
    };

    Ok(DetectedUpdate {
        source_id: source.id.clone(),
        name: if title.is_empty() {
            tag.to_string()
        } else {
            title
        },
        tag: tag.to_string(),
        url: item.url().map(str::to_string),
        notes,
        hard_fork: parsed.has_hard_fork,
        fork_date: parsed.fork_date,
        draft,
        prerelease,
        confidence,
        analysis: parsed,
    })
}

/// Record cycle-level telemetry. Called by the scheduler once per cycle.
pub(crate) fn record_cycle_metrics() {
    ensure_metrics_described();
    counter!("poll_cycles_total").increment(1);
    gauge!("poll_last_run_ts").set(Utc::now().timestamp().max(0) as f64);
}
