// src/poll/types.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ParsedRelease;

/// Which GitHub endpoints a source is polled from. Chains that cut releases
/// use `Releases`; clients that only push tags use `Tags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Releases,
    Tags,
    Both,
}

impl FetchMode {
    pub fn wants_releases(self) -> bool {
        matches!(self, FetchMode::Releases | FetchMode::Both)
    }

    pub fn wants_tags(self) -> bool {
        matches!(self, FetchMode::Tags | FetchMode::Both)
    }
}

/// One monitored repository. Owned by configuration; the pipeline only
/// reads it per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    /// Human name, e.g. "Geth" or "Bitcoin Core".
    pub name: String,
    pub repository_url: String,
    pub fetch_mode: FetchMode,
}

/// GitHub release payload, as fetched. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    pub html_url: Option<String>,
    pub tarball_url: Option<String>,
}

/// GitHub tag payload. No publish timestamp, no body upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub commit: CommitRef,
    pub zipball_url: Option<String>,
    pub tarball_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    pub url: Option<String>,
}

/// A release or a tag, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawItem {
    Release(Release),
    Tag(TagInfo),
}

impl RawItem {
    pub fn tag_name(&self) -> &str {
        match self {
            RawItem::Release(r) => &r.tag_name,
            RawItem::Tag(t) => &t.name,
        }
    }

    /// Display title: the release name when present, else the tag itself.
    pub fn title(&self) -> &str {
        match self {
            RawItem::Release(r) => r.name.as_deref().unwrap_or(&r.tag_name),
            RawItem::Tag(t) => &t.name,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            RawItem::Release(r) => r.body.as_deref().unwrap_or_default(),
            RawItem::Tag(_) => "",
        }
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RawItem::Release(r) => r.published_at,
            RawItem::Tag(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            RawItem::Release(r) => r.html_url.as_deref(),
            RawItem::Tag(t) => t.zipball_url.as_deref(),
        }
    }
}

/// The unit handed to the sink: raw item + analysis + derived record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedUpdate {
    pub source_id: String,
    pub name: String,
    pub tag: String,
    pub url: Option<String>,
    pub notes: String,
    pub hard_fork: bool,
    pub fork_date: Option<NaiveDate>,
    pub draft: bool,
    pub prerelease: bool,
    /// Advisory triage score in [0, 1]; never suppresses emission.
    pub confidence: f32,
    pub analysis: ParsedRelease,
}

/// Per-source outcome of one poll. Errors are non-fatal: partial results
/// ride along with whatever went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub source: Source,
    pub updates: Vec<DetectedUpdate>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}
