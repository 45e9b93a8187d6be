// src/classifier.rs
//! Release-note classifier: hard-fork indicator tiers, date extraction,
//! release-type classification from tag names, and confidence scoring.
//!
//! Everything here is pure: text + publish time in, `ParsedRelease` out.
//! Network fetching and watermark state live in `poll`.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Coarse strength of the hard-fork signal, derived from which
/// indicator tier matched. `High > Medium > Low > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    None,
    Low,
    Medium,
    High,
}

/// Semver-ish classification of a release tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Major,
    Minor,
    Patch,
    Unknown,
}

/// Structured analysis of one release/tag. Transient: produced per item
/// within a poll cycle and carried on the emitted `DetectedUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRelease {
    pub has_hard_fork: bool,
    pub fork_date: Option<NaiveDate>,
    pub confidence: ConfidenceTier,
    /// Ids of every indicator pattern that matched, across all tiers.
    pub indicators: Vec<String>,
    /// All calendar dates found in the body, de-duplicated, ascending.
    pub dates: Vec<NaiveDate>,
    pub release_type: ReleaseType,
}

struct Indicator {
    id: &'static str,
    re: Regex,
}

fn compile(table: &[(&'static str, &'static str)]) -> Vec<Indicator> {
    table
        .iter()
        .map(|&(id, pat)| Indicator {
            id,
            re: Regex::new(pat).expect("indicator regex"),
        })
        .collect()
}

// Tier tables. Matching runs on the lower-cased title+body, so patterns
// are lower-case. Bare "fork"/"upgrade" are deliberately absent: they hit
// far too many ordinary releases.
static HIGH_INDICATORS: Lazy<Vec<Indicator>> = Lazy::new(|| {
    compile(&[
        ("hard_fork", r"hard[\s-]+fork"),
        ("hardfork", r"hardfork"),
        ("mandatory_upgrade", r"mandatory\s+upgrade"),
    ])
});

static MEDIUM_INDICATORS: Lazy<Vec<Indicator>> = Lazy::new(|| {
    compile(&[
        ("fork_height", r"fork\s+height"),
        ("activation_block", r"activation\s+block"),
        ("upgrade_block", r"upgrade\s+block"),
        ("consensus_upgrade", r"consensus\s+upgrade"),
        ("backward_incompatible", r"backwards?[\s-]+incompatible"),
        ("breaking_protocol", r"breaking\s+protocol"),
        ("mandatory_network", r"mandatory\s+network"),
        ("emergency_upgrade", r"emergency\s+upgrade"),
        ("critical_network", r"critical\s+network"),
    ])
});

static LOW_INDICATORS: Lazy<Vec<Indicator>> = Lazy::new(|| {
    compile(&[
        ("protocol_fork", r"protocol\s+fork"),
        ("chain_upgrade", r"chain\s+upgrade"),
        ("network_activation", r"network\s+activation"),
        ("consensus_fork", r"consensus\s+fork"),
    ])
});

/// Classify one release/tag. `published_at` is `None` for plain tags,
/// which carry no timestamp upstream.
pub fn classify(
    title: &str,
    body: &str,
    tag_name: &str,
    published_at: Option<DateTime<Utc>>,
) -> ParsedRelease {
    let haystack = format!("{title}\n{body}").to_lowercase();

    let mut indicators = Vec::new();
    let mut confidence = ConfidenceTier::None;
    for (tier, table) in [
        (ConfidenceTier::High, &*HIGH_INDICATORS),
        (ConfidenceTier::Medium, &*MEDIUM_INDICATORS),
        (ConfidenceTier::Low, &*LOW_INDICATORS),
    ] {
        for ind in table {
            if ind.re.is_match(&haystack) {
                indicators.push(ind.id.to_string());
                if confidence < tier {
                    confidence = tier;
                }
            }
        }
    }
    let has_hard_fork = !indicators.is_empty();

    // Dates come from the body only; titles are too noisy ("2024 roadmap").
    let dates = extract_dates(body);
    let fork_date = if has_hard_fork {
        select_fork_date(&dates, published_at)
    } else {
        None
    };

    let release_type = classify_release_type(tag_name);

    let parsed = ParsedRelease {
        has_hard_fork,
        fork_date,
        confidence,
        indicators,
        dates,
        release_type,
    };
    if parsed.has_hard_fork {
        dev_log_classification(&haystack, &parsed);
    }
    parsed
}

/// Prefer the earliest date strictly after the publish time (a fork is
/// announced before it activates); otherwise the earliest date at all.
fn select_fork_date(dates: &[NaiveDate], published_at: Option<DateTime<Utc>>) -> Option<NaiveDate> {
    if dates.is_empty() {
        return None;
    }
    if let Some(published) = published_at {
        let cutoff = published.date_naive();
        if let Some(d) = dates.iter().find(|d| **d > cutoff) {
            return Some(*d);
        }
    }
    dates.first().copied()
}

// --- date extraction ---

static RE_ISO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b").expect("iso date regex"));
static RE_US: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[-/](\d{1,2})[-/](\d{4})\b").expect("us date regex"));
static RE_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
    .expect("named date regex")
});

fn month_from_name(name: &str) -> Option<u32> {
    let m = match name.to_ascii_lowercase().get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(m)
}

/// Scan text for dates in ISO (`2024-06-01`, `2024/06/01`), US
/// (`06/01/2024`, `06-01-2024`) and named-month (`June 1, 2024`,
/// `Jun 1 2024`) forms. Impossible dates fall out via
/// `NaiveDate::from_ymd_opt`; duplicates collapse by calendar day.
pub fn extract_dates(text: &str) -> Vec<NaiveDate> {
    let mut found = BTreeSet::new();

    for caps in RE_ISO.captures_iter(text) {
        if let (Ok(y), Ok(m), Ok(d)) = (caps[1].parse(), caps[2].parse(), caps[3].parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.insert(date);
            }
        }
    }
    for caps in RE_US.captures_iter(text) {
        if let (Ok(m), Ok(d), Ok(y)) = (caps[1].parse(), caps[2].parse(), caps[3].parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.insert(date);
            }
        }
    }
    for caps in RE_NAMED.captures_iter(text) {
        let month = month_from_name(&caps[1]);
        if let (Some(m), Ok(d), Ok(y)) = (month, caps[2].parse(), caps[3].parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.insert(date);
            }
        }
    }

    found.into_iter().collect()
}

// --- release type from tag name ---

static RE_TAG_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:version|release|v)\.?").expect("tag prefix regex"));
static RE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").expect("version regex"));

/// Classify a tag name as major/minor/patch from its `MAJOR.MINOR.PATCH`
/// shape, after stripping a `v`/`version`/`release` prefix. A two-component
/// `X.0` also counts as major; anything that doesn't fit is `Unknown`.
pub fn classify_release_type(tag_name: &str) -> ReleaseType {
    let rest = RE_TAG_PREFIX.replace(tag_name.trim(), "");
    let caps = match RE_VERSION.captures(&rest) {
        Some(c) => c,
        None => return ReleaseType::Unknown,
    };
    let minor: u64 = match caps[2].parse() {
        Ok(v) => v,
        Err(_) => return ReleaseType::Unknown,
    };
    match caps.get(3) {
        Some(patch) => match patch.as_str().parse::<u64>() {
            Ok(0) if minor == 0 => ReleaseType::Major,
            Ok(0) => ReleaseType::Minor,
            Ok(_) => ReleaseType::Patch,
            Err(_) => ReleaseType::Unknown,
        },
        None if minor == 0 => ReleaseType::Major,
        None => ReleaseType::Unknown,
    }
}

// --- confidence score ---

/// Advisory score in `[0, 1]` for downstream triage. Never gates emission.
pub fn confidence_score(parsed: &ParsedRelease) -> f32 {
    let mut score: f32 = match parsed.confidence {
        ConfidenceTier::High => 0.8,
        ConfidenceTier::Medium => 0.5,
        ConfidenceTier::Low => 0.2,
        ConfidenceTier::None => 0.0,
    };
    if !parsed.dates.is_empty() {
        score += 0.1;
    }
    if parsed.fork_date.is_some() {
        score += 0.1;
    }
    if parsed.release_type == ReleaseType::Major {
        score += 0.2;
    }
    if parsed.indicators.len() > 2 {
        score += 0.1;
    }
    score.min(1.0)
}

// --- block number extraction ---

static RE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bblock\s*[:#]?\s*(\d{1,12})\b").expect("block regex"));

/// Pull activation block heights out of the text: "block 123456",
/// "at block 123456", "activation block: 123456". De-duplicated, ascending.
pub fn extract_block_numbers(text: &str) -> Vec<u64> {
    let mut found = BTreeSet::new();
    for caps in RE_BLOCK.captures_iter(text) {
        if let Ok(n) = caps[1].parse::<u64>() {
            if n > 0 {
                found.insert(n);
            }
        }
    }
    found.into_iter().collect()
}

// --- dev diagnostics ---

// Dev logging gate: FORKWATCH_DEV_LOG=1 AND a dev environment (debug build
// or APP_ENV in {local,development,dev})
fn dev_logging_enabled() -> bool {
    let on = std::env::var("FORKWATCH_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("APP_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Minimal, anonymized dev logger for hard-fork hits.
fn dev_log_classification(haystack: &str, parsed: &ParsedRelease) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(haystack);
    // Never log raw text. Only hashed id + indicator ids.
    tracing::info!(
        target: "classifier",
        %id,
        tier = ?parsed.confidence,
        indicators = ?parsed.indicators,
        fork_date = ?parsed.fork_date,
        "hard fork signal"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn literal_hard_fork_is_high_tier() {
        for text in [
            "This Hard Fork activates soon",
            "hardfork scheduled",
            "A MANDATORY UPGRADE for all node operators",
        ] {
            let p = classify(text, "", "v1.0.0", None);
            assert!(p.has_hard_fork, "{text}");
            assert_eq!(p.confidence, ConfidenceTier::High, "{text}");
        }
    }

    #[test]
    fn plain_release_matches_nothing() {
        let p = classify(
            "v1.4.2",
            "Bug fixes and performance improvements. Upgrade at your leisure.",
            "v1.4.2",
            None,
        );
        assert!(!p.has_hard_fork);
        assert!(p.indicators.is_empty());
        assert_eq!(p.confidence, ConfidenceTier::None);
        assert_eq!(p.fork_date, None);
    }

    #[test]
    fn medium_tier_without_literal_term() {
        let p = classify("v2.0.0", "The fork height is set to 1,200,000.", "v2.0.0", None);
        assert!(p.has_hard_fork);
        assert_eq!(p.confidence, ConfidenceTier::Medium);
        assert_eq!(p.indicators, vec!["fork_height".to_string()]);
    }

    #[test]
    fn highest_tier_wins_and_all_indicators_recorded() {
        let p = classify(
            "Hard fork",
            "Consensus upgrade at the activation block. This is a chain upgrade.",
            "v3.0.0",
            None,
        );
        assert_eq!(p.confidence, ConfidenceTier::High);
        assert!(p.indicators.contains(&"hard_fork".to_string()));
        assert!(p.indicators.contains(&"consensus_upgrade".to_string()));
        assert!(p.indicators.contains(&"activation_block".to_string()));
        assert!(p.indicators.contains(&"chain_upgrade".to_string()));
    }

    #[test]
    fn date_formats_converge_on_the_same_day() {
        let expected = vec![date(2024, 6, 1)];
        assert_eq!(extract_dates("due on 2024-06-01, prepare"), expected);
        assert_eq!(extract_dates("due on 2024/06/01, prepare"), expected);
        assert_eq!(extract_dates("due on 06/01/2024, prepare"), expected);
        assert_eq!(extract_dates("due on 06-01-2024, prepare"), expected);
        assert_eq!(extract_dates("due on June 1, 2024, prepare"), expected);
        assert_eq!(extract_dates("due on Jun 1 2024, prepare"), expected);
    }

    #[test]
    fn impossible_dates_are_rejected() {
        assert!(extract_dates("scheduled for 2024-13-40").is_empty());
        assert!(extract_dates("scheduled for 19/39/2024").is_empty());
        assert!(extract_dates("scheduled for February 30, 2024").is_empty());
    }

    #[test]
    fn duplicate_dates_collapse_and_sort() {
        let dates = extract_dates("2024-06-01, also June 1, 2024, then 2024-03-15");
        assert_eq!(dates, vec![date(2024, 3, 15), date(2024, 6, 1)]);
    }

    #[test]
    fn fork_date_prefers_first_date_after_publish() {
        let published = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let p = classify(
            "Hard fork",
            "Announced 2025-01-05, activates 2025-03-01, contingency 2025-04-01.",
            "v2.0.0",
            Some(published),
        );
        assert_eq!(p.fork_date, Some(date(2025, 3, 1)));
    }

    #[test]
    fn fork_date_falls_back_to_earliest_overall() {
        let published = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let p = classify(
            "Hard fork",
            "Activated on 2025-03-01, patched 2025-04-01.",
            "v2.0.0",
            Some(published),
        );
        assert_eq!(p.fork_date, Some(date(2025, 3, 1)));
    }

    #[test]
    fn no_fork_date_without_hard_fork_signal() {
        let p = classify("v1.1.0", "Released on 2025-03-01.", "v1.1.0", None);
        assert_eq!(p.dates, vec![date(2025, 3, 1)]);
        assert_eq!(p.fork_date, None);
    }

    #[test]
    fn release_type_from_tag() {
        assert_eq!(classify_release_type("v2.0.0"), ReleaseType::Major);
        assert_eq!(classify_release_type("v2.3.0"), ReleaseType::Minor);
        assert_eq!(classify_release_type("v2.3.7"), ReleaseType::Patch);
        assert_eq!(classify_release_type("nightly-build-42"), ReleaseType::Unknown);
        assert_eq!(classify_release_type("2.0"), ReleaseType::Major);
        assert_eq!(classify_release_type("release.4.0.0"), ReleaseType::Major);
        assert_eq!(classify_release_type("Version 1.2.0"), ReleaseType::Unknown);
        assert_eq!(classify_release_type("VERSION.1.2.0"), ReleaseType::Minor);
        assert_eq!(classify_release_type("v2.3"), ReleaseType::Unknown);
    }

    #[test]
    fn confidence_score_stays_in_unit_interval() {
        let p = ParsedRelease {
            has_hard_fork: true,
            fork_date: Some(date(2025, 3, 1)),
            confidence: ConfidenceTier::High,
            indicators: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            dates: vec![date(2025, 3, 1)],
            release_type: ReleaseType::Major,
        };
        // 0.8 + 0.1 + 0.1 + 0.2 + 0.1 clamps to 1.0
        assert_eq!(confidence_score(&p), 1.0);

        let none = ParsedRelease {
            has_hard_fork: false,
            fork_date: None,
            confidence: ConfidenceTier::None,
            indicators: vec![],
            dates: vec![],
            release_type: ReleaseType::Unknown,
        };
        assert_eq!(confidence_score(&none), 0.0);
    }

    #[test]
    fn confidence_score_additive_components() {
        let p = ParsedRelease {
            has_hard_fork: true,
            fork_date: None,
            confidence: ConfidenceTier::Medium,
            indicators: vec!["fork_height".into()],
            dates: vec![date(2025, 3, 1)],
            release_type: ReleaseType::Patch,
        };
        // 0.5 base + 0.1 date
        assert!((confidence_score(&p) - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn block_numbers_deduplicate() {
        let blocks =
            extract_block_numbers("Activates at block 123456. Activation block: 123456, then block 200000.");
        assert_eq!(blocks, vec![123_456, 200_000]);
        assert!(extract_block_numbers("no heights here").is_empty());
        assert!(extract_block_numbers("block 0 is genesis").is_empty());
    }
}
