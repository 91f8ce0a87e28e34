//! Turn feed entries and manual submissions into candidates.

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;
use url::Url;

use crate::actions;
use crate::clock::format_ts;
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::oracle::Oracle;
use crate::schema::{Candidate, CandidatePayload, CandidateState, LabelKind, Origin};
use crate::tasks::{extract_signals, summarize_feed, truncate_chars, ItemContext};

pub const MANUAL_SOURCE: &str = "manual";
const CONTENT_MAX: usize = 3000;

/// A crawled feed item, as handed over by whatever fetched it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedEntry {
    pub source_id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub default_signals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Created(Candidate),
    Duplicate { id: String },
}

/// `prefix:` plus the first 16 hex chars of the BLAKE3 hash of `key`.
pub fn candidate_id(prefix: &str, key: &str) -> String {
    let hash = blake3::hash(key.as_bytes()).to_hex();
    format!("{prefix}:{}", &hash.as_str()[..16])
}

fn parse_link(input: &str) -> Option<Url> {
    if input.chars().any(char::is_whitespace) {
        return None;
    }
    Url::parse(input)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Ingest a URL or free text supplied by the curator.
pub fn ingest_manual(
    conn: &Connection,
    config: &Config,
    oracle: &dyn Oracle,
    input: &str,
    channel: &str,
    now: OffsetDateTime,
) -> Result<IngestOutcome> {
    let trimmed = input.trim();
    let id = candidate_id("manual", trimmed);
    if db::get_candidate(conn, &id)?.is_some() {
        info!(candidate = %id, "already ingested");
        return Ok(IngestOutcome::Duplicate { id });
    }

    let link = parse_link(trimmed);
    let domain = link
        .as_ref()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| MANUAL_SOURCE.to_string());
    let (fallback_title, content) = match &link {
        Some(_) => (truncate_chars(trimmed, 120), None),
        None => (truncate_chars(trimmed, 80), Some(trimmed)),
    };

    let item = ItemContext {
        title: &fallback_title,
        url: if link.is_some() { trimmed } else { "" },
        content,
        source_domain: &domain,
        default_signals: &[],
    };
    let summary = summarize_feed(oracle, &item, &config.llm.language)?;
    let signals = extract_signals(oracle, &item, &config.signals, config.runtime.max_signals_per_item)?;

    let created_at = format_ts(now)?;
    let candidate = Candidate {
        id: id.clone(),
        title: if summary.title.is_empty() { fallback_title.clone() } else { summary.title },
        url: link.as_ref().map(|_| trimmed.to_string()),
        source_type: (if link.is_some() { "url" } else { "text" }).to_string(),
        source_id: Some(MANUAL_SOURCE.to_string()),
        origin: Origin::UserSeeded,
        state: CandidateState::New,
        created_at: created_at.clone(),
        updated_at: created_at.clone(),
        payload: CandidatePayload {
            one_liner: summary.one_liner,
            signals,
            source_domain: domain,
            published_at: Some(created_at),
            content: content.map(|text| truncate_chars(text, CONTENT_MAX)),
            ingest_channel: Some(channel.to_string()),
        },
    };
    db::insert_candidate(conn, &candidate)?;
    info!(candidate = %id, channel, "manual item ingested");

    if let Some(label) = config.runtime.auto_label.as_deref() {
        let label: LabelKind = label.parse()?;
        actions::label(conn, &id, label, "auto", Some(&json!({ "origin": channel })), now)?;
        info!(candidate = %id, label = label.key(), "auto-labelled");
        let refreshed = db::get_candidate(conn, &id)?;
        return Ok(IngestOutcome::Created(refreshed.unwrap_or(candidate)));
    }
    Ok(IngestOutcome::Created(candidate))
}

/// Ingest one feed entry as a bot-recommended candidate.
pub fn ingest_feed_entry(
    conn: &Connection,
    config: &Config,
    oracle: &dyn Oracle,
    entry: &FeedEntry,
    now: OffsetDateTime,
) -> Result<IngestOutcome> {
    let id = candidate_id("feed", &entry.url);
    if db::get_candidate(conn, &id)?.is_some() {
        return Ok(IngestOutcome::Duplicate { id });
    }

    let domain = Url::parse(&entry.url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_default();
    let item = ItemContext {
        title: &entry.title,
        url: &entry.url,
        content: entry.content.as_deref(),
        source_domain: &domain,
        default_signals: &entry.default_signals,
    };
    let summary = summarize_feed(oracle, &item, &config.llm.language)?;
    let signals = extract_signals(oracle, &item, &config.signals, config.runtime.max_signals_per_item)?;

    let created_at = format_ts(now)?;
    let candidate = Candidate {
        id: id.clone(),
        title: if summary.title.is_empty() { entry.title.clone() } else { summary.title },
        url: Some(entry.url.clone()),
        source_type: "url".to_string(),
        source_id: Some(entry.source_id.clone()),
        origin: Origin::BotRecommended,
        state: CandidateState::New,
        created_at: created_at.clone(),
        updated_at: created_at,
        payload: CandidatePayload {
            one_liner: summary.one_liner,
            signals,
            source_domain: domain,
            published_at: entry.published_at.clone(),
            content: entry.content.as_deref().map(|text| truncate_chars(text, CONTENT_MAX)),
            ingest_channel: None,
        },
    };
    db::insert_candidate(conn, &candidate)?;
    info!(candidate = %id, source = %entry.source_id, "feed entry ingested");
    Ok(IngestOutcome::Created(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_stable_hashes() {
        let a = candidate_id("manual", "https://example.com");
        assert!(a.starts_with("manual:"));
        assert_eq!(a.len(), "manual:".len() + 16);
        assert_eq!(a, candidate_id("manual", "https://example.com"));
        assert_ne!(a, candidate_id("feed", "https://example.com"));
    }

    #[test]
    fn only_http_links_count_as_urls() {
        assert!(parse_link("https://example.com/x").is_some());
        assert!(parse_link("mailto:someone@example.com").is_none());
        assert!(parse_link("a note about https://example.com").is_none());
    }
}
