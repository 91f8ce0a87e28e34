//! Ingestion-time oracle tasks. Transport failures propagate; unusable
//! answers fall back to what the item already carries.

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::extract::{parse_array, parse_object};
use crate::oracle::{Oracle, TASK_EXTRACT_SIGNALS, TASK_SUMMARIZE_FEED};

const TITLE_MAX: usize = 80;
const ONE_LINER_MAX: usize = 240;
const SNIPPET_MAX: usize = 1500;

/// What the tasks know about an item before it becomes a candidate.
#[derive(Debug, Clone)]
pub struct ItemContext<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub content: Option<&'a str>,
    pub source_domain: &'a str,
    pub default_signals: &'a [String],
}

impl ItemContext<'_> {
    fn snippet(&self) -> String {
        truncate_chars(self.content.unwrap_or(""), SNIPPET_MAX)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSummary {
    pub title: String,
    pub one_liner: String,
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    title: Option<String>,
    one_liner: Option<String>,
}

pub fn language_name(code: &str) -> &str {
    match code {
        "ja" => "Japanese",
        "en" => "English",
        "zh" => "Chinese",
        "ko" => "Korean",
        other => other,
    }
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub fn summarize_feed(oracle: &dyn Oracle, item: &ItemContext<'_>, language: &str) -> Result<FeedSummary> {
    let lang = language_name(language);
    let prompt = format!(
        "You are a concise news summarizer.\n\
         Given this article, produce a JSON object with these exact keys:\n\
         - \"title\": A short, descriptive title in {lang} (max {TITLE_MAX} chars). Do NOT just copy the URL.\n\
         - \"one_liner\": A single-line summary in {lang} (max {ONE_LINER_MAX} chars).\n\n\
         Return ONLY valid JSON. No explanation.\n\n\
         Original title: {title}\n\
         URL: {url}\n\
         Content snippet: {snippet}\n\
         Source: {source}",
        title = item.title,
        url = item.url,
        snippet = item.snippet(),
        source = item.source_domain,
    );

    let text = oracle.run(TASK_SUMMARIZE_FEED, &prompt)?;
    match parse_object::<SummaryOutput>(&text) {
        Ok(output) => Ok(FeedSummary {
            title: truncate_chars(output.title.as_deref().unwrap_or(item.title), TITLE_MAX),
            one_liner: truncate_chars(output.one_liner.as_deref().unwrap_or(""), ONE_LINER_MAX),
        }),
        Err(err) => {
            warn!(error = %err, "summary unparseable, using raw text");
            Ok(FeedSummary {
                title: truncate_chars(item.title, TITLE_MAX),
                one_liner: truncate_chars(text.trim(), ONE_LINER_MAX),
            })
        }
    }
}

/// Pick known signals for an item, at most `max`.
pub fn extract_signals(
    oracle: &dyn Oracle,
    item: &ItemContext<'_>,
    available: &[String],
    max: usize,
) -> Result<Vec<String>> {
    let prompt = format!(
        "You are a signal tagger for a tech curation bot.\n\
         Given this article, pick the most relevant signals from the list below.\n\
         Return ONLY a JSON array of signal strings (max {max}). No explanation.\n\n\
         Available signals: {available}\n\n\
         Title: {title}\n\
         URL: {url}\n\
         Content snippet: {snippet}\n\
         Source: {source}\n\
         Default signals from feed config: {defaults}",
        available = serde_json::to_string(available)?,
        title = item.title,
        url = item.url,
        snippet = item.snippet(),
        source = item.source_domain,
        defaults = serde_json::to_string(item.default_signals)?,
    );

    let text = oracle.run(TASK_EXTRACT_SIGNALS, &prompt)?;
    match parse_array::<String>(&text) {
        Ok(tags) => {
            let mut picked: Vec<String> = Vec::new();
            for tag in tags {
                if available.contains(&tag) && !picked.contains(&tag) {
                    picked.push(tag);
                }
            }
            picked.truncate(max);
            Ok(picked)
        }
        Err(err) => {
            warn!(error = %err, "signals unparseable, using feed defaults");
            Ok(item.default_signals.iter().take(max).cloned().collect())
        }
    }
}
