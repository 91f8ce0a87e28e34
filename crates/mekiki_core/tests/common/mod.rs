#![allow(dead_code)]

use std::path::Path;

use mekiki_core::clock::format_ts;
use mekiki_core::db;
use mekiki_core::schema::{Candidate, CandidatePayload, CandidateState, Origin};
use mekiki_core::Config;
use rusqlite::Connection;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub const NOW: OffsetDateTime = datetime!(2026-02-01 12:00:00 UTC);

pub fn config() -> Config {
    Config::load_from_dir(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")).unwrap()
}

pub fn store() -> Connection {
    db::open_in_memory().unwrap()
}

pub struct CandidateSpec<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub source: &'a str,
    pub age_hours: i64,
    pub signals: &'a [&'a str],
    pub origin: Origin,
}

impl<'a> CandidateSpec<'a> {
    pub fn new(id: &'a str, title: &'a str) -> Self {
        Self {
            id,
            title,
            source: id,
            age_hours: 1,
            signals: &[],
            origin: Origin::BotRecommended,
        }
    }

    pub fn source(mut self, source: &'a str) -> Self {
        self.source = source;
        self
    }

    pub fn age_hours(mut self, hours: i64) -> Self {
        self.age_hours = hours;
        self
    }

    pub fn signals(mut self, signals: &'a [&'a str]) -> Self {
        self.signals = signals;
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn build(&self) -> Candidate {
        let created = format_ts(NOW - Duration::hours(self.age_hours)).unwrap();
        Candidate {
            id: self.id.to_string(),
            title: self.title.to_string(),
            url: Some(format!("https://{}.example.com/{}", self.source, self.id)),
            source_type: "url".to_string(),
            source_id: Some(self.source.to_string()),
            origin: self.origin,
            state: CandidateState::New,
            created_at: created.clone(),
            updated_at: created.clone(),
            payload: CandidatePayload {
                one_liner: format!("About {}", self.title),
                signals: self.signals.iter().map(|s| s.to_string()).collect(),
                source_domain: format!("{}.example.com", self.source),
                published_at: Some(created),
                content: None,
                ingest_channel: None,
            },
        }
    }

    pub fn insert(&self, conn: &Connection) -> Candidate {
        let candidate = self.build();
        assert!(db::insert_candidate(conn, &candidate).unwrap());
        candidate
    }
}

/// Answer the judge task by matching the candidate title in the prompt.
pub fn judge_answer(prompt: &str, table: &[(&str, f64, &str)]) -> String {
    table
        .iter()
        .find(|(title, _, _)| prompt.contains(&format!("- title: {title}")))
        .map(|(_, score, bucket)| format!(r#"{{"post_score": {score}, "bucket": "{bucket}", "reason": "fit"}}"#))
        .unwrap_or_else(|| r#"{"post_score": 0.1, "bucket": "OTHER"}"#.to_string())
}
