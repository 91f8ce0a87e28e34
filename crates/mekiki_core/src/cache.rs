//! Judgement cache port.
//!
//! The serving pipeline only talks to [`JudgementCache`]; the SQLite table and
//! the in-memory map below are interchangeable behind it.

use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::clock::format_ts;
use crate::db;
use crate::error::Result;
use crate::schema::Judgement;

pub trait JudgementCache {
    /// Return the cached judgement when it is younger than its TTL.
    fn get(&self, candidate_id: &str, now: OffsetDateTime) -> Result<Option<Judgement>>;

    /// Store (or replace) a judgement valid for `ttl_days` from `now`.
    fn put(&self, judgement: &Judgement, ttl_days: f64, now: OffsetDateTime) -> Result<()>;
}

fn expiry(ttl_days: f64, now: OffsetDateTime) -> OffsetDateTime {
    now + time::Duration::seconds_f64(ttl_days * 86400.0)
}

pub struct SqliteJudgementCache<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteJudgementCache<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl JudgementCache for SqliteJudgementCache<'_> {
    fn get(&self, candidate_id: &str, now: OffsetDateTime) -> Result<Option<Judgement>> {
        db::get_fresh_judgement(self.conn, candidate_id, &format_ts(now)?)
    }

    fn put(&self, judgement: &Judgement, ttl_days: f64, now: OffsetDateTime) -> Result<()> {
        db::upsert_judgement(self.conn, judgement, &format_ts(expiry(ttl_days, now))?)
    }
}

/// Process-local cache, handy for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryJudgementCache {
    entries: RefCell<HashMap<String, (Judgement, OffsetDateTime)>>,
}

impl MemoryJudgementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl JudgementCache for MemoryJudgementCache {
    fn get(&self, candidate_id: &str, now: OffsetDateTime) -> Result<Option<Judgement>> {
        let entries = self.entries.borrow();
        Ok(entries
            .get(candidate_id)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(judgement, _)| judgement.clone()))
    }

    fn put(&self, judgement: &Judgement, ttl_days: f64, now: OffsetDateTime) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(judgement.candidate_id.clone(), (judgement.clone(), expiry(ttl_days, now)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SubScores;
    use time::macros::datetime;

    fn judgement(id: &str) -> Judgement {
        Judgement {
            candidate_id: id.to_string(),
            score: 0.7,
            bucket: "CORE".to_string(),
            reason: "fits".to_string(),
            signals: vec!["rust".to_string()],
            sub_scores: SubScores {
                novelty: Some(0.4),
                ..SubScores::default()
            },
            raw: "{}".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn exercise(cache: &dyn JudgementCache) {
        let written = datetime!(2026-01-01 00:00:00 UTC);
        cache.put(&judgement("a"), 14.0, written).unwrap();

        let fresh = cache.get("a", written + time::Duration::days(13)).unwrap();
        assert_eq!(fresh, Some(judgement("a")));
        assert!(cache.get("a", written + time::Duration::days(14)).unwrap().is_none());
        assert!(cache.get("missing", written).unwrap().is_none());

        // Rewriting refreshes the TTL.
        cache.put(&judgement("a"), 14.0, written + time::Duration::days(20)).unwrap();
        assert!(cache.get("a", written + time::Duration::days(21)).unwrap().is_some());
    }

    #[test]
    fn sqlite_cache_honours_ttl() {
        let conn = db::open_in_memory().unwrap();
        exercise(&SqliteJudgementCache::new(&conn));
    }

    #[test]
    fn memory_cache_honours_ttl() {
        let cache = MemoryJudgementCache::new();
        exercise(&cache);
        assert_eq!(cache.len(), 1);
    }
}
