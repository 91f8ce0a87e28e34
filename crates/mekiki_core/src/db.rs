use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use time::OffsetDateTime;

use crate::clock::format_ts;
use crate::error::{CurationError, Result};
use crate::schema::{
    Action, ActionKind, BucketCount, Candidate, CandidatePayload, CandidateState, Judgement,
    LabelEvent, LearningRun, Origin, Post, ProfileSource, Proposal, ProposalStatus,
    RunStatus, SubScores, TasteProfileVersion,
};

pub fn open(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| CurationError::Config(format!("{}: {err}", parent.display())))?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS candidates (
          id TEXT PRIMARY KEY,
          title TEXT NOT NULL,
          url TEXT,
          source_type TEXT NOT NULL DEFAULT 'url',
          source_id TEXT,
          origin TEXT NOT NULL DEFAULT 'BOT_RECOMMENDED',
          state TEXT NOT NULL DEFAULT 'NEW',
          payload_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_candidates_created_at ON candidates(created_at);

        CREATE TABLE IF NOT EXISTS actions_log (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          candidate_id TEXT NOT NULL,
          action TEXT NOT NULL,
          actor TEXT NOT NULL DEFAULT 'user',
          created_at TEXT NOT NULL,
          metadata TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_actions_candidate ON actions_log(candidate_id);
        CREATE INDEX IF NOT EXISTS idx_actions_created ON actions_log(created_at);

        CREATE TABLE IF NOT EXISTS judgements (
          candidate_id TEXT PRIMARY KEY,
          score REAL NOT NULL,
          bucket TEXT NOT NULL,
          reason TEXT NOT NULL,
          signals_json TEXT NOT NULL,
          sub_scores_json TEXT NOT NULL,
          raw TEXT NOT NULL,
          created_at TEXT NOT NULL,
          expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          candidate_id TEXT NOT NULL,
          title TEXT NOT NULL,
          bucket TEXT NOT NULL,
          posted_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_candidate ON posts(candidate_id);

        CREATE TABLE IF NOT EXISTS taste_profile_versions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          profile_md TEXT NOT NULL,
          source TEXT NOT NULL DEFAULT 'seed',
          proposal_id TEXT,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS taste_profile_proposals (
          id TEXT PRIMARY KEY,
          status TEXT NOT NULL DEFAULT 'pending',
          new_profile_md TEXT NOT NULL,
          diff_summary TEXT NOT NULL,
          risks TEXT NOT NULL,
          confidence REAL NOT NULL,
          notes TEXT,
          stats_used TEXT,
          message_ref TEXT,
          created_at TEXT NOT NULL,
          resolved_at TEXT
        );

        CREATE TABLE IF NOT EXISTS learning_runs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          started_at TEXT NOT NULL,
          finished_at TEXT,
          status TEXT NOT NULL DEFAULT 'running',
          events_processed INTEGER NOT NULL DEFAULT 0,
          proposal_id TEXT
        );

        CREATE TABLE IF NOT EXISTS runtime_settings (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

// -- candidates --

/// Insert a new candidate; returns false when the id already exists.
pub fn insert_candidate(conn: &Connection, candidate: &Candidate) -> Result<bool> {
    let payload_json = serde_json::to_string(&candidate.payload)?;
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO candidates (
          id, title, url, source_type, source_id, origin, state,
          payload_json, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            candidate.id,
            candidate.title,
            candidate.url,
            candidate.source_type,
            candidate.source_id,
            candidate.origin.as_str(),
            candidate.state.as_str(),
            payload_json,
            candidate.created_at,
            candidate.updated_at
        ],
    )?;
    Ok(inserted == 1)
}

const CANDIDATE_COLUMNS: &str =
    "c.id, c.title, c.url, c.source_type, c.source_id, c.origin, c.state, c.payload_json, c.created_at, c.updated_at";

pub fn get_candidate(conn: &Connection, id: &str) -> Result<Option<Candidate>> {
    let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates c WHERE c.id = ?1");
    let row = conn
        .query_row(&sql, params![id], CandidateRow::from_row)
        .optional()?;
    row.map(CandidateRow::into_candidate).transpose()
}

/// Newest-first NEW candidates created after `since`.
pub fn list_candidates_since(
    conn: &Connection,
    since: &str,
    limit: usize,
    exclude_posted: bool,
) -> Result<Vec<Candidate>> {
    let posted_clause = if exclude_posted {
        "AND NOT EXISTS (SELECT 1 FROM posts p WHERE p.candidate_id = c.id)"
    } else {
        ""
    };
    let sql = format!(
        r#"
        SELECT {CANDIDATE_COLUMNS}
        FROM candidates c
        WHERE c.state = 'NEW' AND c.created_at > ?1 {posted_clause}
        ORDER BY c.created_at DESC, c.rowid DESC
        LIMIT ?2
        "#
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![since, limit as i64], CandidateRow::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_candidate()?);
    }
    Ok(out)
}

pub fn list_candidates_in_states(conn: &Connection, states: &[CandidateState]) -> Result<Vec<Candidate>> {
    let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates c ORDER BY c.updated_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], CandidateRow::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        let candidate = row?.into_candidate()?;
        if states.contains(&candidate.state) {
            out.push(candidate);
        }
    }
    Ok(out)
}

pub fn update_candidate_state(
    conn: &Connection,
    id: &str,
    state: CandidateState,
    now: OffsetDateTime,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE candidates SET state = ?1, updated_at = ?2 WHERE id = ?3",
        params![state.as_str(), format_ts(now)?, id],
    )?;
    if changed == 0 {
        return Err(CurationError::not_found("candidate", id));
    }
    Ok(())
}

#[derive(Debug)]
struct CandidateRow {
    id: String,
    title: String,
    url: Option<String>,
    source_type: String,
    source_id: Option<String>,
    origin: String,
    state: String,
    payload_json: String,
    created_at: String,
    updated_at: String,
}

impl CandidateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            url: row.get(2)?,
            source_type: row.get(3)?,
            source_id: row.get(4)?,
            origin: row.get(5)?,
            state: row.get(6)?,
            payload_json: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_candidate(self) -> Result<Candidate> {
        let payload = decode_payload(&self.id, &self.payload_json)?;
        Ok(Candidate {
            origin: self.origin.parse()?,
            state: self.state.parse()?,
            id: self.id,
            title: self.title,
            url: self.url,
            source_type: self.source_type,
            source_id: self.source_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            payload,
        })
    }
}

fn decode_payload(candidate_id: &str, payload_json: &str) -> Result<CandidatePayload> {
    serde_json::from_str(payload_json)
        .map_err(|err| CurationError::Validation(format!("candidate {candidate_id} has a corrupt payload: {err}")))
}

// -- actions --

pub fn insert_action(
    conn: &Connection,
    candidate_id: &str,
    kind: ActionKind,
    actor: &str,
    metadata: Option<&Value>,
    now: OffsetDateTime,
) -> Result<i64> {
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    conn.execute(
        r#"
        INSERT INTO actions_log (candidate_id, action, actor, created_at, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![candidate_id, kind.as_str(), actor, format_ts(now)?, metadata_json],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_actions(conn: &Connection, candidate_id: &str) -> Result<Vec<Action>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, candidate_id, action, actor, created_at, metadata
        FROM actions_log
        WHERE candidate_id = ?1
        ORDER BY created_at ASC, id ASC
        "#,
    )?;
    let rows = stmt.query_map(params![candidate_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, candidate_id, action, actor, created_at, metadata) = row?;
        out.push(Action {
            id,
            candidate_id,
            kind: action.parse()?,
            actor,
            created_at,
            metadata: metadata.map(|raw| serde_json::from_str(&raw)).transpose()?,
        });
    }
    Ok(out)
}

/// Candidate ids with a discard action after `since`.
pub fn discarded_since(conn: &Connection, since: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT candidate_id FROM actions_log WHERE action = 'label.discard' AND created_at > ?1",
    )?;
    let rows = stmt.query_map(params![since], |row| row.get::<_, String>(0))?;
    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

/// Label actions joined with their candidates, newest first.
pub fn list_label_events(
    conn: &Connection,
    since: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<LabelEvent>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT a.candidate_id, a.action, a.created_at,
               c.title, c.origin, c.source_id, c.payload_json
        FROM actions_log a
        JOIN candidates c ON a.candidate_id = c.id
        WHERE a.action IN ('label.keep', 'label.unsure', 'label.discard')
          AND (?1 IS NULL OR a.created_at > ?1)
        ORDER BY a.created_at DESC, a.id DESC
        LIMIT ?2
        "#,
    )?;
    let limit = limit.map(|value| value as i64).unwrap_or(-1);
    let rows = stmt.query_map(params![since, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (candidate_id, action, created_at, title, origin, source_id, payload_json) = row?;
        let label = match action.parse::<ActionKind>()? {
            ActionKind::Label(label) => label,
            _ => continue,
        };
        let origin: Origin = origin.parse()?;
        let payload = decode_payload(&candidate_id, &payload_json)?;
        out.push(LabelEvent {
            candidate_id,
            label,
            created_at,
            title,
            manual: origin == Origin::UserSeeded || source_id.as_deref() == Some("manual"),
            origin,
            signals: payload.signals,
            one_liner: payload.one_liner,
            source_domain: payload.source_domain,
        });
    }
    Ok(out)
}

pub fn count_label_events_since(conn: &Connection, since: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        r#"
        SELECT COUNT(*) FROM actions_log
        WHERE created_at > ?1 AND action IN ('label.keep', 'label.unsure', 'label.discard')
        "#,
        params![since],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// -- posts --

pub fn record_post(
    conn: &Connection,
    candidate_id: &str,
    title: &str,
    bucket: &str,
    now: OffsetDateTime,
) -> Result<()> {
    conn.execute(
        "INSERT INTO posts (candidate_id, title, bucket, posted_at) VALUES (?1, ?2, ?3, ?4)",
        params![candidate_id, title, bucket, format_ts(now)?],
    )?;
    Ok(())
}

pub fn recent_posted_titles(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT title FROM posts ORDER BY posted_at DESC, id DESC LIMIT ?1")?;
    let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Most recent posts first.
pub fn list_posts(conn: &Connection, limit: usize) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(
        "SELECT candidate_id, title, bucket, posted_at FROM posts ORDER BY posted_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(Post {
            candidate_id: row.get(0)?,
            title: row.get(1)?,
            bucket: row.get(2)?,
            posted_at: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Bucket histogram over the most recent `limit` posts, most frequent first.
pub fn recent_bucket_counts(conn: &Connection, limit: usize) -> Result<Vec<BucketCount>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT bucket, COUNT(*) AS cnt FROM (
          SELECT bucket FROM posts ORDER BY posted_at DESC, id DESC LIMIT ?1
        )
        GROUP BY bucket
        ORDER BY cnt DESC, bucket ASC
        "#,
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(BucketCount {
            bucket: row.get(0)?,
            count: row.get::<_, i64>(1)? as usize,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

// -- judgement cache rows --

pub fn get_fresh_judgement(conn: &Connection, candidate_id: &str, now: &str) -> Result<Option<Judgement>> {
    let row = conn
        .query_row(
            r#"
            SELECT candidate_id, score, bucket, reason, signals_json, sub_scores_json, raw, created_at
            FROM judgements
            WHERE candidate_id = ?1 AND expires_at > ?2
            "#,
            params![candidate_id, now],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((candidate_id, score, bucket, reason, signals_json, sub_scores_json, raw, created_at)) = row
    else {
        return Ok(None);
    };
    let signals: Vec<String> = serde_json::from_str(&signals_json)?;
    let sub_scores: SubScores = serde_json::from_str(&sub_scores_json)?;
    Ok(Some(Judgement {
        candidate_id,
        score,
        bucket,
        reason,
        signals,
        sub_scores,
        raw,
        created_at,
    }))
}

pub fn upsert_judgement(conn: &Connection, judgement: &Judgement, expires_at: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO judgements (
          candidate_id, score, bucket, reason, signals_json, sub_scores_json, raw, created_at, expires_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(candidate_id) DO UPDATE SET
          score=excluded.score,
          bucket=excluded.bucket,
          reason=excluded.reason,
          signals_json=excluded.signals_json,
          sub_scores_json=excluded.sub_scores_json,
          raw=excluded.raw,
          created_at=excluded.created_at,
          expires_at=excluded.expires_at
        "#,
        params![
            judgement.candidate_id,
            judgement.score,
            judgement.bucket,
            judgement.reason,
            serde_json::to_string(&judgement.signals)?,
            serde_json::to_string(&judgement.sub_scores)?,
            judgement.raw,
            judgement.created_at,
            expires_at
        ],
    )?;
    Ok(())
}

// -- taste profile --

pub fn get_active_profile(conn: &Connection) -> Result<Option<TasteProfileVersion>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, profile_md, source, proposal_id, created_at
            FROM taste_profile_versions
            ORDER BY id DESC
            LIMIT 1
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(id, profile_md, source, proposal_id, created_at)| {
        Ok(TasteProfileVersion {
            id,
            profile_md,
            source: source.parse()?,
            proposal_id,
            created_at,
        })
    })
    .transpose()
}

pub fn insert_profile_version(
    conn: &Connection,
    profile_md: &str,
    source: ProfileSource,
    proposal_id: Option<&str>,
    now: OffsetDateTime,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO taste_profile_versions (profile_md, source, proposal_id, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![profile_md, source.as_str(), proposal_id, format_ts(now)?],
    )?;
    Ok(conn.last_insert_rowid())
}

// -- proposals --

pub fn insert_proposal(conn: &Connection, proposal: &Proposal) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO taste_profile_proposals (
          id, status, new_profile_md, diff_summary, risks, confidence,
          notes, stats_used, message_ref, created_at, resolved_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            proposal.id,
            proposal.status.as_str(),
            proposal.new_profile_md,
            serde_json::to_string(&proposal.diff_summary)?,
            serde_json::to_string(&proposal.risks)?,
            proposal.confidence,
            proposal.notes,
            proposal.stats_used.as_ref().map(serde_json::to_string).transpose()?,
            proposal.message_ref,
            proposal.created_at,
            proposal.resolved_at
        ],
    )?;
    Ok(())
}

const PROPOSAL_COLUMNS: &str = "id, status, new_profile_md, diff_summary, risks, confidence, notes, stats_used, message_ref, created_at, resolved_at";

pub fn get_proposal(conn: &Connection, id: &str) -> Result<Option<Proposal>> {
    let sql = format!("SELECT {PROPOSAL_COLUMNS} FROM taste_profile_proposals WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], ProposalRow::from_row)
        .optional()?;
    row.map(ProposalRow::into_proposal).transpose()
}

pub fn list_pending_proposals(conn: &Connection) -> Result<Vec<Proposal>> {
    let sql = format!(
        "SELECT {PROPOSAL_COLUMNS} FROM taste_profile_proposals WHERE status = 'pending' ORDER BY created_at DESC"
    );
    query_proposals(conn, &sql, [])
}

pub fn list_proposals(conn: &Connection, limit: usize) -> Result<Vec<Proposal>> {
    let sql = format!(
        "SELECT {PROPOSAL_COLUMNS} FROM taste_profile_proposals ORDER BY created_at DESC LIMIT ?1"
    );
    query_proposals(conn, &sql, params![limit as i64])
}

fn query_proposals<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Proposal>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, ProposalRow::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_proposal()?);
    }
    Ok(out)
}

/// Move a pending proposal to `status`; returns false when it was no longer pending.
pub fn resolve_pending_proposal(
    conn: &Connection,
    id: &str,
    status: ProposalStatus,
    now: OffsetDateTime,
) -> Result<bool> {
    let changed = conn.execute(
        r#"
        UPDATE taste_profile_proposals
        SET status = ?1, resolved_at = ?2
        WHERE id = ?3 AND status = 'pending'
        "#,
        params![status.as_str(), format_ts(now)?, id],
    )?;
    Ok(changed == 1)
}

pub fn set_proposal_message_ref(conn: &Connection, id: &str, message_ref: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE taste_profile_proposals SET message_ref = ?1 WHERE id = ?2",
        params![message_ref, id],
    )?;
    if changed == 0 {
        return Err(CurationError::not_found("proposal", id));
    }
    Ok(())
}

#[derive(Debug)]
struct ProposalRow {
    id: String,
    status: String,
    new_profile_md: String,
    diff_summary: String,
    risks: String,
    confidence: f64,
    notes: Option<String>,
    stats_used: Option<String>,
    message_ref: Option<String>,
    created_at: String,
    resolved_at: Option<String>,
}

impl ProposalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            new_profile_md: row.get(2)?,
            diff_summary: row.get(3)?,
            risks: row.get(4)?,
            confidence: row.get(5)?,
            notes: row.get(6)?,
            stats_used: row.get(7)?,
            message_ref: row.get(8)?,
            created_at: row.get(9)?,
            resolved_at: row.get(10)?,
        })
    }

    fn into_proposal(self) -> Result<Proposal> {
        Ok(Proposal {
            status: self.status.parse()?,
            diff_summary: serde_json::from_str(&self.diff_summary)?,
            risks: serde_json::from_str(&self.risks)?,
            stats_used: self.stats_used.map(|raw| serde_json::from_str(&raw)).transpose()?,
            id: self.id,
            new_profile_md: self.new_profile_md,
            confidence: self.confidence,
            notes: self.notes,
            message_ref: self.message_ref,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}

// -- learning runs --

/// Insert a running learning run unless one started after `since` is still
/// marked running. The check and insert are one statement, so two callers
/// cannot both succeed.
pub fn acquire_learning_lock(conn: &Connection, since: &str, now: OffsetDateTime) -> Result<Option<i64>> {
    let inserted = conn.execute(
        r#"
        INSERT INTO learning_runs (status, started_at)
        SELECT 'running', ?1
        WHERE NOT EXISTS (
          SELECT 1 FROM learning_runs WHERE status = 'running' AND started_at > ?2
        )
        "#,
        params![format_ts(now)?, since],
    )?;
    if inserted == 1 {
        Ok(Some(conn.last_insert_rowid()))
    } else {
        Ok(None)
    }
}

pub fn finish_learning_run(
    conn: &Connection,
    id: i64,
    status: RunStatus,
    events_processed: usize,
    proposal_id: Option<&str>,
    now: OffsetDateTime,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE learning_runs
        SET finished_at = ?1, status = ?2, events_processed = ?3, proposal_id = ?4
        WHERE id = ?5
        "#,
        params![format_ts(now)?, status.as_str(), events_processed as i64, proposal_id, id],
    )?;
    Ok(())
}

pub fn get_learning_run(conn: &Connection, id: i64) -> Result<Option<LearningRun>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, status, started_at, finished_at, events_processed, proposal_id
            FROM learning_runs WHERE id = ?1
            "#,
            params![id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;
    row.map(|(id, status, started_at, finished_at, events_processed, proposal_id)| {
        Ok(LearningRun {
            id,
            status: status.parse()?,
            started_at,
            finished_at,
            events_processed,
            proposal_id,
        })
    })
    .transpose()
}

// -- runtime settings --

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM runtime_settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub fn put_setting(conn: &Connection, key: &str, value: &str, now: OffsetDateTime) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO runtime_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        params![key, value, format_ts(now)?],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, key: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM runtime_settings WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

pub fn list_settings(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM runtime_settings ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
