//! Curator feedback: labels, notes and opens appended to the action log.

use rusqlite::Connection;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::info;

use crate::db;
use crate::error::{CurationError, Result};
use crate::schema::{ActionKind, LabelKind};

fn require_candidate(conn: &Connection, id: &str) -> Result<()> {
    match db::get_candidate(conn, id)? {
        Some(_) => Ok(()),
        None => Err(CurationError::not_found("candidate", id)),
    }
}

/// Set the candidate's state and append the matching label action.
pub fn label(
    conn: &Connection,
    candidate_id: &str,
    label: LabelKind,
    actor: &str,
    metadata: Option<&Value>,
    now: OffsetDateTime,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    require_candidate(&tx, candidate_id)?;
    db::update_candidate_state(&tx, candidate_id, label.state(), now)?;
    let action_id = db::insert_action(&tx, candidate_id, ActionKind::Label(label), actor, metadata, now)?;
    tx.commit()?;
    info!(candidate = candidate_id, label = label.key(), actor, "labelled");
    Ok(action_id)
}

pub fn add_note(
    conn: &Connection,
    candidate_id: &str,
    actor: &str,
    title: &str,
    body: &str,
    now: OffsetDateTime,
) -> Result<i64> {
    require_candidate(conn, candidate_id)?;
    let metadata = json!({ "title": title, "body": body });
    db::insert_action(conn, candidate_id, ActionKind::Note, actor, Some(&metadata), now)
}

pub fn record_open(conn: &Connection, candidate_id: &str, actor: &str, now: OffsetDateTime) -> Result<i64> {
    require_candidate(conn, candidate_id)?;
    db::insert_action(conn, candidate_id, ActionKind::Open, actor, None, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Candidate, CandidatePayload, CandidateState, Origin};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-02-01 12:00:00 UTC);

    fn seed(conn: &Connection) {
        db::insert_candidate(
            conn,
            &Candidate {
                id: "c1".to_string(),
                title: "Item".to_string(),
                url: None,
                source_type: "text".to_string(),
                source_id: None,
                origin: Origin::BotRecommended,
                state: CandidateState::New,
                created_at: "2026-02-01T00:00:00Z".to_string(),
                updated_at: "2026-02-01T00:00:00Z".to_string(),
                payload: CandidatePayload::default(),
            },
        )
        .unwrap();
    }

    #[test]
    fn label_updates_state_and_logs_action() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        label(&conn, "c1", LabelKind::Discard, "alice", None, NOW).unwrap();

        let candidate = db::get_candidate(&conn, "c1").unwrap().unwrap();
        assert_eq!(candidate.state, CandidateState::Discard);
        assert_eq!(candidate.updated_at, "2026-02-01T12:00:00Z");
        let actions = db::list_actions(&conn, "c1").unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Label(LabelKind::Discard));
        assert_eq!(actions[0].actor, "alice");
    }

    #[test]
    fn notes_carry_title_and_body() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        add_note(&conn, "c1", "alice", "Why", "Good primer", NOW).unwrap();
        record_open(&conn, "c1", "alice", NOW).unwrap();
        let actions = db::list_actions(&conn, "c1").unwrap();
        assert_eq!(actions[0].kind, ActionKind::Note);
        assert_eq!(actions[0].metadata.as_ref().unwrap()["body"], "Good primer");
        assert_eq!(actions[1].kind, ActionKind::Open);
    }

    #[test]
    fn unknown_candidate_is_not_found() {
        let conn = db::open_in_memory().unwrap();
        let err = label(&conn, "missing", LabelKind::Keep, "alice", None, NOW).unwrap_err();
        assert!(matches!(err, CurationError::NotFound { kind: "candidate", .. }));
        assert!(db::list_actions(&conn, "missing").unwrap().is_empty());
    }
}
