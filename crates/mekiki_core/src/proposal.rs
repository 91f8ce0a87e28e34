//! Proposal state machine: PENDING moves once to APPROVED, REJECTED or EXPIRED.

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::info;

use crate::clock::{age_hours, parse_ts};
use crate::db;
use crate::error::{CurationError, Result};
use crate::schema::{ProfileSource, Proposal, ProposalStatus};

fn load_pending(conn: &Connection, id: &str) -> Result<Proposal> {
    let proposal = db::get_proposal(conn, id)?.ok_or_else(|| CurationError::not_found("proposal", id))?;
    if proposal.status.is_terminal() {
        return Err(CurationError::InvalidState {
            id: id.to_string(),
            status: proposal.status.to_string(),
        });
    }
    Ok(proposal)
}

fn resolve(conn: &Connection, id: &str, status: ProposalStatus, now: OffsetDateTime) -> Result<()> {
    if db::resolve_pending_proposal(conn, id, status, now)? {
        return Ok(());
    }
    // Lost a race with another resolution; report what it became.
    let current = db::get_proposal(conn, id)?.ok_or_else(|| CurationError::not_found("proposal", id))?;
    Err(CurationError::InvalidState {
        id: id.to_string(),
        status: current.status.to_string(),
    })
}

/// Approve a pending proposal, activating its text (or `edited` text when a
/// human revised it). Returns the new profile version id.
pub fn approve(conn: &Connection, id: &str, edited: Option<&str>, now: OffsetDateTime) -> Result<i64> {
    if edited.is_some_and(|text| text.trim().is_empty()) {
        return Err(CurationError::Validation("edited profile text is empty".to_string()));
    }

    let tx = conn.unchecked_transaction()?;
    let proposal = load_pending(&tx, id)?;
    resolve(&tx, id, ProposalStatus::Approved, now)?;
    let (text, source) = match edited {
        Some(text) => (text, ProfileSource::Edited),
        None => (proposal.new_profile_md.as_str(), ProfileSource::Approved),
    };
    let version = db::insert_profile_version(&tx, text, source, Some(id), now)?;
    tx.commit()?;

    info!(proposal = id, version, source = source.as_str(), "proposal approved");
    Ok(version)
}

pub fn reject(conn: &Connection, id: &str, now: OffsetDateTime) -> Result<()> {
    load_pending(conn, id)?;
    resolve(conn, id, ProposalStatus::Rejected, now)?;
    info!(proposal = id, "proposal rejected");
    Ok(())
}

pub fn expire(conn: &Connection, id: &str, now: OffsetDateTime) -> Result<()> {
    load_pending(conn, id)?;
    resolve(conn, id, ProposalStatus::Expired, now)
}

/// Expire every pending proposal at least `expire_hours` old. Returns the expired ids.
pub fn expire_pending(conn: &Connection, expire_hours: f64, now: OffsetDateTime) -> Result<Vec<String>> {
    let mut expired = Vec::new();
    for proposal in db::list_pending_proposals(conn)? {
        if age_hours(parse_ts(&proposal.created_at)?, now) < expire_hours {
            continue;
        }
        match expire(conn, &proposal.id, now) {
            Ok(()) => expired.push(proposal.id),
            // Resolved by someone else since we listed it.
            Err(CurationError::InvalidState { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    if !expired.is_empty() {
        info!(count = expired.len(), "proposals expired");
    }
    Ok(expired)
}

pub fn set_message_ref(conn: &Connection, id: &str, message_ref: &str) -> Result<()> {
    db::set_proposal_message_ref(conn, id, message_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::format_ts;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-02-01 12:00:00 UTC);

    fn pending(conn: &Connection, id: &str, created: OffsetDateTime) {
        db::insert_proposal(
            conn,
            &Proposal {
                id: id.to_string(),
                status: ProposalStatus::Pending,
                new_profile_md: "# New profile".to_string(),
                diff_summary: vec!["added rust".to_string()],
                risks: Vec::new(),
                confidence: 0.7,
                notes: None,
                stats_used: None,
                message_ref: None,
                created_at: format_ts(created).unwrap(),
                resolved_at: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn approve_activates_text_once() {
        let conn = db::open_in_memory().unwrap();
        pending(&conn, "prop-1", NOW);

        approve(&conn, "prop-1", None, NOW).unwrap();
        let active = db::get_active_profile(&conn).unwrap().unwrap();
        assert_eq!(active.profile_md, "# New profile");
        assert_eq!(active.source, ProfileSource::Approved);
        assert_eq!(active.proposal_id.as_deref(), Some("prop-1"));

        let err = approve(&conn, "prop-1", None, NOW).unwrap_err();
        assert!(matches!(err, CurationError::InvalidState { ref status, .. } if status == "approved"));
        let err = reject(&conn, "prop-1", NOW).unwrap_err();
        assert!(matches!(err, CurationError::InvalidState { .. }));
    }

    #[test]
    fn edited_approval_uses_human_text() {
        let conn = db::open_in_memory().unwrap();
        pending(&conn, "prop-2", NOW);
        approve(&conn, "prop-2", Some("# Hand edited"), NOW).unwrap();
        let active = db::get_active_profile(&conn).unwrap().unwrap();
        assert_eq!(active.profile_md, "# Hand edited");
        assert_eq!(active.source, ProfileSource::Edited);
    }

    #[test]
    fn missing_proposal_is_not_found() {
        let conn = db::open_in_memory().unwrap();
        assert!(matches!(reject(&conn, "nope", NOW), Err(CurationError::NotFound { .. })));
        assert!(matches!(approve(&conn, "nope", None, NOW), Err(CurationError::NotFound { .. })));
    }

    #[test]
    fn message_ref_survives_resolution() {
        let conn = db::open_in_memory().unwrap();
        pending(&conn, "prop-3", NOW);
        set_message_ref(&conn, "prop-3", "chan/123").unwrap();
        reject(&conn, "prop-3", NOW).unwrap();
        let stored = db::get_proposal(&conn, "prop-3").unwrap().unwrap();
        assert_eq!(stored.message_ref.as_deref(), Some("chan/123"));
        assert!(matches!(
            set_message_ref(&conn, "nope", "chan/1"),
            Err(CurationError::NotFound { .. })
        ));
    }

    #[test]
    fn expiry_only_touches_old_pending_proposals() {
        let conn = db::open_in_memory().unwrap();
        pending(&conn, "old", NOW - time::Duration::hours(72));
        pending(&conn, "young", NOW - time::Duration::hours(71));
        pending(&conn, "rejected", NOW - time::Duration::hours(100));
        reject(&conn, "rejected", NOW).unwrap();

        let expired = expire_pending(&conn, 72.0, NOW).unwrap();
        assert_eq!(expired, vec!["old".to_string()]);
        let old = db::get_proposal(&conn, "old").unwrap().unwrap();
        assert_eq!(old.status, ProposalStatus::Expired);
        assert!(old.resolved_at.is_some());
        assert!(matches!(expire(&conn, "old", NOW), Err(CurationError::InvalidState { .. })));
    }
}
