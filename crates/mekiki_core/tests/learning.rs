mod common;

use std::cell::RefCell;

use common::{config, store, CandidateSpec, NOW};
use mekiki_core::actions;
use mekiki_core::clock::format_ts;
use mekiki_core::db;
use mekiki_core::learning::{run_learning, LearnOutcome};
use mekiki_core::proposal;
use mekiki_core::schema::{LabelKind, Origin, ProfileSource, ProposalStatus, RunStatus};
use mekiki_core::{CurationError, Result};
use rusqlite::Connection;
use time::Duration;

const PROPOSAL: &str = r##"Here you go:
{"new_profile_md": "# Taste Profile\nMore rust, less crypto.", "diff_summary": ["+rust", "-crypto"], "risks": ["narrower feed"], "confidence": 0.8}"##;

fn label_many(conn: &Connection, count: usize) {
    for i in 0..count {
        let id = format!("item-{i}");
        let title = format!("Item {i}");
        let origin = if i % 3 == 0 { Origin::UserSeeded } else { Origin::BotRecommended };
        CandidateSpec::new(&id, &title)
            .signals(&["rust", "databases"])
            .origin(origin)
            .insert(conn);
        let label = if i % 4 == 0 { LabelKind::Discard } else { LabelKind::Keep };
        actions::label(conn, &id, label, "alice", None, NOW - Duration::hours(i as i64)).unwrap();
    }
}

#[test]
fn too_few_events_skip_without_a_run() {
    let conn = store();
    let config = config();
    label_many(&conn, 3);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> { Ok(PROPOSAL.to_string()) };

    let outcome = run_learning(&conn, &config, &oracle, false, NOW).unwrap();
    match outcome {
        LearnOutcome::Skipped { reason } => assert!(reason.contains("Not enough events"), "{reason}"),
        other => panic!("expected skip, got {other:?}"),
    }
    assert!(db::list_pending_proposals(&conn).unwrap().is_empty());
    assert!(db::get_learning_run(&conn, 1).unwrap().is_none());
}

#[test]
fn successful_run_creates_pending_proposal_and_seeds_profile() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);

    let prompts = RefCell::new(Vec::new());
    let oracle = |task: &str, prompt: &str| -> Result<String> {
        prompts.borrow_mut().push((task.to_string(), prompt.to_string()));
        Ok(PROPOSAL.to_string())
    };

    let outcome = run_learning(&conn, &config, &oracle, false, NOW).unwrap();
    let LearnOutcome::Completed {
        run_id,
        events,
        proposal_id: Some(proposal_id),
    } = outcome
    else {
        panic!("expected a proposal, got {outcome:?}");
    };
    assert_eq!(events, 12);

    let run = db::get_learning_run(&conn, run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.events_processed, 12);
    assert_eq!(run.proposal_id.as_deref(), Some(proposal_id.as_str()));

    let stored = db::get_proposal(&conn, &proposal_id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Pending);
    assert_eq!(stored.diff_summary, vec!["+rust".to_string(), "-crypto".to_string()]);
    assert_eq!(stored.confidence, 0.8);
    assert!(stored.stats_used.is_some());

    let active = db::get_active_profile(&conn).unwrap().unwrap();
    assert_eq!(active.source, ProfileSource::Seed);

    let prompts = prompts.borrow();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].0, "profile_update");
    assert!(prompts[0].1.contains(&config.taste_profile_seed));
}

#[test]
fn unfinished_run_blocks_learning_until_its_ttl_passes() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> { Ok(PROPOSAL.to_string()) };

    // A run that never finished, as after a crash mid-run.
    let since = format_ts(NOW - Duration::minutes(30)).unwrap();
    db::acquire_learning_lock(&conn, &since, NOW).unwrap().unwrap();

    let blocked = run_learning(&conn, &config, &oracle, true, NOW + Duration::minutes(5)).unwrap();
    assert_eq!(
        blocked,
        LearnOutcome::Skipped {
            reason: "Another learning run is in progress.".to_string()
        }
    );

    let later = run_learning(&conn, &config, &oracle, true, NOW + Duration::minutes(31)).unwrap();
    assert!(later.proposal_id().is_some());
}

#[test]
fn finished_runs_do_not_hold_the_lock() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> { Ok(PROPOSAL.to_string()) };

    let first = run_learning(&conn, &config, &oracle, false, NOW).unwrap();
    let second = run_learning(&conn, &config, &oracle, false, NOW + Duration::minutes(1)).unwrap();
    assert!(first.proposal_id().is_some());
    assert!(second.proposal_id().is_some());
    assert_ne!(first.proposal_id(), second.proposal_id());
    assert_eq!(db::list_pending_proposals(&conn).unwrap().len(), 2);
}

#[test]
fn lock_acquisition_is_exclusive_within_ttl() {
    let conn = store();
    let since = format_ts(NOW - Duration::minutes(30)).unwrap();
    let run_id = db::acquire_learning_lock(&conn, &since, NOW).unwrap().unwrap();
    assert_eq!(db::get_learning_run(&conn, run_id).unwrap().unwrap().status, RunStatus::Running);
    assert!(db::acquire_learning_lock(&conn, &since, NOW).unwrap().is_none());

    let later = NOW + Duration::minutes(31);
    let later_since = format_ts(later - Duration::minutes(30)).unwrap();
    assert!(db::acquire_learning_lock(&conn, &later_since, later).unwrap().is_some());
}

#[test]
fn unusable_proposal_marks_run_failed() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> { Ok("I cannot help with that".to_string()) };

    let outcome = run_learning(&conn, &config, &oracle, false, NOW).unwrap();
    let LearnOutcome::Failed { run_id, events, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(events, 12);
    let run = db::get_learning_run(&conn, run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.events_processed, 12);
    assert!(db::list_pending_proposals(&conn).unwrap().is_empty());
}

#[test]
fn oracle_errors_fail_the_run_and_propagate() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);
    let oracle = |task: &str, _prompt: &str| -> Result<String> { Err(CurationError::oracle(task, "connection refused")) };

    let err = run_learning(&conn, &config, &oracle, false, NOW).unwrap_err();
    assert!(matches!(err, CurationError::Oracle { .. }));
    let run = db::get_learning_run(&conn, 1).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.events_processed, 0);
}

#[test]
fn bookkeeping_failure_keeps_the_oracle_error() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);
    let oracle = |task: &str, _prompt: &str| -> Result<String> {
        conn.execute_batch("DROP TABLE learning_runs").unwrap();
        Err(CurationError::oracle(task, "connection refused"))
    };

    let err = run_learning(&conn, &config, &oracle, false, NOW).unwrap_err();
    match err {
        CurationError::Oracle { reason, .. } => assert_eq!(reason, "connection refused"),
        other => panic!("expected the oracle error, got {other:?}"),
    }
}

#[test]
fn disabled_learning_never_runs() {
    let conn = store();
    let mut config = config();
    config.profile_update.enabled = false;
    label_many(&conn, 12);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> { Ok(PROPOSAL.to_string()) };

    let outcome = run_learning(&conn, &config, &oracle, true, NOW).unwrap();
    assert!(matches!(outcome, LearnOutcome::Skipped { .. }));
    assert!(db::get_learning_run(&conn, 1).unwrap().is_none());
}

#[test]
fn approved_proposal_becomes_the_serving_profile() {
    let conn = store();
    let config = config();
    label_many(&conn, 12);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> { Ok(PROPOSAL.to_string()) };
    let outcome = run_learning(&conn, &config, &oracle, false, NOW).unwrap();
    let id = outcome.proposal_id().unwrap().to_string();

    proposal::approve(&conn, &id, None, NOW + Duration::hours(1)).unwrap();
    let active = db::get_active_profile(&conn).unwrap().unwrap();
    assert_eq!(active.source, ProfileSource::Approved);
    assert!(active.profile_md.contains("More rust"));
    assert!(matches!(
        proposal::reject(&conn, &id, NOW + Duration::hours(2)),
        Err(CurationError::InvalidState { .. })
    ));
}
