//! Batch learner: turn recent label events into a taste-profile proposal.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{days_ago, format_ts, hours_ago};
use crate::config::{Config, Sampling};
use crate::db;
use crate::error::{CurationError, Result};
use crate::extract::{parse_object, value_number, value_text};
use crate::oracle::Oracle;
use crate::schema::{LabelEvent, LabelKind, Origin, ProfileSource, Proposal, ProposalStatus, RunStatus};
use crate::scoring::{round_score, TasteScorer};

const PROMPT_EVENTS: usize = 50;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const TOP_SIGNALS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum LearnOutcome {
    /// Nothing ran: disabled, too few events, or another run holds the lock.
    Skipped { reason: String },
    Completed {
        run_id: i64,
        events: usize,
        proposal_id: Option<String>,
    },
    /// The oracle answered but the proposal was unusable.
    Failed { run_id: i64, events: usize, reason: String },
}

impl LearnOutcome {
    pub fn proposal_id(&self) -> Option<&str> {
        match self {
            LearnOutcome::Completed { proposal_id, .. } => proposal_id.as_deref(),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LearnOutcome::Skipped { reason } => reason.clone(),
            LearnOutcome::Completed {
                proposal_id: Some(id),
                events,
                ..
            } => format!("Proposal {id} created from {events} events."),
            LearnOutcome::Completed { proposal_id: None, .. } => "No events to learn from.".to_string(),
            LearnOutcome::Failed { reason, .. } => reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledEvent {
    pub event: LabelEvent,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStats {
    pub total_events: usize,
    pub keep_count: usize,
    pub unsure_count: usize,
    pub discard_count: usize,
    pub user_seeded_count: usize,
    pub bot_recommended_count: usize,
    pub top_keep_signals: Vec<(String, f64)>,
    pub top_discard_signals: Vec<(String, f64)>,
    pub signal_scores: BTreeMap<String, f64>,
}

/// Label events in the lookback window, weighted by label and origin.
pub fn sample_events(conn: &Connection, sampling: &Sampling, now: OffsetDateTime) -> Result<Vec<SampledEvent>> {
    let since = format_ts(days_ago(now, sampling.lookback_days))?;
    let events = db::list_label_events(conn, Some(&since), Some(sampling.max_events))?;
    Ok(weigh_events(events, sampling))
}

pub fn weigh_events(events: Vec<LabelEvent>, sampling: &Sampling) -> Vec<SampledEvent> {
    events
        .into_iter()
        .filter_map(|event| {
            let origin = sampling.origins.get(event.origin.as_str());
            if origin.is_some_and(|o| !o.enabled) {
                return None;
            }
            let origin_weight = origin.map(|o| o.weight).unwrap_or(1.0);
            let label_weight = sampling.labels.get(event.label.key()).map(|l| l.weight).unwrap_or(0.0);
            Some(SampledEvent {
                weight: label_weight.abs() * origin_weight,
                event,
            })
        })
        .collect()
}

pub fn compute_stats(sampled: &[SampledEvent], signal_scores: BTreeMap<String, f64>) -> LearningStats {
    let count_label = |label: LabelKind| sampled.iter().filter(|s| s.event.label == label).count();
    let count_origin = |origin: Origin| sampled.iter().filter(|s| s.event.origin == origin).count();

    LearningStats {
        total_events: sampled.len(),
        keep_count: count_label(LabelKind::Keep),
        unsure_count: count_label(LabelKind::Unsure),
        discard_count: count_label(LabelKind::Discard),
        user_seeded_count: count_origin(Origin::UserSeeded),
        bot_recommended_count: count_origin(Origin::BotRecommended),
        top_keep_signals: top_signals(sampled, LabelKind::Keep),
        top_discard_signals: top_signals(sampled, LabelKind::Discard),
        signal_scores: signal_scores
            .into_iter()
            .map(|(signal, score)| (signal, round_score(score, 2)))
            .collect(),
    }
}

fn top_signals(sampled: &[SampledEvent], label: LabelKind) -> Vec<(String, f64)> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for sample in sampled.iter().filter(|s| s.event.label == label) {
        for signal in &sample.event.signals {
            *totals.entry(signal.as_str()).or_insert(0.0) += sample.weight;
        }
    }
    let mut ranked: Vec<(String, f64)> = totals.into_iter().map(|(s, w)| (s.to_string(), w)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(TOP_SIGNALS);
    ranked
}

pub fn build_prompt(
    template: &str,
    language: &str,
    current_profile: &str,
    sampled: &[SampledEvent],
    stats: &LearningStats,
) -> Result<String> {
    let mut by_weight: Vec<&SampledEvent> = sampled.iter().collect();
    by_weight.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    by_weight.truncate(PROMPT_EVENTS);

    let events_text = by_weight
        .iter()
        .map(|s| {
            format!(
                "- [{}] (origin:{}, weight:{:.1}) \"{}\" signals:[{}] {}",
                s.event.label.key(),
                s.event.origin.as_str(),
                s.weight,
                s.event.title,
                s.event.signals.join(","),
                s.event.one_liner
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let stats_text = serde_json::to_string_pretty(stats)?;

    Ok(format!(
        "{template}\n\n\
         IMPORTANT: Write ALL text content (new_profile_md, diff_summary, risks, notes) in {language}.\n\n\
         ---\n\n\
         ## CURRENT_PROFILE_MD\n{current_profile}\n\n\
         ## RECENT_EVENTS ({total} total, showing top {shown} by weight)\n{events_text}\n\n\
         ## STATS\n{stats_text}\n\n\
         ---\n\n\
         Output a JSON object with these exact keys:\n\
         - new_profile_md: the updated taste profile in markdown (same structure as current)\n\
         - diff_summary: array of strings describing what changed (max 12 lines)\n\
         - risks: array of strings noting risks/concerns (max 5)\n\
         - confidence: number 0-1 indicating confidence in the update\n\
         - notes: optional string with any additional notes\n\n\
         Return ONLY valid JSON. No explanation outside JSON.",
        total = sampled.len(),
        shown = by_weight.len(),
    ))
}

#[derive(Debug, Deserialize)]
struct ProposalOutput {
    #[serde(default)]
    new_profile_md: String,
    diff_summary: Vec<Value>,
    #[serde(default)]
    risks: Value,
    #[serde(default)]
    confidence: Value,
    #[serde(default)]
    notes: Value,
}

/// Oracle-proposed profile revision before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalDraft {
    pub new_profile_md: String,
    pub diff_summary: Vec<String>,
    pub risks: Vec<String>,
    pub confidence: f64,
    pub notes: Option<String>,
}

pub fn parse_proposal(text: &str) -> Result<ProposalDraft> {
    let output: ProposalOutput = parse_object(text)?;
    if output.new_profile_md.trim().is_empty() {
        return Err(CurationError::Validation("new_profile_md is empty".to_string()));
    }
    let risks = match output.risks {
        Value::Array(items) => items.into_iter().map(value_text).collect(),
        _ => Vec::new(),
    };
    let notes = match output.notes {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(value_text(other)),
    };
    Ok(ProposalDraft {
        new_profile_md: output.new_profile_md,
        diff_summary: output.diff_summary.into_iter().map(value_text).collect(),
        risks,
        confidence: value_number(&output.confidence).unwrap_or(DEFAULT_CONFIDENCE),
        notes,
    })
}

pub fn new_proposal_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("prop-{}", &hex[..8])
}

/// Run one learning batch. `force` bypasses the minimum-event gate but not the lock.
pub fn run_learning(
    conn: &Connection,
    config: &Config,
    oracle: &dyn Oracle,
    force: bool,
    now: OffsetDateTime,
) -> Result<LearnOutcome> {
    let update = &config.profile_update;
    if !update.enabled {
        return Ok(LearnOutcome::Skipped {
            reason: "Learning is disabled in config.".to_string(),
        });
    }

    let lookback = format_ts(days_ago(now, update.sampling.lookback_days))?;
    let new_events = db::count_label_events_since(conn, &lookback)?;
    let minimum = update.scheduler.min_new_events_to_run;
    if !force && new_events < minimum {
        return Ok(LearnOutcome::Skipped {
            reason: format!("Not enough events ({new_events} < {minimum})."),
        });
    }

    let lock_since = format_ts(hours_ago(now, update.scheduler.lock_ttl_minutes / 60.0))?;
    let Some(run_id) = db::acquire_learning_lock(conn, &lock_since, now)? else {
        return Ok(LearnOutcome::Skipped {
            reason: "Another learning run is in progress.".to_string(),
        });
    };
    info!(run_id, new_events, force, "learning run started");

    match learn_locked(conn, config, oracle, run_id, now) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(run_id, error = %err, "learning run failed");
            if let Err(finish_err) = db::finish_learning_run(conn, run_id, RunStatus::Failed, 0, None, now) {
                warn!(run_id, error = %finish_err, "could not mark learning run failed");
            }
            Err(err)
        }
    }
}

fn learn_locked(
    conn: &Connection,
    config: &Config,
    oracle: &dyn Oracle,
    run_id: i64,
    now: OffsetDateTime,
) -> Result<LearnOutcome> {
    let update = &config.profile_update;
    let sampled = sample_events(conn, &update.sampling, now)?;
    info!(run_id, sampled = sampled.len(), "events sampled");
    if sampled.is_empty() {
        db::finish_learning_run(conn, run_id, RunStatus::Completed, 0, None, now)?;
        return Ok(LearnOutcome::Completed {
            run_id,
            events: 0,
            proposal_id: None,
        });
    }

    let all_events = db::list_label_events(conn, None, None)?;
    let scores = TasteScorer::new(&config.learning, now).all_scores(&all_events, &config.signals)?;
    let stats = compute_stats(&sampled, scores);

    let current_profile = match db::get_active_profile(conn)? {
        Some(version) => version.profile_md,
        None => {
            info!("no active profile, seeding");
            db::insert_profile_version(conn, &config.taste_profile_seed, ProfileSource::Seed, None, now)?;
            config.taste_profile_seed.clone()
        }
    };

    let prompt = build_prompt(
        &config.profile_update_prompt,
        &config.llm.language,
        &current_profile,
        &sampled,
        &stats,
    )?;
    let response = oracle.run(&update.llm_task.task_name, &prompt)?;

    let draft = match parse_proposal(&response) {
        Ok(draft) => draft,
        Err(err) => {
            warn!(run_id, error = %err, "invalid proposal from oracle");
            db::finish_learning_run(conn, run_id, RunStatus::Failed, sampled.len(), None, now)?;
            return Ok(LearnOutcome::Failed {
                run_id,
                events: sampled.len(),
                reason: "Oracle returned an invalid proposal.".to_string(),
            });
        }
    };

    let proposal = Proposal {
        id: new_proposal_id(),
        status: ProposalStatus::Pending,
        new_profile_md: draft.new_profile_md.chars().take(update.proposal.max_profile_chars).collect(),
        diff_summary: draft.diff_summary,
        risks: draft.risks,
        confidence: draft.confidence,
        notes: draft.notes,
        stats_used: Some(serde_json::to_value(&stats)?),
        message_ref: None,
        created_at: format_ts(now)?,
        resolved_at: None,
    };
    db::insert_proposal(conn, &proposal)?;
    db::finish_learning_run(conn, run_id, RunStatus::Completed, sampled.len(), Some(&proposal.id), now)?;
    info!(run_id, proposal = %proposal.id, confidence = proposal.confidence, "proposal created");

    Ok(LearnOutcome::Completed {
        run_id,
        events: sampled.len(),
        proposal_id: Some(proposal.id),
    })
}
