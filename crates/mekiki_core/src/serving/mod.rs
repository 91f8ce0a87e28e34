//! Serving pipeline: filter, preselect, judge, select.

pub mod filter;
pub mod judge;
pub mod preselect;
pub mod select;

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::info;

use crate::cache::JudgementCache;
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::oracle::Oracle;

pub use judge::{JudgeContext, JudgedCandidate, Judge};
pub use select::{PickKind, Selection};

const RECENT_TITLES: usize = 20;
const RECENT_BUCKETS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServingResult {
    pub selected: Vec<Selection>,
    pub total_candidates: usize,
    pub llm_judged: usize,
    pub cached: usize,
    pub skipped: usize,
}

impl ServingResult {
    /// One line per pick, capped at `max_lines`.
    pub fn explain_lines(&self, max_lines: usize) -> Vec<String> {
        let mut lines = vec![format!(
            "candidates={} judged={} cached={} skipped={} selected={}",
            self.total_candidates,
            self.llm_judged,
            self.cached,
            self.skipped,
            self.selected.len()
        )];
        lines.extend(self.selected.iter().enumerate().map(|(i, s)| {
            let tag = if s.pick.is_explore() { " [explore]" } else { "" };
            let fill = if s.portfolio_fill { " [portfolio]" } else { "" };
            format!("{}. {}{tag}{fill}: {}", i + 1, s.candidate.title, s.reason)
        }));
        lines.truncate(max_lines);
        lines
    }
}

pub fn run_serving_pipeline(
    conn: &Connection,
    config: &Config,
    oracle: &dyn Oracle,
    cache: &dyn JudgementCache,
    now: OffsetDateTime,
) -> Result<ServingResult> {
    let policy = &config.serving;
    if !policy.enabled {
        info!("serving disabled");
        return Ok(ServingResult::default());
    }

    let candidates = filter::load_candidates(conn, policy, now)?;
    info!(count = candidates.len(), "stage 0: candidates after filtering");
    if candidates.is_empty() {
        return Ok(ServingResult::default());
    }
    let total_candidates = candidates.len();

    let top = preselect::preselect(candidates, &policy.preselect, policy.filters.recency.max_age_hours, now)?;
    info!(count = top.len(), top_k = policy.preselect.top_k_for_llm, "stage 1: preselected");

    let recent_buckets = db::recent_bucket_counts(conn, RECENT_BUCKETS)?;
    let (judged, llm_judged, cached, skipped) = if policy.llm_judge.enabled {
        let profile = match db::get_active_profile(conn)? {
            Some(version) => version.profile_md,
            None => config.taste_profile_seed.clone(),
        };
        let recent_titles = db::recent_posted_titles(conn, RECENT_TITLES)?;
        let ctx = JudgeContext {
            policy_text: &config.serving_prompt,
            taste_profile: &profile,
            recent_titles: &recent_titles,
            recent_buckets: &recent_buckets,
            language: &config.llm.language,
        };
        let outcome = Judge::new(oracle, cache, &policy.llm_judge).judge_all(top, &ctx, now);
        info!(
            judged = outcome.llm_judged,
            cached = outcome.cached,
            skipped = outcome.skipped,
            "stage 2: judged"
        );
        (outcome.judged, outcome.llm_judged, outcome.cached, outcome.skipped)
    } else {
        (judge::heuristic_judgements(top, now)?, 0, 0, 0)
    };

    let selected = select::select(judged, policy, &recent_buckets);
    info!(count = selected.len(), "stage 3: selected");

    Ok(ServingResult {
        selected,
        total_candidates,
        llm_judged,
        cached,
        skipped,
    })
}
