use std::collections::HashSet;
use time::OffsetDateTime;

use crate::clock::{age_hours, parse_ts};
use crate::config::Preselect;
use crate::error::Result;
use crate::schema::Candidate;

/// Signal count at which the signal term saturates.
const SIGNAL_SATURATION: f64 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Preselected {
    pub candidate: Candidate,
    pub heuristic: f64,
}

pub fn heuristic_score(
    age_hours: f64,
    signal_count: usize,
    first_of_source: bool,
    settings: &Preselect,
    max_age_hours: f64,
) -> f64 {
    let weights = &settings.scoring;
    let recency = (1.0 - age_hours / max_age_hours).max(0.0);
    let signal = (signal_count as f64 / SIGNAL_SATURATION).min(1.0);
    let bonus = if first_of_source { 1.0 } else { 0.0 };
    weights.recency_weight * recency + weights.signal_weight * signal + weights.source_diversity_bonus * bonus
}

/// Score in arrival order, stable-sort descending, keep the top K.
///
/// The source bonus goes to the first candidate of each source in the
/// incoming order, not in the ranked order.
pub fn preselect(
    candidates: Vec<Candidate>,
    settings: &Preselect,
    max_age_hours: f64,
    now: OffsetDateTime,
) -> Result<Vec<Preselected>> {
    let mut seen_sources = HashSet::new();
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let age = age_hours(parse_ts(&candidate.created_at)?, now);
        let first_of_source = seen_sources.insert(candidate.source_key().to_string());
        let heuristic = heuristic_score(
            age,
            candidate.payload.signals.len(),
            first_of_source,
            settings,
            max_age_hours,
        );
        scored.push(Preselected { candidate, heuristic });
    }

    scored.sort_by(|a, b| b.heuristic.total_cmp(&a.heuristic));
    scored.truncate(settings.top_k_for_llm);
    Ok(scored)
}
