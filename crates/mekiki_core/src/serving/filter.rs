use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use tracing::debug;

use crate::clock::{days_ago, format_ts, hours_ago, parse_ts};
use crate::config::{Filters, ServingPolicy};
use crate::db;
use crate::error::Result;
use crate::schema::Candidate;

/// Fetch the recency-ordered superset and apply the eligibility filters.
pub fn load_candidates(conn: &Connection, policy: &ServingPolicy, now: OffsetDateTime) -> Result<Vec<Candidate>> {
    let since = format_ts(hours_ago(now, policy.candidates.lookback_hours))?;
    let superset = db::list_candidates_since(
        conn,
        &since,
        policy.candidates.max_candidates,
        policy.filters.exclude_already_posted,
    )?;

    let discarded = if policy.filters.exclude_recently_discarded_days > 0.0 {
        let cutoff = format_ts(days_ago(now, policy.filters.exclude_recently_discarded_days))?;
        db::discarded_since(conn, &cutoff)?
    } else {
        HashSet::new()
    };

    debug!(superset = superset.len(), discarded = discarded.len(), "candidate superset loaded");
    filter_candidates(superset, &policy.filters, &discarded, now)
}

/// Apply discard exclusion, recency and per-source cap, in that order.
/// Input order is preserved.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    filters: &Filters,
    discarded: &HashSet<String>,
    now: OffsetDateTime,
) -> Result<Vec<Candidate>> {
    let mut kept = Vec::with_capacity(candidates.len());
    let recency_cutoff = hours_ago(now, filters.recency.max_age_hours);
    for candidate in candidates {
        if discarded.contains(&candidate.id) {
            continue;
        }
        if filters.recency.enabled && parse_ts(&candidate.created_at)? < recency_cutoff {
            continue;
        }
        kept.push(candidate);
    }

    if filters.per_source_cap.enabled {
        let cap = filters.per_source_cap.max_per_cycle;
        let mut per_source: HashMap<String, usize> = HashMap::new();
        kept.retain(|candidate| {
            let count = per_source.entry(candidate.source_key().to_string()).or_insert(0);
            if *count >= cap {
                return false;
            }
            *count += 1;
            true
        });
    }

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PerSourceCap, RecencyFilter};
    use crate::schema::{CandidatePayload, CandidateState, Origin};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-02-01 12:00:00 UTC);

    fn candidate(id: &str, source: Option<&str>, hours_old: i64) -> Candidate {
        let created = format_ts(NOW - time::Duration::hours(hours_old)).unwrap();
        Candidate {
            id: id.to_string(),
            title: id.to_string(),
            url: None,
            source_type: "url".to_string(),
            source_id: source.map(str::to_string),
            origin: Origin::BotRecommended,
            state: CandidateState::New,
            created_at: created.clone(),
            updated_at: created,
            payload: CandidatePayload::default(),
        }
    }

    fn filters(recency: bool, cap: Option<usize>) -> Filters {
        Filters {
            exclude_already_posted: true,
            exclude_recently_discarded_days: 0.0,
            recency: RecencyFilter {
                enabled: recency,
                max_age_hours: 48.0,
            },
            per_source_cap: PerSourceCap {
                enabled: cap.is_some(),
                max_per_cycle: cap.unwrap_or(0),
            },
        }
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = filter_candidates(Vec::new(), &filters(true, Some(1)), &HashSet::new(), NOW).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn disabled_filters_are_no_ops() {
        let input = vec![candidate("a", Some("s"), 100), candidate("b", Some("s"), 200)];
        let out = filter_candidates(input, &filters(false, None), &HashSet::new(), NOW).unwrap();
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn filters_apply_in_order_and_keep_input_order() {
        let input = vec![
            candidate("a", Some("s1"), 1),
            candidate("b", Some("s1"), 2),
            candidate("c", Some("s1"), 3),
            candidate("d", None, 4),
            candidate("e", Some("s2"), 100),
            candidate("f", None, 5),
        ];
        let discarded: HashSet<String> = ["a".to_string()].into_iter().collect();
        let out = filter_candidates(input, &filters(true, Some(1)), &discarded, NOW).unwrap();
        // "a" discarded, "e" too old, cap keeps the first per source ("unknown" for none).
        assert_eq!(ids(&out), vec!["b", "d"]);
    }
}
