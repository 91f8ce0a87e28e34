use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::clock::{age_days, days_ago, parse_ts};
use crate::config::{LabelWeights, LearningConfig};
use crate::error::Result;
use crate::schema::{LabelEvent, LabelKind};

impl LabelWeights {
    pub fn for_label(&self, label: LabelKind) -> f64 {
        match label {
            LabelKind::Keep => self.keep_weight,
            LabelKind::Unsure => self.unsure_weight,
            LabelKind::Discard => self.discard_weight,
        }
    }
}

/// Time-decayed, fatigue-aware preference score per signal.
///
/// A pure function of the label events and `now`: events are ordered newest
/// first (candidate id breaks timestamp ties) before accumulation, so the
/// caller's ordering never affects the result.
pub struct TasteScorer<'a> {
    config: &'a LearningConfig,
    now: OffsetDateTime,
}

impl<'a> TasteScorer<'a> {
    pub fn new(config: &'a LearningConfig, now: OffsetDateTime) -> Self {
        Self { config, now }
    }

    pub fn signal_score(&self, events: &[LabelEvent], signal: &str) -> Result<f64> {
        let ordered = order_events(events)?;
        Ok(self.score_ordered(&ordered, signal))
    }

    /// Scores for every configured signal, keyed by signal name.
    pub fn all_scores(&self, events: &[LabelEvent], signals: &[String]) -> Result<BTreeMap<String, f64>> {
        let ordered = order_events(events)?;
        Ok(signals
            .iter()
            .map(|signal| (signal.clone(), self.score_ordered(&ordered, signal)))
            .collect())
    }

    fn score_ordered(&self, ordered: &[(OffsetDateTime, &LabelEvent)], signal: &str) -> f64 {
        let fatigue = &self.config.fatigue;
        let weights = &self.config.scoring;
        let window_start = days_ago(self.now, fatigue.window_days);
        let half_life = self.config.time_decay.half_life_days;

        let mut score = 0.0;
        let mut discard_streak = 0usize;
        for (at, event) in ordered {
            if !event.signals.iter().any(|s| s == signal) {
                continue;
            }

            let decay = 2f64.powf(-age_days(*at, self.now) / half_life);

            // Penalize once the discards scanned before this one already form a streak.
            let fatigued_discard = event.label == LabelKind::Discard && *at >= window_start;
            let penalty = if fatigued_discard && discard_streak >= fatigue.discard_streak_threshold {
                fatigue.penalty_multiplier
            } else {
                1.0
            };
            if fatigued_discard {
                discard_streak += 1;
            } else {
                discard_streak = 0;
            }

            let boost = if event.manual { weights.manual_boost } else { 1.0 };
            score += weights.for_label(event.label) * decay * penalty * boost;
        }
        score
    }
}

fn order_events(events: &[LabelEvent]) -> Result<Vec<(OffsetDateTime, &LabelEvent)>> {
    let mut ordered = events
        .iter()
        .map(|event| Ok((parse_ts(&event.created_at)?, event)))
        .collect::<Result<Vec<_>>>()?;
    ordered.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.candidate_id.cmp(&b.1.candidate_id)));
    Ok(ordered)
}

pub fn clamp_score(value: f64, floor: f64, ceiling: f64) -> f64 {
    value.max(floor).min(ceiling)
}

pub fn round_score(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::format_ts;
    use crate::config::{Fatigue, TimeDecay};
    use crate::schema::Origin;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 00:00:00 UTC);

    fn config() -> LearningConfig {
        LearningConfig {
            time_decay: TimeDecay { half_life_days: 30.0 },
            fatigue: Fatigue {
                window_days: 7.0,
                discard_streak_threshold: 3,
                penalty_multiplier: 0.5,
            },
            scoring: LabelWeights {
                keep_weight: 1.0,
                unsure_weight: 0.3,
                discard_weight: -1.0,
                manual_boost: 1.5,
            },
        }
    }

    fn event(id: &str, label: LabelKind, hours_ago: i64, manual: bool) -> LabelEvent {
        LabelEvent {
            candidate_id: id.to_string(),
            label,
            created_at: format_ts(NOW - time::Duration::hours(hours_ago)).unwrap(),
            title: id.to_string(),
            origin: if manual { Origin::UserSeeded } else { Origin::BotRecommended },
            manual,
            signals: vec!["rust".to_string()],
            one_liner: String::new(),
            source_domain: String::new(),
        }
    }

    #[test]
    fn keep_now_counts_full_weight_and_decays_by_half_life() {
        let config = config();
        let scorer = TasteScorer::new(&config, NOW);
        let fresh = scorer.signal_score(&[event("a", LabelKind::Keep, 0, false)], "rust").unwrap();
        assert!((fresh - 1.0).abs() < 1e-9);

        let old = scorer
            .signal_score(&[event("a", LabelKind::Keep, 30 * 24, false)], "rust")
            .unwrap();
        assert!((old - 0.5).abs() < 1e-9);
    }

    #[test]
    fn manual_items_are_boosted_and_other_signals_ignored() {
        let config = config();
        let scorer = TasteScorer::new(&config, NOW);
        let events = vec![event("a", LabelKind::Keep, 0, true)];
        assert!((scorer.signal_score(&events, "rust").unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(scorer.signal_score(&events, "python").unwrap(), 0.0);
    }

    #[test]
    fn discard_streak_penalizes_fourth_and_fifth() {
        let config = config();
        let scorer = TasteScorer::new(&config, NOW);
        // Zero-age discards so decay is exactly 1.
        let events: Vec<_> = (0..5)
            .map(|i| LabelEvent {
                created_at: format_ts(NOW).unwrap(),
                ..event(&format!("d{i}"), LabelKind::Discard, 0, false)
            })
            .collect();
        let score = scorer.signal_score(&events, "rust").unwrap();
        assert!((score - (-1.0 * 3.0 - 0.5 * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn keep_breaks_the_streak() {
        let config = config();
        let scorer = TasteScorer::new(&config, NOW);
        // Same timestamp everywhere, so the scan order is by candidate id.
        let events: Vec<_> = [
            ("a1", LabelKind::Discard),
            ("a2", LabelKind::Discard),
            ("b", LabelKind::Keep),
            ("c1", LabelKind::Discard),
            ("c2", LabelKind::Discard),
            ("c3", LabelKind::Discard),
        ]
        .into_iter()
        .map(|(id, label)| event(id, label, 0, false))
        .collect();
        let score = scorer.signal_score(&events, "rust").unwrap();
        assert!((score - (-5.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn out_of_window_discards_do_not_fatigue() {
        let config = config();
        let scorer = TasteScorer::new(&config, NOW);
        let events: Vec<_> = (0..5)
            .map(|i| event(&format!("d{i}"), LabelKind::Discard, 24 * 10 + i, false))
            .collect();
        let score = scorer.signal_score(&events, "rust").unwrap();
        let expected: f64 = (0..5)
            .map(|i| -2f64.powf(-((24 * 10 + i) as f64 / 24.0) / 30.0))
            .sum();
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn rounding_matches_two_decimals() {
        assert_eq!(round_score(0.126, 2), 0.13);
        assert_eq!(clamp_score(1.4, 0.0, 1.0), 1.0);
        assert_eq!(clamp_score(-0.2, 0.0, 1.0), 0.0);
    }
}
