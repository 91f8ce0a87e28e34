//! Portfolio-aware, diversity-aware final pick with explore slots.

use std::collections::{BTreeMap, HashSet};

use crate::config::{Exploration, Portfolio, ServingPolicy};
use crate::schema::{BucketCount, Candidate, Judgement};
use crate::serving::judge::JudgedCandidate;

/// Judged score at or above which a candidate may fill a leftover explore slot.
const FALLBACK_MIN_SCORE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickKind {
    Main,
    UnderrepresentedBucket,
    UncertainScore,
    Fallback,
}

impl PickKind {
    pub fn is_explore(&self) -> bool {
        !matches!(self, PickKind::Main)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidate: Candidate,
    pub judgement: Judgement,
    pub final_score: f64,
    pub pick: PickKind,
    pub portfolio_fill: bool,
    pub reason: String,
}

struct Pool {
    candidate: Candidate,
    judgement: Judgement,
    final_score: f64,
    tokens: HashSet<String>,
}

/// Number of explore slots out of `n`.
pub fn explore_slots(n: usize, exploration: &Exploration) -> usize {
    if !exploration.enabled {
        return 0;
    }
    let mut slots = (n as f64 * exploration.explore_share).round() as usize;
    if n >= 3 && slots == 0 {
        slots = 1;
    }
    slots.min(n)
}

/// Shortfall of each target bucket's recent share. Empty when the portfolio is off.
pub fn bucket_deficits(portfolio: &Portfolio, recent: &[BucketCount]) -> BTreeMap<String, f64> {
    if !portfolio.enabled {
        return BTreeMap::new();
    }
    let total = recent.iter().map(|b| b.count).sum::<usize>().max(1) as f64;
    portfolio
        .target_share
        .iter()
        .map(|(bucket, target)| {
            let recent_share = recent
                .iter()
                .find(|b| &b.bucket == bucket)
                .map(|b| b.count as f64 / total)
                .unwrap_or(0.0);
            (bucket.clone(), (target - recent_share).max(0.0))
        })
        .collect()
}

pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn similarity_text(candidate: &Candidate) -> String {
    format!(
        "{} {} {}",
        candidate.title,
        candidate.payload.one_liner,
        candidate.payload.signals_inline()
    )
}

/// Pick at most `max_posts_per_cycle` candidates: MMR for the main slots,
/// then explore slots by bucket deficit, uncertainty and a score floor.
pub fn select(judged: Vec<JudgedCandidate>, policy: &ServingPolicy, recent: &[BucketCount]) -> Vec<Selection> {
    let n = policy.posting.max_posts_per_cycle;
    if judged.is_empty() || n == 0 {
        return Vec::new();
    }

    let explore = explore_slots(n, &policy.exploration);
    let main_slots = n - explore;
    let deficits = bucket_deficits(&policy.portfolio, recent);
    let deficit_of = |bucket: &str| deficits.get(bucket).copied().unwrap_or(0.0);

    let mut remaining: Vec<Pool> = judged
        .into_iter()
        .map(|j| {
            let final_score = j.judgement.score + policy.portfolio.deficit_boost * deficit_of(&j.judgement.bucket);
            Pool {
                tokens: tokenize(&similarity_text(&j.candidate)),
                candidate: j.candidate,
                judgement: j.judgement,
                final_score,
            }
        })
        .collect();

    let mut selected: Vec<Selection> = Vec::with_capacity(n);
    let mut selected_tokens: Vec<HashSet<String>> = Vec::with_capacity(n);
    let diversity = &policy.diversity;

    while selected.len() < main_slots && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best = f64::NEG_INFINITY;
        for (idx, pool) in remaining.iter().enumerate() {
            let score = if diversity.enabled && !selected_tokens.is_empty() {
                let max_sim = selected_tokens
                    .iter()
                    .map(|tokens| jaccard(tokens, &pool.tokens))
                    .fold(0.0, f64::max);
                diversity.lambda * pool.final_score - (1.0 - diversity.lambda) * max_sim
            } else {
                pool.final_score
            };
            if score > best {
                best = score;
                best_idx = idx;
            }
        }

        let pool = remaining.remove(best_idx);
        let reason = format!(
            "score={:.2} final={:.2} bucket={}",
            pool.judgement.score, pool.final_score, pool.judgement.bucket
        );
        let portfolio_fill = deficit_of(&pool.judgement.bucket) > 0.0;
        selected_tokens.push(pool.tokens.clone());
        selected.push(finish(pool, PickKind::Main, portfolio_fill, reason));
    }

    if explore == 0 || remaining.is_empty() {
        return selected;
    }

    let mut filled = 0;

    // Most deficient bucket first; BTreeMap order breaks ties by name.
    let mut underrepresented: Vec<(&String, f64)> =
        deficits.iter().filter(|(_, d)| **d > 0.0).map(|(b, d)| (b, *d)).collect();
    underrepresented.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (bucket, _) in underrepresented {
        if filled >= explore {
            break;
        }
        if let Some(idx) = remaining.iter().position(|p| &p.judgement.bucket == bucket) {
            let pool = remaining.remove(idx);
            let reason = format!("explore: underrepresented bucket {}", pool.judgement.bucket);
            selected.push(finish(pool, PickKind::UnderrepresentedBucket, false, reason));
            filled += 1;
        }
    }

    if filled < explore {
        let (lo, hi) = policy.exploration.uncertain_score_range;
        let mut uncertain: Vec<usize> = (0..remaining.len())
            .filter(|&i| (lo..=hi).contains(&remaining[i].judgement.score))
            .collect();
        uncertain.sort_by(|&a, &b| remaining[b].final_score.total_cmp(&remaining[a].final_score));
        uncertain.truncate(explore - filled);
        let picks = take_indices(&mut remaining, uncertain);
        for pool in picks {
            let reason = format!("explore: uncertain score {:.2}", pool.judgement.score);
            selected.push(finish(pool, PickKind::UncertainScore, false, reason));
            filled += 1;
        }
    }

    if filled < explore {
        let fallback: Vec<usize> = (0..remaining.len())
            .filter(|&i| remaining[i].judgement.score >= FALLBACK_MIN_SCORE)
            .take(explore - filled)
            .collect();
        for pool in take_indices(&mut remaining, fallback) {
            let reason = format!("explore: fallback pick score={:.2}", pool.judgement.score);
            selected.push(finish(pool, PickKind::Fallback, false, reason));
        }
    }

    selected
}

/// Remove the entries at `indices` from `pool`, returning them in `indices` order.
fn take_indices(pool: &mut Vec<Pool>, indices: Vec<usize>) -> Vec<Pool> {
    let mut slots: Vec<Option<Pool>> = pool.drain(..).map(Some).collect();
    let taken = indices.iter().filter_map(|&i| slots[i].take()).collect();
    pool.extend(slots.into_iter().flatten());
    taken
}

fn finish(pool: Pool, pick: PickKind, portfolio_fill: bool, reason: String) -> Selection {
    Selection {
        candidate: pool.candidate,
        judgement: pool.judgement,
        final_score: pool.final_score,
        pick,
        portfolio_fill,
        reason,
    }
}
