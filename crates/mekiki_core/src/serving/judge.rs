use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::cache::JudgementCache;
use crate::clock::format_ts;
use crate::config::LlmJudge;
use crate::error::Result;
use crate::extract::{parse_object, value_list, value_number, value_text};
use crate::oracle::Oracle;
use crate::schema::{BucketCount, Candidate, Judgement, SubScores};
use crate::scoring::clamp_score;
use crate::serving::preselect::Preselected;
use crate::tasks::language_name;

/// Bucket assigned when judging falls back to the heuristic score.
pub const FALLBACK_BUCKET: &str = "OTHER";

/// Shared context rendered into every judge prompt.
#[derive(Debug, Clone)]
pub struct JudgeContext<'a> {
    pub policy_text: &'a str,
    pub taste_profile: &'a str,
    pub recent_titles: &'a [String],
    pub recent_buckets: &'a [BucketCount],
    pub language: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgedCandidate {
    pub candidate: Candidate,
    pub heuristic: f64,
    pub judgement: Judgement,
}

#[derive(Debug, Default)]
pub struct JudgeOutcome {
    pub judged: Vec<JudgedCandidate>,
    pub llm_judged: usize,
    pub cached: usize,
    pub skipped: usize,
}

/// Only `post_score` and `bucket` are required. Everything else is coerced
/// so a malformed optional field never costs the candidate its judgement.
#[derive(Debug, Deserialize)]
struct JudgeOutput {
    post_score: f64,
    bucket: String,
    #[serde(default)]
    reason: Value,
    #[serde(default)]
    signals: Value,
    #[serde(default)]
    novelty: Value,
    #[serde(default)]
    actionability: Value,
    #[serde(default)]
    trust: Value,
    #[serde(default)]
    time_sensitivity: Value,
}

/// Parse oracle output into a judgement with the score clamped into [0, 1].
pub fn parse_judgement(candidate_id: &str, text: &str, now: OffsetDateTime) -> Result<Judgement> {
    let output: JudgeOutput = parse_object(text)?;
    Ok(Judgement {
        candidate_id: candidate_id.to_string(),
        score: clamp_score(output.post_score, 0.0, 1.0),
        bucket: output.bucket,
        reason: value_text(output.reason),
        signals: value_list(output.signals),
        sub_scores: SubScores {
            novelty: value_number(&output.novelty),
            actionability: value_number(&output.actionability),
            trust: value_number(&output.trust),
            time_sensitivity: value_number(&output.time_sensitivity),
        },
        raw: text.to_string(),
        created_at: format_ts(now)?,
    })
}

pub fn build_prompt(ctx: &JudgeContext<'_>, candidate: &Candidate) -> Result<String> {
    let payload = &candidate.payload;
    let histogram = ctx
        .recent_buckets
        .iter()
        .map(|b| format!("{}: {}", b.bucket, b.count))
        .collect::<Vec<_>>()
        .join(", ");
    let titles = serde_json::to_string(&ctx.recent_titles.iter().take(20).collect::<Vec<_>>())?;
    let signals = serde_json::to_string(&payload.signals)?;

    Ok(format!(
        "{policy}\n\n\
         TASTE_PROFILE_MD:\n{profile}\n\n\
         ITEM:\n\
         - title: {title}\n\
         - url: {url}\n\
         - source_id: {source}\n\
         - published_at: {published}\n\
         - summary: {summary}\n\
         - signals: {signals}\n\n\
         CONTEXT:\n\
         - recent_buckets_histogram: {{{histogram}}}\n\
         - recent_posted_titles: {titles}\n\n\
         IMPORTANT: Write the \"reason\" field in {language}.\n\
         Return ONLY valid JSON.",
        policy = ctx.policy_text,
        profile = ctx.taste_profile,
        title = candidate.title,
        url = candidate.url.as_deref().unwrap_or("(no url)"),
        source = candidate.source_key(),
        published = payload.published_at.as_deref().unwrap_or(&candidate.created_at),
        summary = payload.one_liner,
        language = language_name(ctx.language),
    ))
}

pub struct Judge<'a> {
    oracle: &'a dyn Oracle,
    cache: &'a dyn JudgementCache,
    settings: &'a LlmJudge,
}

impl<'a> Judge<'a> {
    pub fn new(oracle: &'a dyn Oracle, cache: &'a dyn JudgementCache, settings: &'a LlmJudge) -> Self {
        Self {
            oracle,
            cache,
            settings,
        }
    }

    /// Judge candidates in preselector order. A failure on one candidate
    /// marks it skipped and the batch continues.
    pub fn judge_all(&self, top: Vec<Preselected>, ctx: &JudgeContext<'_>, now: OffsetDateTime) -> JudgeOutcome {
        let mut outcome = JudgeOutcome::default();
        for Preselected { candidate, heuristic } in top {
            if let Some(judgement) = self.cached(&candidate.id, now) {
                debug!(candidate = %candidate.id, "judgement cache hit");
                outcome.cached += 1;
                outcome.judged.push(JudgedCandidate {
                    candidate,
                    heuristic,
                    judgement,
                });
                continue;
            }

            match self.judge_one(&candidate, ctx, now) {
                Ok(judgement) => {
                    outcome.llm_judged += 1;
                    outcome.judged.push(JudgedCandidate {
                        candidate,
                        heuristic,
                        judgement,
                    });
                }
                Err(err) => {
                    warn!(candidate = %candidate.id, error = %err, "judge skipped candidate");
                    outcome.skipped += 1;
                }
            }
        }
        outcome
    }

    fn cached(&self, candidate_id: &str, now: OffsetDateTime) -> Option<Judgement> {
        if !self.settings.cache.enabled {
            return None;
        }
        match self.cache.get(candidate_id, now) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(candidate = candidate_id, error = %err, "judgement cache read failed");
                None
            }
        }
    }

    fn judge_one(&self, candidate: &Candidate, ctx: &JudgeContext<'_>, now: OffsetDateTime) -> Result<Judgement> {
        let prompt = build_prompt(ctx, candidate)?;
        let text = self.oracle.run(&self.settings.task_name, &prompt)?;
        let judgement = parse_judgement(&candidate.id, &text, now)?;
        if self.settings.cache.enabled {
            if let Err(err) = self.cache.put(&judgement, self.settings.cache.ttl_days, now) {
                warn!(candidate = %candidate.id, error = %err, "judgement cache write failed");
            }
        }
        Ok(judgement)
    }
}

/// Judge every candidate by its heuristic score when the oracle judge is off.
pub fn heuristic_judgements(top: Vec<Preselected>, now: OffsetDateTime) -> Result<Vec<JudgedCandidate>> {
    let created_at = format_ts(now)?;
    Ok(top
        .into_iter()
        .map(|Preselected { candidate, heuristic }| JudgedCandidate {
            judgement: Judgement {
                candidate_id: candidate.id.clone(),
                score: clamp_score(heuristic, 0.0, 1.0),
                bucket: FALLBACK_BUCKET.to_string(),
                reason: "no-llm-judge".to_string(),
                signals: Vec::new(),
                sub_scores: SubScores::default(),
                raw: String::new(),
                created_at: created_at.clone(),
            },
            candidate,
            heuristic,
        })
        .collect())
}
