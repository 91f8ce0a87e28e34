mod common;

use std::cell::Cell;

use common::{config, judge_answer, store, CandidateSpec, NOW};
use mekiki_core::actions;
use mekiki_core::cache::{MemoryJudgementCache, SqliteJudgementCache};
use mekiki_core::schema::LabelKind;
use mekiki_core::serving::{run_serving_pipeline, PickKind};
use mekiki_core::{CurationError, Result};
use time::Duration;

const JUDGED: &[(&str, f64, &str)] = &[
    ("Alpha strong", 0.9, "A"),
    ("Alpha weak", 0.2, "A"),
    ("Beta one", 0.5, "B"),
    ("Beta two", 0.5, "B"),
    ("Beta three", 0.5, "B"),
];

#[test]
fn deficit_boost_favours_the_underrepresented_bucket() {
    let conn = store();
    let mut config = config();
    let policy = &mut config.serving;
    policy.preselect.top_k_for_llm = 5;
    policy.posting.max_posts_per_cycle = 3;
    policy.diversity.enabled = false;
    policy.portfolio.target_share = [("A".to_string(), 0.2), ("B".to_string(), 0.5)].into_iter().collect();

    for (i, (title, _, _)) in JUDGED.iter().enumerate() {
        let id = format!("fresh-{i}");
        CandidateSpec::new(&id, title)
            .signals(&["rust", "databases", "llm", "security"])
            .insert(&conn);
    }
    for i in 0..5 {
        let id = format!("old-{i}");
        let title = format!("Background {i}");
        CandidateSpec::new(&id, &title).age_hours(60).insert(&conn);
    }

    let oracle = |_task: &str, prompt: &str| -> Result<String> { Ok(judge_answer(prompt, JUDGED)) };
    let cache = MemoryJudgementCache::new();
    let result = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW).unwrap();

    assert_eq!(result.total_candidates, 10);
    assert_eq!(result.llm_judged, 5);
    assert_eq!(result.selected.len(), 3);
    let titles: Vec<&str> = result.selected.iter().map(|s| s.candidate.title.as_str()).collect();
    assert_eq!(titles.iter().filter(|t| t.starts_with("Beta")).count(), 2);
    assert!(titles.contains(&"Alpha strong"));
    assert!(!titles.contains(&"Alpha weak"));
    assert!(titles.iter().all(|t| !t.starts_with("Background")));
    assert!((result.selected[0].final_score - 0.97).abs() < 1e-9);
}

#[test]
fn empty_store_serves_nothing() {
    let conn = store();
    let config = config();
    let calls = Cell::new(0);
    let oracle = |_task: &str, _prompt: &str| -> Result<String> {
        calls.set(calls.get() + 1);
        Ok(String::new())
    };
    let cache = MemoryJudgementCache::new();

    let result = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW).unwrap();
    assert!(result.selected.is_empty());
    assert_eq!(result.total_candidates, 0);
    assert_eq!(result.llm_judged, 0);
    assert_eq!(calls.get(), 0);
}

#[test]
fn cached_judgements_are_reused_until_they_expire() {
    let conn = store();
    let mut config = config();
    config.serving.llm_judge.cache.ttl_days = 1.0 / 48.0;
    CandidateSpec::new("c1", "Alpha strong").insert(&conn);
    CandidateSpec::new("c2", "Beta one").insert(&conn);

    let calls = Cell::new(0);
    let oracle = |_task: &str, prompt: &str| -> Result<String> {
        calls.set(calls.get() + 1);
        Ok(judge_answer(prompt, JUDGED))
    };
    let cache = SqliteJudgementCache::new(&conn);

    let first = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW).unwrap();
    assert_eq!((first.llm_judged, first.cached), (2, 0));

    let second = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW + Duration::minutes(10)).unwrap();
    assert_eq!((second.llm_judged, second.cached), (0, 2));
    assert_eq!(calls.get(), 2);

    let third = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW + Duration::hours(2)).unwrap();
    assert_eq!((third.llm_judged, third.cached), (2, 0));
    assert_eq!(calls.get(), 4);
}

#[test]
fn failing_judgements_are_skipped_not_fatal() {
    let conn = store();
    let config = config();
    CandidateSpec::new("c1", "Alpha strong").insert(&conn);
    CandidateSpec::new("c2", "Broken item").insert(&conn);

    let oracle = |_task: &str, prompt: &str| -> Result<String> {
        if prompt.contains("- title: Broken item") {
            return Err(CurationError::oracle("serving_judge", "timeout"));
        }
        Ok(judge_answer(prompt, JUDGED))
    };
    let cache = MemoryJudgementCache::new();
    let result = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW).unwrap();

    assert_eq!(result.skipped, 1);
    assert_eq!(result.llm_judged, 1);
    assert_eq!(result.selected.len(), 1);
    assert_eq!(result.selected[0].candidate.id, "c1");
    assert_eq!(cache.len(), 1);
}

#[test]
fn discarded_and_stale_candidates_are_filtered_out() {
    let conn = store();
    let config = config();
    CandidateSpec::new("keep-me", "Alpha strong").insert(&conn);
    CandidateSpec::new("tossed", "Beta one").insert(&conn);
    CandidateSpec::new("ancient", "Beta two").age_hours(100).insert(&conn);
    actions::label(&conn, "tossed", LabelKind::Discard, "alice", None, NOW).unwrap();

    let oracle = |_task: &str, prompt: &str| -> Result<String> { Ok(judge_answer(prompt, JUDGED)) };
    let cache = MemoryJudgementCache::new();
    let result = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW).unwrap();

    assert_eq!(result.total_candidates, 1);
    assert_eq!(result.selected[0].candidate.id, "keep-me");
    assert_eq!(result.selected[0].pick, PickKind::Main);
}

#[test]
fn disabled_judge_falls_back_to_heuristic_scores() {
    let conn = store();
    let mut config = config();
    config.serving.llm_judge.enabled = false;
    CandidateSpec::new("c1", "Alpha strong").signals(&["rust"]).insert(&conn);

    let oracle = |_task: &str, _prompt: &str| -> Result<String> {
        Err(CurationError::oracle("serving_judge", "should not be called"))
    };
    let cache = MemoryJudgementCache::new();
    let result = run_serving_pipeline(&conn, &config, &oracle, &cache, NOW).unwrap();

    assert_eq!(result.llm_judged, 0);
    assert_eq!(result.selected.len(), 1);
    assert_eq!(result.selected[0].judgement.bucket, "OTHER");
    assert_eq!(result.selected[0].judgement.reason, "no-llm-judge");
}
