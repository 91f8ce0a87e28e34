use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CurationError, Result};

/// Everything the engine reads from the configuration directory, validated once.
#[derive(Debug, Clone)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub llm: LlmConfig,
    pub serving: ServingPolicy,
    pub learning: LearningConfig,
    pub profile_update: ProfileUpdateConfig,
    pub signals: Vec<String>,
    pub serving_prompt: String,
    pub profile_update_prompt: String,
    pub taste_profile_seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RuntimeConfig {
    pub database_path: PathBuf,
    pub library_dir: PathBuf,
    pub run_on_start: bool,
    pub manual_sync_only: bool,
    pub sync_interval_minutes: u64,
    pub expire_check_interval_minutes: u64,
    /// Label applied automatically to user-seeded items ("keep", "unsure", ...).
    pub auto_label: Option<String>,
    pub max_signals_per_item: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/mekiki.db"),
            library_dir: PathBuf::from("library"),
            run_on_start: false,
            manual_sync_only: false,
            sync_interval_minutes: 60,
            expire_check_interval_minutes: 30,
            auto_label: None,
            max_signals_per_item: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    Openai,
    Anthropic,
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key_env: Option<String>,
    /// Human-readable name for model listings.
    #[serde(default)]
    pub label: Option<String>,
    /// Models that may be chosen as the default route. Ollama providers
    /// also accept whatever the local server reports.
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRoute {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LlmConfig {
    #[serde(default = "default_language")]
    pub language: String,
    pub default_route: TaskRoute,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub task_routing: BTreeMap<String, TaskRoute>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_language() -> String {
    "ja".to_string()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServingPolicy {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub posting: Posting,
    pub candidates: CandidateWindow,
    #[serde(default)]
    pub filters: Filters,
    pub preselect: Preselect,
    pub llm_judge: LlmJudge,
    #[serde(default)]
    pub portfolio: Portfolio,
    #[serde(default)]
    pub diversity: Diversity,
    #[serde(default)]
    pub exploration: Exploration,
    #[serde(default)]
    pub logging: ExplainLogging,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Posting {
    pub max_posts_per_cycle: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateWindow {
    pub lookback_hours: f64,
    pub max_candidates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Filters {
    pub exclude_already_posted: bool,
    /// 0 disables the filter.
    pub exclude_recently_discarded_days: f64,
    pub recency: RecencyFilter,
    pub per_source_cap: PerSourceCap,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            exclude_already_posted: true,
            exclude_recently_discarded_days: 0.0,
            recency: RecencyFilter::default(),
            per_source_cap: PerSourceCap::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RecencyFilter {
    pub enabled: bool,
    pub max_age_hours: f64,
}

impl Default for RecencyFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_hours: 168.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PerSourceCap {
    pub enabled: bool,
    pub max_per_cycle: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Preselect {
    pub top_k_for_llm: usize,
    pub scoring: PreselectWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PreselectWeights {
    pub recency_weight: f64,
    pub signal_weight: f64,
    pub source_diversity_bonus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LlmJudge {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub task_name: String,
    #[serde(default)]
    pub cache: JudgeCache,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct JudgeCache {
    pub enabled: bool,
    pub ttl_days: f64,
}

impl Default for JudgeCache {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_days: 14.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Portfolio {
    pub enabled: bool,
    pub target_share: BTreeMap<String, f64>,
    pub deficit_boost: f64,
}

impl Default for Portfolio {
    fn default() -> Self {
        Self {
            enabled: false,
            target_share: BTreeMap::new(),
            deficit_boost: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Diversity {
    pub enabled: bool,
    pub lambda: f64,
}

impl Default for Diversity {
    fn default() -> Self {
        Self {
            enabled: false,
            lambda: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Exploration {
    pub enabled: bool,
    pub explore_share: f64,
    pub uncertain_score_range: (f64, f64),
}

impl Default for Exploration {
    fn default() -> Self {
        Self {
            enabled: false,
            explore_share: 0.15,
            uncertain_score_range: (0.35, 0.65),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExplainLogging {
    pub explain_in_ops: bool,
    pub explain_max_lines: usize,
}

impl Default for ExplainLogging {
    fn default() -> Self {
        Self {
            explain_in_ops: true,
            explain_max_lines: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LearningConfig {
    pub time_decay: TimeDecay,
    pub fatigue: Fatigue,
    pub scoring: LabelWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TimeDecay {
    pub half_life_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Fatigue {
    pub window_days: f64,
    pub discard_streak_threshold: usize,
    pub penalty_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LabelWeights {
    pub keep_weight: f64,
    pub unsure_weight: f64,
    pub discard_weight: f64,
    #[serde(default = "default_manual_boost")]
    pub manual_boost: f64,
}

fn default_manual_boost() -> f64 {
    1.5
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileUpdateConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub scheduler: LearnScheduler,
    pub sampling: Sampling,
    pub proposal: ProposalSettings,
    pub llm_task: LlmTask,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LearnScheduler {
    pub min_new_events_to_run: usize,
    pub lock_ttl_minutes: f64,
    #[serde(default = "default_learn_interval")]
    pub interval_minutes: u64,
    /// Include "interval" to let the daemon run learning on a timer.
    #[serde(default)]
    pub mode: Vec<String>,
}

fn default_learn_interval() -> u64 {
    360
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Sampling {
    pub lookback_days: f64,
    pub max_events: usize,
    #[serde(default)]
    pub origins: BTreeMap<String, OriginSampling>,
    #[serde(default)]
    pub labels: BTreeMap<String, LabelSampling>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OriginSampling {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LabelSampling {
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProposalSettings {
    pub expire_hours: f64,
    #[serde(default = "default_max_profile_chars")]
    pub max_profile_chars: usize,
}

fn default_max_profile_chars() -> usize {
    6000
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LlmTask {
    pub task_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SignalsFile {
    signals: Vec<String>,
}

impl Config {
    pub fn load_from_dir(path: &Path) -> Result<Self> {
        let runtime: RuntimeConfig = read_toml(&path.join("runtime.toml"))?;
        let llm: LlmConfig = read_toml(&path.join("llm.toml"))?;
        let serving: ServingPolicy = read_yaml(&path.join("serving_policy.yaml"))?;
        let learning: LearningConfig = read_yaml(&path.join("learning.yaml"))?;
        let profile_update: ProfileUpdateConfig = read_yaml(&path.join("profile_update.yaml"))?;
        let signals: SignalsFile = read_yaml(&path.join("signals.yaml"))?;

        let config = Self {
            runtime,
            llm,
            serving,
            learning,
            profile_update,
            signals: signals.signals,
            serving_prompt: read_text(&path.join("serving_prompt.md"))?,
            profile_update_prompt: read_text(&path.join("profile_update_prompt.md"))?,
            taste_profile_seed: read_text(&path.join("taste_profile_seed.md"))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the algorithms cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let serving = &self.serving;

        if serving.preselect.top_k_for_llm == 0 {
            problems.push("preselect.top_k_for_llm must be > 0".to_string());
        }
        if serving.filters.recency.max_age_hours <= 0.0 {
            problems.push("filters.recency.max_age_hours must be > 0".to_string());
        }
        if serving.filters.exclude_recently_discarded_days < 0.0 {
            problems.push("filters.exclude_recently_discarded_days must be >= 0".to_string());
        }
        if serving.filters.per_source_cap.enabled && serving.filters.per_source_cap.max_per_cycle == 0 {
            problems.push("filters.per_source_cap.max_per_cycle must be > 0 when enabled".to_string());
        }
        if serving.llm_judge.cache.ttl_days <= 0.0 {
            problems.push("llm_judge.cache.ttl_days must be > 0".to_string());
        }
        check_unit(&mut problems, "diversity.lambda", serving.diversity.lambda);
        check_unit(&mut problems, "exploration.explore_share", serving.exploration.explore_share);
        let (lo, hi) = serving.exploration.uncertain_score_range;
        check_unit(&mut problems, "exploration.uncertain_score_range[0]", lo);
        check_unit(&mut problems, "exploration.uncertain_score_range[1]", hi);
        if lo > hi {
            problems.push("exploration.uncertain_score_range must be ascending".to_string());
        }
        for (bucket, share) in &serving.portfolio.target_share {
            check_unit(&mut problems, &format!("portfolio.target_share.{bucket}"), *share);
        }

        if self.learning.time_decay.half_life_days <= 0.0 {
            problems.push("time_decay.half_life_days must be > 0".to_string());
        }
        if self.learning.fatigue.window_days < 0.0 {
            problems.push("fatigue.window_days must be >= 0".to_string());
        }

        let update = &self.profile_update;
        if update.scheduler.lock_ttl_minutes <= 0.0 {
            problems.push("scheduler.lock_ttl_minutes must be > 0".to_string());
        }
        if update.proposal.expire_hours <= 0.0 {
            problems.push("proposal.expire_hours must be > 0".to_string());
        }
        if update.sampling.max_events == 0 {
            problems.push("sampling.max_events must be > 0".to_string());
        }

        if !self.llm.providers.contains_key(&self.llm.default_route.provider) {
            problems.push(format!(
                "llm.default_route.provider '{}' is not a configured provider",
                self.llm.default_route.provider
            ));
        }
        for (task, route) in &self.llm.task_routing {
            if !self.llm.providers.contains_key(&route.provider) {
                problems.push(format!("llm.task_routing.{task} uses unknown provider '{}'", route.provider));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CurationError::Config(problems.join("; ")))
        }
    }
}

fn check_unit(problems: &mut Vec<String>, name: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        problems.push(format!("{name} must be within [0, 1], got {value}"));
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| CurationError::Config(format!("{}: {err}", path.display())))
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = read_text(path)?;
    toml::from_str(&raw).map_err(|err| CurationError::Config(format!("{}: {err}", path.display())))
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = read_text(path)?;
    serde_yaml::from_str(&raw).map_err(|err| CurationError::Config(format!("{}: {err}", path.display())))
}
