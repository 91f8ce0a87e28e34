use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    UserSeeded,
    BotRecommended,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::UserSeeded => "USER_SEEDED",
            Origin::BotRecommended => "BOT_RECOMMENDED",
        }
    }
}

impl FromStr for Origin {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USER_SEEDED" => Ok(Origin::UserSeeded),
            "BOT_RECOMMENDED" => Ok(Origin::BotRecommended),
            other => Err(CurationError::Validation(format!("unknown origin: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateState {
    New,
    Keep,
    Unsure,
    Discard,
}

impl CandidateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateState::New => "NEW",
            CandidateState::Keep => "KEEP",
            CandidateState::Unsure => "UNSURE",
            CandidateState::Discard => "DISCARD",
        }
    }
}

impl FromStr for CandidateState {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NEW" => Ok(CandidateState::New),
            "KEEP" => Ok(CandidateState::Keep),
            "UNSURE" => Ok(CandidateState::Unsure),
            "DISCARD" => Ok(CandidateState::Discard),
            other => Err(CurationError::Validation(format!("unknown state: {other}"))),
        }
    }
}

/// Structured payload captured at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CandidatePayload {
    #[serde(default)]
    pub one_liner: String,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub source_domain: String,
    pub published_at: Option<String>,
    pub content: Option<String>,
    /// How a user-seeded item arrived ("slash_command", "inbox_manual", "cli").
    pub ingest_channel: Option<String>,
}

impl CandidatePayload {
    pub fn signals_inline(&self) -> String {
        self.signals.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub source_type: String, // "url" or "text"
    pub source_id: Option<String>,
    pub origin: Origin,
    pub state: CandidateState,
    pub created_at: String, // UTC, YYYY-MM-DDTHH:MM:SSZ
    pub updated_at: String,
    pub payload: CandidatePayload,
}

impl Candidate {
    pub fn source_key(&self) -> &str {
        self.source_id.as_deref().unwrap_or("unknown")
    }

    /// True when a human explicitly supplied this item.
    pub fn is_manual(&self) -> bool {
        self.origin == Origin::UserSeeded || self.source_id.as_deref() == Some("manual")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LabelKind {
    Keep,
    Unsure,
    Discard,
}

impl LabelKind {
    pub fn state(&self) -> CandidateState {
        match self {
            LabelKind::Keep => CandidateState::Keep,
            LabelKind::Unsure => CandidateState::Unsure,
            LabelKind::Discard => CandidateState::Discard,
        }
    }

    /// Upper-case key used by sampling configuration ("KEEP", ...).
    pub fn key(&self) -> &'static str {
        self.state().as_str()
    }
}

impl FromStr for LabelKind {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "keep" => Ok(LabelKind::Keep),
            "unsure" => Ok(LabelKind::Unsure),
            "discard" => Ok(LabelKind::Discard),
            other => Err(CurationError::Validation(format!("unknown label: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ActionKind {
    Label(LabelKind),
    Note,
    Open,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Label(LabelKind::Keep) => "label.keep",
            ActionKind::Label(LabelKind::Unsure) => "label.unsure",
            ActionKind::Label(LabelKind::Discard) => "label.discard",
            ActionKind::Note => "note",
            ActionKind::Open => "open",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "label.keep" => Ok(ActionKind::Label(LabelKind::Keep)),
            "label.unsure" => Ok(ActionKind::Label(LabelKind::Unsure)),
            "label.discard" => Ok(ActionKind::Label(LabelKind::Discard)),
            "note" => Ok(ActionKind::Note),
            "open" => Ok(ActionKind::Open),
            other => Err(CurationError::Validation(format!("unknown action: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    pub id: i64,
    pub candidate_id: String,
    pub kind: ActionKind,
    pub actor: String,
    pub created_at: String,
    pub metadata: Option<serde_json::Value>,
}

/// A label action joined with the candidate fields the scorer and learner need.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEvent {
    pub candidate_id: String,
    pub label: LabelKind,
    pub created_at: String,
    pub title: String,
    pub origin: Origin,
    pub manual: bool,
    pub signals: Vec<String>,
    pub one_liner: String,
    pub source_domain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubScores {
    pub novelty: Option<f64>,
    pub actionability: Option<f64>,
    pub trust: Option<f64>,
    pub time_sensitivity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Judgement {
    pub candidate_id: String,
    pub score: f64,
    pub bucket: String,
    pub reason: String,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub sub_scores: SubScores,
    pub raw: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Seed,
    Approved,
    Edited,
}

impl ProfileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileSource::Seed => "seed",
            ProfileSource::Approved => "approved",
            ProfileSource::Edited => "edited",
        }
    }
}

impl FromStr for ProfileSource {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "seed" => Ok(ProfileSource::Seed),
            "approved" => Ok(ProfileSource::Approved),
            "edited" => Ok(ProfileSource::Edited),
            other => Err(CurationError::Validation(format!("unknown profile source: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TasteProfileVersion {
    pub id: i64,
    pub profile_md: String,
    pub source: ProfileSource,
    pub proposal_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "expired" => Ok(ProposalStatus::Expired),
            other => Err(CurationError::Validation(format!("unknown proposal status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Proposal {
    pub id: String,
    pub status: ProposalStatus,
    pub new_profile_md: String,
    pub diff_summary: Vec<String>,
    pub risks: Vec<String>,
    pub confidence: f64,
    pub notes: Option<String>,
    pub stats_used: Option<serde_json::Value>,
    pub message_ref: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(CurationError::Validation(format!("unknown run status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LearningRun {
    pub id: i64,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub events_processed: i64,
    pub proposal_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Post {
    pub candidate_id: String,
    pub title: String,
    pub bucket: String,
    pub posted_at: String,
}

/// Bucket label and how often it appeared among recent posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BucketCount {
    pub bucket: String,
    pub count: usize,
}
