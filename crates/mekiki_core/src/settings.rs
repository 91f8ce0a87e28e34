//! Runtime overrides kept in the database.
//!
//! The sync pause flag, the default model route and a few learning tunables
//! can change between runs without touching the configuration files. Stored
//! values are applied on top of the loaded [`Config`].

use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{Config, TaskRoute};
use crate::db;
use crate::error::{CurationError, Result};
use crate::oracle::ProviderModels;

const PAUSED: &str = "paused";
const MODEL_PROVIDER: &str = "model.provider";
const MODEL_NAME: &str = "model.name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Language,
    MinNewEventsToRun,
    LookbackDays,
    ManualBoost,
    HalfLifeDays,
    ProposalExpireHours,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::Language,
        SettingKey::MinNewEventsToRun,
        SettingKey::LookbackDays,
        SettingKey::ManualBoost,
        SettingKey::HalfLifeDays,
        SettingKey::ProposalExpireHours,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Language => "language",
            SettingKey::MinNewEventsToRun => "min_new_events_to_run",
            SettingKey::LookbackDays => "lookback_days",
            SettingKey::ManualBoost => "manual_boost",
            SettingKey::HalfLifeDays => "half_life_days",
            SettingKey::ProposalExpireHours => "proposal_expire_hours",
        }
    }

    /// The value `config` currently holds for this key.
    pub fn current(&self, config: &Config) -> String {
        match self {
            SettingKey::Language => config.llm.language.clone(),
            SettingKey::MinNewEventsToRun => config.profile_update.scheduler.min_new_events_to_run.to_string(),
            SettingKey::LookbackDays => config.profile_update.sampling.lookback_days.to_string(),
            SettingKey::ManualBoost => config.learning.scoring.manual_boost.to_string(),
            SettingKey::HalfLifeDays => config.learning.time_decay.half_life_days.to_string(),
            SettingKey::ProposalExpireHours => config.profile_update.proposal.expire_hours.to_string(),
        }
    }

    fn apply(&self, config: &mut Config, value: &str) -> Result<()> {
        match self {
            SettingKey::Language => {
                let value = value.trim();
                if value.is_empty() {
                    return Err(self.invalid("a language code"));
                }
                config.llm.language = value.to_string();
            }
            SettingKey::MinNewEventsToRun => {
                config.profile_update.scheduler.min_new_events_to_run = self.positive_int(value)? as usize;
            }
            SettingKey::LookbackDays => {
                config.profile_update.sampling.lookback_days = self.positive_int(value)? as f64;
            }
            SettingKey::ManualBoost => {
                let boost = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite() && *n >= 0.0)
                    .ok_or_else(|| self.invalid("a non-negative number"))?;
                config.learning.scoring.manual_boost = boost;
            }
            SettingKey::HalfLifeDays => {
                config.learning.time_decay.half_life_days = self.positive_int(value)? as f64;
            }
            SettingKey::ProposalExpireHours => {
                config.profile_update.proposal.expire_hours = self.positive_int(value)? as f64;
            }
        }
        Ok(())
    }

    fn positive_int(&self, value: &str) -> Result<u64> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| self.invalid("a positive integer"))
    }

    fn invalid(&self, expected: &str) -> CurationError {
        CurationError::Validation(format!("{} requires {expected}", self.as_str()))
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = CurationError;

    fn from_str(value: &str) -> Result<Self> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == value)
            .ok_or_else(|| {
                let known = SettingKey::ALL.map(|key| key.as_str()).join(", ");
                CurationError::Validation(format!("unknown setting {value}; expected one of {known}"))
            })
    }
}

pub fn is_paused(conn: &Connection) -> Result<bool> {
    Ok(db::get_setting(conn, PAUSED)?.as_deref() == Some("true"))
}

/// Set the sync pause flag. Returns false when it already had that value.
pub fn set_paused(conn: &Connection, paused: bool, now: OffsetDateTime) -> Result<bool> {
    if is_paused(conn)? == paused {
        return Ok(false);
    }
    db::put_setting(conn, PAUSED, if paused { "true" } else { "false" }, now)?;
    info!(paused, "sync pause flag changed");
    Ok(true)
}

/// Validate `value` against `config` and store it. Returns the value as it
/// will be applied.
pub fn set_value(
    conn: &Connection,
    config: &Config,
    key: SettingKey,
    value: &str,
    now: OffsetDateTime,
) -> Result<String> {
    let mut trial = config.clone();
    key.apply(&mut trial, value)?;
    trial.validate()?;
    let stored = key.current(&trial);
    db::put_setting(conn, key.as_str(), &stored, now)?;
    info!(key = key.as_str(), value = %stored, "setting changed");
    Ok(stored)
}

/// Make `provider`/`model` the default route. Both must appear in `catalog`.
pub fn set_model(
    conn: &Connection,
    catalog: &[ProviderModels],
    provider: &str,
    model: &str,
    now: OffsetDateTime,
) -> Result<()> {
    let Some(entry) = catalog.iter().find(|p| p.key == provider) else {
        let available = catalog.iter().map(|p| p.key.as_str()).collect::<Vec<_>>().join(", ");
        return Err(CurationError::Validation(format!(
            "unknown provider \"{provider}\"; available: {available}"
        )));
    };
    if !entry.offers(model) {
        return Err(CurationError::Validation(format!(
            "unknown model \"{model}\" for provider \"{provider}\"; available: {}",
            entry.models.join(", ")
        )));
    }

    let tx = conn.unchecked_transaction()?;
    db::put_setting(&tx, MODEL_PROVIDER, provider, now)?;
    db::put_setting(&tx, MODEL_NAME, model, now)?;
    tx.commit()?;
    info!(provider, model, "default model changed");
    Ok(())
}

/// Remove every override except the pause flag. Returns how many were removed.
pub fn reset(conn: &Connection) -> Result<usize> {
    let mut removed = 0;
    for key in SettingKey::ALL.map(|key| key.as_str()).into_iter().chain([MODEL_PROVIDER, MODEL_NAME]) {
        if db::delete_setting(conn, key)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Apply stored overrides to `config`. An override the current files no
/// longer accept is logged and left out.
pub fn apply(conn: &Connection, config: &mut Config) -> Result<()> {
    for key in SettingKey::ALL {
        let Some(value) = db::get_setting(conn, key.as_str())? else {
            continue;
        };
        let mut trial = config.clone();
        match key.apply(&mut trial, &value).and_then(|()| trial.validate()) {
            Ok(()) => *config = trial,
            Err(err) => warn!(key = key.as_str(), value = %value, error = %err, "stored setting ignored"),
        }
    }

    let provider = db::get_setting(conn, MODEL_PROVIDER)?;
    let model = db::get_setting(conn, MODEL_NAME)?;
    if let (Some(provider), Some(model)) = (provider, model) {
        if config.llm.providers.contains_key(&provider) {
            config.llm.default_route = TaskRoute { provider, model };
        } else {
            warn!(provider = %provider, "stored default model ignored, provider not configured");
        }
    }
    Ok(())
}
