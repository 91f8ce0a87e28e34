//! Sync, learn and expiry jobs, plus the daemon loop that times them.

use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::cache::SqliteJudgementCache;
use crate::clock::now_utc;
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::ingest::{ingest_feed_entry, FeedEntry, IngestOutcome};
use crate::learning::{run_learning, LearnOutcome};
use crate::oracle::Oracle;
use crate::proposal;
use crate::serving::{run_serving_pipeline, ServingResult};
use crate::settings;

/// Holds a job flag for the lifetime of one run.
struct RunToken<'a>(&'a AtomicBool);

impl<'a> RunToken<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken(flag))
    }
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub ingested: usize,
    pub serving: ServingResult,
}

impl SyncReport {
    pub fn posted(&self) -> usize {
        self.serving.selected.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnceReport {
    pub expired: Vec<String>,
    pub sync: Option<SyncReport>,
    pub learn: LearnOutcome,
}

pub struct Scheduler<'a> {
    conn: &'a Connection,
    config: &'a Config,
    oracle: &'a dyn Oracle,
    sync_running: AtomicBool,
    learn_running: AtomicBool,
}

impl<'a> Scheduler<'a> {
    pub fn new(conn: &'a Connection, config: &'a Config, oracle: &'a dyn Oracle) -> Self {
        Self {
            conn,
            config,
            oracle,
            sync_running: AtomicBool::new(false),
            learn_running: AtomicBool::new(false),
        }
    }

    pub fn is_sync_running(&self) -> bool {
        self.sync_running.load(Ordering::Acquire)
    }

    /// Paused syncs are skipped until resumed. The flag is stored, so it
    /// reaches a daemon running in another process.
    pub fn is_paused(&self) -> Result<bool> {
        settings::is_paused(self.conn)
    }

    /// Ingest `entries`, run the serving pipeline and record what was posted.
    /// Returns `None` when syncing is paused or a sync is already in progress.
    pub fn sync(&self, entries: &[FeedEntry], now: OffsetDateTime) -> Result<Option<SyncReport>> {
        if self.is_paused()? {
            info!("sync skipped, paused");
            return Ok(None);
        }
        let Some(_token) = RunToken::acquire(&self.sync_running) else {
            info!("sync skipped, already running");
            return Ok(None);
        };

        let mut ingested = 0;
        for entry in entries {
            match ingest_feed_entry(self.conn, self.config, self.oracle, entry, now) {
                Ok(IngestOutcome::Created(_)) => ingested += 1,
                Ok(IngestOutcome::Duplicate { .. }) => {}
                Err(err) => warn!(url = %entry.url, error = %err, "feed entry not ingested"),
            }
        }
        info!(ingested, "feed entries ingested");

        let cache = SqliteJudgementCache::new(self.conn);
        let serving = run_serving_pipeline(self.conn, self.config, self.oracle, &cache, now)?;
        for pick in &serving.selected {
            db::record_post(self.conn, &pick.candidate.id, &pick.candidate.title, &pick.judgement.bucket, now)?;
        }

        let logging = &self.config.serving.logging;
        if logging.explain_in_ops {
            for line in serving.explain_lines(logging.explain_max_lines) {
                info!(target: "mekiki::explain", "{line}");
            }
        }
        Ok(Some(SyncReport { ingested, serving }))
    }

    pub fn learn(&self, force: bool, now: OffsetDateTime) -> Result<LearnOutcome> {
        let Some(_token) = RunToken::acquire(&self.learn_running) else {
            return Ok(LearnOutcome::Skipped {
                reason: "Learning is already running in this process.".to_string(),
            });
        };
        let outcome = run_learning(self.conn, self.config, self.oracle, force, now)?;
        info!(result = %outcome.describe(), "learning finished");
        Ok(outcome)
    }

    pub fn expire(&self, now: OffsetDateTime) -> Result<Vec<String>> {
        proposal::expire_pending(self.conn, self.config.profile_update.proposal.expire_hours, now)
    }

    /// Expire, then sync, then learn.
    pub fn run_once(&self, entries: &[FeedEntry], now: OffsetDateTime) -> Result<OnceReport> {
        let expired = self.expire(now)?;
        info!(expired = expired.len(), "expire check done");
        let sync = self.sync(entries, now)?;
        let learn = self.learn(false, now)?;
        Ok(OnceReport { expired, sync, learn })
    }

    /// Run jobs on their intervals until `shutdown` is set. Job errors are
    /// logged and the loop keeps going.
    pub fn daemon(&self, fetch: &dyn Fn() -> Result<Vec<FeedEntry>>, shutdown: &AtomicBool) {
        let runtime = &self.config.runtime;
        let sync_every = (!runtime.manual_sync_only && self.config.serving.enabled)
            .then(|| minutes(runtime.sync_interval_minutes));
        let learn_every = self
            .config
            .profile_update
            .scheduler
            .mode
            .iter()
            .any(|mode| mode == "interval")
            .then(|| minutes(self.config.profile_update.scheduler.interval_minutes));
        let expire_every = minutes(runtime.expire_check_interval_minutes);

        info!(
            sync = ?sync_every,
            learn = ?learn_every,
            expire = ?expire_every,
            run_on_start = runtime.run_on_start,
            "scheduler started"
        );

        let start = Instant::now();
        let mut next_expire = start;
        let (mut next_sync, mut next_learn) = if runtime.run_on_start {
            (sync_every.map(|_| start), learn_every.map(|_| start))
        } else {
            (sync_every.map(|d| start + d), learn_every.map(|d| start + d))
        };

        while !shutdown.load(Ordering::Acquire) {
            let tick = Instant::now();
            if tick >= next_expire {
                if let Err(err) = self.expire(now_utc()) {
                    error!(error = %err, "expire check failed");
                }
                next_expire = tick + expire_every;
            }
            if let (Some(due), Some(every)) = (next_sync, sync_every) {
                if tick >= due {
                    let result = self.is_paused().and_then(|paused| {
                        if paused {
                            return Ok(None);
                        }
                        fetch().and_then(|entries| self.sync(&entries, now_utc()))
                    });
                    match result {
                        Ok(Some(report)) => info!(posted = report.posted(), "scheduled sync complete"),
                        Ok(None) => {}
                        Err(err) => error!(error = %err, "scheduled sync failed"),
                    }
                    next_sync = Some(tick + every);
                }
            }
            if let (Some(due), Some(every)) = (next_learn, learn_every) {
                if tick >= due {
                    if let Err(err) = self.learn(false, now_utc()) {
                        error!(error = %err, "scheduled learning failed");
                    }
                    next_learn = Some(tick + every);
                }
            }
            std::thread::sleep(Duration::from_millis(500));
        }
        info!("scheduler stopped");
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.max(1) * 60)
}
