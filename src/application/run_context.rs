use crate::domain::models::BlockFamily;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static NEXT_RUN: AtomicU64 = AtomicU64::new(1);

pub fn next_run_id() -> String {
    let sequence = NEXT_RUN.fetch_add(1, Ordering::Relaxed);
    format!("run-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FamilyStats {
    pub created: u32,
    pub kept: u32,
    pub deleted: u32,
    pub skipped: u32,
    pub shortened: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub check: FamilyStats,
    pub response: FamilyStats,
    pub days_processed: u32,
    pub days_skipped: u32,
    pub errors: u32,
}

impl RunStats {
    pub fn family(&self, family: BlockFamily) -> &FamilyStats {
        match family {
            BlockFamily::Check => &self.check,
            BlockFamily::Response => &self.response,
        }
    }

    pub fn family_mut(&mut self, family: BlockFamily) -> &mut FamilyStats {
        match family {
            BlockFamily::Check => &mut self.check,
            BlockFamily::Response => &mut self.response,
        }
    }

    /// Creates plus deletes across both families.
    pub fn mutations(&self) -> u32 {
        self.check.created + self.check.deleted + self.response.created + self.response.deleted
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Reconcile,
    Clear,
}

/// Everything one invocation accumulates; passed explicitly instead of living in globals.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub mode: RunMode,
    pub today: NaiveDate,
    pub days: u32,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub stats: RunStats,
}

impl RunContext {
    pub fn new(mode: RunMode, today: NaiveDate, days: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: next_run_id(),
            mode,
            today,
            days,
            dry_run: false,
            started_at,
            stats: RunStats::default(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    pub fn finish(self, finished_at: DateTime<Utc>, aborted: Option<String>) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            mode: self.mode,
            today: self.today,
            days: self.days,
            dry_run: self.dry_run,
            started_at: self.started_at,
            finished_at,
            stats: self.stats,
            aborted,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub today: NaiveDate,
    pub days: u32,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.aborted.is_none()
    }

    pub fn log(&self) {
        let stats = &self.stats;
        info!(
            run_id = %self.run_id,
            mode = ?self.mode,
            dry_run = self.dry_run,
            check_created = stats.check.created,
            check_kept = stats.check.kept,
            check_deleted = stats.check.deleted,
            check_skipped = stats.check.skipped,
            response_created = stats.response.created,
            response_kept = stats.response.kept,
            response_deleted = stats.response.deleted,
            response_skipped = stats.response.skipped,
            response_shortened = stats.response.shortened,
            days_processed = stats.days_processed,
            days_skipped = stats.days_skipped,
            errors = stats.errors,
            aborted = self.aborted.as_deref().unwrap_or(""),
            "run summary"
        );
    }
}
