//! Expired row sweeper.
//!
//! Each pass lists every row of the table and deletes the rows whose
//! `expire` timestamp is strictly earlier than the pass's start time.
//! Rows without `expire` never expire. A failed delete is logged and the
//! pass moves on to the next row.
//!
//! Passes never overlap: a pass requested while another is in flight is
//! skipped.

use crate::models::TableRow;
use crate::table::{TableError, TableStore};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Parse an expiry timestamp.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]` and plain dates;
/// naive forms are read as UTC.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Expiry state of a single row at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowExpiry {
    /// No `expire` field
    Never,
    /// `expire` present but not a timestamp string
    Unparseable,
    /// Expires at or after `now`
    Live,
    /// Expired strictly before `now`
    Expired,
}

/// Classify `row` against `now`
pub fn classify(row: &TableRow, now: DateTime<Utc>) -> RowExpiry {
    match &row.expire {
        None => RowExpiry::Never,
        Some(Value::String(raw)) => match parse_expiry(raw) {
            None => RowExpiry::Unparseable,
            Some(at) if at < now => RowExpiry::Expired,
            Some(_) => RowExpiry::Live,
        },
        Some(_) => RowExpiry::Unparseable,
    }
}

/// Counters for one completed pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub deleted: usize,
    /// Expired rows already gone when the delete ran
    pub already_removed: usize,
    pub failed: usize,
    pub never_expire: usize,
    pub unparseable: usize,
}

/// Result of a sweep request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another pass was already running
    Skipped,
}

/// Releases the in-flight flag when the pass ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic expired-row sweeper
pub struct Sweeper {
    table: Arc<dyn TableStore>,
    /// Time between passes
    interval: Duration,
    in_flight: AtomicBool,
}

impl Sweeper {
    pub fn new(table: Arc<dyn TableStore>, interval: Duration) -> Self {
        Self {
            table,
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                "Started expiry sweeper"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "Expiry sweep failed");
                }
            }
        })
    }

    /// Run one pass against the current time
    pub async fn run_once(&self) -> Result<SweepOutcome, TableError> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one pass treating `now` as the current time
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome, TableError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Expiry sweep already running, skipping");
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = PassGuard(&self.in_flight);

        let rows = self.table.list_rows().await?;
        let mut report = SweepReport {
            scanned: rows.len(),
            ..SweepReport::default()
        };

        for row in rows {
            match classify(&row, now) {
                RowExpiry::Never => report.never_expire += 1,
                RowExpiry::Live => {}
                RowExpiry::Unparseable => {
                    report.unparseable += 1;
                    debug!(
                        partition_key = %row.partition_key,
                        row_key = %row.row_key,
                        "Skipping row with unparseable expiry"
                    );
                }
                RowExpiry::Expired => {
                    report.expired += 1;
                    self.delete(&row, &mut report).await;
                }
            }
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            "Expiry sweep finished"
        );

        Ok(SweepOutcome::Completed(report))
    }

    async fn delete(&self, row: &TableRow, report: &mut SweepReport) {
        match self.table.delete_row(&row.partition_key, &row.row_key).await {
            Ok(()) => {
                report.deleted += 1;
                debug!(
                    partition_key = %row.partition_key,
                    row_key = %row.row_key,
                    "Deleted expired row"
                );
            }
            Err(TableError::NotFound) => report.already_removed += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    partition_key = %row.partition_key,
                    row_key = %row.row_key,
                    error = %e,
                    "Failed to delete expired row"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemoryTableStore;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        parse_expiry(s).unwrap()
    }

    #[test]
    fn parses_supported_formats() {
        let midnight = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_expiry("2021-01-01T00:00:00.000Z"), Some(midnight));
        assert_eq!(parse_expiry("2021-01-01T01:00:00+01:00"), Some(midnight));
        assert_eq!(parse_expiry("2021-01-01T00:00:00"), Some(midnight));
        assert_eq!(parse_expiry("2021-01-01"), Some(midnight));
        assert_eq!(parse_expiry("tomorrow"), None);
    }

    #[test]
    fn expiry_is_strictly_before_now() {
        let now = at("2024-06-01T12:00:00.000Z");
        let row = TableRow::new("p", "r").with_expire("2024-06-01T12:00:00.000Z");

        assert_eq!(classify(&row, now), RowExpiry::Live);
        assert_eq!(
            classify(&row, now + chrono::Duration::milliseconds(1)),
            RowExpiry::Expired
        );
        assert_eq!(classify(&TableRow::new("p", "r"), now), RowExpiry::Never);
        assert_eq!(
            classify(&TableRow::new("p", "r").with_expire("soon"), now),
            RowExpiry::Unparseable
        );
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_rows() {
        let table = Arc::new(MemoryTableStore::new());
        table.upsert(TableRow::new("1", "1").with_expire("2021-01-01T00:00:00.000Z"));
        table.upsert(TableRow::new("1", "2").with_expire("9999-01-01T00:00:00.000Z"));
        table.upsert(TableRow::new("1", "3"));

        let sweeper = Sweeper::new(table.clone(), Duration::from_secs(60));
        let outcome = sweeper.run_once().await.unwrap();

        let SweepOutcome::Completed(report) = outcome else {
            panic!("sweep should not be skipped");
        };
        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.never_expire, 1);
        assert!(!table.contains("1", "1"));
        assert!(table.contains("1", "2"));
        assert!(table.contains("1", "3"));
    }

    #[tokio::test]
    async fn concurrent_pass_is_skipped() {
        let table = Arc::new(MemoryTableStore::new());
        let sweeper = Sweeper::new(table, Duration::from_secs(60));

        sweeper.in_flight.store(true, Ordering::Release);
        assert_eq!(sweeper.run_once().await.unwrap(), SweepOutcome::Skipped);

        sweeper.in_flight.store(false, Ordering::Release);
        assert!(matches!(
            sweeper.run_once().await.unwrap(),
            SweepOutcome::Completed(_)
        ));
        assert!(!sweeper.in_flight.load(Ordering::Acquire));
    }
}
