use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CoverError, Result};

/// Window length for dashboard summary buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplePeriod {
    Day,
    Month,
    Quarter,
    Year,
    /// Fixed-length windows of this many minutes, anchored at the query
    /// `from` rather than any calendar boundary.
    Custom { minutes: u32 },
    /// The whole range as a single bucket, `[from, to]` verbatim.
    All,
}

impl SamplePeriod {
    fn is_calendar(&self) -> bool {
        matches!(
            self,
            SamplePeriod::Day | SamplePeriod::Month | SamplePeriod::Quarter | SamplePeriod::Year
        )
    }
}

/// A record that can be bucketed by creation time.
pub trait Summarisable {
    fn created_at(&self) -> DateTime<Utc>;
}

/// Flat dashboard row fed into the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub product_id: Option<String>,
}

impl Summarisable for SummaryRow {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone)]
pub struct SummaryQuery {
    pub from: DateTime<Utc>,
    /// Explicit range end. `None` derives the end from the current instant,
    /// and the final bucket then runs to its full calendar period end.
    pub to: Option<DateTime<Utc>>,
    pub period: SamplePeriod,
    pub time_zone: Tz,
}

/// One time-bucketed count. Consecutive buckets are non-overlapping and
/// zero-filled buckets are emitted, so charts get an uninterrupted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSummary {
    pub from_date_time: DateTime<Utc>,
    pub to_date_time: DateTime<Utc>,
    pub created_count: u64,
}

/// Partitions `[from, to]` into buckets per the query period and counts each
/// record into exactly one bucket.
///
/// Calendar buckets align to period starts in the query time zone: the first
/// bucket's start is the start of the period containing `from` (even when
/// `from` is mid-period), interior boundaries are period starts, and the last
/// bucket is clamped to an explicit `to`. Records outside `[from, to]` are
/// excluded regardless of bucket spans. When `from` and `to` fall inside the
/// same calendar period the single emitted bucket spans `[from, to]` only.
pub fn generate<R: Summarisable>(
    records: &[R],
    query: &SummaryQuery,
) -> Result<Vec<PeriodicSummary>> {
    let end = query.to.unwrap_or_else(Utc::now);
    if query.from > end {
        return Err(CoverError::InvalidSummaryRange(format!(
            "from {} is after to {}",
            query.from, end
        )));
    }
    let explicit_to = query.to.is_some();
    let zone = query.time_zone;
    let from_local = query.from.with_timezone(&zone);
    let end_local = end.with_timezone(&zone);

    let mut bounds: Vec<(DateTime<Tz>, DateTime<Tz>)> = Vec::new();
    match query.period {
        SamplePeriod::All => bounds.push((from_local, end_local)),
        SamplePeriod::Custom { minutes } => {
            if minutes == 0 {
                return Err(CoverError::InvalidSummaryRange(
                    "custom period length must be at least one minute".into(),
                ));
            }
            let step = Duration::minutes(i64::from(minutes));
            let mut cursor = from_local;
            while cursor < end_local {
                let boundary = cursor + step;
                let bucket_end = if boundary >= end_local && explicit_to {
                    end_local
                } else {
                    boundary
                };
                bounds.push((cursor, bucket_end));
                cursor = boundary;
            }
        }
        period if period.is_calendar() => {
            if period_start(&zone, from_local, period) == period_start(&zone, end_local, period) {
                // Same calendar period: one bucket spanning only the sub-range.
                bounds.push((from_local, end_local));
            } else {
                let mut cursor = period_start(&zone, from_local, period);
                while cursor < end_local {
                    let boundary = next_period_start(&zone, cursor, period);
                    let bucket_end = if boundary >= end_local && explicit_to {
                        end_local
                    } else {
                        boundary
                    };
                    bounds.push((cursor, bucket_end));
                    cursor = boundary;
                }
            }
        }
        _ => unreachable!("non-calendar periods handled above"),
    }

    if bounds.is_empty() {
        // Zero-width range: a single bucket so callers always get a series.
        bounds.push((from_local, end_local));
    }

    let last = bounds.len() - 1;
    let summaries = bounds
        .iter()
        .enumerate()
        .map(|(index, (bucket_from, bucket_to))| {
            let created_count = records
                .iter()
                .map(|record| record.created_at())
                .filter(|t| *t >= query.from && *t <= end)
                .filter(|t| {
                    let t = t.with_timezone(&zone);
                    t >= *bucket_from && (t < *bucket_to || (index == last && t == *bucket_to))
                })
                .count() as u64;
            PeriodicSummary {
                from_date_time: bucket_from.with_timezone(&Utc),
                to_date_time: bucket_to.with_timezone(&Utc),
                created_count,
            }
        })
        .collect();

    Ok(summaries)
}

/// Start of the calendar period containing `at`, in the query zone.
fn period_start(zone: &Tz, at: DateTime<Tz>, period: SamplePeriod) -> DateTime<Tz> {
    let date = at.date_naive();
    let start_date = match period {
        SamplePeriod::Day => date,
        SamplePeriod::Month => first_of_month(date.year(), date.month()),
        SamplePeriod::Quarter => {
            let quarter_month = (date.month0() / 3) * 3 + 1;
            first_of_month(date.year(), quarter_month)
        }
        SamplePeriod::Year => first_of_month(date.year(), 1),
        SamplePeriod::Custom { .. } | SamplePeriod::All => date,
    };
    resolve_local(zone, start_date.and_time(NaiveTime::MIN))
}

/// Start of the calendar period immediately after the one containing `at`.
fn next_period_start(zone: &Tz, at: DateTime<Tz>, period: SamplePeriod) -> DateTime<Tz> {
    let date = at.date_naive();
    let next_date = match period {
        SamplePeriod::Day => date
            .succ_opt()
            .expect("date arithmetic within chrono bounds"),
        SamplePeriod::Month => roll_months(date.year(), date.month(), 1),
        SamplePeriod::Quarter => {
            let quarter_month = (date.month0() / 3) * 3 + 1;
            roll_months(date.year(), quarter_month, 3)
        }
        SamplePeriod::Year => first_of_month(date.year() + 1, 1),
        SamplePeriod::Custom { .. } | SamplePeriod::All => date,
    };
    resolve_local(zone, next_date.and_time(NaiveTime::MIN))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is always a valid date")
}

fn roll_months(year: i32, month: u32, months: u32) -> NaiveDate {
    let total = month - 1 + months;
    first_of_month(year + (total / 12) as i32, total % 12 + 1)
}

/// Maps a naive local time into the zone, stepping over DST gaps.
fn resolve_local(zone: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut candidate = naive;
    for _ in 0..4 {
        match zone.from_local_datetime(&candidate) {
            LocalResult::Single(resolved) => return resolved,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => candidate += Duration::minutes(30),
        }
    }
    zone.from_utc_datetime(&naive)
}
