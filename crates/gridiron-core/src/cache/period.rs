//! Deterministic period keys
//!
//! A period key names the logical reporting period a read belongs to, so that
//! every read inside the period lands on the same cache entry. Static mode
//! uses the local calendar day; live mode uses fixed-width buckets.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde::Serialize;

/// A derived cache key and the period it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodKey {
    pub key: String,
    pub period: String,
    pub live: bool,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Computes period boundaries
#[derive(Debug, Clone, Copy)]
pub struct PeriodCalendar {
    offset: FixedOffset,
    live_bucket: Duration,
}

impl PeriodCalendar {
    /// `live_bucket` is clamped to at least one minute
    pub fn new(offset: FixedOffset, live_bucket: std::time::Duration) -> Self {
        let live_bucket = Duration::from_std(live_bucket)
            .unwrap_or(Duration::minutes(15))
            .max(Duration::minutes(1));
        Self {
            offset,
            live_bucket,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Derive `namespace:context:period:mode` for the instant `now`
    pub fn key(&self, namespace: &str, context: &str, live: bool, now: DateTime<Utc>) -> PeriodKey {
        let (period, starts_at, expires_at) = if live {
            self.live_period(now)
        } else {
            self.static_period(now)
        };
        let mode = if live { "live" } else { "static" };

        PeriodKey {
            key: format!("{}:{}:{}:{}", namespace, context, period, mode),
            period,
            live,
            starts_at,
            expires_at,
        }
    }

    fn static_period(&self, now: DateTime<Utc>) -> (String, DateTime<Utc>, DateTime<Utc>) {
        let local_day = now.with_timezone(&self.offset).date_naive();
        let start = self
            .offset
            .from_local_datetime(&local_day.and_time(NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        (
            local_day.format("%Y-%m-%d").to_string(),
            start,
            start + Duration::days(1),
        )
    }

    fn live_period(&self, now: DateTime<Utc>) -> (String, DateTime<Utc>, DateTime<Utc>) {
        let width = self.live_bucket.num_seconds();
        let local_secs = now.timestamp() + i64::from(self.offset.local_minus_utc());
        let bucket_local = local_secs - local_secs.rem_euclid(width);
        let start_ts = bucket_local - i64::from(self.offset.local_minus_utc());
        let start = DateTime::<Utc>::from_timestamp(start_ts, 0).unwrap_or(now);
        let label = start.with_timezone(&self.offset).format("%Y-%m-%dT%H:%M");
        (label.to_string(), start, start + self.live_bucket)
    }
}

impl Default for PeriodCalendar {
    fn default() -> Self {
        Self::new(Utc.fix(), std::time::Duration::from_secs(15 * 60))
    }
}
