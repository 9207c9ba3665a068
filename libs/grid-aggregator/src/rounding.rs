//! Timestamp bucketing
//!
//! Source timestamps are snapped to the nearest multiple of the configured
//! precision. A timestamp exactly halfway between two buckets goes to the
//! later one.

use chrono::{DateTime, Utc};

/// Bucket key in microseconds since the Unix epoch
pub(crate) fn bucket_micros(micros: i64, precision_ms: u64) -> i64 {
    let precision_us = (precision_ms as i64).saturating_mul(1000);
    if precision_us <= 0 {
        return micros;
    }
    micros
        .saturating_add(precision_us / 2)
        .div_euclid(precision_us)
        .saturating_mul(precision_us)
}

/// Round `ts` to the nearest multiple of `precision_ms`
///
/// A precision of zero leaves the timestamp untouched.
///
/// # Examples
/// ```
/// # use chrono::{TimeZone, Utc};
/// # use grid_aggregator::round_to_precision;
/// let ts = Utc.timestamp_millis_opt(1_000_004).unwrap();
/// assert_eq!(round_to_precision(ts, 10), Utc.timestamp_millis_opt(1_000_000).unwrap());
/// let ts = Utc.timestamp_millis_opt(1_000_005).unwrap();
/// assert_eq!(round_to_precision(ts, 10), Utc.timestamp_millis_opt(1_000_010).unwrap());
/// ```
pub fn round_to_precision(ts: DateTime<Utc>, precision_ms: u64) -> DateTime<Utc> {
    let bucket = bucket_micros(ts.timestamp_micros(), precision_ms);
    DateTime::from_timestamp_micros(bucket).unwrap_or(ts)
}
