use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;

use crate::error::ClockError;

/// Hard-coded genesis instant (spec.md §4.1), matching the Staeon mainline's
/// original 2019-02-14 10:00 UTC epoch-zero boundary.
pub static GENESIS: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2019, 2, 14, 10, 0, 0).unwrap());

pub const EPOCH_LENGTH_SECS: i64 = 600;
pub const CLOSING_WINDOW_SECS: i64 = 10;
pub const PROPAGATION_WINDOW_SECS: i64 = 10;

fn epoch_length() -> Duration {
    Duration::seconds(EPOCH_LENGTH_SECS)
}

/// `epoch_of(t) = floor((t - genesis) / epoch_length)`.
pub fn epoch_of(t: DateTime<Utc>) -> i64 {
    let micros = (t - *GENESIS).num_microseconds().unwrap_or(i64::MIN);
    let epoch_micros = EPOCH_LENGTH_SECS * 1_000_000;
    micros.div_euclid(epoch_micros)
}

/// `range_of(n) = [genesis + n*epoch_length, genesis + (n+1)*epoch_length)`.
pub fn range_of(n: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = *GENESIS + epoch_length() * n as i32;
    (start, start + epoch_length())
}

/// `seconds_til_next_epoch(t) = epoch_length - ((t - genesis) mod epoch_length)`.
pub fn seconds_til_next_epoch(t: DateTime<Utc>) -> f64 {
    let micros = (t - *GENESIS).num_microseconds().unwrap_or(0);
    let epoch_micros = EPOCH_LENGTH_SECS * 1_000_000;
    let into_epoch = micros.rem_euclid(epoch_micros);
    (epoch_micros - into_epoch) as f64 / 1_000_000.0
}

/// Fails with [`ClockError::WithinClosingWindow`] if `ts` is too close to its
/// epoch's end to propagate, or [`ClockError::PropagationWindowExceeded`] if
/// `ts` is too far in the future relative to `now` (clock skew).
pub fn validate_timestamp(ts: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ClockError> {
    if seconds_til_next_epoch(ts) < CLOSING_WINDOW_SECS as f64 {
        return Err(ClockError::WithinClosingWindow);
    }
    if ts - now >= Duration::seconds(PROPAGATION_WINDOW_SECS) {
        return Err(ClockError::PropagationWindowExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_epoch_zero() {
        assert_eq!(epoch_of(*GENESIS), 0);
        assert_eq!(epoch_of(*GENESIS + Duration::seconds(599)), 0);
        assert_eq!(epoch_of(*GENESIS + Duration::seconds(600)), 1);
    }

    #[test]
    fn range_of_matches_epoch_of() {
        let (start, end) = range_of(3);
        assert_eq!(epoch_of(start), 3);
        assert_eq!(epoch_of(end), 4);
        assert_eq!((end - start).num_seconds(), EPOCH_LENGTH_SECS);
    }

    #[test]
    fn closing_window_rejects_near_boundary() {
        let (_, end) = range_of(0);
        let near_end = end - Duration::seconds(5);
        assert!(matches!(
            validate_timestamp(near_end, near_end),
            Err(ClockError::WithinClosingWindow)
        ));
    }

    #[test]
    fn propagation_window_rejects_future_skew() {
        let now = *GENESIS + Duration::minutes(5);
        let future = now + Duration::seconds(11);
        assert!(matches!(
            validate_timestamp(future, now),
            Err(ClockError::PropagationWindowExceeded)
        ));
    }

    #[test]
    fn accepts_well_formed_timestamp() {
        let now = *GENESIS + Duration::minutes(5);
        assert!(validate_timestamp(now, now).is_ok());
    }
}
