//! Clock helpers shared by the store and its replicas.

use chrono::{DateTime, Duration, Utc};

/// Smallest step, in milliseconds, a modify time is pushed forward when the
/// wall clock has not moved past the stored value.
pub const MODIFY_TIME_STEP_MILLIS: i64 = 1;

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Watermark of a consumer that has never synchronized.
///
/// Earlier than any storable modify time, so a feed read from here returns
/// every row, including rows seeded with dates at or before the Unix epoch.
pub fn earliest() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// Next modify time for a record whose current modify time is `previous`.
///
/// Always strictly greater than `previous`, even when the wall clock is
/// behind it or has not ticked since the last write.
///
/// # Examples
///
/// ```
/// use batata_ratelimit_common::utils::next_modify_time;
///
/// let future = chrono::Utc::now() + chrono::Duration::hours(1);
/// assert!(next_modify_time(future) > future);
/// ```
pub fn next_modify_time(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(MODIFY_TIME_STEP_MILLIS)
    }
}
