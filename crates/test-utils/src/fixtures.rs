//! Common test fixtures for grid-store tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Projection dimensions used across the test suite, as `(id, n_x, n_y)`.
pub mod projections {
    /// Tiny grid for hand-checked values.
    pub const SMALL_4X4: (i32, usize, usize) = (1, 4, 4);

    /// Last shard narrower than the default width of 128 (300 = 2 * 128 + 44).
    pub const NARROW_LAST_SHARD: (i32, usize, usize) = (2, 300, 3);

    /// 512 columns by 1024 rows; four full shards per row.
    pub const LARGE_512X1024: (i32, usize, usize) = (3, 512, 1024);
}

/// A fixed reference time for tests (2024-01-15T12:00:00Z).
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Hourly valid times starting at [`reference_time`].
pub fn hourly_valid_times(count: usize) -> Vec<DateTime<Utc>> {
    let start = reference_time();
    (0..count)
        .map(|h| start + Duration::hours(h as i64))
        .collect()
}

/// Model run time `hours` before `valid_time`.
pub fn run_time_before(valid_time: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    valid_time - Duration::hours(hours)
}
