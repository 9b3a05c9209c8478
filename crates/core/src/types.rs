//! Shared type aliases and numeric helpers.

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Progress percentages are integers in `0..=100`.
pub type Percent = u8;

/// Clamp an arbitrary numeric progress value into the `0..=100` range.
pub fn clamp_percent(value: i64) -> Percent {
    value.clamp(0, 100) as Percent
}
