use chrono::{DateTime, TimeZone, Utc};

const MILLIS_THRESHOLD: i64 = 10_000_000_000;

fn utc_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

/// Rows are written in epoch seconds; tolerate millisecond values written by
/// hand-edited or foreign state files.
pub fn utc_from_epoch_seconds_lossy(ts: i64) -> DateTime<Utc> {
    if ts.abs() >= MILLIS_THRESHOLD
        && let Some(dt) = Utc.timestamp_opt(ts / 1000, 0).single()
    {
        log::warn!("Coerced milliseconds timestamp to seconds (ts={ts})");
        return dt;
    }

    if let Some(dt) = Utc.timestamp_opt(ts, 0).single() {
        return dt;
    }

    log::warn!("Invalid epoch seconds timestamp (ts={ts}); falling back to epoch");
    utc_epoch()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_taken_as_is() {
        assert_eq!(utc_from_epoch_seconds_lossy(1_700_000_000).timestamp(), 1_700_000_000);
    }

    #[test]
    fn milliseconds_are_coerced() {
        assert_eq!(
            utc_from_epoch_seconds_lossy(1_700_000_000_123).timestamp(),
            1_700_000_000
        );
    }
}
