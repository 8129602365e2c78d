//! Time utilities for SimpleBank.

use chrono::{DateTime, SubsecRound, Utc};

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
///
/// Truncated to microseconds, the resolution of a PostgreSQL
/// `timestamptz`, so records built in memory compare equal to records
/// read back from storage.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.nanosecond() % 1_000, 0);
    }
}
