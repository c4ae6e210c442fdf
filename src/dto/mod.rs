use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod command;
pub mod health;
pub mod poll;
pub mod sse;
pub mod validation;

const INVALID_TIMESTAMP: &str = "invalid-timestamp";

/// Format `at` as an RFC 3339 timestamp, or `invalid-timestamp` when it cannot be
/// represented.
pub fn format_system_time(at: SystemTime) -> String {
    let datetime = match at.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => time::Duration::try_from(after)
            .ok()
            .and_then(|offset| OffsetDateTime::UNIX_EPOCH.checked_add(offset)),
        Err(before) => time::Duration::try_from(before.duration())
            .ok()
            .and_then(|offset| OffsetDateTime::UNIX_EPOCH.checked_sub(offset)),
    };

    datetime
        .and_then(|datetime| datetime.format(&Rfc3339).ok())
        .unwrap_or_else(|| INVALID_TIMESTAMP.into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn formats_rfc3339() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(format_system_time(at), "2023-11-14T22:13:20Z");
        assert_eq!(
            format_system_time(SystemTime::UNIX_EPOCH - Duration::from_secs(86_400)),
            "1969-12-31T00:00:00Z"
        );
    }

    #[test]
    fn far_future_does_not_panic() {
        // about year 21000
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(600_000_000_000);
        assert_eq!(format_system_time(at), INVALID_TIMESTAMP);
    }
}
