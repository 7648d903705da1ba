//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Folder-safe timestamp used to name export bundles (`20250301_142530`)
pub fn export_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_export_stamp_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 14, 25, 30).unwrap();
        assert_eq!(export_stamp(at), "20250301_142530");
    }

    #[test]
    fn test_export_stamp_is_sortable() {
        let earlier = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(export_stamp(earlier) < export_stamp(later));
    }
}
