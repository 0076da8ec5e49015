use chrono::{DateTime, Local, Utc};

/// Format a remaining-seconds value as `m:ss` for the expiry prompt
pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Format an expiry instant in local time, or a placeholder when unknown
pub fn format_expiry(expiration: Option<DateTime<Utc>>) -> String {
    match expiration {
        Some(at) => at.with_timezone(&Local).format("%b %d, %Y %H:%M:%S").to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "0:00");
        assert_eq!(format_countdown(59), "0:59");
        assert_eq!(format_countdown(300), "5:00");
        assert_eq!(format_countdown(3725), "62:05");
    }

    #[test]
    fn test_format_expiry_unknown() {
        assert_eq!(format_expiry(None), "unknown");
    }
}
