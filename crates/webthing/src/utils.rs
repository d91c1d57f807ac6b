use chrono::Utc;

// Timestamps are UTC with second precision, for example
// `2024-05-01T12:30:00+00:00`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// Returns the current time as a timestamp string.
#[must_use]
pub fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::timestamp;

    #[test]
    fn timestamp_shape() {
        let now = timestamp();
        assert_eq!(now.len(), "2024-05-01T12:30:00+00:00".len());
        assert!(now.ends_with("+00:00"));
        assert_eq!(&now[10..11], "T");
    }
}
