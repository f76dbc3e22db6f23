use chrono::{DateTime, Utc};

pub fn to_text(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub fn from_text(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("stored timestamp is always RFC3339")
        .with_timezone(&Utc)
}
