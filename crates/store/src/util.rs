//! Shared row<->domain conversions: timestamps and JSON blobs as TEXT.

use bg_domain::error::{Error, Result};
use chrono::{DateTime, Utc};

pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("corrupt timestamp {s:?}: {e}")))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

pub fn to_json(v: &serde_json::Value) -> String {
    v.to_string()
}

pub fn from_json(s: &str) -> Result<serde_json::Value> {
    serde_json::from_str(s).map_err(Error::from)
}

pub fn opt_from_json(s: Option<String>) -> Result<Option<serde_json::Value>> {
    s.map(|s| from_json(&s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips() {
        let now = Utc::now();
        let s = ts(now);
        let parsed = parse_ts(&s).unwrap();
        assert_eq!(now.timestamp_millis(), parsed.timestamp_millis());
    }

    #[test]
    fn json_round_trips() {
        let v = serde_json::json!({"a": 1, "b": [1,2,3]});
        let s = to_json(&v);
        assert_eq!(from_json(&s).unwrap(), v);
    }
}
