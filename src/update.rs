use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Wire tag that marks a frame as a security update.
pub const SECURITY_UPDATE_TAG: &str = "security_update";

/// Most recent entries retained for display.
pub const MAX_RECENT: usize = 5;

/// A single district security update. Constructed once, never mutated:
/// every displayed field carries a type-safe default so the display layer
/// never sees a missing or mistyped value.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityUpdate {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub district: String,
    pub incident_count: u64,
    pub response_time_mins: f64,
    pub safety_score: f64,
}

impl SecurityUpdate {
    /// Decode a security update from an already-parsed payload, substituting
    /// defaults field by field. `received_at` replaces any timestamp that
    /// fails to parse.
    pub fn from_value(payload: &Value, received_at: DateTime<Utc>) -> Self {
        let kind = match payload.get("type").and_then(Value::as_str) {
            Some("patrol") => "patrol".to_string(),
            _ => SECURITY_UPDATE_TAG.to_string(),
        };
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(received_at);
        let district = payload
            .get("district")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let incident_count = payload
            .get("incident_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let response_time_mins = payload
            .get("response_time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let safety_score = payload
            .get("safety_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Self {
            kind,
            timestamp,
            district,
            incident_count,
            response_time_mins,
            safety_score,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind,
            "timestamp": self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "district": self.district,
            "incident_count": self.incident_count,
            "response_time": self.response_time_mins,
            "safety_score": self.safety_score,
        })
    }
}

/// Bounded newest-first history of accepted updates. Inserting beyond
/// capacity evicts the oldest entry.
#[derive(Debug, Clone, Default)]
pub struct UpdateHistory {
    entries: Vec<SecurityUpdate>,
}

impl UpdateHistory {
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(MAX_RECENT) }
    }

    pub fn prepend(&mut self, update: SecurityUpdate) {
        self.entries.insert(0, update);
        self.entries.truncate(MAX_RECENT);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest-first view for the display layer.
    pub fn entries(&self) -> &[SecurityUpdate] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<SecurityUpdate> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn decodes_well_formed_payload() {
        let payload = json!({
            "type": "security_update",
            "timestamp": "2026-08-26T10:15:00Z",
            "district": "The Narrows",
            "incident_count": 4,
            "response_time": 2.4,
            "safety_score": 7.8,
        });
        let u = SecurityUpdate::from_value(&payload, receipt());
        assert_eq!(u.district, "The Narrows");
        assert_eq!(u.incident_count, 4);
        assert_eq!(u.response_time_mins, 2.4);
        assert_eq!(u.safety_score, 7.8);
        assert_eq!(u.timestamp.to_rfc3339(), "2026-08-26T10:15:00+00:00");
    }

    #[test]
    fn missing_district_defaults_to_unknown() {
        let payload = json!({ "type": "security_update", "incident_count": 1 });
        let u = SecurityUpdate::from_value(&payload, receipt());
        assert_eq!(u.district, "Unknown");
    }

    #[test]
    fn non_numeric_fields_default_to_zero() {
        let payload = json!({
            "type": "security_update",
            "district": "Downtown",
            "incident_count": "three",
            "response_time": null,
            "safety_score": "bad",
        });
        let u = SecurityUpdate::from_value(&payload, receipt());
        assert_eq!(u.incident_count, 0);
        assert_eq!(u.response_time_mins, 0.0);
        assert_eq!(u.safety_score, 0.0);
    }

    #[test]
    fn negative_incident_count_defaults_to_zero() {
        let payload = json!({ "incident_count": -3 });
        let u = SecurityUpdate::from_value(&payload, receipt());
        assert_eq!(u.incident_count, 0);
    }

    #[test]
    fn bad_timestamp_replaced_with_receipt_time() {
        let at = receipt();
        let payload = json!({ "timestamp": "not-a-date" });
        let u = SecurityUpdate::from_value(&payload, at);
        assert_eq!(u.timestamp, at);
    }

    #[test]
    fn unknown_kind_collapses_to_security_update() {
        let payload = json!({ "type": "weather" });
        let u = SecurityUpdate::from_value(&payload, receipt());
        assert_eq!(u.kind, SECURITY_UPDATE_TAG);
    }

    #[test]
    fn history_keeps_five_newest_first() {
        let mut h = UpdateHistory::new();
        for i in 0..6u64 {
            let payload = json!({ "district": format!("D{}", i) });
            h.prepend(SecurityUpdate::from_value(&payload, receipt()));
        }
        assert_eq!(h.len(), MAX_RECENT);
        let districts: Vec<&str> = h.entries().iter().map(|u| u.district.as_str()).collect();
        assert_eq!(districts, vec!["D5", "D4", "D3", "D2", "D1"]);
    }
}
