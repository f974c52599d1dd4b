//! Local synthesis of plausible security updates for the degraded path.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::update::SecurityUpdate;

const DISTRICTS: [&str; 5] = ["Downtown", "The Narrows", "Midtown", "East End", "West Side"];

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// The two fixed entries shown the moment fallback activates, so the feed is
/// never empty while the first synthetic tick is pending.
pub fn seed_updates(at: DateTime<Utc>) -> Vec<SecurityUpdate> {
    vec![
        SecurityUpdate {
            kind: "patrol".to_string(),
            timestamp: at,
            district: "Downtown".to_string(),
            incident_count: 2,
            response_time_mins: 1.8,
            safety_score: 9.2,
        },
        SecurityUpdate {
            kind: "patrol".to_string(),
            timestamp: at - Duration::minutes(2),
            district: "The Narrows".to_string(),
            incident_count: 5,
            response_time_mins: 2.4,
            safety_score: 7.8,
        },
    ]
}

/// One synthetic update with bounded-random values.
pub fn synthetic_update(at: DateTime<Utc>) -> SecurityUpdate {
    let mut rng = rand::thread_rng();
    let district = DISTRICTS[rng.gen_range(0..DISTRICTS.len())];
    SecurityUpdate {
        kind: "patrol".to_string(),
        timestamp: at,
        district: district.to_string(),
        incident_count: rng.gen_range(0..6),
        response_time_mins: round1(rng.gen_range(2.0..6.0)),
        safety_score: round1(rng.gen_range(6.0..9.5)),
    }
}
