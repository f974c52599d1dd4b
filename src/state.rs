use chrono::{DateTime, Utc};

/// Runtime configuration, resolved once at startup and passed by value into
/// the components that need it. Nothing below this layer reads the
/// environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub ws_host: String,
    pub production: bool,
    pub backend_base: String,
    pub reconnect_delay_secs: u64,
    pub fallback_deadline_secs: u64,
    pub sim_period_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            ws_host: std::env::var("WS_HOST").unwrap_or_else(|_| "localhost:8000".to_string()),
            production: std::env::var("PRODUCTION")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            backend_base: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            reconnect_delay_secs: std::env::var("RECONNECT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            fallback_deadline_secs: std::env::var("FALLBACK_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(3),
            sim_period_secs: std::env::var("SIM_PERIOD_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(15),
        }
    }

    /// Feed endpoint: secure scheme in production, plain otherwise.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.production { "wss" } else { "ws" };
        format!("{}://{}/ws", scheme, self.ws_host)
    }

    pub fn alerts_url(&self) -> String {
        format!("{}/api/realtime-alerts", self.backend_base)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_host: "localhost:8000".to_string(),
            production: false,
            backend_base: "http://localhost:8000".to_string(),
            reconnect_delay_secs: 5,
            fallback_deadline_secs: 3,
            sim_period_secs: 15,
        }
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
