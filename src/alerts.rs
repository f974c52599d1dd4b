//! Initial alerts snapshot, fetched once at startup before the live
//! channel takes over.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;

use crate::logging::{json_log, obj, v_num, v_str};
use crate::state::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Security,
    Financial,
    Hr,
    Rd,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub timestamp: String,
    #[serde(default)]
    pub action_required: bool,
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    alerts: Vec<Alert>,
}

pub async fn fetch_alerts(client: &Client, cfg: &Config) -> Result<Vec<Alert>> {
    let resp = client.get(cfg.alerts_url()).send().await?;
    if !resp.status().is_success() {
        return Err(anyhow!("alerts endpoint returned {}", resp.status()));
    }
    let body: AlertsResponse = resp.json().await?;
    Ok(body.alerts)
}

/// Fetch the snapshot, degrading to an empty list on any failure. The feed
/// must come up regardless of the backend's health.
pub async fn initial_snapshot(client: &Client, cfg: &Config) -> Vec<Alert> {
    match fetch_alerts(client, cfg).await {
        Ok(alerts) => {
            json_log(
                "alerts",
                obj(&[
                    ("event", v_str("snapshot_loaded")),
                    ("count", v_num(alerts.len() as f64)),
                ]),
            );
            alerts
        }
        Err(err) => {
            json_log(
                "alerts",
                obj(&[
                    ("event", v_str("snapshot_failed")),
                    ("error", v_str(&err.to_string())),
                ]),
            );
            Vec::new()
        }
    }
}
