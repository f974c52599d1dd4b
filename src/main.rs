use anyhow::Result;

use citywatch::alerts;
use citywatch::feed;
use citywatch::logging::{json_log, obj, v_num, v_str};
use citywatch::state::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "system",
        obj(&[
            ("event", v_str("startup")),
            ("endpoint", v_str(&cfg.endpoint_url())),
            ("backend", v_str(&cfg.backend_base)),
        ]),
    );

    // One-shot snapshot before the live channel takes over.
    let client = reqwest::Client::new();
    let snapshot = alerts::initial_snapshot(&client, &cfg).await;
    for alert in &snapshot {
        json_log(
            "alerts",
            obj(&[
                ("id", v_str(&alert.id)),
                ("kind", v_str(&format!("{:?}", alert.kind))),
                ("severity", v_str(&format!("{:?}", alert.severity))),
                ("title", v_str(&alert.title)),
            ]),
        );
    }

    let handle = feed::spawn(cfg);
    let mut snapshots = handle.snapshots.clone();

    // Stand-in display layer: log every published snapshot change until
    // ctrl-c requests teardown.
    let display = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snap = snapshots.borrow_and_update().clone();
            json_log(
                "channel",
                obj(&[
                    ("connected", serde_json::Value::Bool(snap.connected)),
                    ("status", v_str(&snap.status)),
                    ("updates", v_num(snap.updates.len() as f64)),
                    (
                        "latest",
                        snap.updates
                            .first()
                            .map(|u| u.to_json())
                            .unwrap_or(serde_json::Value::Null),
                    ),
                ]),
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    json_log("system", obj(&[("event", v_str("shutdown_requested"))]));
    handle.shutdown().await;
    display.abort();
    Ok(())
}
