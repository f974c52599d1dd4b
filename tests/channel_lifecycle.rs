//! End-to-end lifecycle scenarios for the live update channel, driven
//! entirely by synthetic events through the public dispatch API.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::time::Duration;

use citywatch::channel::{
    ChannelAction, ChannelEvent, ChannelState, LiveUpdateChannel, NORMAL_CLOSURE,
};
use citywatch::state::Config;
use citywatch::update::MAX_RECENT;

fn new_channel() -> LiveUpdateChannel {
    LiveUpdateChannel::new(&Config::default()).0
}

fn update_payload(district: &str, incidents: u64) -> String {
    json!({
        "type": "security_update",
        "timestamp": Utc::now().to_rfc3339(),
        "district": district,
        "incident_count": incidents,
        "response_time": 3.2,
        "safety_score": 8.1,
    })
    .to_string()
}

#[test]
fn defaulting_rules_apply_per_field() {
    let mut chan = new_channel();
    chan.handle(Utc::now(), ChannelEvent::Opened);

    let receipt = Utc::now();
    let text = json!({
        "type": "security_update",
        "timestamp": "yesterday-ish",
        "incident_count": "many",
        "response_time": null,
        "safety_score": [1, 2],
    })
    .to_string();
    chan.handle(receipt, ChannelEvent::MessageReceived(text));

    let u = &chan.history().entries()[0];
    assert_eq!(u.district, "Unknown");
    assert_eq!(u.incident_count, 0);
    assert_eq!(u.response_time_mins, 0.0);
    assert_eq!(u.safety_score, 0.0);
    let skew = (u.timestamp - receipt).num_milliseconds().abs();
    assert!(skew < 100, "timestamp should be receipt time, skew={}ms", skew);
}

#[test]
fn history_caps_at_five_and_evicts_oldest() {
    let mut chan = new_channel();
    chan.handle(Utc::now(), ChannelEvent::Opened);
    for i in 0..6u64 {
        let text = update_payload(&format!("District-{}", i), i);
        chan.handle(Utc::now(), ChannelEvent::MessageReceived(text));
    }
    assert_eq!(chan.history().len(), MAX_RECENT);
    let districts: Vec<&str> = chan
        .history()
        .entries()
        .iter()
        .map(|u| u.district.as_str())
        .collect();
    assert_eq!(
        districts,
        vec!["District-5", "District-4", "District-3", "District-2", "District-1"]
    );
}

#[test]
fn clean_close_ends_the_feed_quietly() {
    let mut chan = new_channel();
    chan.handle(Utc::now(), ChannelEvent::Opened);
    let actions = chan.handle(Utc::now(), ChannelEvent::Closed(Some(NORMAL_CLOSURE)));
    assert!(actions.is_empty(), "no reconnect after a deliberate close");
    assert_eq!(chan.state(), ChannelState::Disconnected);
    assert!(chan.handle(Utc::now(), ChannelEvent::ReconnectDue).is_empty());
}

#[test]
fn abnormal_close_retries_forever_at_fixed_delay() {
    let mut chan = new_channel();
    chan.handle(Utc::now(), ChannelEvent::Opened);
    for round in 0..10 {
        let actions = chan.handle(Utc::now(), ChannelEvent::Closed(Some(1006)));
        assert_eq!(
            actions,
            vec![ChannelAction::ScheduleReconnect(Duration::from_secs(5))],
            "round {}",
            round
        );
        assert_eq!(
            chan.handle(Utc::now(), ChannelEvent::ReconnectDue),
            vec![ChannelAction::Connect]
        );
        chan.handle(Utc::now(), ChannelEvent::Opened);
    }
}

#[test]
fn fallback_path_seeds_then_synthesizes_in_bounds() {
    let mut chan = new_channel();
    let actions = chan.handle(Utc::now(), ChannelEvent::FallbackDeadline);
    assert_eq!(
        actions,
        vec![ChannelAction::StartSimTicker(Duration::from_secs(15))]
    );
    assert_eq!(chan.state(), ChannelState::FallbackActive);
    assert_eq!(chan.history().len(), 2, "exactly two seed entries");

    let mut at = Utc::now();
    for tick in 0..8 {
        at = at + ChronoDuration::seconds(15);
        let before = chan.history().len();
        chan.handle(at, ChannelEvent::SimTick);
        let after = chan.history().len();
        assert_eq!(after, (before + 1).min(MAX_RECENT), "tick {}", tick);

        let newest = &chan.history().entries()[0];
        assert!(newest.incident_count < 6);
        assert!(newest.response_time_mins >= 2.0 && newest.response_time_mins <= 6.0);
        assert!(newest.safety_score >= 6.0 && newest.safety_score <= 9.5);
        assert_eq!(newest.timestamp, at);
    }
}

#[test]
fn reconnect_loop_keeps_running_under_fallback() {
    let mut chan = new_channel();
    // Initial connect fails before the deadline.
    chan.handle(Utc::now(), ChannelEvent::ErrorOccurred("refused".to_string()));
    let actions = chan.handle(Utc::now(), ChannelEvent::Closed(None));
    assert_eq!(
        actions,
        vec![ChannelAction::ScheduleReconnect(Duration::from_secs(5))]
    );
    chan.handle(Utc::now(), ChannelEvent::FallbackDeadline);
    assert_eq!(chan.state(), ChannelState::FallbackActive);

    // The pending reconnect still fires and still dials.
    assert_eq!(
        chan.handle(Utc::now(), ChannelEvent::ReconnectDue),
        vec![ChannelAction::Connect]
    );
    assert_eq!(chan.state(), ChannelState::FallbackActive);
}

#[test]
fn late_connect_wins_over_fallback() {
    let mut chan = new_channel();
    chan.handle(Utc::now(), ChannelEvent::FallbackDeadline);
    chan.handle(Utc::now(), ChannelEvent::SimTick);
    assert_eq!(chan.history().len(), 3);

    let actions = chan.handle(Utc::now(), ChannelEvent::Opened);
    assert_eq!(actions, vec![ChannelAction::StopSimTicker]);
    assert!(chan.is_connected());

    // Live updates now flow; a stray tick after cancellation is dropped.
    chan.handle(
        Utc::now(),
        ChannelEvent::MessageReceived(update_payload("Midtown", 1)),
    );
    assert_eq!(chan.history().entries()[0].district, "Midtown");
    let len = chan.history().len();
    chan.handle(Utc::now(), ChannelEvent::SimTick);
    assert_eq!(chan.history().len(), len);
}

#[test]
fn teardown_is_final_under_any_later_event() {
    let mut chan = new_channel();
    chan.handle(Utc::now(), ChannelEvent::Opened);
    chan.handle(
        Utc::now(),
        ChannelEvent::MessageReceived(update_payload("Downtown", 2)),
    );
    let actions = chan.handle(Utc::now(), ChannelEvent::Shutdown);
    assert_eq!(
        actions,
        vec![
            ChannelAction::StopSimTicker,
            ChannelAction::CloseTransport(NORMAL_CLOSURE),
        ]
    );

    let frozen = chan.snapshot();
    for event in [
        ChannelEvent::Opened,
        ChannelEvent::MessageReceived(update_payload("Midtown", 3)),
        ChannelEvent::Closed(Some(1006)),
        ChannelEvent::ErrorOccurred("late".to_string()),
        ChannelEvent::ReconnectDue,
        ChannelEvent::FallbackDeadline,
        ChannelEvent::SimTick,
    ] {
        assert!(chan.handle(Utc::now(), event).is_empty());
    }
    let after = chan.snapshot();
    assert_eq!(after.connected, frozen.connected);
    assert_eq!(after.status, frozen.status);
    assert_eq!(after.updates, frozen.updates);
}
