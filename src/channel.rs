//! Connection/fallback state machine for the live security feed.
//!
//! The machine is pure event-in, actions-out: the async driver in
//! `feed.rs` owns the socket and the timers, translates transport
//! lifecycle into [`ChannelEvent`]s, and executes the returned
//! [`ChannelAction`]s. That keeps every transition testable by feeding
//! synthetic events, without a live transport.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::logging::{json_log, obj, v_str};
use crate::sim;
use crate::state::Config;
use crate::update::{SecurityUpdate, UpdateHistory, SECURITY_UPDATE_TAG};

/// Conventional deliberate-close code.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Attempting to open the transport (initial state, and after each
    /// reconnect delay elapses).
    Connecting,
    Connected,
    /// Terminal: the peer closed deliberately (code 1000). No retries.
    Disconnected,
    /// Abnormal closure observed; a reconnect is pending.
    Reconnecting,
    /// The fallback deadline passed without a connection; synthetic data
    /// is being generated locally.
    FallbackActive,
    /// Terminal: deliberate local shutdown.
    Closed,
}

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened,
    MessageReceived(String),
    Closed(Option<u16>),
    ErrorOccurred(String),
    /// The reconnect delay elapsed.
    ReconnectDue,
    /// The one-shot fallback-activation deadline fired.
    FallbackDeadline,
    /// The recurring synthetic-update timer fired.
    SimTick,
    Shutdown,
}

/// Side effects the driver must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open (or re-open) the transport.
    Connect,
    ScheduleReconnect(Duration),
    ArmFallbackDeadline(Duration),
    StartSimTicker(Duration),
    StopSimTicker,
    /// Close the transport with the given code if it is still open.
    CloseTransport(u16),
}

/// What the display layer subscribes to.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub connected: bool,
    pub status: String,
    pub updates: Vec<SecurityUpdate>,
}

pub struct LiveUpdateChannel {
    state: ChannelState,
    connected: bool,
    status: String,
    history: UpdateHistory,
    reconnect_delay: Duration,
    fallback_deadline: Duration,
    sim_period: Duration,
}

impl LiveUpdateChannel {
    /// Construct the channel. The returned actions open the transport and
    /// arm the one-shot fallback deadline.
    pub fn new(cfg: &Config) -> (Self, Vec<ChannelAction>) {
        let chan = Self {
            state: ChannelState::Connecting,
            connected: false,
            status: "Connecting".to_string(),
            history: UpdateHistory::new(),
            reconnect_delay: Duration::from_secs(cfg.reconnect_delay_secs),
            fallback_deadline: Duration::from_secs(cfg.fallback_deadline_secs),
            sim_period: Duration::from_secs(cfg.sim_period_secs),
        };
        let actions = vec![
            ChannelAction::Connect,
            ChannelAction::ArmFallbackDeadline(chan.fallback_deadline),
        ];
        (chan, actions)
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn history(&self) -> &UpdateHistory {
        &self.history
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            connected: self.connected,
            status: self.status.clone(),
            updates: self.history.to_vec(),
        }
    }

    /// Single dispatch entry point. `now` stamps received and synthetic
    /// updates; the machine never reads the clock itself.
    pub fn handle(&mut self, now: DateTime<Utc>, event: ChannelEvent) -> Vec<ChannelAction> {
        if self.state == ChannelState::Closed {
            return Vec::new();
        }
        match event {
            ChannelEvent::Opened => self.on_opened(),
            ChannelEvent::MessageReceived(text) => self.on_message(now, &text),
            ChannelEvent::Closed(code) => self.on_closed(code),
            ChannelEvent::ErrorOccurred(msg) => self.on_error(&msg),
            ChannelEvent::ReconnectDue => self.on_reconnect_due(),
            ChannelEvent::FallbackDeadline => self.on_fallback_deadline(now),
            ChannelEvent::SimTick => self.on_sim_tick(now),
            ChannelEvent::Shutdown => self.on_shutdown(),
        }
    }

    fn transition(&mut self, next: ChannelState) {
        if self.state != next {
            json_log(
                "channel",
                obj(&[
                    ("prev_state", v_str(&format!("{:?}", self.state))),
                    ("new_state", v_str(&format!("{:?}", next))),
                ]),
            );
            self.state = next;
        }
    }

    fn on_opened(&mut self) -> Vec<ChannelAction> {
        let was_fallback = self.state == ChannelState::FallbackActive;
        self.transition(ChannelState::Connected);
        self.connected = true;
        self.status = "Connected".to_string();
        if was_fallback {
            // Live feed won the race: the synthetic source must stop so the
            // two never interleave. Seeded entries age out on their own.
            json_log("fallback", obj(&[("event", v_str("cancelled_by_connect"))]));
            vec![ChannelAction::StopSimTicker]
        } else {
            Vec::new()
        }
    }

    fn on_message(&mut self, now: DateTime<Utc>, text: &str) -> Vec<ChannelAction> {
        if !self.connected {
            return Vec::new();
        }
        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => {
                json_log(
                    "channel",
                    obj(&[
                        ("event", v_str("parse_error")),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                return Vec::new();
            }
        };
        // Other message kinds may share the wire; ignore them quietly.
        if payload.get("type").and_then(Value::as_str) != Some(SECURITY_UPDATE_TAG) {
            return Vec::new();
        }
        let update = SecurityUpdate::from_value(&payload, now);
        self.history.prepend(update);
        Vec::new()
    }

    fn on_closed(&mut self, code: Option<u16>) -> Vec<ChannelAction> {
        self.connected = false;
        if code == Some(NORMAL_CLOSURE) {
            self.transition(ChannelState::Disconnected);
            self.status = "Disconnected".to_string();
            return Vec::new();
        }
        self.status = match code {
            Some(c) => format!("Connection lost (code {}), retrying", c),
            None => "Connection lost, retrying".to_string(),
        };
        // Fallback, once active, keeps producing while the reconnect loop
        // runs underneath it.
        if self.state != ChannelState::FallbackActive {
            self.transition(ChannelState::Reconnecting);
        }
        vec![ChannelAction::ScheduleReconnect(self.reconnect_delay)]
    }

    fn on_error(&mut self, msg: &str) -> Vec<ChannelAction> {
        // The closure event that follows drives the reconnect.
        self.connected = false;
        self.status = format!("Connection error: {}", msg);
        json_log(
            "transport",
            obj(&[("event", v_str("error")), ("error", v_str(msg))]),
        );
        Vec::new()
    }

    fn on_reconnect_due(&mut self) -> Vec<ChannelAction> {
        if self.state == ChannelState::Disconnected {
            return Vec::new();
        }
        if self.state != ChannelState::FallbackActive {
            self.transition(ChannelState::Connecting);
            self.status = "Connecting".to_string();
        }
        vec![ChannelAction::Connect]
    }

    fn on_fallback_deadline(&mut self, now: DateTime<Utc>) -> Vec<ChannelAction> {
        if self.state == ChannelState::Connected {
            return Vec::new();
        }
        self.transition(ChannelState::FallbackActive);
        self.status = "Live feed unavailable - showing simulated data".to_string();
        for update in sim::seed_updates(now).into_iter().rev() {
            self.history.prepend(update);
        }
        json_log("fallback", obj(&[("event", v_str("activated"))]));
        vec![ChannelAction::StartSimTicker(self.sim_period)]
    }

    fn on_sim_tick(&mut self, now: DateTime<Utc>) -> Vec<ChannelAction> {
        // A tick may still be in flight after cancellation; drop it.
        if self.state != ChannelState::FallbackActive {
            return Vec::new();
        }
        self.history.prepend(sim::synthetic_update(now));
        Vec::new()
    }

    fn on_shutdown(&mut self) -> Vec<ChannelAction> {
        self.transition(ChannelState::Closed);
        self.connected = false;
        self.status = "Closed".to_string();
        vec![
            ChannelAction::StopSimTicker,
            ChannelAction::CloseTransport(NORMAL_CLOSURE),
        ]
    }
}
