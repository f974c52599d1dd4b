//! Async driver for the live update channel.
//!
//! Owns the socket and the three timers (fallback one-shot, reconnect
//! delay, synthetic ticker), feeds transport lifecycle into the state
//! machine, executes the actions it returns, and publishes a
//! [`FeedSnapshot`] over a watch channel after every event.

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, Sleep};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::{ChannelAction, ChannelEvent, ChannelState, FeedSnapshot, LiveUpdateChannel};
use crate::logging::{json_log, obj, v_str};
use crate::state::{now, Config};

/// Transport lifecycle as seen by the driver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(String),
    Closed(Option<u16>),
    Error(String),
}

/// An open duplex connection. Receive-only apart from the close frame.
#[async_trait]
pub trait Connection: Send {
    /// Next lifecycle event, or `None` once the stream is exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;
    async fn close(&mut self, code: u16);
}

/// Dial seam, so tests can drive the loop without a network.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Box<dyn Connection>>;
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.ws.next().await {
                None => return None,
                Some(Ok(Message::Text(text))) => return Some(TransportEvent::Message(text)),
                Some(Ok(Message::Close(frame))) => {
                    return Some(TransportEvent::Closed(frame.map(|f| f.code.into())));
                }
                // Pings are answered by tungstenite; binary frames are not
                // part of this feed.
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Some(TransportEvent::Error(err.to_string())),
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: code.into(),
            reason: "".into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }
}

pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<Box<dyn Connection>> {
        let (ws, _) = connect_async(url).await?;
        Ok(Box::new(WsConnection { ws }))
    }
}

/// Running feed: snapshot subscription plus shutdown trigger.
pub struct FeedHandle {
    pub snapshots: watch::Receiver<FeedSnapshot>,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Request teardown and wait for the driver to finish its exit path
    /// (timers cancelled, socket closed with code 1000).
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.task.await;
    }
}

/// Spawn the feed against the real WebSocket transport.
pub fn spawn(cfg: Config) -> FeedHandle {
    spawn_with_dialer(cfg, Box::new(WsDialer))
}

pub fn spawn_with_dialer(cfg: Config, dialer: Box<dyn Dialer>) -> FeedHandle {
    let (chan, init) = LiveUpdateChannel::new(&cfg);
    let (snapshot_tx, snapshots) = watch::channel(chan.snapshot());
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let url = cfg.endpoint_url();
    let task = tokio::spawn(run_loop(
        chan,
        init,
        Arc::from(dialer),
        url,
        snapshot_tx,
        shutdown_rx,
    ));
    FeedHandle {
        snapshots,
        shutdown: shutdown_tx,
        task,
    }
}

/// In-flight dial attempt, held as a select branch so the fallback
/// deadline, reconnect timer, and shutdown all stay live while a
/// connection attempt is stuck.
type DialFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Connection>>> + Send>>;

async fn dial_slot(slot: &mut Option<DialFuture>) -> Result<Box<dyn Connection>> {
    match slot.as_mut() {
        Some(attempt) => attempt.as_mut().await,
        None => pending().await,
    }
}

async fn sleep_slot(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn tick_slot(slot: &mut Option<Interval>) {
    match slot.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn conn_event(conn: &mut Option<Box<dyn Connection>>) -> Option<TransportEvent> {
    match conn.as_mut() {
        Some(c) => c.next_event().await,
        None => pending().await,
    }
}

async fn run_loop(
    mut chan: LiveUpdateChannel,
    init: Vec<ChannelAction>,
    dialer: Arc<dyn Dialer>,
    url: String,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut conn: Option<Box<dyn Connection>> = None;
    let mut dialing: Option<DialFuture> = None;
    let mut reconnect: Option<Pin<Box<Sleep>>> = None;
    let mut fallback: Option<Pin<Box<Sleep>>> = None;
    let mut sim: Option<Interval> = None;

    json_log(
        "transport",
        obj(&[("event", v_str("starting")), ("url", v_str(&url))]),
    );

    let mut queue: VecDeque<ChannelAction> = init.into();
    loop {
        // Drain pending actions before waiting for the next event. Connect
        // only arms the dial future; its outcome arrives through the select
        // below, so a stuck dial never holds up the timers or shutdown.
        while let Some(action) = queue.pop_front() {
            match action {
                ChannelAction::Connect => {
                    if dialing.is_none() {
                        let dialer = dialer.clone();
                        let url = url.clone();
                        dialing = Some(Box::pin(async move { dialer.dial(&url).await }));
                    }
                }
                ChannelAction::ScheduleReconnect(delay) => {
                    reconnect = Some(Box::pin(sleep(delay)));
                }
                ChannelAction::ArmFallbackDeadline(delay) => {
                    fallback = Some(Box::pin(sleep(delay)));
                }
                ChannelAction::StartSimTicker(period) => {
                    // First synthetic entry comes one full period after
                    // activation; the seed entries cover the gap.
                    sim = Some(interval_at(Instant::now() + period, period));
                }
                ChannelAction::StopSimTicker => {
                    sim = None;
                }
                ChannelAction::CloseTransport(code) => {
                    if let Some(mut c) = conn.take() {
                        c.close(code).await;
                    }
                }
            }
        }
        let _ = snapshot_tx.send(chan.snapshot());

        if chan.state() == ChannelState::Closed {
            json_log("system", obj(&[("event", v_str("feed_stopped"))]));
            return;
        }

        tokio::select! {
            _ = shutdown_rx.recv() => {
                // Cancel the timers and any in-flight dial on the way out,
                // whatever state we are in.
                dialing = None;
                reconnect = None;
                fallback = None;
                queue.extend(chan.handle(now(), ChannelEvent::Shutdown));
            }
            dialed = dial_slot(&mut dialing) => {
                dialing = None;
                match dialed {
                    Ok(c) => {
                        conn = Some(c);
                        queue.extend(chan.handle(now(), ChannelEvent::Opened));
                    }
                    Err(err) => {
                        queue.extend(chan.handle(now(), ChannelEvent::ErrorOccurred(err.to_string())));
                        queue.extend(chan.handle(now(), ChannelEvent::Closed(None)));
                    }
                }
            }
            event = conn_event(&mut conn) => {
                match event {
                    Some(TransportEvent::Message(text)) => {
                        queue.extend(chan.handle(now(), ChannelEvent::MessageReceived(text)));
                    }
                    Some(TransportEvent::Closed(code)) => {
                        conn = None;
                        queue.extend(chan.handle(now(), ChannelEvent::Closed(code)));
                    }
                    Some(TransportEvent::Error(msg)) => {
                        queue.extend(chan.handle(now(), ChannelEvent::ErrorOccurred(msg)));
                    }
                    None => {
                        conn = None;
                        queue.extend(chan.handle(now(), ChannelEvent::Closed(None)));
                    }
                }
            }
            _ = sleep_slot(&mut reconnect) => {
                reconnect = None;
                queue.extend(chan.handle(now(), ChannelEvent::ReconnectDue));
            }
            _ = sleep_slot(&mut fallback) => {
                fallback = None;
                queue.extend(chan.handle(now(), ChannelEvent::FallbackDeadline));
            }
            _ = tick_slot(&mut sim) => {
                queue.extend(chan.handle(now(), ChannelEvent::SimTick));
            }
        }
    }
}
