//! Control channel: the signaling WebSocket that keeps a viewer seat
//!
//! Sends `startWatching` on open, answers `ping`, sends `keepSeat` on the
//! server-requested interval, and surfaces the message server URI along with
//! remote disconnects and errors.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::error::{ClientError, Result};
use crate::signaling::{SignalingConnector, SignalingLink};
use crate::sink::EventSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Entry endpoint (`messageServer.viewUri`)
    MessageServer(String),
    /// Server asked the client to leave
    Disconnect(String),
    /// Protocol or transport error; the channel stays up
    Error(String),
    /// Socket closed without a local `close()`
    Closed,
}

#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

fn start_watching() -> String {
    json!({
        "type": "startWatching",
        "data": {
            "stream": {
                "quality": "abr",
                "protocol": "hls",
                "latency": "low",
                "chasePlay": false,
            },
            "room": {
                "protocol": "webSocket",
                "commentable": false,
            },
            "reconnect": false,
        },
    })
    .to_string()
}

/// Handle to a running control channel. Dropping it closes the channel.
pub struct ControlChannel {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ControlChannel {
    /// Connect and send `startWatching`.
    ///
    /// Server messages queue on the returned link until [`Self::start`].
    pub async fn handshake(connector: &dyn SignalingConnector, url: &str) -> Result<SignalingLink> {
        let link = connector.connect(url).await?;
        link.outgoing
            .send(start_watching())
            .await
            .map_err(|_| ClientError::ControlChannel("closed before startWatching".to_string()))?;
        info!(url = %url, "Control channel opened");
        Ok(link)
    }

    /// Start serving a link returned by [`Self::handshake`].
    pub fn start(
        link: SignalingLink,
        config: ControlConfig,
        sink: EventSink<ControlEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let handle = tokio::spawn(run(link, config, sink, cancel.clone()));
        Self { cancel, handle }
    }

    /// Stop the keep-seat timer and close the socket. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn run(
    link: SignalingLink,
    config: ControlConfig,
    sink: EventSink<ControlEvent>,
    cancel: CancellationToken,
) {
    let SignalingLink {
        outgoing,
        mut incoming,
    } = link;
    let mut keep_seat: Option<Interval> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Control channel closed locally");
                break;
            }
            msg = incoming.recv() => match msg {
                Some(Ok(text)) => {
                    handle_text(&text, &config, &outgoing, &mut keep_seat, &sink).await;
                }
                Some(Err(e)) => sink(ControlEvent::Error(e.to_string())),
                None => {
                    info!("Control channel closed by server");
                    keep_seat = None;
                    sink(ControlEvent::Closed);
                    break;
                }
            },
            () = next_tick(&mut keep_seat) => {
                debug!("Sending keepSeat");
                let _ = outgoing.send(json!({ "type": "keepSeat" }).to_string()).await;
            }
        }
    }

    // Timer goes before the socket
    drop(keep_seat);
    drop(outgoing);
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn handle_text(
    text: &str,
    config: &ControlConfig,
    outgoing: &mpsc::Sender<String>,
    keep_seat: &mut Option<Interval>,
    sink: &EventSink<ControlEvent>,
) {
    let Ok(message) = serde_json::from_str::<Inbound>(text) else {
        debug!(len = text.len(), "Ignoring unparseable control message");
        return;
    };
    let data = message.data.unwrap_or(Value::Null);

    match message.kind.as_str() {
        "messageServer" => {
            if let Some(uri) = data.get("viewUri").and_then(Value::as_str) {
                debug!(view_uri = %uri, "Message server announced");
                sink(ControlEvent::MessageServer(uri.to_string()));
            }
        }
        "seat" => {
            let period = config.keep_interval(data.get("keepIntervalSec").and_then(number));
            debug!(interval_secs = period.as_secs(), "Starting keepSeat timer");
            *keep_seat = Some(keep_seat_timer(period));
        }
        "ping" => {
            let _ = outgoing.send(json!({ "type": "pong" }).to_string()).await;
        }
        "disconnect" => {
            let reason = data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            warn!(reason = %reason, "Server requested disconnect");
            sink(ControlEvent::Disconnect(reason.to_string()));
        }
        "error" => {
            let msg = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("WebSocket error");
            warn!(error = %msg, "Control channel error message");
            sink(ControlEvent::Error(msg.to_string()));
        }
        other => debug!(kind = %other, "Unhandled control message"),
    }
}

fn keep_seat_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Numbers, and strings holding numbers, as the server may send either.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
