//! Backward (history) chain retrieval
//!
//! The chain is linked newest to oldest: each packed segment points at the
//! previous one. Every hop is fetched and buffered first, then replayed
//! oldest-first so consumers see history in chronological order.

use nicolive_proto::{decode_packed_segment, Payload};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BacklogConfig;
use crate::error::ClientError;
use crate::events::{payload_kind, EventKind};
use crate::http::HttpFetcher;
use crate::sink::EventSink;
use crate::stream::StreamTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacklogEvent {
    Payload(Payload),
    /// Fetching stopped early; hops already fetched are still replayed
    Error(String),
    /// Replay finished without cancellation
    Complete,
}

pub struct BacklogChain {
    task: StreamTask,
}

impl BacklogChain {
    pub fn spawn(
        fetcher: Arc<dyn HttpFetcher>,
        head_uri: String,
        config: BacklogConfig,
        sink: EventSink<BacklogEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let task = StreamTask::spawn(parent, move |cancel| async move {
            let hops = fetch_hops(fetcher.as_ref(), head_uri, &config, &sink, &cancel).await;
            if cancel.is_cancelled() {
                return;
            }

            let total: usize = hops.iter().map(Vec::len).sum();
            info!(hops = hops.len(), messages = total, "Replaying backlog");

            for payload in replay_order(hops, &config.events) {
                if cancel.is_cancelled() {
                    return;
                }
                sink(BacklogEvent::Payload(payload));
            }

            if !cancel.is_cancelled() {
                sink(BacklogEvent::Complete);
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}

/// Walk the chain from `head_uri`, newest hop first.
async fn fetch_hops(
    fetcher: &dyn HttpFetcher,
    head_uri: String,
    config: &BacklogConfig,
    sink: &EventSink<BacklogEvent>,
    cancel: &CancellationToken,
) -> Vec<Vec<Payload>> {
    let hop_timeout = Duration::from_millis(config.hop_timeout_ms);
    let hop_delay = Duration::from_millis(config.hop_delay_ms);

    let mut hops = Vec::new();
    let mut next = Some(head_uri);

    while let Some(uri) = next.take() {
        if hops.len() >= config.max_depth {
            warn!(max_depth = config.max_depth, "Backlog chain depth limit reached");
            break;
        }

        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = timeout(hop_timeout, fetcher.fetch(&uri, config.max_response_size)) => r,
        };

        let body = match fetched {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(uri = %uri, error = %e, "Backlog fetch failed");
                sink(BacklogEvent::Error(e.to_string()));
                break;
            }
            Err(_) => {
                let e = ClientError::ConnectTimeout {
                    url: uri.clone(),
                    timeout_ms: config.hop_timeout_ms,
                };
                warn!(uri = %uri, "Backlog fetch timed out");
                sink(BacklogEvent::Error(e.to_string()));
                break;
            }
        };

        match decode_packed_segment(&body) {
            Ok(packed) => {
                debug!(uri = %uri, messages = packed.messages.len(), "Fetched backlog hop");
                hops.push(packed.messages);
                next = packed.next_uri;
            }
            Err(e) => {
                warn!(uri = %uri, error = %e, "Malformed backlog segment");
                sink(BacklogEvent::Error(ClientError::from(e).to_string()));
                break;
            }
        }

        if next.is_some() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(hop_delay) => {}
            }
        }
    }

    hops
}

/// Flatten hops fetched newest-first into chronological order, keeping only
/// payloads of the `allowed` kinds.
pub fn replay_order(
    hops: Vec<Vec<Payload>>,
    allowed: &HashSet<EventKind>,
) -> impl Iterator<Item = Payload> + '_ {
    hops.into_iter()
        .rev()
        .flatten()
        .filter(move |p| payload_kind(p).is_some_and(|kind| allowed.contains(&kind)))
}
