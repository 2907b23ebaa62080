//! WebSocket transport for the control channel

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

const CHANNEL_CAPACITY: usize = 64;

/// Text-level view of an open signaling connection.
///
/// Dropping `outgoing` closes the socket. `incoming` ends when the remote side
/// closes; a transport failure is delivered as an `Err` before the end.
pub struct SignalingLink {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<Result<String>>,
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SignalingLink>;
}

/// [`SignalingConnector`] backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<SignalingLink> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                url: url.to_string(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })??;
        debug!(url = %url, "Signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Result<String>>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    () = in_tx.closed() => break,
                    msg = ws_read.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(Ok(text.as_str().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Signaling websocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Signaling websocket error");
                        let _ = in_tx.send(Err(e.into())).await;
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(SignalingLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
