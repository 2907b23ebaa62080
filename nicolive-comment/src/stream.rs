//! Shared plumbing of the entry and segment streams

use bytes::Bytes;
use futures::StreamExt;
use nicolive_proto::FrameExtractor;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::{ClientError, Result};
use crate::http::{ByteStream, HttpFetcher};

/// A length-delimited HTTP body, read one network chunk at a time.
pub(crate) struct FramedBody {
    body: ByteStream,
    extractor: FrameExtractor,
    inactivity: Duration,
}

impl FramedBody {
    /// Open `url`, failing if the response headers take longer than the
    /// connect timeout.
    pub async fn open(fetcher: &dyn HttpFetcher, url: &str, config: &StreamConfig) -> Result<Self> {
        let connect_timeout = config.connect_timeout();
        let body = timeout(connect_timeout, fetcher.open(url))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                url: url.to_string(),
                timeout_ms: connect_timeout.as_millis() as u64,
            })??;

        Ok(Self {
            body,
            extractor: FrameExtractor::with_limits(config.max_frame_size, config.max_buffer_size),
            inactivity: config.inactivity_timeout(),
        })
    }

    /// Frames completed by the next chunk, or `None` once the body ends.
    ///
    /// Fails when no chunk arrives within the inactivity timeout.
    pub async fn next_frames(&mut self) -> Result<Option<Vec<Bytes>>> {
        let chunk = timeout(self.inactivity, self.body.next())
            .await
            .map_err(|_| ClientError::InactivityTimeout)?;

        match chunk {
            Some(chunk) => Ok(Some(self.extractor.push(&chunk?)?)),
            None => Ok(None),
        }
    }

    pub fn discarded_frames(&self) -> u64 {
        self.extractor.discarded_frames()
    }
}

/// A spawned stream reader owned by the session. Dropping it stops the task.
pub(crate) struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamTask {
    pub fn spawn<F, Fut>(parent: &CancellationToken, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let handle = tokio::spawn(f(cancel.clone()));
        Self { cancel, handle }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}
