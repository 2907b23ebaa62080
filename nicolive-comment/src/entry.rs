//! Entry (message server view) stream
//!
//! The view endpoint announces segment pointers, the head of the backward
//! chain, and a resume cursor at which the stream should be reopened.

use nicolive_proto::decode_entry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::StreamConfig;
use crate::error::Result;
use crate::http::HttpFetcher;
use crate::sink::EventSink;
use crate::stream::{FramedBody, StreamTask};

/// Position the view endpoint is opened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Now,
    At(i64),
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Now => f.write_str("now"),
            Self::At(at) => write!(f, "{at}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryEvent {
    Segment(String),
    Backward(String),
    /// Reopen the view endpoint at this cursor
    NextAt(i64),
    End,
    Error(String),
}

/// `view_uri` with `at=<cursor>` appended to its query.
pub fn entry_url(view_uri: &str, cursor: Cursor) -> Result<String> {
    let mut url = Url::parse(view_uri)?;
    url.query_pairs_mut().append_pair("at", &cursor.to_string());
    Ok(url.into())
}

pub struct EntryStream {
    task: StreamTask,
    cursor: Cursor,
}

impl EntryStream {
    pub fn spawn(
        fetcher: Arc<dyn HttpFetcher>,
        view_uri: String,
        cursor: Cursor,
        config: StreamConfig,
        sink: EventSink<EntryEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let task = StreamTask::spawn(parent, move |cancel| async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                r = read(fetcher.as_ref(), &view_uri, cursor, &config, &sink) => r,
            };
            match result {
                Ok(()) => {
                    info!(cursor = %cursor, "Entry stream ended");
                    sink(EntryEvent::End);
                }
                Err(e) => {
                    warn!(cursor = %cursor, error = %e, "Entry stream failed");
                    sink(EntryEvent::Error(e.to_string()));
                }
            }
        });
        Self { task, cursor }
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}

async fn read(
    fetcher: &dyn HttpFetcher,
    view_uri: &str,
    cursor: Cursor,
    config: &StreamConfig,
    sink: &EventSink<EntryEvent>,
) -> Result<()> {
    let url = entry_url(view_uri, cursor)?;
    let mut body = FramedBody::open(fetcher, &url, config).await?;
    debug!(url = %url, "Entry stream opened");

    while let Some(frames) = body.next_frames().await? {
        let mut next_at = None;
        for frame in frames {
            match decode_entry(&frame) {
                Ok(entry) => {
                    if let Some(uri) = entry.segment_uri {
                        sink(EntryEvent::Segment(uri));
                    }
                    if let Some(uri) = entry.backward_uri {
                        sink(EntryEvent::Backward(uri));
                    }
                    if entry.next_at.is_some() {
                        next_at = entry.next_at;
                    }
                }
                Err(e) => warn!(error = %e, len = frame.len(), "Skipping malformed entry frame"),
            }
        }
        // Pointers of this read go out before the cursor
        if let Some(at) = next_at {
            sink(EntryEvent::NextAt(at));
        }
    }

    if body.discarded_frames() > 0 {
        warn!(discarded = body.discarded_frames(), "Entry stream dropped oversized frames");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::http::ByteStream;
    use crate::sink::channel_sink;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use nicolive_proto::messages::{
        packed_segment, BackwardSegment, ChunkedEntry, MessageSegment, ReadyForNext,
    };
    use prost::Message;
    use std::sync::Mutex;

    /// Serves a fixed list of chunks for every URL and records requests.
    struct ScriptedFetcher {
        chunks: Vec<Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpFetcher for ScriptedFetcher {
        async fn open(&self, url: &str) -> Result<ByteStream> {
            self.requested.lock().unwrap().push(url.to_string());
            let chunks: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .collect();
            Ok(futures::stream::iter(chunks).boxed())
        }

        async fn fetch(&self, _url: &str, _max_size: usize) -> Result<Bytes> {
            Err(ClientError::Network("unused".to_string()))
        }
    }

    fn framed(entry: &ChunkedEntry) -> Vec<u8> {
        entry.encode_length_delimited_to_vec()
    }

    fn segment_entry(uri: &str) -> ChunkedEntry {
        ChunkedEntry {
            segment: Some(MessageSegment {
                from: None,
                until: None,
                uri: uri.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_entry_url() {
        assert_eq!(
            entry_url("https://mpn.example/view/v4?x=1", Cursor::Now).unwrap(),
            "https://mpn.example/view/v4?x=1&at=now"
        );
        assert_eq!(
            entry_url("https://mpn.example/view/v4", Cursor::At(1_700_000_000)).unwrap(),
            "https://mpn.example/view/v4?at=1700000000"
        );
        assert!(entry_url("not a url", Cursor::Now).is_err());
    }

    #[tokio::test]
    async fn test_pointers_precede_cursor_within_a_read() {
        let mut chunk = Vec::new();
        chunk.extend(framed(&ChunkedEntry {
            next: Some(ReadyForNext { at: 100 }),
            ..Default::default()
        }));
        chunk.extend(framed(&segment_entry("https://mpn.example/seg/1")));
        chunk.extend(framed(&ChunkedEntry {
            backward: Some(BackwardSegment {
                until: None,
                segment: Some(packed_segment::Next {
                    uri: "https://mpn.example/packed/1".to_string(),
                }),
            }),
            ..Default::default()
        }));
        chunk.extend(framed(&ChunkedEntry {
            next: Some(ReadyForNext { at: 200 }),
            ..Default::default()
        }));
        chunk.extend([0x03, 0xff, 0xff, 0xff]); // malformed frame

        let fetcher = Arc::new(ScriptedFetcher {
            chunks: vec![chunk],
            requested: Mutex::new(Vec::new()),
        });
        let (sink, mut events) = channel_sink();
        let _stream = EntryStream::spawn(
            fetcher.clone(),
            "https://mpn.example/view".to_string(),
            Cursor::Now,
            StreamConfig::default(),
            sink,
            &CancellationToken::new(),
        );

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, EntryEvent::End | EntryEvent::Error(_));
            seen.push(event);
            if done {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                EntryEvent::Segment("https://mpn.example/seg/1".to_string()),
                EntryEvent::Backward("https://mpn.example/packed/1".to_string()),
                EntryEvent::NextAt(200),
                EntryEvent::End,
            ]
        );
        assert_eq!(
            fetcher.requested.lock().unwrap().as_slice(),
            ["https://mpn.example/view?at=now"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout() {
        struct SilentFetcher;

        #[async_trait]
        impl HttpFetcher for SilentFetcher {
            async fn open(&self, _url: &str) -> Result<ByteStream> {
                Ok(futures::stream::pending().boxed())
            }

            async fn fetch(&self, _url: &str, _max_size: usize) -> Result<Bytes> {
                Err(ClientError::Network("unused".to_string()))
            }
        }

        let (sink, mut events) = channel_sink();
        let _stream = EntryStream::spawn(
            Arc::new(SilentFetcher),
            "https://mpn.example/view".to_string(),
            Cursor::At(5),
            StreamConfig::default(),
            sink,
            &CancellationToken::new(),
        );

        let started = tokio::time::Instant::now();
        assert_eq!(
            events.recv().await,
            Some(EntryEvent::Error("Stream inactivity timeout".to_string()))
        );
        assert_eq!(started.elapsed().as_secs(), 60);
    }

    #[tokio::test]
    async fn test_stop_suppresses_events() {
        let fetcher = Arc::new(ScriptedFetcher {
            chunks: vec![framed(&segment_entry("https://mpn.example/seg/1"))],
            requested: Mutex::new(Vec::new()),
        });
        let (sink, mut events) = channel_sink();
        let parent = CancellationToken::new();
        parent.cancel();
        let stream = EntryStream::spawn(
            fetcher,
            "https://mpn.example/view".to_string(),
            Cursor::Now,
            StreamConfig::default(),
            sink,
            &parent,
        );
        stream.stop();
        assert_eq!(stream.cursor(), Cursor::Now);
        assert_eq!(events.recv().await, None);
    }
}
