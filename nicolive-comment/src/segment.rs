//! Segment stream: one live segment's chunked messages, in arrival order

use nicolive_proto::{decode_chunked_message, Payload};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::error::Result;
use crate::http::HttpFetcher;
use crate::sink::EventSink;
use crate::stream::{FramedBody, StreamTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    Payload(Payload),
    /// Segment body exhausted
    End,
    Error(String),
}

pub struct SegmentStream {
    task: StreamTask,
}

impl SegmentStream {
    pub fn spawn(
        fetcher: Arc<dyn HttpFetcher>,
        uri: String,
        config: StreamConfig,
        sink: EventSink<SegmentEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let task = StreamTask::spawn(parent, move |cancel| async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                r = read(fetcher.as_ref(), &uri, &config, &sink) => r,
            };
            match result {
                Ok(count) => {
                    debug!(uri = %uri, messages = count, "Segment stream ended");
                    sink(SegmentEvent::End);
                }
                Err(e) => {
                    warn!(uri = %uri, error = %e, "Segment stream failed");
                    sink(SegmentEvent::Error(e.to_string()));
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}

async fn read(
    fetcher: &dyn HttpFetcher,
    uri: &str,
    config: &StreamConfig,
    sink: &EventSink<SegmentEvent>,
) -> Result<usize> {
    let mut body = FramedBody::open(fetcher, uri, config).await?;
    let mut count = 0;

    while let Some(frames) = body.next_frames().await? {
        for frame in frames {
            match decode_chunked_message(&frame) {
                Ok(Some(payload)) => {
                    count += 1;
                    sink(SegmentEvent::Payload(payload));
                }
                Ok(None) => {}
                Err(e) => warn!(uri = %uri, error = %e, "Skipping malformed segment frame"),
            }
        }
    }

    if body.discarded_frames() > 0 {
        warn!(uri = %uri, discarded = body.discarded_frames(), "Segment stream dropped oversized frames");
    }

    Ok(count)
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
    use nicolive_proto::messages::{chunked_message, nicolive_message, Chat, ChunkedMessage, NicoliveMessage};
    use prost::Message;

    /// Replays `chunks`; an `Err` holds the message of a network failure.
    struct OneShotFetcher {
        chunks: Vec<std::result::Result<Bytes, String>>,
    }

    #[async_trait]
    impl HttpFetcher for OneShotFetcher {
        async fn open(&self, _url: &str) -> Result<ByteStream> {
            let chunks: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(b) => Ok(b.clone()),
                    Err(msg) => Err(ClientError::Network(msg.clone())),
                })
                .collect();
            Ok(futures::stream::iter(chunks).boxed())
        }

        async fn fetch(&self, _url: &str, _max_size: usize) -> Result<Bytes> {
            Err(ClientError::Network("unused".to_string()))
        }
    }

    fn chat_frame(no: i32) -> Vec<u8> {
        ChunkedMessage {
            payload: Some(chunked_message::Payload::Message(NicoliveMessage {
                data: Some(nicolive_message::Data::Chat(Chat {
                    content: format!("m{no}"),
                    no,
                    ..Default::default()
                })),
            })),
        }
        .encode_length_delimited_to_vec()
    }

    async fn collect(fetcher: OneShotFetcher) -> Vec<SegmentEvent> {
        let (sink, mut events) = channel_sink();
        let _stream = SegmentStream::spawn(
            Arc::new(fetcher),
            "https://mpn.example/seg/1".to_string(),
            StreamConfig::default(),
            sink,
            &CancellationToken::new(),
        );
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, SegmentEvent::End | SegmentEvent::Error(_));
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn chat_no(event: &SegmentEvent) -> Option<i32> {
        match event {
            SegmentEvent::Payload(Payload::Chat(chat)) => Some(chat.no),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_emits_payloads_across_split_chunks() {
        let mut data = chat_frame(1);
        data.extend(chat_frame(2));
        data.extend(chat_frame(3));
        let (a, b) = data.split_at(data.len() / 2 + 1);

        let seen = collect(OneShotFetcher {
            chunks: vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))],
        })
        .await;

        let numbers: Vec<i32> = seen.iter().filter_map(chat_no).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(seen.last(), Some(&SegmentEvent::End));
    }

    #[tokio::test]
    async fn test_transport_error_after_payloads() {
        let seen = collect(OneShotFetcher {
            chunks: vec![
                Ok(Bytes::from(chat_frame(9))),
                Err("reset".to_string()),
            ],
        })
        .await;

        assert_eq!(chat_no(&seen[0]), Some(9));
        assert_eq!(
            seen.last(),
            Some(&SegmentEvent::Error("Network error: reset".to_string()))
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped() {
        let mut data = Vec::new();
        prost::encoding::encode_varint(32, &mut data);
        data.extend([0u8; 32]);
        data.extend(chat_frame(5));

        let (sink, mut events) = channel_sink();
        let config = StreamConfig {
            max_frame_size: 16,
            ..StreamConfig::default()
        };
        let _stream = SegmentStream::spawn(
            Arc::new(OneShotFetcher {
                chunks: vec![Ok(Bytes::from(data))],
            }),
            "https://mpn.example/seg/1".to_string(),
            config,
            sink,
            &CancellationToken::new(),
        );
        assert_eq!(events.recv().await.as_ref().and_then(chat_no), Some(5));
        assert_eq!(events.recv().await, Some(SegmentEvent::End));
    }

    #[tokio::test]
    async fn test_buffer_overflow_aborts_stream() {
        // Declares a 1 KiB frame against a 64 byte buffer cap
        let mut data = Vec::new();
        prost::encoding::encode_varint(1024, &mut data);
        data.extend(vec![0u8; 100]);

        let (sink, mut events) = channel_sink();
        let config = StreamConfig {
            max_frame_size: 4096,
            max_buffer_size: 64,
            ..StreamConfig::default()
        };
        let _stream = SegmentStream::spawn(
            Arc::new(OneShotFetcher {
                chunks: vec![Ok(Bytes::from(data))],
            }),
            "https://mpn.example/seg/1".to_string(),
            config,
            sink,
            &CancellationToken::new(),
        );
        assert!(matches!(events.recv().await, Some(SegmentEvent::Error(_))));
    }
}
