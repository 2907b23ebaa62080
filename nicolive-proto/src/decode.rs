//! Typed decoding of stream frames
//!
//! Each function decodes exactly one frame payload (length prefix already
//! removed by [`crate::FrameExtractor`]). A malformed frame yields an error that
//! callers log and skip; unknown fields never fail decoding.

use prost::Message;
use serde::Serialize;
use thiserror::Error;

use crate::messages::{
    self, chunked_message, nicolive_message, simple_notification_v2::NotificationType,
    ChunkedEntry, ChunkedMessage,
};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Malformed protobuf: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Pointers announced by one frame of the message server stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Segment stream to open (`segment`, or `previous` when absent)
    pub segment_uri: Option<String>,
    /// Head of the backward (history) chain
    pub backward_uri: Option<String>,
    /// Cursor for reopening the message stream (unix seconds)
    pub next_at: Option<i64>,
}

/// Chat as delivered by the segment server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NicoChat {
    pub no: i32,
    pub vpos: i32,
    pub content: String,
    pub name: Option<String>,
    pub raw_user_id: Option<i64>,
    pub hashed_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NicoGift {
    pub item_id: String,
    pub advertiser_user_id: Option<i64>,
    pub advertiser_name: String,
    pub point: i64,
    pub message: String,
    pub item_name: String,
    pub contribution_rank: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NicoEmotion {
    pub content: String,
}

/// Notification categories (every `NotificationType` except emotion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Unknown,
    Ichiba,
    Cruise,
    ProgramExtended,
    RankingIn,
    Visited,
    SupporterRegistered,
    UserLevelUp,
    UserFollow,
}

impl NotificationKind {
    /// Map a raw notification type code.
    ///
    /// Returns `None` for the emotion code (2), which is delivered as an
    /// emotion instead. Codes outside the table map to `Unknown`.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match NotificationType::try_from(code) {
            Ok(NotificationType::Emotion) => return None,
            Ok(NotificationType::Unknown) | Err(_) => Self::Unknown,
            Ok(NotificationType::Ichiba) => Self::Ichiba,
            Ok(NotificationType::Cruise) => Self::Cruise,
            Ok(NotificationType::ProgramExtended) => Self::ProgramExtended,
            Ok(NotificationType::RankingIn) => Self::RankingIn,
            Ok(NotificationType::Visited) => Self::Visited,
            Ok(NotificationType::SupporterRegistered) => Self::SupporterRegistered,
            Ok(NotificationType::UserLevelUp) => Self::UserLevelUp,
            Ok(NotificationType::UserFollow) => Self::UserFollow,
        };
        Some(kind)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ichiba => "ichiba",
            Self::Cruise => "cruise",
            Self::ProgramExtended => "program_extended",
            Self::RankingIn => "ranking_in",
            Self::Visited => "visited",
            Self::SupporterRegistered => "supporter_registered",
            Self::UserLevelUp => "user_level_up",
            Self::UserFollow => "user_follow",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NicoNotification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NicoOperatorComment {
    pub content: String,
    pub name: Option<String>,
    pub link: Option<String>,
}

/// The single payload carried by a chunked message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Chat(NicoChat),
    Gift(NicoGift),
    Emotion(NicoEmotion),
    Notification(NicoNotification),
    OperatorComment(NicoOperatorComment),
    /// End-of-batch signal
    Flushed,
}

/// Decoded body of a backward segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedSegment {
    /// Recognised payloads in their original (chronological) order
    pub messages: Vec<Payload>,
    /// Next (older) packed segment in the chain
    pub next_uri: Option<String>,
}

pub fn decode_entry(frame: &[u8]) -> Result<Entry, WireError> {
    let raw = ChunkedEntry::decode(frame)?;

    let segment_uri = non_empty(raw.segment.map(|s| s.uri))
        .or_else(|| non_empty(raw.previous.map(|s| s.uri)));
    let backward_uri = non_empty(raw.backward.and_then(|b| b.segment).map(|n| n.uri));
    let next_at = raw.next.map(|n| n.at).filter(|at| *at != 0);

    Ok(Entry {
        segment_uri,
        backward_uri,
        next_at,
    })
}

/// Decode a segment-stream frame. `Ok(None)` means the frame carried nothing
/// this client consumes (nicoad, statistics, ...).
pub fn decode_chunked_message(frame: &[u8]) -> Result<Option<Payload>, WireError> {
    let raw = ChunkedMessage::decode(frame)?;
    Ok(raw.payload.and_then(payload_from_raw))
}

pub fn decode_packed_segment(data: &[u8]) -> Result<PackedSegment, WireError> {
    let raw = messages::PackedSegment::decode(data)?;

    let messages = raw
        .messages
        .into_iter()
        .filter_map(|m| m.payload.and_then(payload_from_raw))
        .collect();

    Ok(PackedSegment {
        messages,
        next_uri: non_empty(raw.next.map(|n| n.uri)),
    })
}

fn payload_from_raw(payload: chunked_message::Payload) -> Option<Payload> {
    match payload {
        chunked_message::Payload::Message(message) => message.data.and_then(payload_from_data),
        chunked_message::Payload::State(state) => state
            .marquee
            .and_then(|m| m.display)
            .and_then(|d| d.operator_comment)
            .map(|op| {
                Payload::OperatorComment(NicoOperatorComment {
                    content: op.content,
                    name: op.name,
                    link: op.link,
                })
            }),
        chunked_message::Payload::Signal(signal) => {
            (signal == chunked_message::Signal::Flushed as i32).then_some(Payload::Flushed)
        }
    }
}

fn payload_from_data(data: nicolive_message::Data) -> Option<Payload> {
    match data {
        nicolive_message::Data::Chat(chat) | nicolive_message::Data::OverflowedChat(chat) => {
            Some(Payload::Chat(NicoChat {
                no: chat.no,
                vpos: chat.vpos,
                content: chat.content,
                name: chat.name,
                raw_user_id: chat.raw_user_id,
                hashed_user_id: chat.hashed_user_id,
            }))
        }
        nicolive_message::Data::SimpleNotification(notification) => notification
            .emotion
            .map(|content| Payload::Emotion(NicoEmotion { content })),
        nicolive_message::Data::Gift(gift) => Some(Payload::Gift(NicoGift {
            item_id: gift.item_id,
            advertiser_user_id: gift.advertiser_user_id,
            advertiser_name: gift.advertiser_name,
            point: gift.point,
            message: gift.message,
            item_name: gift.item_name,
            contribution_rank: gift.contribution_rank,
        })),
        nicolive_message::Data::SimpleNotificationV2(notification) => {
            Some(match NotificationKind::from_code(notification.r#type) {
                Some(kind) => Payload::Notification(NicoNotification {
                    kind,
                    message: notification.message,
                }),
                None => Payload::Emotion(NicoEmotion {
                    content: notification.message,
                }),
            })
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
