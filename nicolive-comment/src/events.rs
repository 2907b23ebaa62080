//! Platform-neutral events delivered to consumers

use chrono::{DateTime, Utc};
use nicolive_proto::{NicoChat, NicoEmotion, NicoGift, NicoNotification, NicoOperatorComment, Payload};
use serde::{Deserialize, Serialize};

pub const PLATFORM: &str = "niconico";

const USER_ICON_BASE: &str = "https://secure-dcdn.cdn.nimg.jp/nicoaccount/usericon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of domain event, used to filter what the backlog surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Comment,
    Gift,
    Emotion,
    Notification,
    OperatorComment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Sequence number as a string
    pub id: String,
    pub no: i32,
    pub content: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_icon: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub platform: &'static str,
    pub is_history: bool,
    pub raw: NicoChat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub item_id: String,
    pub item_name: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub point: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub platform: &'static str,
    pub is_history: bool,
    pub raw: NicoGift,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Emotion {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub platform: &'static str,
    pub is_history: bool,
    pub raw: NicoEmotion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub platform: &'static str,
    pub is_history: bool,
    pub raw: NicoNotification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorComment {
    pub content: String,
    pub name: Option<String>,
    pub link: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub platform: &'static str,
    pub is_history: bool,
    pub raw: NicoOperatorComment,
}

/// Snapshot of the broadcast taken from the watch page on each connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMetadata {
    pub title: Option<String>,
    /// `ON_AIR`, `ENDED`, ...
    pub status: Option<String>,
    pub description: Option<String>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub tags: Vec<String>,
    pub watch_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub broadcaster_name: Option<String>,
    pub broadcaster_user_id: Option<String>,
    /// `user` or `channel`
    pub broadcaster_type: Option<String>,
    pub broadcaster_icon_url: Option<String>,
    pub social_group_id: Option<String>,
    pub social_group_name: Option<String>,
    pub social_group_type: Option<String>,
}

/// Component an error event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Control,
    Entry,
    Segment,
    Backlog,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// Everything a [`crate::NiconicoProvider`] reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    StateChanged(ConnectionState),
    Comment(Comment),
    Gift(Gift),
    Emotion(Emotion),
    Notification(Notification),
    OperatorComment(OperatorComment),
    Metadata(BroadcastMetadata),
    Error(ErrorEvent),
    /// A segment stream drained or the backlog finished replaying
    StreamEnded { uri: String },
}

impl ProviderEvent {
    /// Build the domain event for a decoded payload.
    ///
    /// Returns `None` for payloads that have no consumer-facing form
    /// (end-of-batch signals).
    #[must_use]
    pub fn from_payload(payload: Payload, is_history: bool, now: DateTime<Utc>) -> Option<Self> {
        let event = match payload {
            Payload::Chat(chat) => Self::Comment(map_chat(chat, is_history, now)),
            Payload::Gift(gift) => Self::Gift(Gift {
                item_id: gift.item_id.clone(),
                item_name: gift.item_name.clone(),
                user_id: gift
                    .advertiser_user_id
                    .filter(|id| *id != 0)
                    .map(|id| id.to_string()),
                user_name: Some(gift.advertiser_name.clone()).filter(|n| !n.is_empty()),
                point: gift.point,
                message: gift.message.clone(),
                timestamp: now,
                platform: PLATFORM,
                is_history,
                raw: gift,
            }),
            Payload::Emotion(emotion) => Self::Emotion(Emotion {
                id: emotion.content.clone(),
                timestamp: now,
                platform: PLATFORM,
                is_history,
                raw: emotion,
            }),
            Payload::Notification(notification) => Self::Notification(Notification {
                kind: notification.kind.as_str().to_string(),
                message: notification.message.clone(),
                timestamp: now,
                platform: PLATFORM,
                is_history,
                raw: notification,
            }),
            Payload::OperatorComment(op) => Self::OperatorComment(OperatorComment {
                content: op.content.clone(),
                name: op.name.clone(),
                link: op.link.clone(),
                timestamp: now,
                platform: PLATFORM,
                is_history,
                raw: op,
            }),
            Payload::Flushed => return None,
        };
        Some(event)
    }

    /// Domain kind of this event, if it is one.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Comment(_) => Some(EventKind::Comment),
            Self::Gift(_) => Some(EventKind::Gift),
            Self::Emotion(_) => Some(EventKind::Emotion),
            Self::Notification(_) => Some(EventKind::Notification),
            Self::OperatorComment(_) => Some(EventKind::OperatorComment),
            _ => None,
        }
    }
}

/// Domain kind a payload maps to.
#[must_use]
pub fn payload_kind(payload: &Payload) -> Option<EventKind> {
    match payload {
        Payload::Chat(_) => Some(EventKind::Comment),
        Payload::Gift(_) => Some(EventKind::Gift),
        Payload::Emotion(_) => Some(EventKind::Emotion),
        Payload::Notification(_) => Some(EventKind::Notification),
        Payload::OperatorComment(_) => Some(EventKind::OperatorComment),
        Payload::Flushed => None,
    }
}

fn map_chat(chat: NicoChat, is_history: bool, now: DateTime<Utc>) -> Comment {
    let raw_id = chat.raw_user_id.filter(|id| *id != 0);

    let user_id = chat
        .hashed_user_id
        .clone()
        .filter(|h| !h.is_empty())
        .or_else(|| raw_id.map(|id| id.to_string()));

    // Anonymous viewers carry a generated "a:xxxx" name
    let user_name = chat.name.clone().filter(|n| !n.is_empty() && !n.starts_with("a:"));

    let user_icon = raw_id.map(|id| format!("{USER_ICON_BASE}/{}/{id}.jpg", id / 10_000));

    Comment {
        id: chat.no.to_string(),
        no: chat.no,
        content: chat.content.clone(),
        user_id,
        user_name,
        user_icon,
        timestamp: now,
        platform: PLATFORM,
        is_history,
        raw: chat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nicolive_proto::NotificationKind;

    fn chat(no: i32) -> NicoChat {
        NicoChat {
            no,
            content: format!("c{no}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_comment_with_raw_user() {
        let raw = NicoChat {
            raw_user_id: Some(12_345_678),
            name: Some("viewer".to_string()),
            ..chat(42)
        };
        let event = ProviderEvent::from_payload(Payload::Chat(raw), false, Utc::now()).unwrap();
        let ProviderEvent::Comment(comment) = event else {
            panic!("expected comment");
        };
        assert_eq!(comment.id, "42");
        assert_eq!(comment.user_id.as_deref(), Some("12345678"));
        assert_eq!(comment.user_name.as_deref(), Some("viewer"));
        assert_eq!(
            comment.user_icon.as_deref(),
            Some("https://secure-dcdn.cdn.nimg.jp/nicoaccount/usericon/1234/12345678.jpg")
        );
        assert_eq!(comment.platform, "niconico");
        assert!(!comment.is_history);
    }

    #[test]
    fn test_comment_hashed_user_is_preferred() {
        let raw = NicoChat {
            hashed_user_id: Some("a:abcdef".to_string()),
            name: Some("a:abcdef".to_string()),
            ..chat(1)
        };
        let ProviderEvent::Comment(comment) =
            ProviderEvent::from_payload(Payload::Chat(raw), true, Utc::now()).unwrap()
        else {
            panic!("expected comment");
        };
        assert_eq!(comment.user_id.as_deref(), Some("a:abcdef"));
        assert_eq!(comment.user_name, None);
        assert_eq!(comment.user_icon, None);
        assert!(comment.is_history);
    }

    #[test]
    fn test_gift_mapping() {
        let raw = NicoGift {
            item_id: "balloon".to_string(),
            advertiser_user_id: Some(7),
            advertiser_name: "giver".to_string(),
            point: 300,
            message: "hi".to_string(),
            item_name: "Balloon".to_string(),
            contribution_rank: None,
        };
        let ProviderEvent::Gift(gift) =
            ProviderEvent::from_payload(Payload::Gift(raw), false, Utc::now()).unwrap()
        else {
            panic!("expected gift");
        };
        assert_eq!(gift.user_id.as_deref(), Some("7"));
        assert_eq!(gift.user_name.as_deref(), Some("giver"));
        assert_eq!(gift.point, 300);
    }

    #[test]
    fn test_notification_kind_string() {
        let raw = NicoNotification {
            kind: NotificationKind::ProgramExtended,
            message: "extended".to_string(),
        };
        let event = ProviderEvent::from_payload(Payload::Notification(raw), false, Utc::now()).unwrap();
        assert_eq!(event.kind(), Some(EventKind::Notification));
        let ProviderEvent::Notification(notification) = event else {
            panic!("expected notification");
        };
        assert_eq!(notification.kind, "program_extended");
    }

    #[test]
    fn test_flushed_has_no_event() {
        assert!(ProviderEvent::from_payload(Payload::Flushed, false, Utc::now()).is_none());
        assert_eq!(payload_kind(&Payload::Flushed), None);
    }

    #[test]
    fn test_event_kind_deserializes_snake_case() {
        let kinds: Vec<EventKind> = serde_json::from_str(r#"["comment","operator_comment"]"#).unwrap();
        assert_eq!(kinds, vec![EventKind::Comment, EventKind::OperatorComment]);
    }
}
