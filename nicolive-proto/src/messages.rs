//! Raw protobuf messages of the comment delivery servers.
//!
//! Only the fields this client consumes are declared; every other field is
//! skipped by prost as an unknown field. Field numbers follow the published
//! `nicolive-comment-protobuf` definitions and must not be changed.

use prost_types::Timestamp;

/// Top-level frame of the message server (view) stream.
///
/// On the wire this is a oneof, but every field is decoded independently so a
/// frame carrying several of them loses nothing.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChunkedEntry {
    #[prost(message, optional, tag = "1")]
    pub segment: Option<MessageSegment>,
    #[prost(message, optional, tag = "2")]
    pub backward: Option<BackwardSegment>,
    #[prost(message, optional, tag = "3")]
    pub previous: Option<MessageSegment>,
    #[prost(message, optional, tag = "4")]
    pub next: Option<ReadyForNext>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageSegment {
    #[prost(message, optional, tag = "1")]
    pub from: Option<Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub until: Option<Timestamp>,
    #[prost(string, tag = "3")]
    pub uri: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadyForNext {
    #[prost(int64, tag = "1")]
    pub at: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackwardSegment {
    #[prost(message, optional, tag = "1")]
    pub until: Option<Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub segment: Option<packed_segment::Next>,
}

/// Body of a backward (history) segment URI.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PackedSegment {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<ChunkedMessage>,
    #[prost(message, optional, tag = "2")]
    pub next: Option<packed_segment::Next>,
}

pub mod packed_segment {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Next {
        #[prost(string, tag = "1")]
        pub uri: String,
    }
}

/// Frame of a segment stream, and element of a packed segment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChunkedMessage {
    #[prost(oneof = "chunked_message::Payload", tags = "2, 4, 5")]
    pub payload: Option<chunked_message::Payload>,
}

pub mod chunked_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Message(super::NicoliveMessage),
        #[prost(message, tag = "4")]
        State(super::NicoliveState),
        #[prost(enumeration = "Signal", tag = "5")]
        Signal(i32),
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Signal {
        Flushed = 0,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NicoliveMessage {
    #[prost(oneof = "nicolive_message::Data", tags = "1, 7, 8, 20, 23")]
    pub data: Option<nicolive_message::Data>,
}

pub mod nicolive_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "1")]
        Chat(super::Chat),
        #[prost(message, tag = "7")]
        SimpleNotification(super::SimpleNotification),
        #[prost(message, tag = "8")]
        Gift(super::Gift),
        #[prost(message, tag = "20")]
        OverflowedChat(super::Chat),
        #[prost(message, tag = "23")]
        SimpleNotificationV2(super::SimpleNotificationV2),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Chat {
    #[prost(string, tag = "1")]
    pub content: String,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(int32, tag = "3")]
    pub vpos: i32,
    #[prost(int64, optional, tag = "5")]
    pub raw_user_id: Option<i64>,
    #[prost(string, optional, tag = "6")]
    pub hashed_user_id: Option<String>,
    #[prost(int32, tag = "8")]
    pub no: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimpleNotification {
    #[prost(string, optional, tag = "3")]
    pub emotion: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimpleNotificationV2 {
    #[prost(enumeration = "simple_notification_v2::NotificationType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bool, tag = "3")]
    pub show_in_telop: bool,
    #[prost(bool, tag = "4")]
    pub show_in_list: bool,
}

pub mod simple_notification_v2 {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum NotificationType {
        Unknown = 0,
        Ichiba = 1,
        Emotion = 2,
        Cruise = 3,
        ProgramExtended = 4,
        RankingIn = 5,
        Visited = 6,
        SupporterRegistered = 7,
        UserLevelUp = 8,
        UserFollow = 9,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Gift {
    #[prost(string, tag = "1")]
    pub item_id: String,
    #[prost(int64, optional, tag = "2")]
    pub advertiser_user_id: Option<i64>,
    #[prost(string, tag = "3")]
    pub advertiser_name: String,
    #[prost(int64, tag = "4")]
    pub point: i64,
    #[prost(string, tag = "5")]
    pub message: String,
    #[prost(string, tag = "6")]
    pub item_name: String,
    #[prost(int32, optional, tag = "7")]
    pub contribution_rank: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NicoliveState {
    #[prost(message, optional, tag = "4")]
    pub marquee: Option<Marquee>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Marquee {
    #[prost(message, optional, tag = "1")]
    pub display: Option<marquee::Display>,
}

pub mod marquee {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Display {
        #[prost(message, optional, tag = "1")]
        pub operator_comment: Option<super::OperatorComment>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperatorComment {
    #[prost(string, tag = "1")]
    pub content: String,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub link: Option<String>,
}
