// Nicolive Comment Client
//
// Connects to a niconico live broadcast and delivers its comments, gifts,
// emotions, notifications and operator comments as typed events.
//
// Architecture:
// - watch_page: resolves the broadcast page into a control URL and metadata
// - control: WebSocket control channel (startWatching, keepSeat, ping/pong)
// - entry/segment/backlog: HTTP streams carrying length-delimited protobuf
// - session: the actor tying the components together behind NiconicoProvider

pub mod backlog;
pub mod config;
pub mod control;
pub mod entry;
pub mod error;
pub mod events;
pub mod http;
pub mod logging;
pub mod segment;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod watch_page;

mod stream;

pub use crate::config::ProviderConfig;
pub use error::{ClientError, Result};
pub use events::{
    BroadcastMetadata, Comment, ConnectionState, Emotion, ErrorEvent, ErrorSource, EventKind,
    Gift, Notification, OperatorComment, ProviderEvent,
};
pub use http::{HttpFetcher, ReqwestFetcher};
pub use logging::init_logging;
pub use session::{Collaborators, NiconicoProvider};
pub use signaling::{SignalingConnector, WsConnector};
pub use watch_page::{WatchPageClient, WatchPageResolver};
