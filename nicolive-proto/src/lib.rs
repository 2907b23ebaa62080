//! Nicolive comment wire protocol
//!
//! This crate contains the length-delimited framing and the protobuf message
//! definitions used by the comment delivery servers:
//! - `frame`    - splits a chunked HTTP body into length-prefixed frames
//! - `messages` - raw prost message definitions (field numbers are fixed by the server)
//! - `decode`   - typed decoding of entry, chunked-message and packed-segment frames

pub mod decode;
pub mod frame;
pub mod messages;

pub use decode::{
    decode_chunked_message, decode_entry, decode_packed_segment, Entry, NicoChat, NicoEmotion,
    NicoGift, NicoNotification, NicoOperatorComment, NotificationKind, PackedSegment, Payload,
    WireError,
};
pub use frame::{FrameError, FrameExtractor, DEFAULT_MAX_FRAME_SIZE};
