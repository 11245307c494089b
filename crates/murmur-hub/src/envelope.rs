//! Envelope wire format.
//!
//! One physical transport frame carries exactly one protobuf-encoded
//! [`Envelope`]. Field tags are frozen: existing clients depend on them.

use bytes::Bytes;
use prost::Message;

use crate::error::CodecError;

/// Tag value that marks a heartbeat envelope.
///
/// The misspelling is part of the deployed protocol.
pub const HEARTBEAT: &str = "heatbeat";

/// Content of the reply sent for every heartbeat.
pub const PONG: &str = "pong";

/// Sender id used for server-originated envelopes.
pub const SYSTEM_SENDER: &str = "System";

const WELCOME_TEXT: &str = "welcome!";

/// The unit of chat data exchanged between clients and the server.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub avatar: String,
    #[prost(string, tag = "2")]
    pub from_username: String,
    /// Sender id
    #[prost(string, tag = "3")]
    pub from: String,
    /// Recipient id (user or group); empty means broadcast
    #[prost(string, tag = "4")]
    pub to: String,
    /// Text, or an inline `data:...;base64,` payload for images
    #[prost(string, tag = "5")]
    pub content: String,
    #[prost(int32, tag = "6")]
    pub content_type: i32,
    /// Free-form tag; [`HEARTBEAT`] is reserved
    #[prost(string, tag = "7")]
    pub kind: String,
    #[prost(int32, tag = "8")]
    pub message_type: i32,
    /// Name of already-stored content
    #[prost(string, tag = "9")]
    pub url: String,
    /// Caller-supplied extension, used when the file kind cannot be sniffed
    #[prost(string, tag = "10")]
    pub file_suffix: String,
    /// Raw file bytes
    #[prost(bytes = "vec", tag = "11")]
    pub file: Vec<u8>,
}

/// What an envelope's payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ContentType {
    Text = 1,
    File = 2,
    Image = 3,
    Audio = 4,
    Video = 5,
    /// Live audio call signalling
    AudioLive = 6,
    /// Live video call signalling
    VideoLive = 7,
}

impl ContentType {
    /// Map a wire value back to a content type.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Text),
            2 => Some(Self::File),
            3 => Some(Self::Image),
            4 => Some(Self::Audio),
            5 => Some(Self::Video),
            6 => Some(Self::AudioLive),
            7 => Some(Self::VideoLive),
            _ => None,
        }
    }

    /// Messages in the TEXT..=VIDEO range are persisted before delivery.
    pub fn is_persistable(self) -> bool {
        matches!(
            self,
            Self::Text | Self::File | Self::Image | Self::Audio | Self::Video
        )
    }

    /// Live signalling bypasses persistence entirely.
    pub fn is_live(self) -> bool {
        matches!(self, Self::AudioLive | Self::VideoLive)
    }
}

/// Whether an envelope is addressed to a user or to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    Direct = 1,
    Group = 2,
}

impl MessageType {
    /// Map a wire value back to a message type.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Direct),
            2 => Some(Self::Group),
            _ => None,
        }
    }
}

impl Envelope {
    /// Decode one transport frame.
    pub fn decode_frame(frame: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::decode(frame)?)
    }

    /// Encode into a frame ready for the transport.
    pub fn to_frame(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    /// The server's greeting, queued for every freshly registered session.
    pub fn welcome(identity: &str) -> Self {
        Self {
            from: SYSTEM_SENDER.to_string(),
            to: identity.to_string(),
            content: WELCOME_TEXT.to_string(),
            ..Default::default()
        }
    }

    /// The reply to a client heartbeat.
    pub fn heartbeat_reply() -> Self {
        Self {
            content: PONG.to_string(),
            kind: HEARTBEAT.to_string(),
            ..Default::default()
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == HEARTBEAT
    }

    /// An empty recipient means "everyone connected".
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// Typed content type, `None` for unset or unknown wire values.
    pub fn content_kind(&self) -> Option<ContentType> {
        ContentType::from_i32(self.content_type)
    }

    pub fn set_content_kind(&mut self, kind: ContentType) {
        self.content_type = kind as i32;
    }

    /// Typed message type, `None` for unset or unknown wire values.
    pub fn message_kind(&self) -> Option<MessageType> {
        MessageType::from_i32(self.message_type)
    }

    pub fn set_message_kind(&mut self, kind: MessageType) {
        self.message_type = kind as i32;
    }
}
