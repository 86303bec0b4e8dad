//! Real-time chat
//!
//! One WebSocket channel per user id:
//! - Inbound envelopes are persisted, then forwarded to the receiver if online
//! - A reconnect replaces (and closes) the user's previous channel
//! - History is served from the store, never from live state

mod connection;
mod protocol;
mod registry;

pub use connection::{ChatContext, handle_chat_socket};
pub use protocol::{CLOSE_SUPERSEDED, parse_envelope};
pub use registry::{ChannelHandle, ConnectionRegistry};
