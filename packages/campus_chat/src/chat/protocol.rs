//! Chat wire protocol
//!
//! Inbound and outbound frames are the same JSON text:
//! `{ "sender": string, "receiver": string, "message": string }`.

use axum::extract::ws::{CloseFrame, close_code};

use crate::models::Envelope;

/// Application close code sent to a connection replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary frames are not accepted on the chat channel")]
    Binary,
}

/// Parse a text frame into an envelope. Every field is required.
///
/// Goes through a JSON object first so the array form serde would otherwise
/// accept for a struct is rejected.
pub fn parse_envelope(text: &str) -> Result<Envelope, FrameError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

/// Why a connection left the `Open` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Transport-level read error
    TransportError,
    /// Frame that is not a valid envelope
    ProtocolFault,
    /// Cancelled by the registry or by a failed write
    Cancelled,
}

/// Close frame to send on the way out, if any.
///
/// `was_registered` is whether this connection still owned its registry
/// entry at shutdown; a cancelled connection that did not was superseded.
pub fn close_frame_for(reason: CloseReason, was_registered: bool) -> Option<CloseFrame> {
    match reason {
        CloseReason::ProtocolFault => Some(CloseFrame {
            code: close_code::INVALID,
            reason: "malformed envelope".into(),
        }),
        CloseReason::Cancelled if !was_registered => Some(CloseFrame {
            code: CLOSE_SUPERSEDED,
            reason: "superseded by a newer connection".into(),
        }),
        _ => None,
    }
}
