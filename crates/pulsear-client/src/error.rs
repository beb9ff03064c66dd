//! Error types for the pulsear client.

use thiserror::Error;

use pulsear_transfer::FrameError;
use pulsear_types::ProtocolDecodeError;

use crate::worker::WorkerId;

#[derive(Debug, Error)]
pub enum ClientError {
    // ── Protocol ─────────────────────────────────────────────────
    /// Malformed or unrecognized envelope. Logged and dropped.
    #[error(transparent)]
    Decode(#[from] ProtocolDecodeError),

    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    // ── Transfer ─────────────────────────────────────────────────
    /// The server refused an upload. The message is shown to the user.
    #[error("sorry, you cannot send {name}")]
    PermissionDenied { name: String },

    /// The file has more slices than a 32-bit slice index can address.
    #[error("{name} needs {slices} slices, more than a transfer can carry")]
    TooManySlices { name: String, slices: u64 },

    /// The server aborted an upload. The message is shown to the user.
    #[error("upload {name} error")]
    FatalTransfer { name: String },

    // ── Connection ───────────────────────────────────────────────
    #[error("control channel lost")]
    ControlChannelLost,

    #[error("worker {0} is not established")]
    WorkerUnavailable(WorkerId),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,

    // ── Session ──────────────────────────────────────────────────
    #[error("no session identity: {0}")]
    NotEstablished(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),
}
