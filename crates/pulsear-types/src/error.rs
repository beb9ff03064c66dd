use thiserror::Error;

/// A control-channel message that could not be turned into an [`crate::Envelope`].
///
/// Receivers log it and drop the message; the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolDecodeError {
    /// Not JSON, unknown variant tag, or a required nested field is missing.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid content id: {0:?}")]
    ContentId(String),
}
