/// Transfer logging trait for structured lifecycle logs.
///
/// The coordinator and the workers describe what happens to a transfer as
/// [`TransferEvent`]s; a [`TransferLogger`] decides where they go.

use std::fmt;

use pulsear_types::{ContentId, SliceRange};

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub content_id: ContentId,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Upload permission requested
    Requested {
        name: String,
        size: u64,
        slices: u32,
    },
    /// Server granted the upload
    Granted {
        sender: bool,
        workers: usize,
    },
    /// Server refused the upload
    Denied {
        name: String,
    },
    /// Range handed to a worker
    Dispatched {
        worker: usize,
        range: SliceRange,
    },
    /// Server asked for a range again
    ResendRequested {
        worker: usize,
        range: SliceRange,
    },
    /// Pull signal answered
    Polled {
        changed: bool,
        runs: usize,
    },
    /// Range acknowledged
    Acknowledged {
        range: SliceRange,
        pending: u32,
    },
    /// Worker finished streaming a range
    Streamed {
        worker: usize,
        frames: u32,
        bytes: u64,
    },
    /// Every slice acknowledged, finish sent
    Completing,
    /// Transfer complete
    Finished {
        name: String,
    },
    /// Error occurred
    Failed {
        message: String,
    },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested { name, size, slices } => {
                write!(f, "requested name={} size={} slices={}", name, size, slices)
            }
            Self::Granted { sender, workers } => {
                write!(f, "granted sender={} workers={}", sender, workers)
            }
            Self::Denied { name } => write!(f, "denied name={}", name),
            Self::Dispatched { worker, range } => {
                write!(f, "dispatched worker={} range={}..{}", worker, range.start, range.end)
            }
            Self::ResendRequested { worker, range } => {
                write!(f, "resend worker={} range={}..{}", worker, range.start, range.end)
            }
            Self::Polled { changed, runs } => {
                write!(f, "polled changed={} runs={}", changed, runs)
            }
            Self::Acknowledged { range, pending } => {
                write!(f, "acknowledged range={}..{} pending={}", range.start, range.end, pending)
            }
            Self::Streamed { worker, frames, bytes } => {
                write!(f, "streamed worker={} frames={} bytes={}", worker, frames, bytes)
            }
            Self::Completing => write!(f, "completing"),
            Self::Finished { name } => write!(f, "finished name={}", name),
            Self::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing or
/// discard the entries.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        let id = entry.content_id.to_hex();
        // Lifecycle events at info, per-range traffic at debug
        match &entry.event {
            TransferEvent::Requested { .. }
            | TransferEvent::Granted { .. }
            | TransferEvent::Denied { .. }
            | TransferEvent::Completing
            | TransferEvent::Finished { .. }
            | TransferEvent::Failed { .. } => {
                tracing::info!(
                    component = entry.component,
                    content_id = %id,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    content_id = %id,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let event = TransferEvent::Dispatched {
            worker: 2,
            range: SliceRange::new(4, 8),
        };
        assert_eq!(event.to_string(), "dispatched worker=2 range=4..8");
        assert_eq!(TransferEvent::Completing.to_string(), "completing");
    }
}
