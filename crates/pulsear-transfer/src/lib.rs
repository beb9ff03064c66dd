/// Pulsear data plane: the pieces of a chunked, resumable upload that do no I/O.
///
/// Provides:
/// - Binary slice frames (content id + LE slice index + payload)
/// - Per-transfer slice bitset with run coalescing for resends
/// - Contiguous range partitioning across workers
/// - Structured transfer event logging

pub mod bitset;
pub mod frame;
pub mod logging;
pub mod partition;

// Re-export key types for convenience.
pub use bitset::SliceBitset;
pub use frame::{FRAME_HEADER, FrameError, SliceFrame, decode_frame, encode_frame, slice_bounds};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use partition::partition;
