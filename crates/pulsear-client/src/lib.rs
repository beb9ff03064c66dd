/// Pulsear client runtime.
///
/// A [`Client`] keeps one control channel to the server, a fixed pool of
/// worker connections for slice frames, and a [`Coordinator`] that tracks
/// every transfer this user has in flight.

pub mod client;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod file;
pub mod hooks;
pub mod session;
pub mod worker;

pub use client::{Client, ClientCommand, ClientHandle};
pub use config::ClientConfig;
pub use control::{Backoff, ChannelMachine, ChannelState};
pub use coordinator::{Coordinator, Phase, Role, TransferOutcome, TransferState};
pub use error::ClientError;
pub use file::{FileSource, LocalFile};
pub use hooks::{EventUi, RowHandle, TracingUi, TransferUi, UiEvent, overlay_opacity};
pub use session::Session;
pub use worker::{WorkerCommand, WorkerEvent, WorkerId, WorkerPool};
