/// Wire model shared by the pulsear client and server.
///
/// Control-channel traffic is a JSON [`Envelope`]; the data plane carries
/// binary slice frames prefixed with a [`ContentId`].

pub mod content_id;
pub mod envelope;
pub mod error;
pub mod models;

pub use content_id::{CONTENT_ID_LEN, ContentId};
pub use envelope::{DispatchPolicy, Envelope, MessageClass, Sender};
pub use error::ProtocolDecodeError;
pub use models::{
    ClientRef, DEFAULT_SLICE_SIZE, DashboardInfo, FileListElem, FileListPathConfig, FileResponse,
    FileResponseStatus, FileSendable, HeartBeat, SliceRange, TransferRequest, UserConfig,
    human_size,
};
