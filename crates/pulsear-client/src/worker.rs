/// Worker pool: a fixed set of data-plane connections.
///
/// Every slot owns one WebSocket connection and one command queue. The
/// coordinator is the only producer of commands; a worker only sees raw byte
/// ranges and never touches transfer state. Workers stream slice frames with
/// no acknowledgement wait: delivery is tracked by the coordinator.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use pulsear_transfer::{TransferEvent, TransferLog, TransferLogger, encode_frame};
use pulsear_types::{ContentId, Envelope, MessageClass, SliceRange};

use crate::error::ClientError;
use crate::file::FileSource;
use crate::session::Session;

pub type WorkerId = usize;

/// What a worker needs to produce frames for one file.
#[derive(Debug, Clone)]
pub struct SliceJob {
    pub content_id: ContentId,
    pub size: u64,
    pub slice_size: u64,
    pub source: FileSource,
}

impl SliceJob {
    /// Slices in the file, saturating at the largest frame index.
    pub fn slice_count(&self) -> u32 {
        u32::try_from(self.size.div_ceil(self.slice_size.max(1))).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Stream every slice of the file.
    SendAll(SliceJob),
    /// Stream the half-open slice range.
    SendRange(SliceJob, SliceRange),
}

impl WorkerCommand {
    pub fn job(&self) -> &SliceJob {
        match self {
            Self::SendAll(job) | Self::SendRange(job, _) => job,
        }
    }

    /// Slice range covered by this command, clamped to the file.
    pub fn range(&self) -> SliceRange {
        let count = self.job().slice_count();
        match self {
            Self::SendAll(_) => SliceRange::new(0, count),
            Self::SendRange(_, r) => SliceRange::new(r.start.min(count), r.end.min(count)),
        }
    }
}

/// Liveness reports from worker tasks to the client loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The server acknowledged the worker's announcement.
    Established(WorkerId),
    /// The connection closed or failed; the task is gone.
    Closed(WorkerId),
}

#[derive(Debug)]
pub struct WorkerSlot {
    pub id: WorkerId,
    queue: Option<mpsc::UnboundedSender<WorkerCommand>>,
    established: bool,
}

/// Fixed-size set of worker slots. Slots are never removed.
#[derive(Debug)]
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    last_choice: Option<WorkerId>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size)
                .map(|id| WorkerSlot {
                    id,
                    queue: None,
                    established: false,
                })
                .collect(),
            last_choice: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind a command queue to a slot (the slot is not established yet).
    pub fn attach(&mut self, id: WorkerId, queue: mpsc::UnboundedSender<WorkerCommand>) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.queue = Some(queue);
            slot.established = false;
        }
    }

    pub fn is_established(&self, id: WorkerId) -> bool {
        self.slots.get(id).is_some_and(|s| s.established)
    }

    /// Established slots in id order.
    pub fn established(&self) -> Vec<WorkerId> {
        self.slots
            .iter()
            .filter(|s| s.established && s.queue.is_some())
            .map(|s| s.id)
            .collect()
    }

    /// Apply a liveness report. Returns true when a slot became established.
    pub fn on_event(&mut self, event: WorkerEvent) -> bool {
        match event {
            WorkerEvent::Established(id) => match self.slots.get_mut(id) {
                Some(slot) if slot.queue.is_some() => {
                    let was = slot.established;
                    slot.established = true;
                    !was
                }
                _ => false,
            },
            WorkerEvent::Closed(id) => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.established = false;
                    slot.queue = None;
                }
                false
            }
        }
    }

    /// Pick a worker for new work.
    ///
    /// Only established slots are candidates. With two or more, the previous
    /// choice is never repeated; with exactly one, it is reused.
    pub fn select(&mut self) -> Option<WorkerId> {
        let candidates = self.established();
        let pick = match (candidates.as_slice(), self.last_choice) {
            ([], _) => return None,
            ([only], _) => *only,
            (all, Some(last)) => all.iter().copied().find(|&id| id > last).unwrap_or(all[0]),
            (all, None) => all[0],
        };
        self.last_choice = Some(pick);
        Some(pick)
    }

    /// Queue a command on a slot.
    pub fn dispatch(&self, id: WorkerId, command: WorkerCommand) -> Result<(), ClientError> {
        let queue = self
            .slots
            .get(id)
            .and_then(|s| s.queue.as_ref())
            .ok_or(ClientError::WorkerUnavailable(id))?;
        queue
            .send(command)
            .map_err(|_| ClientError::WorkerUnavailable(id))
    }

    /// Open a connection for every slot that has no live task.
    pub fn spawn_missing(
        &mut self,
        url: &Url,
        session: &Session,
        events: &mpsc::UnboundedSender<WorkerEvent>,
        logger: &Arc<dyn TransferLogger>,
        shutdown: &CancellationToken,
    ) {
        for slot in self.slots.iter_mut().filter(|s| s.queue.is_none()) {
            let (tx, rx) = mpsc::unbounded_channel();
            slot.queue = Some(tx);
            slot.established = false;
            tokio::spawn(run_worker(
                slot.id,
                url.clone(),
                session.clone(),
                rx,
                events.clone(),
                logger.clone(),
                shutdown.clone(),
            ));
        }
    }
}

/// Destination of encoded slice frames.
pub trait FrameSink {
    fn send_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Frames as WebSocket binary messages.
pub struct WsFrameSink<S>(pub S);

impl<S> FrameSink for WsFrameSink<S>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send,
{
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), ClientError> {
        self.0.send(Message::Binary(frame.to_vec())).await?;
        Ok(())
    }
}

/// Totals for one streamed command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub frames: u32,
    pub bytes: u64,
}

/// Read and send every slice a command covers, in index order.
pub async fn stream_command<F: FrameSink>(
    command: &WorkerCommand,
    sink: &mut F,
) -> Result<StreamReport, ClientError> {
    let job = command.job();
    let mut reader = job.source.open().await?;
    let mut report = StreamReport::default();
    for index in command.range().iter() {
        let payload = reader.read_slice(index, job.slice_size, job.size).await?;
        report.bytes += payload.len() as u64;
        sink.send_frame(encode_frame(&job.content_id, index, &payload))
            .await?;
        report.frames += 1;
    }
    Ok(report)
}

/// Worker task: connect, announce, then stream commands until the
/// connection drops. Always ends with a [`WorkerEvent::Closed`].
pub async fn run_worker(
    id: WorkerId,
    url: Url,
    session: Session,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    logger: Arc<dyn TransferLogger>,
    shutdown: CancellationToken,
) {
    if let Err(e) = worker_loop(id, &url, &session, commands, &events, logger, &shutdown).await {
        warn!(worker = id, "worker stopped: {}", e);
    }
    let _ = events.send(WorkerEvent::Closed(id));
}

async fn worker_loop(
    id: WorkerId,
    url: &Url,
    session: &Session,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    logger: Arc<dyn TransferLogger>,
    shutdown: &CancellationToken,
) -> Result<(), ClientError> {
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let hello = Envelope::to_server(&session.identity(), MessageClass::CreateWorker(id as u64));
    sink.send(Message::Text(hello.encode()?)).await?;

    // Wait for the server to echo our announcement
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match Envelope::decode(&text) {
                    Ok(env) if env.msg == MessageClass::CreateWorker(id as u64) => break,
                    Ok(env) => debug!(worker = id, "ignoring {} before establish", env.msg.tag()),
                    Err(e) => warn!(worker = id, "dropping message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::WorkerUnavailable(id)),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    info!(worker = id, "worker established");
    let _ = events.send(WorkerEvent::Established(id));

    let mut sink = WsFrameSink(sink);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.0.close().await;
                return Ok(());
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { return Ok(()) };
                let report = stream_command(&cmd, &mut sink).await?;
                logger.log(TransferLog {
                    component: "worker",
                    content_id: cmd.job().content_id,
                    event: TransferEvent::Streamed {
                        worker: id,
                        frames: report.frames,
                        bytes: report.bytes,
                    },
                });
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::WorkerUnavailable(id)),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pulsear_transfer::{SliceFrame, decode_frame};

    use crate::file::LocalFile;

    #[derive(Default)]
    struct RecordingSink(Vec<SliceFrame>);

    impl FrameSink for RecordingSink {
        async fn send_frame(&mut self, frame: Bytes) -> Result<(), ClientError> {
            self.0.push(decode_frame(frame)?);
            Ok(())
        }
    }

    fn pool_with(size: usize, established: &[WorkerId]) -> (WorkerPool, Vec<mpsc::UnboundedReceiver<WorkerCommand>>) {
        let mut pool = WorkerPool::new(size);
        let mut queues = Vec::new();
        for id in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            pool.attach(id, tx);
            queues.push(rx);
        }
        for &id in established {
            pool.on_event(WorkerEvent::Established(id));
        }
        (pool, queues)
    }

    fn job(size: usize) -> SliceJob {
        let file = LocalFile::from_bytes("f", (0..size).map(|i| i as u8).collect::<Vec<u8>>(), 0);
        SliceJob {
            content_id: ContentId::from_bytes([3; 32]),
            size: file.size,
            slice_size: 4,
            source: file.source,
        }
    }

    #[test]
    fn test_select_skips_unestablished() {
        let (mut pool, _queues) = pool_with(3, &[1]);
        assert_eq!(pool.select(), Some(1));
        assert_eq!(pool.select(), Some(1));
    }

    #[test]
    fn test_select_never_repeats_with_two() {
        let (mut pool, _queues) = pool_with(4, &[0, 2, 3]);
        let mut last = pool.select().unwrap();
        for _ in 0..10 {
            let next = pool.select().unwrap();
            assert_ne!(next, last);
            assert!(pool.is_established(next));
            last = next;
        }
    }

    #[test]
    fn test_select_none_when_idle() {
        let (mut pool, _queues) = pool_with(2, &[]);
        assert_eq!(pool.select(), None);
    }

    #[test]
    fn test_closed_slot_is_unavailable() {
        let (mut pool, _queues) = pool_with(2, &[0, 1]);
        pool.on_event(WorkerEvent::Closed(0));
        assert_eq!(pool.established(), vec![1]);
        assert!(matches!(
            pool.dispatch(0, WorkerCommand::SendAll(job(8))),
            Err(ClientError::WorkerUnavailable(0))
        ));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_dispatch_reaches_queue() {
        let (pool, mut queues) = pool_with(2, &[0, 1]);
        pool.dispatch(1, WorkerCommand::SendRange(job(8), SliceRange::new(1, 2)))
            .unwrap();
        let cmd = queues[1].try_recv().unwrap();
        assert_eq!(cmd.range(), SliceRange::new(1, 2));
        assert!(queues[0].try_recv().is_err());
    }

    #[test]
    fn test_slice_count_saturates() {
        let mut huge = job(0);
        huge.size = (1 << 32) + 4;
        huge.slice_size = 1;
        assert_eq!(huge.slice_count(), u32::MAX);
        assert_eq!(WorkerCommand::SendAll(huge).range(), SliceRange::new(0, u32::MAX));
    }

    #[tokio::test]
    async fn test_stream_range() {
        let mut sink = RecordingSink::default();
        let cmd = WorkerCommand::SendRange(job(10), SliceRange::new(1, 9));
        let report = stream_command(&cmd, &mut sink).await.unwrap();

        // 10 bytes in slices of 4: indices 1 and 2 exist, the rest are clamped
        assert_eq!(report, StreamReport { frames: 2, bytes: 6 });
        assert_eq!(sink.0[0].slice_index, 1);
        assert_eq!(&sink.0[0].payload[..], &[4, 5, 6, 7]);
        assert_eq!(&sink.0[1].payload[..], &[8, 9]);
    }

    #[tokio::test]
    async fn test_stream_all() {
        let mut sink = RecordingSink::default();
        let report = stream_command(&WorkerCommand::SendAll(job(12)), &mut sink)
            .await
            .unwrap();
        assert_eq!(report.frames, 3);
        let indices: Vec<u32> = sink.0.iter().map(|f| f.slice_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
