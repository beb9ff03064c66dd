/// Transfer coordinator: the per-transfer state machine.
///
/// Owns every [`TransferState`] and the [`WorkerPool`]. It is driven by the
/// client loop (local uploads, decoded envelopes, worker liveness) and is the
/// only place a [`SliceBitset`] is mutated.
///
/// Per transfer: `Announced -> Granted -> Sending -> Completing -> Done`, with
/// `Denied` and `Failed` as terminal alternates. Terminal transfers are
/// removed; later messages naming them are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pulsear_transfer::{SliceBitset, TransferEvent, TransferLog, TransferLogger, partition};
use pulsear_types::{
    ContentId, Envelope, FileListElem, FileResponse, FileResponseStatus, FileSendable,
    MessageClass, SliceRange, TransferRequest,
};

use crate::error::ClientError;
use crate::file::{FileSource, LocalFile};
use crate::hooks::{RowHandle, TransferUi};
use crate::session::Session;
use crate::worker::{SliceJob, WorkerCommand, WorkerEvent, WorkerId, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This client holds the bytes and streams them.
    Sender,
    /// Another session of the same user is uploading; we only track progress.
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Announced,
    Granted,
    Sending,
    Completing,
    Done,
    Denied,
    Failed,
}

/// Reported once per transfer when it leaves the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub content_id: ContentId,
    pub name: String,
    pub role: Option<Role>,
    pub phase: Phase,
}

#[derive(Debug)]
pub struct TransferState {
    pub request: TransferRequest,
    pub bitset: SliceBitset,
    /// Unresolved until the server grants the upload.
    pub role: Option<Role>,
    pub phase: Phase,
    /// Worker answering pull signals.
    pub assigned_worker: Option<WorkerId>,
    pub ui_row: Option<RowHandle>,
    pub last_update: DateTime<Utc>,
    source: Option<FileSource>,
    /// Original owner of every dispatched range.
    assignments: Vec<(SliceRange, WorkerId)>,
    changed_since_poll: bool,
}

impl TransferState {
    fn new(request: TransferRequest, source: Option<FileSource>) -> Self {
        let bitset = SliceBitset::new(request.slice_count());
        Self {
            request,
            bitset,
            role: None,
            phase: Phase::Announced,
            assigned_worker: None,
            ui_row: None,
            last_update: Utc::now(),
            source,
            assignments: Vec::new(),
            changed_since_poll: false,
        }
    }

    /// Acknowledged share of the file in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.bitset.len() == 0 {
            return 1.0;
        }
        (self.bitset.acknowledged() as f64 / self.bitset.len() as f64).clamp(0.0, 1.0)
    }

    /// Worker that first received slice `index`.
    pub fn owner_of(&self, index: u32) -> Option<WorkerId> {
        self.assignments
            .iter()
            .find(|(range, _)| range.contains(index))
            .map(|(_, worker)| *worker)
    }

    pub fn holds_source(&self) -> bool {
        self.source.is_some()
    }

    fn job(&self) -> Option<SliceJob> {
        Some(SliceJob {
            content_id: self.request.content_id,
            size: self.request.size,
            slice_size: self.request.slice_size,
            source: self.source.clone()?,
        })
    }

    fn is_sender(&self) -> bool {
        self.role == Some(Role::Sender)
    }
}

pub struct Coordinator {
    session: Session,
    pool: WorkerPool,
    outbox: mpsc::UnboundedSender<Envelope>,
    ui: Box<dyn TransferUi>,
    logger: Arc<dyn TransferLogger>,
    slice_size: u64,
    transfers: HashMap<ContentId, TransferState>,
    outcomes: Vec<mpsc::UnboundedSender<TransferOutcome>>,
}

impl Coordinator {
    pub fn new(
        session: Session,
        pool: WorkerPool,
        outbox: mpsc::UnboundedSender<Envelope>,
        ui: Box<dyn TransferUi>,
        logger: Arc<dyn TransferLogger>,
        slice_size: u64,
    ) -> Self {
        Self {
            session,
            pool,
            outbox,
            ui,
            logger,
            slice_size,
            transfers: HashMap::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn pool_mut(&mut self) -> &mut WorkerPool {
        &mut self.pool
    }

    pub fn transfer(&self, id: &ContentId) -> Option<&TransferState> {
        self.transfers.get(id)
    }

    pub fn active(&self) -> usize {
        self.transfers.len()
    }

    /// Receive a [`TransferOutcome`] for every transfer that ends.
    pub fn subscribe_outcomes(&mut self) -> mpsc::UnboundedReceiver<TransferOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes.push(tx);
        rx
    }

    /// Pass a notification that is not about a transfer to the UI hook.
    pub fn notify(&mut self, important: bool, text: &str) {
        self.ui.notify(important, text);
    }

    /// Announce a local file to the server. The transfer starts once the
    /// server grants it.
    pub fn upload(&mut self, file: LocalFile) -> Result<ContentId, ClientError> {
        let me = self.session.identity();
        if me.username.is_empty() {
            return Err(ClientError::NotEstablished("upload needs a username"));
        }

        let content_id = ContentId::derive(
            &file.name,
            &me.username,
            file.size,
            file.modified_ms,
            Utc::now().timestamp_millis(),
        );
        let request = TransferRequest {
            owner: me.username.clone(),
            name: file.name,
            size: file.size,
            slice_size: self.slice_size,
            modified_time: file.modified_ms,
            content_id,
        };
        if request.checked_slice_count().is_none() {
            return Err(ClientError::TooManySlices {
                slices: request.size.div_ceil(request.slice_size),
                name: request.name,
            });
        }

        self.outbox
            .send(Envelope::to_server(&me, MessageClass::FileRequest(request.clone())))
            .map_err(|_| ClientError::ChannelClosed)?;

        self.logger.log(TransferLog {
            component: "coordinator",
            content_id,
            event: TransferEvent::Requested {
                name: request.name.clone(),
                size: request.size,
                slices: request.slice_count(),
            },
        });
        self.transfers
            .insert(content_id, TransferState::new(request, Some(file.source)));
        Ok(content_id)
    }

    /// Route a decoded envelope. Envelopes that are not about transfers are
    /// handed back.
    pub fn on_envelope(&mut self, envelope: Envelope) -> Result<(), Envelope> {
        match envelope.msg {
            MessageClass::FileSendable(sendable) => self.on_file_sendable(sendable),
            MessageClass::FileResponse(resp) => self.on_file_response(resp),
            MessageClass::PleaseSend(id) => self.on_please_send(id),
            msg => {
                return Err(Envelope { msg, ..envelope });
            }
        }
        Ok(())
    }

    pub fn on_file_sendable(&mut self, sendable: FileSendable) {
        let id = sendable.hashval;
        let is_me = self.session.is_me(&sendable.user_ctx_hash);

        if !sendable.granted() {
            let local = self.transfers.remove(&id);
            let mine = match is_me {
                Some(mine) => mine,
                None => local.as_ref().is_some_and(TransferState::holds_source),
            };
            let name = local
                .as_ref()
                .map(|t| t.request.name.clone())
                .or_else(|| sendable.req.as_ref().map(|r| r.name.clone()))
                .unwrap_or_else(|| id.to_hex());
            let text = ClientError::PermissionDenied { name: name.clone() }.to_string();
            self.ui.notify(true, &worded(mine, &text));
            self.logger.log(TransferLog {
                component: "coordinator",
                content_id: id,
                event: TransferEvent::Denied { name: name.clone() },
            });
            if let Some(state) = local {
                self.emit_outcome(id, name, state.role, Phase::Denied);
            }
            return;
        }

        if !self.transfers.contains_key(&id) {
            match sendable.req.clone() {
                Some(req) if req.checked_slice_count().is_none() => {
                    warn!(
                        "dropping grant for {}: {} bytes in slices of {}",
                        req.name, req.size, req.slice_size
                    );
                    return;
                }
                Some(req) => {
                    self.transfers.insert(id, TransferState::new(req, None));
                }
                None => {
                    debug!("grant for unknown transfer {:?} without request", id);
                    return;
                }
            }
        }
        let Some(state) = self.transfers.get_mut(&id) else {
            return;
        };
        if state.phase != Phase::Announced {
            debug!("duplicate grant for {:?} in {:?}", id, state.phase);
            return;
        }

        let role = if is_me != Some(false) && state.holds_source() {
            Role::Sender
        } else {
            Role::Mirror
        };
        state.role = Some(role);
        state.phase = Phase::Granted;
        state.last_update = Utc::now();

        let meta = sendable
            .file_elem
            .unwrap_or_else(|| FileListElem::from_request(&state.request));
        let row = self.ui.create_transfer_row(&meta);
        state.ui_row = Some(row);
        self.ui.notify(
            false,
            &worded(role == Role::Sender, &format!("upload file {}", meta.name)),
        );

        self.logger.log(TransferLog {
            component: "coordinator",
            content_id: id,
            event: TransferEvent::Granted {
                sender: role == Role::Sender,
                workers: self.pool.established().len(),
            },
        });

        if role == Role::Sender {
            self.start_sending(id);
        }
    }

    /// Partition a granted transfer across the established workers.
    fn start_sending(&mut self, id: ContentId) {
        let Some(state) = self.transfers.get_mut(&id) else {
            return;
        };

        if state.bitset.is_empty() {
            state.phase = Phase::Completing;
            send_finish(&self.session, &self.outbox, &*self.logger, state);
            return;
        }

        let workers = self.pool.established();
        if workers.is_empty() {
            info!("no worker established, {} waits", state.request.name);
            return;
        }
        let Some(job) = state.job() else {
            return;
        };

        state.assigned_worker = self.pool.select();
        state.assignments.clear();
        for (range, &worker) in partition(state.request.full_range(), workers.len())
            .into_iter()
            .zip(&workers)
        {
            state.assignments.push((range, worker));
            match self.pool.dispatch(worker, WorkerCommand::SendRange(job.clone(), range)) {
                Ok(()) => self.logger.log(TransferLog {
                    component: "coordinator",
                    content_id: id,
                    event: TransferEvent::Dispatched { worker, range },
                }),
                Err(e) => warn!("dispatch {:?} {}..{}: {}", id, range.start, range.end, e),
            }
        }
        state.phase = Phase::Sending;
    }

    /// Pull signal from the server.
    ///
    /// After progress since the previous poll, every pending run is sent
    /// again; otherwise only the lowest pending slice.
    pub fn on_please_send(&mut self, id: ContentId) {
        let Some(state) = self.transfers.get_mut(&id) else {
            debug!("please-send for unknown transfer {:?}", id);
            return;
        };
        if !state.is_sender() || state.phase != Phase::Sending {
            debug!("please-send for {:?} ignored in {:?}", id, state.phase);
            return;
        }
        let Some(job) = state.job() else {
            return;
        };

        let worker = match state.assigned_worker.filter(|&w| self.pool.is_established(w)) {
            Some(worker) => worker,
            None => match self.pool.select() {
                Some(worker) => {
                    state.assigned_worker = Some(worker);
                    worker
                }
                None => {
                    warn!("please-send for {:?}: no worker established", id);
                    return;
                }
            },
        };

        let changed = std::mem::take(&mut state.changed_since_poll);
        let ranges = if changed {
            state.bitset.pending_runs()
        } else {
            state
                .bitset
                .first_pending()
                .map(SliceRange::single)
                .into_iter()
                .collect()
        };
        self.logger.log(TransferLog {
            component: "coordinator",
            content_id: id,
            event: TransferEvent::Polled {
                changed,
                runs: ranges.len(),
            },
        });

        for range in ranges {
            if let Err(e) = self.pool.dispatch(worker, WorkerCommand::SendRange(job.clone(), range)) {
                warn!("please-send {:?}: {}", id, e);
                break;
            }
        }
    }

    pub fn on_file_response(&mut self, resp: FileResponse) {
        let id = resp.file_hash;
        let Some(state) = self.transfers.get_mut(&id) else {
            debug!("{:?} for unknown transfer {:?}", resp.status, id);
            return;
        };

        match resp.status {
            FileResponseStatus::Ok => {
                if state.bitset.clear_range(resp.range) > 0 {
                    state.changed_since_poll = true;
                }
                state.last_update = Utc::now();
                self.logger.log(TransferLog {
                    component: "coordinator",
                    content_id: id,
                    event: TransferEvent::Acknowledged {
                        range: resp.range,
                        pending: state.bitset.pending(),
                    },
                });
                if let Some(row) = state.ui_row {
                    self.ui.update_progress(row, state.progress(), false);
                }
                if state.bitset.is_empty() && state.is_sender() && state.phase == Phase::Sending {
                    state.phase = Phase::Completing;
                    send_finish(&self.session, &self.outbox, &*self.logger, state);
                }
            }
            FileResponseStatus::Resend => {
                if !state.is_sender() {
                    return;
                }
                let Some(job) = state.job() else {
                    return;
                };
                for &(owned, worker) in &state.assignments {
                    let part = overlap(owned, resp.range);
                    if part.is_empty() {
                        continue;
                    }
                    self.logger.log(TransferLog {
                        component: "coordinator",
                        content_id: id,
                        event: TransferEvent::ResendRequested { worker, range: part },
                    });
                    if let Err(e) = self.pool.dispatch(worker, WorkerCommand::SendRange(job.clone(), part)) {
                        warn!("resend {:?} {}..{}: {}", id, part.start, part.end, e);
                    }
                }
            }
            FileResponseStatus::Fatalerr => {
                let Some(state) = self.transfers.remove(&id) else {
                    return;
                };
                let mine = state.role != Some(Role::Mirror);
                let text = ClientError::FatalTransfer {
                    name: state.request.name.clone(),
                }
                .to_string();
                self.ui.notify(true, &worded(mine, &text));
                self.logger.log(TransferLog {
                    component: "coordinator",
                    content_id: id,
                    event: TransferEvent::Failed { message: text },
                });
                self.emit_outcome(id, state.request.name, state.role, Phase::Failed);
            }
            FileResponseStatus::Finish => {
                let Some(state) = self.transfers.remove(&id) else {
                    return;
                };
                if let Some(row) = state.ui_row {
                    self.ui.update_progress(row, 1.0, true);
                }
                let suffix = if state.role == Some(Role::Mirror) {
                    " in other place"
                } else {
                    ""
                };
                self.ui
                    .notify(false, &format!("upload {} success{}", state.request.name, suffix));
                self.logger.log(TransferLog {
                    component: "coordinator",
                    content_id: id,
                    event: TransferEvent::Finished {
                        name: state.request.name.clone(),
                    },
                });
                self.emit_outcome(id, state.request.name, state.role, Phase::Done);
            }
        }
    }

    /// Track worker liveness. A newly established worker picks up granted
    /// transfers that were waiting for one.
    pub fn on_worker_event(&mut self, event: WorkerEvent) {
        if !self.pool.on_event(event) {
            return;
        }
        let waiting: Vec<ContentId> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.is_sender() && t.phase == Phase::Granted)
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            self.start_sending(id);
        }
    }

    fn emit_outcome(&mut self, content_id: ContentId, name: String, role: Option<Role>, phase: Phase) {
        let outcome = TransferOutcome {
            content_id,
            name,
            role,
            phase,
        };
        self.outcomes.retain(|tx| tx.send(outcome.clone()).is_ok());
    }
}

/// Prefix text about a transfer owned by another session.
fn worded(mine: bool, text: &str) -> String {
    if mine {
        text.to_string()
    } else {
        format!("In other place: {}", text)
    }
}

fn overlap(a: SliceRange, b: SliceRange) -> SliceRange {
    SliceRange::new(a.start.max(b.start), a.end.min(b.end))
}

fn send_finish(
    session: &Session,
    outbox: &mpsc::UnboundedSender<Envelope>,
    logger: &dyn TransferLogger,
    state: &TransferState,
) {
    let finish = FileResponse {
        name: state.request.name.clone(),
        file_hash: state.request.content_id,
        status: FileResponseStatus::Finish,
        range: state.request.full_range(),
    };
    let envelope = Envelope::to_server(&session.identity(), MessageClass::FileResponse(finish));
    if outbox.send(envelope).is_err() {
        warn!("finish for {} dropped: control channel gone", state.request.name);
    }
    logger.log(TransferLog {
        component: "coordinator",
        content_id: state.request.content_id,
        event: TransferEvent::Completing,
    });
}
