use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use pulsear_transfer::TransferLogger;
use pulsear_types::{ContentId, DispatchPolicy, Envelope, MessageClass, Sender};

use crate::config::ClientConfig;
use crate::control::{self, Backoff, ChannelMachine};
use crate::coordinator::{Coordinator, TransferOutcome};
use crate::error::ClientError;
use crate::file::LocalFile;
use crate::hooks::TransferUi;
use crate::session::Session;
use crate::worker::{WorkerEvent, WorkerPool};

/// Requests from [`ClientHandle`]s to the client loop.
#[derive(Debug)]
pub enum ClientCommand {
    Upload {
        file: LocalFile,
        reply: oneshot::Sender<Result<ContentId, ClientError>>,
    },
    Leave,
}

/// Cheap handle for driving a running [`Client`] from other tasks.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    /// Announce a file for upload. Returns its transfer id.
    pub async fn upload(&self, file: LocalFile) -> Result<ContentId, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::Upload { file, reply })
            .map_err(|_| ClientError::ChannelClosed)?;
        rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Log out. The client stops once the server confirms.
    pub fn leave(&self) -> Result<(), ClientError> {
        self.commands
            .send(ClientCommand::Leave)
            .map_err(|_| ClientError::ChannelClosed)
    }
}

/// One logged-in client: the control channel, the worker pool and the
/// transfer coordinator, all driven from a single task.
pub struct Client {
    config: ClientConfig,
    socket_url: Url,
    session: Session,
    machine: ChannelMachine,
    coordinator: Coordinator,
    logger: Arc<dyn TransferLogger>,
    outbox_tx: mpsc::UnboundedSender<Envelope>,
    outbox_rx: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    shutdown: CancellationToken,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        ui: Box<dyn TransferUi>,
        logger: Arc<dyn TransferLogger>,
    ) -> Result<(Self, ClientHandle), ClientError> {
        config.validate()?;
        let socket_url = config.socket_url()?;

        let session = Session::new(config.username.clone(), config.user_config.clone());
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator::new(
            session.clone(),
            WorkerPool::new(config.worker_count),
            outbox_tx.clone(),
            ui,
            logger.clone(),
            config.slice_size,
        );
        let machine = ChannelMachine::new(Backoff::new(config.backoff_initial, config.backoff_max));

        let client = Self {
            config,
            socket_url,
            session,
            machine,
            coordinator,
            logger,
            outbox_tx,
            outbox_rx,
            commands,
            worker_tx,
            worker_rx,
            shutdown: CancellationToken::new(),
        };
        Ok((client, ClientHandle { commands: commands_tx }))
    }

    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Cancelling this token stops the client and every worker.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_outcomes(&mut self) -> mpsc::UnboundedReceiver<TransferOutcome> {
        self.coordinator.subscribe_outcomes()
    }

    /// Keep the control channel up until the session leaves.
    pub async fn run(mut self) -> Result<(), ClientError> {
        while self.machine.begin_connect() {
            info!("connecting to {}", self.socket_url);
            match tokio_tungstenite::connect_async(self.socket_url.as_str()).await {
                Ok((ws, _)) => {
                    if let Err(e) = self.run_session(ws).await {
                        warn!("control channel: {}", e);
                    }
                }
                Err(e) => warn!("connect {} failed: {}", self.socket_url, e),
            }

            let was_established = self.machine.is_established();
            let Some(delay) = self.machine.on_close() else {
                break;
            };
            if was_established {
                self.coordinator.notify(false, "disconnected, reconnecting");
            }
            self.wait_reconnect(delay).await;
        }

        self.shutdown.cancel();
        info!("client stopped");
        Ok(())
    }

    async fn run_session<S>(&mut self, ws: S) -> Result<(), ClientError>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut sink, mut stream) = ws.split();

        let greeting = self.machine.on_open();
        let hello = Envelope::to_server(&self.session.identity(), greeting);
        sink.send(Message::Text(hello.encode()?)).await?;

        // Workers announce with our identity; wait until the server named us
        if !self.session.identity().user_ctx_hash.is_empty() {
            self.spawn_workers();
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.machine.on_leave();
                    let _ = sink.close().await;
                    return Ok(());
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if self.on_text(&text) {
                            let _ = sink.close().await;
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(ClientError::ControlChannelLost),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {}
                },
                _ = heartbeat.tick() => {
                    let beat = control::heartbeat(&self.session.identity(), self.session.config());
                    sink.send(Message::Text(beat.encode()?)).await?;
                }
                Some(envelope) = self.outbox_rx.recv() => {
                    debug!("send {}", envelope.msg.tag());
                    sink.send(Message::Text(envelope.encode()?)).await?;
                }
                Some(cmd) = self.commands.recv() => self.on_command(cmd),
                Some(event) = self.worker_rx.recv() => self.coordinator.on_worker_event(event),
            }
        }
    }

    /// Sleep out a backoff delay while still serving commands and workers.
    async fn wait_reconnect(&mut self, delay: Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                _ = self.shutdown.cancelled() => {
                    self.machine.on_leave();
                    return;
                }
                Some(cmd) = self.commands.recv() => {
                    self.on_command(cmd);
                    if self.machine.has_left() {
                        return;
                    }
                }
                Some(event) = self.worker_rx.recv() => self.coordinator.on_worker_event(event),
            }
        }
    }

    fn on_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Upload { file, reply } => {
                let _ = reply.send(self.coordinator.upload(file));
            }
            ClientCommand::Leave if self.machine.is_established() => {
                let leave = Envelope::to_server(&self.session.identity(), MessageClass::Leave);
                let _ = self.outbox_tx.send(leave);
            }
            ClientCommand::Leave => self.terminate(),
        }
    }

    /// Handle one control-channel text frame. Returns true once the session
    /// has left.
    fn on_text(&mut self, text: &str) -> bool {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let raw: String = text.chars().take(200).collect();
                warn!("dropping message: {} -- raw: {}", e, raw);
                return false;
            }
        };

        let envelope = match self.coordinator.on_envelope(envelope) {
            Ok(()) => return false,
            Err(envelope) => envelope,
        };

        match &envelope.msg {
            MessageClass::Establish => {
                if let DispatchPolicy::Targets(targets) = &envelope.policy {
                    let username = self.session.username();
                    if let Some(me) = targets.iter().find(|t| t.username == username) {
                        info!("session established as {} ({})", me.username, me.user_ctx_hash);
                        self.session.set_ctx_hash(me.user_ctx_hash.clone());
                        self.spawn_workers();
                    }
                }
            }
            MessageClass::Leave if envelope.sender == Sender::Server => {
                info!("logged out");
                self.terminate();
                return true;
            }
            MessageClass::HeartBeat(beat) => {
                if let Some(dashboard) = &beat.dashboard {
                    debug!(
                        "dashboard: {} users, {} clients online",
                        dashboard.online_user, dashboard.online_client
                    );
                    self.session.set_dashboard(dashboard.clone());
                }
            }
            MessageClass::Notify(text) => self.coordinator.notify(false, text),
            MessageClass::Text(text) => info!("server: {}", text),
            MessageClass::Error(text) => warn!("server could not parse a message: {}", text),
            other => debug!("ignoring {}", other.tag()),
        }
        false
    }

    fn spawn_workers(&mut self) {
        self.coordinator.pool_mut().spawn_missing(
            &self.socket_url,
            &self.session,
            &self.worker_tx,
            &self.logger,
            &self.shutdown,
        );
    }

    fn terminate(&mut self) {
        self.machine.on_leave();
        self.session.clear();
        self.shutdown.cancel();
    }
}
