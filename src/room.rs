//! Room client task.
//!
//! [`RoomClient::spawn`] moves a [`Session`] into its own task. Relay events,
//! local commands, finished uploads and the typing timer are all funnelled
//! through one `select!` loop, so protocol state is only ever touched from
//! that task. Blob store transfers run on tasks of their own; envelopes are
//! still published in the order they were sent.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::envelope::MessageEnvelope;
use crate::models::Message;
use crate::relay::{Outbound, Relay, RelayEvent};
use crate::session::{Outgoing, RoomConfig, Session};
use crate::storage::BlobStore;
use crate::transfer::OutgoingFile;
use crate::types::{ChatError, MessageId, PeerId, Result};

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Point-in-time view of the room, for rendering.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    /// Local identity.
    pub identity: PeerId,
    /// Conversation in arrival order.
    pub messages: Vec<Message>,
    /// Peers whose key is known.
    pub peers: Vec<PeerId>,
    /// Typing line, if anyone types.
    pub typing_indicator: Option<String>,
    /// Occupancy last reported by the relay.
    pub participant_count: u32,
}

enum Command {
    SendText {
        text: String,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    SendFile {
        file: OutgoingFile,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    Download {
        message_id: MessageId,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    Keystroke,
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Leave,
}

/// Spawns room clients.
pub struct RoomClient;

impl RoomClient {
    /// Start a client for `config.room_id` under `identity`.
    ///
    /// The key pair is generated here; failing to make one is fatal and no
    /// task is started. The task announces itself with `join-room` before
    /// handling anything else.
    pub fn spawn(
        config: RoomConfig,
        identity: PeerId,
        relay: Arc<dyn Relay>,
        store: Arc<dyn BlobStore>,
    ) -> Result<RoomHandle> {
        let session = Session::new(config, identity.clone())?;
        Ok(Self::spawn_session(session, relay, store))
    }

    /// Start a client around an existing session.
    pub fn spawn_session(session: Session, relay: Arc<dyn Relay>, store: Arc<dyn BlobStore>) -> RoomHandle {
        let identity = session.identity().clone();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (uploads_tx, uploads) = mpsc::unbounded_channel();

        let actor = RoomActor {
            session,
            relay,
            store,
            commands: command_rx,
            events: event_rx,
            uploads_tx,
            uploads,
            outbox: VecDeque::new(),
        };
        let task = tokio::spawn(actor.run());

        RoomHandle {
            identity,
            commands: command_tx,
            events: event_tx,
            task,
        }
    }
}

/// Handle to a running room client.
///
/// Dropping the handle ends the task.
#[derive(Debug)]
pub struct RoomHandle {
    identity: PeerId,
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedSender<RelayEvent>,
    task: JoinHandle<Result<()>>,
}

impl RoomHandle {
    /// Returns the local identity.
    pub fn identity(&self) -> &PeerId {
        &self.identity
    }

    /// Sender for relay events; the transport feeds inbound traffic here.
    pub fn inbox(&self) -> mpsc::UnboundedSender<RelayEvent> {
        self.events.clone()
    }

    /// Hand one relay event to the client.
    pub fn deliver(&self, event: RelayEvent) -> Result<()> {
        self.events.send(event).map_err(|_| ChatError::RoomClosed)
    }

    /// Send a text message. Returns its id once the relay took it.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<MessageId> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply }).await?
    }

    /// Upload and announce a file.
    pub async fn send_file(&self, file: OutgoingFile) -> Result<MessageId> {
        self.request(|reply| Command::SendFile { file, reply }).await?
    }

    /// Fetch and decrypt the file carried by `message_id`.
    pub async fn download_file(&self, message_id: MessageId) -> Result<Vec<u8>> {
        self.request(|reply| Command::Download { message_id, reply }).await?
    }

    /// Report a keystroke in the compose input.
    pub async fn keystroke(&self) -> Result<()> {
        self.commands
            .send(Command::Keystroke)
            .await
            .map_err(|_| ChatError::RoomClosed)
    }

    /// Current view of the room.
    pub async fn snapshot(&self) -> Result<RoomSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Leave the room and wait for the task to finish.
    ///
    /// Returns the error that ended the task, if it ended on its own.
    pub async fn leave(self) -> Result<()> {
        // The task may already be gone
        let _ = self.commands.send(Command::Leave).await;
        self.task.await.map_err(|_| ChatError::RoomClosed)?
    }

    /// Whether the task has stopped.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ChatError::RoomClosed)?;
        rx.await.map_err(|_| ChatError::RoomClosed)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::SendText { .. } => "SendText",
            Command::SendFile { .. } => "SendFile",
            Command::Download { .. } => "Download",
            Command::Keystroke => "Keystroke",
            Command::Snapshot { .. } => "Snapshot",
            Command::Leave => "Leave",
        };
        f.write_str(name)
    }
}

/// An upload that finished away from the event loop.
struct UploadDone {
    message_id: MessageId,
    result: Result<MessageEnvelope>,
}

/// An envelope waiting for its turn to be published.
struct Queued {
    message_id: MessageId,
    /// `None` while the upload is still running.
    envelope: Option<Result<MessageEnvelope>>,
    reply: oneshot::Sender<Result<MessageId>>,
}

struct RoomActor {
    session: Session,
    relay: Arc<dyn Relay>,
    store: Arc<dyn BlobStore>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    uploads_tx: mpsc::UnboundedSender<UploadDone>,
    uploads: mpsc::UnboundedReceiver<UploadDone>,
    /// Envelopes in send-call order.
    outbox: VecDeque<Queued>,
}

impl RoomActor {
    async fn run(mut self) -> Result<()> {
        let room = self.session.config().room_id.clone();
        info!(%room, identity = %self.session.identity(), "joining room");

        let result = match self.relay.send(self.session.join_request()).await {
            Ok(()) => self.run_inner().await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => info!(%room, "left room"),
            Err(e) => error!(%room, "room client stopped: {}", e),
        }
        self.session.teardown();
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        loop {
            let deadline = self.session.typing_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Leave) | None => return Ok(()),
                    Some(command) => self.on_command(command).await,
                },
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event).await?,
                    None => return Ok(()),
                },
                Some(done) = self.uploads.recv() => self.on_upload_done(done).await,
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(stop) = self.session.poll_typing(Instant::now()) {
                        self.publish(stop).await;
                    }
                }
            }
        }
    }

    async fn on_event(&mut self, event: RelayEvent) -> Result<()> {
        for signal in self.session.handle_event(event)? {
            self.publish(signal).await;
        }
        Ok(())
    }

    async fn on_command(&mut self, command: Command) {
        debug!(?command, "handling command");
        match command {
            Command::SendText { text, reply } => {
                let Outgoing {
                    message_id,
                    signals,
                } = match self.session.send_text(&text) {
                    Ok(outgoing) => outgoing,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };

                // Typing goes out now; the envelope waits behind earlier ones
                let mut envelope = None;
                for signal in signals {
                    match signal {
                        Outbound::SendMessage(e) => envelope = Some(e),
                        other => self.publish(other).await,
                    }
                }
                let envelope = envelope
                    .ok_or_else(|| ChatError::InvalidEnvelope("Nothing to publish".to_string()));
                self.outbox.push_back(Queued {
                    message_id,
                    envelope: Some(envelope),
                    reply,
                });
                self.flush().await;
            }
            Command::SendFile { file, reply } => {
                let upload = self.session.begin_upload(file);
                let message_id = upload.message_id().clone();
                self.outbox.push_back(Queued {
                    message_id: message_id.clone(),
                    envelope: None,
                    reply,
                });

                let store = self.store.clone();
                let done = self.uploads_tx.clone();
                tokio::spawn(async move {
                    let result = upload.run(store.as_ref()).await;
                    let _ = done.send(UploadDone { message_id, result });
                });
            }
            Command::Download { message_id, reply } => {
                match self.session.prepare_download(&message_id) {
                    Ok(download) => {
                        let store = self.store.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(download.run(store.as_ref()).await);
                        });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Keystroke => {
                if let Some(start) = self.session.keystroke(Instant::now()) {
                    self.publish(start).await;
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Leave => {}
        }
    }

    async fn on_upload_done(&mut self, done: UploadDone) {
        let UploadDone { message_id, result } = done;
        let result = self.session.finish_upload(&message_id, result);
        if let Some(queued) = self.outbox.iter_mut().find(|q| q.message_id == message_id) {
            queued.envelope = Some(result);
        }
        self.flush().await;
    }

    /// Publish settled envelopes from the head of the outbox, stopping at the
    /// first upload still in flight.
    async fn flush(&mut self) {
        while self.outbox.front().is_some_and(|q| q.envelope.is_some()) {
            let Some(Queued {
                message_id,
                envelope: Some(envelope),
                reply,
            }) = self.outbox.pop_front()
            else {
                break;
            };

            let result = match envelope {
                Ok(envelope) => self.publish_envelope(message_id, envelope).await,
                Err(e) => Err(e),
            };
            let _ = reply.send(result);
        }
    }

    /// On success the message becomes `Sent`, otherwise it is dropped from
    /// the conversation.
    async fn publish_envelope(&mut self, message_id: MessageId, envelope: MessageEnvelope) -> Result<MessageId> {
        match self.relay.send(Outbound::SendMessage(envelope)).await {
            Ok(()) => {
                self.session.mark_published(&message_id);
                Ok(message_id)
            }
            Err(e) => {
                warn!(message = %message_id, "failed to publish envelope: {}", e);
                self.session.discard(&message_id);
                Err(e)
            }
        }
    }

    async fn publish(&self, signal: Outbound) {
        if let Err(e) = self.relay.send(signal).await {
            warn!("failed to send signal: {}", e);
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            identity: self.session.identity().clone(),
            messages: self.session.conversation().messages().to_vec(),
            peers: self
                .session
                .directory()
                .snapshot()
                .into_iter()
                .map(|(peer, _)| peer)
                .collect(),
            typing_indicator: self.session.typing_indicator(),
            participant_count: self.session.participant_count(),
        }
    }
}
