//! Async command loop that drives tree and document transactions.
//!
//! Callers talk to the runtime through [`RuntimeHandle`]: commands go in
//! over an `mpsc` channel, `update`/terminal events come back over a
//! `broadcast` stream. Backend retry loops run on blocking workers tracked by
//! the runtime so shutdown can interrupt and drain them.

pub mod config;
pub mod document;
pub mod registry;
pub mod session;
pub mod tree;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};
use txbridge_core::{
    BridgeChannelError, BridgeChannels, BridgeCommand, BridgeError, BridgeEvent, BridgeReply,
    CommandEnvelope, EventStream, ReplySender, StoreKind, command_failed,
};
use txbridge_store::StoreProvider;

pub use config::{BridgeConfig, ConfigError};
pub use document::DocumentCoordinator;
pub use tree::TreeCoordinator;

/// Caller-side handle to a spawned [`TransactionRuntime`].
///
/// The runtime holds no command sender of its own: once every handle is
/// dropped the command channel closes and the runtime shuts down as if
/// [`RuntimeHandle::shutdown`] had been called.
#[derive(Clone)]
pub struct RuntimeHandle {
    channels: BridgeChannels,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RuntimeHandle {
    /// Enqueue a fire-and-forget command. Failures arrive as
    /// `BridgeEvent::CommandFailed`.
    pub async fn send(&self, command: BridgeCommand) -> Result<(), BridgeChannelError> {
        self.channels.send_command(command).await
    }

    /// Send a command and wait for its reply.
    pub async fn call(&self, command: BridgeCommand) -> Result<BridgeReply, BridgeError> {
        self.channels.call(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop accepting commands, interrupt paused sessions and wait until every
    /// worker has emitted its terminal event.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Spawn the runtime on the current Tokio runtime.
pub fn spawn_runtime(config: &BridgeConfig, provider: Arc<dyn StoreProvider>) -> RuntimeHandle {
    let (channels, command_rx) = BridgeChannels::new(config.command_buffer, config.event_buffer);
    let shutdown = CancellationToken::new();
    let runtime = TransactionRuntime::new(
        channels.event_sender(),
        command_rx,
        shutdown.clone(),
        provider,
        config,
    );

    let tasks = TaskTracker::new();
    tasks.spawn(runtime.run());

    RuntimeHandle {
        channels,
        shutdown,
        tasks,
    }
}

/// Owns the command receiver and both coordinators.
pub struct TransactionRuntime {
    events: broadcast::Sender<BridgeEvent>,
    command_rx: mpsc::Receiver<CommandEnvelope>,
    shutdown: CancellationToken,
    trees: TreeCoordinator,
    documents: DocumentCoordinator,
    workers: TaskTracker,
}

impl TransactionRuntime {
    pub fn new(
        events: broadcast::Sender<BridgeEvent>,
        command_rx: mpsc::Receiver<CommandEnvelope>,
        shutdown: CancellationToken,
        provider: Arc<dyn StoreProvider>,
        config: &BridgeConfig,
    ) -> Self {
        let timing = config.handshake_timing();
        let workers = TaskTracker::new();
        Self {
            trees: TreeCoordinator::new(
                Arc::clone(&provider),
                timing,
                events.clone(),
                workers.clone(),
            ),
            documents: DocumentCoordinator::new(provider, timing, events.clone(), workers.clone()),
            events,
            command_rx,
            shutdown,
            workers,
        }
    }

    pub async fn run(mut self) {
        info!("transaction runtime started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = self.command_rx.recv() => match envelope {
                    Some(envelope) => self.handle_command(envelope),
                    None => break,
                },
            }
        }

        info!(
            trees = self.trees.active_sessions(),
            documents = self.documents.active_sessions(),
            "transaction runtime stopping"
        );
        self.trees.interrupt_all();
        self.documents.interrupt_all();
        self.workers.close();
        self.workers.wait().await;
        info!("transaction runtime stopped");
    }

    fn handle_command(&self, envelope: CommandEnvelope) {
        let CommandEnvelope { command, reply } = envelope;
        let session_id = command.session_id().to_owned();
        debug!(
            command = command.kind_name(),
            session_id = %session_id,
            "handling bridge command"
        );

        let result = match command {
            BridgeCommand::BeginTreeTransaction {
                session_id,
                target,
                path,
                apply_locally,
            } => self.trees.begin(&session_id, target, path, apply_locally),
            BridgeCommand::SubmitTreeVerdict {
                session_id,
                value,
                abort,
            } => self.trees.submit_verdict(&session_id, value, abort),
            BridgeCommand::BeginDocumentTransaction { session_id, target } => {
                self.documents.begin(&session_id, target)
            }
            BridgeCommand::ApplyDocumentBuffer {
                session_id,
                commands,
            } => self.documents.apply_buffer(&session_id, commands),
            BridgeCommand::GetDocument { session_id, path } => {
                let documents = self.documents.clone();
                let events = self.events.clone();
                self.workers.spawn(async move {
                    let result = documents
                        .get_document(&session_id, path)
                        .await
                        .map(BridgeReply::Document);
                    respond(&events, reply, &session_id, result);
                });
                return;
            }
            BridgeCommand::DisposeTransaction { store, session_id } => match store {
                StoreKind::Tree => self.trees.dispose(&session_id),
                StoreKind::Document => self.documents.dispose(&session_id),
            },
        };

        respond(
            &self.events,
            reply,
            &session_id,
            result.map(|()| BridgeReply::Accepted),
        );
    }
}

/// Best-effort broadcast; lagging or absent subscribers are not an error.
pub(crate) fn emit(events: &broadcast::Sender<BridgeEvent>, event: BridgeEvent) {
    let _ = events.send(event);
}

/// Answer the reply slot, or broadcast the failure for fire-and-forget
/// commands.
fn respond(
    events: &broadcast::Sender<BridgeEvent>,
    reply: Option<ReplySender>,
    session_id: &str,
    result: Result<BridgeReply, BridgeError>,
) {
    match reply {
        Some(reply) => {
            if reply.send(result).is_err() {
                debug!(session_id, "caller dropped the reply slot");
            }
        }
        None => {
            if let Err(err) = result {
                warn!(
                    session_id,
                    code = %err.code,
                    message = %err.message,
                    "bridge command failed"
                );
                emit(events, command_failed(Some(session_id.to_owned()), err));
            }
        }
    }
}
