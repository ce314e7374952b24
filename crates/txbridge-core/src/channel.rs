use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    error::{BridgeError, BridgeErrorCategory},
    types::{BridgeCommand, BridgeEvent, BridgeReply},
};

/// Broadcast event stream type used by caller-side subscribers.
pub type EventStream = broadcast::Receiver<BridgeEvent>;

/// Reply slot for call-with-result commands.
pub type ReplySender = oneshot::Sender<Result<BridgeReply, BridgeError>>;

/// Errors returned by bridge channel operations.
#[derive(Debug, Error)]
pub enum BridgeChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The runtime dropped the reply slot without answering.
    #[error("runtime dropped the reply before answering")]
    ReplyDropped,
}

impl From<BridgeChannelError> for BridgeError {
    fn from(error: BridgeChannelError) -> Self {
        let code = match error {
            BridgeChannelError::CommandChannelClosed => "command_channel_closed",
            BridgeChannelError::ReplyDropped => "reply_dropped",
        };
        BridgeError::new(BridgeErrorCategory::Internal, code, error.to_string())
    }
}

/// One inbound command plus an optional reply slot.
///
/// Without a reply slot the command is fire-and-forget and failures are
/// broadcast as `BridgeEvent::CommandFailed`.
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: BridgeCommand,
    pub reply: Option<ReplySender>,
}

impl CommandEnvelope {
    pub fn fire_and_forget(command: BridgeCommand) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    pub fn with_reply(
        command: BridgeCommand,
    ) -> (Self, oneshot::Receiver<Result<BridgeReply, BridgeError>>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(reply_tx),
            },
            reply_rx,
        )
    }
}

/// Command/event channel pair shared by the runtime and the transport layer.
#[derive(Clone, Debug)]
pub struct BridgeChannels {
    command_tx: mpsc::Sender<CommandEnvelope>,
    event_tx: broadcast::Sender<BridgeEvent>,
}

impl BridgeChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<CommandEnvelope>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Clone the event sender. Producers hold only this side so the
    /// command channel closes once every caller handle is gone.
    pub fn event_sender(&self) -> broadcast::Sender<BridgeEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted bridge events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one fire-and-forget command to the runtime.
    pub async fn send_command(&self, command: BridgeCommand) -> Result<(), BridgeChannelError> {
        self.command_tx
            .send(CommandEnvelope::fire_and_forget(command))
            .await
            .map_err(|_| BridgeChannelError::CommandChannelClosed)
    }

    /// Send one command and wait for the runtime's reply.
    pub async fn call(&self, command: BridgeCommand) -> Result<BridgeReply, BridgeError> {
        let (envelope, reply_rx) = CommandEnvelope::with_reply(command);
        self.command_tx
            .send(envelope)
            .await
            .map_err(|_| BridgeChannelError::CommandChannelClosed)?;

        reply_rx
            .await
            .map_err(|_| BridgeError::from(BridgeChannelError::ReplyDropped))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendTarget, StoreKind};

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = BridgeChannels::new(8, 8);
        channels
            .send_command(BridgeCommand::BeginDocumentTransaction {
                session_id: "s1".into(),
                target: BackendTarget::default(),
            })
            .await
            .expect("command send should work");

        let envelope = rx.recv().await.expect("receiver should have a command");
        assert!(envelope.reply.is_none());
        match envelope.command {
            BridgeCommand::BeginDocumentTransaction { session_id, .. } => {
                assert_eq!(session_id, "s1")
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_returns_runtime_reply() {
        let (channels, mut rx) = BridgeChannels::new(8, 8);
        let responder = tokio::spawn(async move {
            let envelope = rx.recv().await.expect("receiver should have a command");
            let reply = envelope.reply.expect("call should carry a reply slot");
            let _ = reply.send(Err(BridgeError::session_not_found(envelope.command.session_id())));
        });

        let err = channels
            .call(BridgeCommand::DisposeTransaction {
                store: StoreKind::Tree,
                session_id: "missing".into(),
            })
            .await
            .expect_err("runtime answered with an error");
        assert_eq!(err.code, "internal-error");
        responder.await.expect("responder should finish");
    }

    #[tokio::test]
    async fn reports_closed_runtime() {
        let (channels, rx) = BridgeChannels::new(1, 1);
        drop(rx);

        let err = channels
            .call(BridgeCommand::GetDocument {
                session_id: "s1".into(),
                path: "a/b".into(),
            })
            .await
            .expect_err("closed channel should fail");
        assert_eq!(err.code, "command_channel_closed");
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, _) = BridgeChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels
            .event_sender()
            .send(BridgeEvent::CommandFailed {
                session_id: None,
                code: "x".into(),
                message: "y".into(),
            })
            .expect("two subscribers are listening");

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }
}
