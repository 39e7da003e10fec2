//! Lifecycle event queue.
//!
//! Collaborators run in their own tasks (or driver callbacks) and never call
//! into the lifecycle manager directly. They post a [`NodeEvent`] instead;
//! the runtime consumes the queue one event at a time.
//!
//! The queue has two lanes. Link, session, provisioning, retry and shutdown
//! events travel on an unbounded control lane and are never dropped. Inbound
//! broker messages use a bounded lane and are shed when it is full. The
//! control lane is always drained first.

use nodelink_core::{InboundMessage, LinkStatus, ProvisioningField, SessionStatus};
use tokio::sync::mpsc;
use tracing::warn;

/// Events consumed by the runtime loop.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Link(LinkStatus),
    Session(SessionStatus),
    /// A provisioning field was written.
    Provisioning(ProvisioningField),
    /// The deferred broker restart with this generation is due.
    BrokerRetry(u64),
    /// Inbound broker message.
    Message(InboundMessage),
    /// Stop the event loop.
    Shutdown,
}

/// Cloneable handle for posting events.
#[derive(Debug, Clone)]
pub struct EventSender {
    control: mpsc::UnboundedSender<NodeEvent>,
    messages: mpsc::Sender<InboundMessage>,
}

impl EventSender {
    /// Post an event, waiting for message lane capacity if needed.
    pub async fn send(&self, event: NodeEvent) -> bool {
        match event {
            NodeEvent::Message(message) => self.messages.send(message).await.is_ok(),
            event => self.control.send(event).is_ok(),
        }
    }

    /// Post an event from a synchronous context. Control events are only
    /// refused once the runtime is gone; messages are also dropped (and
    /// logged) when the message lane is full.
    pub fn notify(&self, event: NodeEvent) -> bool {
        let message = match event {
            NodeEvent::Message(message) => message,
            event => return self.control.send(event).is_ok(),
        };

        match self.messages.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(topic = %message.topic, "message queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn link(&self, status: LinkStatus) -> bool {
        self.notify(NodeEvent::Link(status))
    }

    pub fn session(&self, status: SessionStatus) -> bool {
        self.notify(NodeEvent::Session(status))
    }

    pub fn provisioning(&self, field: ProvisioningField) -> bool {
        self.notify(NodeEvent::Provisioning(field))
    }

    pub fn message(&self, message: InboundMessage) -> bool {
        self.notify(NodeEvent::Message(message))
    }

    pub fn shutdown(&self) -> bool {
        self.notify(NodeEvent::Shutdown)
    }
}

/// Receiving half, owned by the runtime loop.
#[derive(Debug)]
pub struct EventReceiver {
    control: mpsc::UnboundedReceiver<NodeEvent>,
    messages: mpsc::Receiver<InboundMessage>,
}

impl EventReceiver {
    /// Next event, control lane first. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        tokio::select! {
            biased;
            Some(event) = self.control.recv() => Some(event),
            Some(message) = self.messages.recv() => Some(NodeEvent::Message(message)),
            else => None,
        }
    }
}

/// The queue backing a runtime. Created first so collaborators can be
/// handed a sender before the runtime exists. `depth` bounds the message
/// lane only.
#[derive(Debug)]
pub struct EventQueue {
    sender: EventSender,
    rx: EventReceiver,
}

impl EventQueue {
    pub fn new(depth: usize) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::channel(depth.max(1));
        Self {
            sender: EventSender {
                control: control_tx,
                messages: message_tx,
            },
            rx: EventReceiver {
                control: control_rx,
                messages: message_rx,
            },
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub(crate) fn into_parts(self) -> (EventSender, EventReceiver) {
        (self.sender, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_core::Scope;

    fn message(topic: &str) -> InboundMessage {
        InboundMessage::new(topic, Vec::new(), Scope::Local)
    }

    #[tokio::test]
    async fn test_full_message_lane_drops_messages_only() {
        let queue = EventQueue::new(2);
        let sender = queue.sender();
        assert!(sender.message(message("a")));
        assert!(sender.message(message("b")));
        assert!(!sender.message(message("c")));

        assert!(sender.session(SessionStatus::Down));
        assert!(sender.link(LinkStatus::Down));
        assert!(sender.provisioning(ProvisioningField::Command));
    }

    #[tokio::test]
    async fn test_control_events_are_received_first() {
        let queue = EventQueue::new(4);
        let sender = queue.sender();
        sender.message(message("a"));
        sender.session(SessionStatus::Down);
        sender.message(message("b"));

        let (_, mut rx) = queue.into_parts();
        assert!(matches!(
            rx.recv().await,
            Some(NodeEvent::Session(SessionStatus::Down))
        ));
        assert!(matches!(rx.recv().await, Some(NodeEvent::Message(m)) if m.topic == "a"));
        assert!(matches!(rx.recv().await, Some(NodeEvent::Message(m)) if m.topic == "b"));
    }

    #[tokio::test]
    async fn test_send_waits_for_message_capacity() {
        let queue = EventQueue::new(1);
        let sender = queue.sender();
        assert!(sender.send(NodeEvent::Message(message("a"))).await);
        assert!(sender.send(NodeEvent::BrokerRetry(3)).await);

        let (_, mut rx) = queue.into_parts();
        assert!(matches!(rx.recv().await, Some(NodeEvent::BrokerRetry(3))));
        assert!(matches!(rx.recv().await, Some(NodeEvent::Message(_))));
    }

    #[tokio::test]
    async fn test_notify_after_close() {
        let queue = EventQueue::new(4);
        let sender = queue.sender();
        drop(queue);
        assert!(!sender.shutdown());
        assert!(!sender.message(message("a")));
        assert!(!sender.send(NodeEvent::BrokerRetry(1)).await);
    }
}
