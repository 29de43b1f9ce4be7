//! Client event stream.
//!
//! Handlers publish [`Event`]s onto a broadcast bus; consumers subscribe
//! with [`EventBus::subscribe`]. Emission never blocks and events are
//! dropped when no subscriber exists.

use tokio::sync::broadcast;

use crate::message::Message;
use crate::state::{ExtendedWho, Whois};

/// Something observable happened on the connection.
#[derive(Clone, Debug)]
pub enum Event {
    /// A raw line was written to the server.
    RawSent(String),
    /// A raw line arrived from the server.
    RawReceived(String),
    /// Registration completed (001 received and negotiation ended).
    Registered,
    /// The server sent an `ERROR` line or the transport failed.
    NetworkError(String),
    /// An error numeric (4xx/5xx range tracked by the engine).
    ErrorReply(Message),
    /// Our nick was taken during registration.
    NickInUse { attempted: String },
    NickChanged { old: String, new: String },
    Privmsg {
        source: String,
        target: String,
        text: String,
    },
    Notice {
        source: Option<String>,
        target: String,
        text: String,
    },
    /// One line of the message of the day.
    MotdLine(String),
    /// The complete message of the day (or `None` when the server has
    /// none).
    Motd(Option<String>),
    ModeChanged {
        target: String,
        set_by: Option<String>,
        changes: String,
    },
    UserJoined { nick: String, channel: String },
    UserParted {
        nick: String,
        channel: String,
        reason: Option<String>,
    },
    UserQuit {
        nick: String,
        reason: Option<String>,
    },
    UserKicked {
        nick: String,
        channel: String,
        kicked_by: String,
        reason: Option<String>,
    },
    /// The NAMES listing for a channel finished (366).
    NamesReceived { channel: String },
    TopicReceived {
        channel: String,
        topic: String,
    },
    WhoisReceived(Whois),
    WhoReceived(Vec<ExtendedWho>),
    SaslFailed(String),
}

/// Broadcast bus for [`Event`]s.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(Event::Registered);
        assert!(matches!(rx.recv().await.unwrap(), Event::Registered));
    }

    #[test]
    fn emitting_without_subscribers_is_a_noop() {
        let bus = EventBus::default();
        bus.emit(Event::RawSent("PING".to_string()));
    }
}
