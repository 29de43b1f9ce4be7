//! Message dispatch.
//!
//! Incoming lines flow through a single queue consumed in arrival order
//! by [`run`]. Each parsed message is routed to at most one [`Handler`]
//! by command name. Handlers run to completion before the next message
//! is taken, so a handler that needs to wait on a correlated reply must
//! spawn a task for the waiting part instead of blocking the dispatch
//! path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::event::{Event, EventBus};
use crate::message::Message;
use crate::negotiate::Negotiator;
use crate::request::RequestManager;
use crate::state::NetworkState;
use crate::sync::NamedEvents;

/// Non-fatal handler failure. Dispatch logs it and moves on.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing parameter {0}")]
    MissingParam(usize),
    #[error("connection closed")]
    Disconnected,
    #[error(transparent)]
    Request(#[from] crate::error::RequestError),
}

/// Shared engine state handed to every handler.
pub struct Context {
    pub config: ClientConfig,
    pub state: Mutex<NetworkState>,
    pub requests: RequestManager,
    pub named_events: NamedEvents,
    pub events: EventBus,
    pub negotiator: Mutex<Negotiator>,
    /// Set once the transport has failed; commands stop sending.
    pub net_error: AtomicBool,
    /// Set when the server completes registration (end of MOTD).
    pub registered: AtomicBool,
    out: mpsc::UnboundedSender<String>,
    /// Re-dispatch path back into the line queue. Taken on network
    /// failure so the queue can close once the reader is gone.
    feedback: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Context {
    pub fn new(
        config: ClientConfig,
        out: mpsc::UnboundedSender<String>,
        feedback: mpsc::UnboundedSender<String>,
    ) -> Self {
        let mut state = NetworkState::new();
        state.set_self_nick(&config.nickname);
        Self {
            negotiator: Mutex::new(Negotiator::new(&config)),
            state: Mutex::new(state),
            requests: RequestManager::new(),
            named_events: NamedEvents::new(),
            events: EventBus::default(),
            net_error: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            config,
            out,
            feedback: Mutex::new(Some(feedback)),
        }
    }

    /// Queue a raw line for the writer task.
    pub fn send_raw(&self, line: impl Into<String>) -> Result<(), ConnectionError> {
        let line = line.into();
        self.events.emit(Event::RawSent(line.clone()));
        self.out
            .send(line)
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Push a raw line back onto the dispatch queue, behind everything
    /// already waiting there. A no-op after the transport has failed.
    pub fn redispatch(&self, line: String) {
        if let Some(tx) = &*self.feedback.lock() {
            let _ = tx.send(line);
        }
    }

    /// Record a transport failure. The first call emits
    /// [`Event::NetworkError`] and drops the re-dispatch sender so the
    /// line queue closes once the reader is gone; later calls are no-ops.
    pub fn network_failed(&self, reason: &str) {
        if self.net_error.swap(true, Ordering::SeqCst) {
            return;
        }
        self.feedback.lock().take();
        self.events.emit(Event::NetworkError(reason.to_string()));
    }
}

/// Something that handles one command or numeric.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError>;
}

/// Command name to handler table.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command or numeric. Re-registering a
    /// command replaces the previous handler.
    pub fn register(&mut self, command: &str, handler: Box<dyn Handler>) {
        let key = command.to_ascii_uppercase();
        if self.handlers.insert(key, handler).is_some() {
            warn!(command, "replacing existing handler");
        }
    }

    pub fn get(&self, command: &str) -> Option<&dyn Handler> {
        self.handlers.get(command).map(|h| h.as_ref())
    }
}

/// Consume lines in order, parse them, and route to handlers. Returns
/// when the line channel closes.
pub async fn run(
    registry: Arc<Registry>,
    ctx: Arc<Context>,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        ctx.events.emit(Event::RawReceived(line.clone()));
        let msg = match Message::parse(&line) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "discarding unparseable line");
                continue;
            }
        };
        let command = msg.command_upper();
        match registry.get(&command) {
            Some(handler) => {
                if let Err(err) = handler.handle(&ctx, &msg).await {
                    warn!(%command, %err, "handler failed");
                }
            }
            None => trace!(%command, "no handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> (Arc<Context>, mpsc::UnboundedReceiver<String>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        let config = ClientConfig::new("irc.example.net", "alice");
        (Arc::new(Context::new(config, out_tx, feedback_tx)), out_rx)
    }

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, _ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
            self.log.lock().push(msg.params.join(" "));
            Ok(())
        }
    }

    #[tokio::test]
    async fn messages_are_dispatched_in_arrival_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register(
            "PRIVMSG",
            Box::new(Recorder {
                log: Arc::clone(&log),
            }),
        );
        let (ctx, _out) = test_context();

        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..10 {
            tx.send(format!(":a PRIVMSG #c :{i}")).unwrap();
        }
        drop(tx);
        run(Arc::new(registry), ctx, rx).await;

        let seen = log.lock().clone();
        let expected: Vec<String> = (0..10).map(|i| format!("#c {i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn unparseable_and_unhandled_lines_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register(
            "privmsg",
            Box::new(Recorder {
                log: Arc::clone(&log),
            }),
        );
        let (ctx, _out) = test_context();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(String::new()).unwrap();
        tx.send("UNHANDLED x".to_string()).unwrap();
        tx.send(":a PRIVMSG #c :hi".to_string()).unwrap();
        drop(tx);
        run(Arc::new(registry), ctx, rx).await;

        // Registration was case-insensitive and bad lines were skipped.
        assert_eq!(log.lock().clone(), vec!["#c hi".to_string()]);
    }

    #[test]
    fn network_failure_signals_once_and_disarms_redispatch() {
        let (out_tx, _out) = mpsc::unbounded_channel();
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
        let config = ClientConfig::new("irc.example.net", "alice");
        let ctx = Context::new(config, out_tx, feedback_tx);
        let mut events = ctx.events.subscribe();

        ctx.redispatch(":srv PING :x".to_string());
        assert!(feedback_rx.try_recv().is_ok());

        ctx.network_failed("connection closed");
        ctx.network_failed("read failed");
        assert!(matches!(events.try_recv().unwrap(), Event::NetworkError(_)));
        assert!(events.try_recv().is_err());

        // The re-dispatch sender is gone, so the line queue can close.
        ctx.redispatch(":srv PING :y".to_string());
        assert!(feedback_rx.try_recv().is_err());
    }

    #[test]
    fn send_raw_emits_event_and_queues_line() {
        let (ctx, mut out) = test_context();
        let mut events = ctx.events.subscribe();
        ctx.send_raw("PING :x").unwrap();
        assert_eq!(out.try_recv().unwrap(), "PING :x");
        assert!(matches!(events.try_recv().unwrap(), Event::RawSent(_)));
    }
}
