//! Named one-shot events.
//!
//! A lightweight registry for synchronizing on protocol milestones that
//! have no request key, such as "our JOIN to #chan was confirmed".
//! Handlers register an event before acting, other tasks wait on it by
//! name, and the handler that observes the milestone signals it. A
//! signalled event stays in the registry until its expiry timer removes
//! it, so a waiter that subscribes after the signal still observes it as
//! fired. Events that are never signalled expire the same way; expiry
//! fires the event so waiters are not left hanging.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);

/// Registry of named one-shot events.
#[derive(Clone)]
pub struct NamedEvents {
    events: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
    expiry: Duration,
}

impl Default for NamedEvents {
    fn default() -> Self {
        Self::with_expiry(DEFAULT_EXPIRY)
    }
}

impl NamedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            events: Arc::new(Mutex::new(HashMap::new())),
            expiry,
        }
    }

    /// Register an event. A second registration under the same name is a
    /// no-op; the original event and its expiry timer stay in place.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, name: &str) {
        let mut events = self.events.lock();
        if events.contains_key(name) {
            return;
        }
        let (tx, _rx) = watch::channel(false);
        events.insert(name.to_string(), tx);
        drop(events);

        let this = self.clone();
        let name = name.to_string();
        let expiry = self.expiry;
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            this.expire(&name);
        });
    }

    /// Fire the event. The entry is left in place for late waiters; its
    /// expiry timer removes it. Signalling an unknown name is a no-op.
    pub fn signal(&self, name: &str) {
        if let Some(event) = self.events.lock().get(name) {
            event.send_replace(true);
        }
    }

    fn expire(&self, name: &str) {
        if let Some(event) = self.events.lock().remove(name) {
            event.send_replace(true);
        }
    }

    /// Wait for the named event to fire, up to `timeout`. Returns `false`
    /// immediately when no such event is registered, and `false` when the
    /// timeout elapses first.
    pub async fn wait(&self, name: &str, timeout: Duration) -> bool {
        let mut rx = {
            let events = self.events.lock();
            match events.get(name) {
                Some(event) => event.subscribe(),
                None => return false,
            }
        };
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|&fired| fired)).await;
        matches!(outcome, Ok(Ok(_)))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.events.lock().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signalled_event_releases_waiter() {
        let events = NamedEvents::new();
        events.register("join #chan");

        let waiter = events.clone();
        let task = tokio::spawn(async move { waiter.wait("join #chan", Duration::from_secs(5)).await });
        tokio::task::yield_now().await;

        events.signal("join #chan");
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn late_waiter_still_observes_a_signalled_event() {
        let events = NamedEvents::new();
        events.register("join #chan");
        events.signal("join #chan");

        // The subscription happens after the signal; the fired state must
        // still be visible.
        assert!(events.wait("join #chan", Duration::from_secs(5)).await);
        assert!(events.is_registered("join #chan"));
    }

    #[tokio::test]
    async fn waiting_on_unknown_event_returns_immediately() {
        let events = NamedEvents::new();
        assert!(!events.wait("never registered", Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_yields_false() {
        let events = NamedEvents::with_expiry(Duration::from_secs(600));
        events.register("join #chan");
        assert!(!events.wait("join #chan", Duration::from_secs(1)).await);
        // The event itself is still registered.
        assert!(events.is_registered("join #chan"));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_the_event() {
        let events = NamedEvents::with_expiry(Duration::from_secs(2));
        events.register("join #chan");
        // Wait longer than the expiry; the expiry fires the event and the
        // waiter observes it as signalled.
        assert!(events.wait("join #chan", Duration::from_secs(10)).await);
        assert!(!events.is_registered("join #chan"));
    }

    #[tokio::test(start_paused = true)]
    async fn signalled_event_is_removed_at_expiry() {
        let events = NamedEvents::with_expiry(Duration::from_secs(5));
        events.register("join #chan");
        events.signal("join #chan");

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(events.is_registered("join #chan"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!events.is_registered("join #chan"));
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let events = NamedEvents::new();
        events.register("motd");
        events.register("motd");

        let waiter = events.clone();
        let task = tokio::spawn(async move { waiter.wait("motd", Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        events.signal("motd");
        assert!(task.await.unwrap());
    }
}
