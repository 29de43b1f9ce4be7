//! Request/response correlation.
//!
//! Commands that expect a multi-line reply (WHOIS, WHO, MODE lists)
//! register a keyed operation here before sending. Reply handlers find
//! the operation by key, accumulate partial state into it, and call
//! [`RequestManager::complete`] on the terminating numeric. Issuing a
//! command whose key is already pending joins the existing operation
//! instead of sending again; the entry is removed once every joined
//! requester has been completed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::RequestError;
use crate::state::{ExtendedWho, Mask, Whois, WhoxFields};

/// Partial reply state accumulated by handlers while an operation is
/// pending.
#[derive(Debug)]
pub enum RequestState {
    /// No reply data expected beyond the terminator.
    None,
    Whois(Whois),
    Who(WhoQuery),
    Masks(Vec<Mask>),
}

/// In-flight WHO/WHOX query state.
#[derive(Debug, Default)]
pub struct WhoQuery {
    /// Fields requested, for decoding 354 rows. Empty for plain WHO.
    pub fields: WhoxFields,
    pub rows: Vec<ExtendedWho>,
}

impl RequestState {
    pub fn as_whois_mut(&mut self) -> Option<&mut Whois> {
        match self {
            RequestState::Whois(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_who_mut(&mut self) -> Option<&mut WhoQuery> {
        match self {
            RequestState::Who(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_masks_mut(&mut self) -> Option<&mut Vec<Mask>> {
        match self {
            RequestState::Masks(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Operation {
    key: String,
    state: Mutex<RequestState>,
    done: watch::Sender<bool>,
}

struct Entry {
    op: Arc<Operation>,
    /// Requesters joined to this key. Completion removes the entry only
    /// when the count reaches zero.
    waiters: usize,
}

/// Handle returned by [`RequestManager::begin`]; lets the requester wait
/// for completion and read the final state.
pub struct RequestHandle {
    op: Arc<Operation>,
    done: watch::Receiver<bool>,
    joined: bool,
}

impl RequestHandle {
    pub fn key(&self) -> &str {
        &self.op.key
    }

    /// Whether this handle joined an operation that was already pending.
    /// The caller should skip sending the command again in that case.
    pub fn joined(&self) -> bool {
        self.joined
    }

    /// Wait for the operation to be completed. `None` waits indefinitely.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<(), RequestError> {
        let key = self.op.key.clone();
        let done = self.done.wait_for(|&d| d);
        match timeout {
            Some(limit) => {
                let result = tokio::time::timeout(limit, done)
                    .await
                    .map_err(|_| RequestError::Timeout(key.clone()))?;
                result.map_err(|_| RequestError::Timeout(key))?;
            }
            None => {
                done.await.map_err(|_| RequestError::Timeout(key))?;
            }
        }
        Ok(())
    }

    /// Read the accumulated state. Valid before and after completion; the
    /// handle keeps the operation alive even once it leaves the table.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut RequestState) -> R) -> R {
        f(&mut self.op.state.lock())
    }
}

/// Table of pending keyed operations.
#[derive(Default)]
pub struct RequestManager {
    pending: Mutex<HashMap<String, Entry>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`. If the key is already pending the
    /// existing operation is joined (and `initial` discarded); otherwise a
    /// new operation is created with `initial` as its state.
    pub fn begin(&self, key: &str, initial: RequestState) -> RequestHandle {
        let mut pending = self.pending.lock();
        if let Some(entry) = pending
            .values_mut()
            .find(|e| e.op.key.eq_ignore_ascii_case(key))
        {
            entry.waiters += 1;
            return RequestHandle {
                done: entry.op.done.subscribe(),
                op: Arc::clone(&entry.op),
                joined: true,
            };
        }
        let (done, rx) = watch::channel(false);
        let op = Arc::new(Operation {
            key: key.to_string(),
            state: Mutex::new(initial),
            done,
        });
        pending.insert(
            key.to_string(),
            Entry {
                op: Arc::clone(&op),
                waiters: 1,
            },
        );
        RequestHandle {
            op,
            done: rx,
            joined: false,
        }
    }

    /// Run `f` against the pending state for `key`, if any. Key lookup is
    /// case-insensitive.
    pub fn with_state<R>(&self, key: &str, f: impl FnOnce(&mut RequestState) -> R) -> Option<R> {
        let pending = self.pending.lock();
        let exact = find_key(&pending, key)?;
        let op = Arc::clone(&pending[&exact].op);
        drop(pending);
        let result = f(&mut op.state.lock());
        Some(result)
    }

    /// Pending keys starting with `prefix`, case-insensitively. Used by
    /// WHO reply handlers to match rows back to their query. The
    /// comparison is byte-wise so a prefix ending inside a multibyte
    /// character simply fails to match.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let pending = self.pending.lock();
        pending
            .keys()
            .filter(|k| {
                k.len() >= prefix.len()
                    && k.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            })
            .cloned()
            .collect()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        let pending = self.pending.lock();
        find_key(&pending, key).is_some()
    }

    /// Mark `key` complete: wake every waiter, release one requester, and
    /// drop the entry once no requesters remain.
    pub fn complete(&self, key: &str) -> Result<(), RequestError> {
        let mut pending = self.pending.lock();
        let exact =
            find_key(&pending, key).ok_or_else(|| RequestError::UnknownKey(key.to_string()))?;
        if let Some(entry) = pending.get_mut(&exact) {
            entry.op.done.send_replace(true);
            entry.waiters -= 1;
            if entry.waiters == 0 {
                pending.remove(&exact);
            }
        }
        Ok(())
    }
}

fn find_key(pending: &HashMap<String, Entry>, key: &str) -> Option<String> {
    pending
        .keys()
        .find(|k| k.eq_ignore_ascii_case(key))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joining_an_existing_key_shares_state() {
        let mgr = RequestManager::new();
        let first = mgr.begin("WHOIS alice", RequestState::Whois(Whois::default()));
        assert!(!first.joined());

        let second = mgr.begin("whois ALICE", RequestState::None);
        assert!(second.joined());

        // The joiner's initial state was discarded.
        second.with_state(|s| assert!(matches!(s, RequestState::Whois(_))));
    }

    #[test]
    fn entry_removed_only_after_all_requesters_complete() {
        let mgr = RequestManager::new();
        let _a = mgr.begin("WHOIS alice", RequestState::Whois(Whois::default()));
        let _b = mgr.begin("WHOIS alice", RequestState::None);

        mgr.complete("WHOIS alice").unwrap();
        assert!(mgr.is_pending("WHOIS alice"));
        mgr.complete("WHOIS alice").unwrap();
        assert!(!mgr.is_pending("WHOIS alice"));
    }

    #[test]
    fn completing_unknown_key_is_an_error() {
        let mgr = RequestManager::new();
        assert!(matches!(
            mgr.complete("WHOIS nobody"),
            Err(RequestError::UnknownKey(_))
        ));
    }

    #[test]
    fn state_lookup_is_case_insensitive() {
        let mgr = RequestManager::new();
        let _h = mgr.begin("MODE #Chan", RequestState::Masks(Vec::new()));
        let found = mgr.with_state("mode #chan", |s| s.as_masks_mut().is_some());
        assert_eq!(found, Some(true));
        assert_eq!(mgr.with_state("mode #other", |_| ()), None);
    }

    #[test]
    fn prefix_scan_finds_pending_queries() {
        let mgr = RequestManager::new();
        let _a = mgr.begin("WHO #rust 123", RequestState::Who(WhoQuery::default()));
        let _b = mgr.begin("WHOIS alice", RequestState::Whois(Whois::default()));
        let keys = mgr.keys_with_prefix("who ");
        assert_eq!(keys, vec!["WHO #rust 123".to_string()]);
    }

    #[test]
    fn prefix_scan_tolerates_multibyte_keys() {
        let mgr = RequestManager::new();
        let _a = mgr.begin("WHO #ñx 1", RequestState::Who(WhoQuery::default()));
        // The prefix boundary lands inside the two-byte 'ñ'.
        assert!(mgr.keys_with_prefix("WHO #a").is_empty());
        assert_eq!(mgr.keys_with_prefix("who #ñ").len(), 1);
    }

    #[tokio::test]
    async fn wait_returns_after_complete() {
        let mgr = Arc::new(RequestManager::new());
        let mut handle = mgr.begin("WHOIS alice", RequestState::Whois(Whois::default()));

        let mgr2 = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr2.with_state("WHOIS alice", |s| {
                if let Some(w) = s.as_whois_mut() {
                    w.nick = "alice".to_string();
                }
            });
            mgr2.complete("WHOIS alice").unwrap();
        });

        handle.wait(None).await.unwrap();
        let nick = handle.with_state(|s| s.as_whois_mut().map(|w| w.nick.clone()));
        assert_eq!(nick.as_deref(), Some("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_never_completed() {
        let mgr = RequestManager::new();
        let mut handle = mgr.begin("WHOIS ghost", RequestState::Whois(Whois::default()));
        let err = handle.wait(Some(Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, RequestError::Timeout(_)));
    }

    #[tokio::test]
    async fn handle_outlives_table_entry() {
        let mgr = RequestManager::new();
        let mut handle = mgr.begin("MODE #chan", RequestState::Masks(Vec::new()));
        mgr.with_state("MODE #chan", |s| {
            s.as_masks_mut().unwrap().push(Mask {
                mask: "*!*@spam.example".to_string(),
                set_by: "op".to_string(),
                set_at: chrono::Utc::now(),
            });
        });
        mgr.complete("MODE #chan").unwrap();
        assert!(!mgr.is_pending("MODE #chan"));

        handle.wait(None).await.unwrap();
        let count = handle.with_state(|s| s.as_masks_mut().map(|m| m.len()));
        assert_eq!(count, Some(1));
    }
}
