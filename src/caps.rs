//! IRCv3 capability bookkeeping.
//!
//! Tracks three sets: what this client supports, what the server
//! advertised in `CAP LS`, and what has actually been enabled by `CAP
//! ACK`. The request sent during negotiation is the intersection of the
//! first two.

use std::collections::{HashMap, HashSet};

/// Capabilities requested by default.
pub const DEFAULT_CAPS: &[&str] = &[
    "server-time",
    "multi-prefix",
    "cap-notify",
    "znc.in/server-time",
    "znc.in/server-time-iso",
    "account-notify",
    "chghost",
    "userhost-in-names",
    "sasl",
];

/// Capability state for one connection.
#[derive(Clone, Debug)]
pub struct CapRegistry {
    supported: HashSet<String>,
    /// Advertised capability name to its `=value` part, if any.
    advertised: HashMap<String, Option<String>>,
    enabled: HashSet<String>,
}

impl Default for CapRegistry {
    fn default() -> Self {
        Self::with_supported(DEFAULT_CAPS.iter().copied())
    }
}

impl CapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supported<'a>(supported: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            supported: supported.into_iter().map(String::from).collect(),
            advertised: HashMap::new(),
            enabled: HashSet::new(),
        }
    }

    /// Record one `CAP LS`/`CAP NEW` token, splitting off a `=value` part.
    pub fn advertise(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        match token.split_once('=') {
            Some((name, value)) => {
                self.advertised
                    .insert(name.to_string(), Some(value.to_string()));
            }
            None => {
                self.advertised.insert(token.to_string(), None);
            }
        }
    }

    /// Forget a capability the server withdrew (`CAP DEL`).
    pub fn withdraw(&mut self, name: &str) {
        self.advertised.remove(name);
        self.enabled.remove(name);
    }

    /// Apply one `CAP ACK` token. A leading `-` disables the capability.
    pub fn acknowledge(&mut self, token: &str) {
        match token.strip_prefix('-') {
            Some(name) => {
                self.enabled.remove(name);
            }
            None if !token.is_empty() => {
                self.enabled.insert(token.to_string());
            }
            None => {}
        }
    }

    pub fn is_advertised(&self, name: &str) -> bool {
        self.advertised.contains_key(name)
    }

    pub fn advertised_value(&self, name: &str) -> Option<&str> {
        self.advertised.get(name)?.as_deref()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Capabilities to request: supported by us and advertised by the
    /// server, sorted for a stable request line.
    pub fn to_request(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .supported
            .iter()
            .filter(|name| self.advertised.contains_key(*name))
            .cloned()
            .collect();
        caps.sort();
        caps
    }
}
