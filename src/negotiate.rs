//! Capability negotiation and registration state machine.
//!
//! [`Negotiator`] is sans-IO: the connection driver feeds it each
//! relevant [`Message`] and writes out the lines it returns. The machine
//! walks `CAP LS` (including multiline 302 replies), `CAP REQ`/`ACK`,
//! SASL PLAIN, and `CAP END`, after which the server finishes
//! registration on its own.

use tracing::debug;

use crate::caps::CapRegistry;
use crate::config::ClientConfig;
use crate::message::Message;
use crate::sasl;

/// What the driver should do in response to a handled message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Write this raw line to the server.
    Send(String),
    /// SASL authentication failed with the server's reason.
    SaslFailed(String),
    /// Negotiation is over; registration proceeds server-side.
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingLs,
    Requesting,
    Authenticating,
    Ended,
}

pub struct Negotiator {
    phase: Phase,
    caps: CapRegistry,
    ls_tokens: Vec<String>,
    nickname: String,
    username: String,
    realname: String,
    password: Option<String>,
    sasl_supported: bool,
}

impl Negotiator {
    pub fn new(config: &ClientConfig) -> Self {
        // Requesting sasl without credentials would stall negotiation at
        // the AUTHENTICATE step.
        let sasl_supported = config.password.is_some()
            && config.supported_caps.iter().any(|c| c == "sasl");
        let supported = config
            .supported_caps
            .iter()
            .map(String::as_str)
            .filter(|c| *c != "sasl" || sasl_supported);
        Self {
            phase: Phase::Idle,
            caps: CapRegistry::with_supported(supported),
            ls_tokens: Vec::new(),
            nickname: config.nickname.clone(),
            username: config.username.clone(),
            realname: config.realname.clone(),
            password: config.password.clone(),
            sasl_supported,
        }
    }

    pub fn caps(&self) -> &CapRegistry {
        &self.caps
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Opening lines for a fresh connection. When the password cannot be
    /// used for SASL it is sent as a legacy PASS instead.
    pub fn start(&mut self) -> Vec<Action> {
        self.phase = Phase::AwaitingLs;
        let mut out = vec![Action::Send("CAP LS 302".to_string())];
        if let Some(ref password) = self.password {
            if !self.sasl_supported {
                out.push(Action::Send(format!("PASS :{password}")));
            }
        }
        out.push(Action::Send(format!("NICK {}", self.nickname)));
        out.push(Action::Send(format!(
            "USER {} 0 * :{}",
            self.username, self.realname
        )));
        out
    }

    /// Handle one server message. Messages that do not concern
    /// negotiation produce no actions.
    pub fn handle(&mut self, msg: &Message) -> Vec<Action> {
        match msg.command_upper().as_str() {
            "CAP" => self.handle_cap(msg),
            "AUTHENTICATE" => self.handle_authenticate(msg),
            "903" => {
                if self.phase == Phase::Authenticating {
                    debug!("sasl authentication succeeded");
                    self.end()
                } else {
                    Vec::new()
                }
            }
            "904" | "905" | "906" | "907" => {
                if self.phase == Phase::Authenticating {
                    let reason = msg
                        .params
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "authentication failed".to_string());
                    debug!(%reason, "sasl authentication failed");
                    let mut out = vec![Action::SaslFailed(reason)];
                    out.extend(self.end());
                    out
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    fn handle_cap(&mut self, msg: &Message) -> Vec<Action> {
        let subcommand = msg.arg(1).unwrap_or("");
        match subcommand {
            "LS" => self.handle_ls(msg),
            "ACK" => self.handle_ack(msg),
            "NAK" => {
                debug!(caps = msg.arg(2).unwrap_or(""), "capability request refused");
                if self.phase == Phase::Requesting {
                    self.end()
                } else {
                    Vec::new()
                }
            }
            "NEW" => self.handle_new(msg),
            "DEL" => {
                for name in msg.arg(2).unwrap_or("").split_whitespace() {
                    self.caps.withdraw(name);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_ls(&mut self, msg: &Message) -> Vec<Action> {
        if self.phase != Phase::AwaitingLs {
            return Vec::new();
        }
        // `CAP * LS * :tok...` means more lines follow.
        let (more, tokens) = match msg.arg(2) {
            Some("*") => (true, msg.arg(3).unwrap_or("")),
            Some(tokens) => (false, tokens),
            None => (false, ""),
        };
        self.ls_tokens
            .extend(tokens.split_whitespace().map(String::from));
        if more {
            return Vec::new();
        }

        for token in self.ls_tokens.drain(..) {
            self.caps.advertise(&token);
        }
        let request = self.caps.to_request();
        if request.is_empty() {
            return self.end();
        }
        self.phase = Phase::Requesting;
        vec![Action::Send(format!("CAP REQ :{}", request.join(" ")))]
    }

    fn handle_ack(&mut self, msg: &Message) -> Vec<Action> {
        for token in msg.arg(2).unwrap_or("").split_whitespace() {
            self.caps.acknowledge(token);
        }
        if self.phase != Phase::Requesting {
            return Vec::new();
        }
        if self.caps.is_enabled("sasl") && self.password.is_some() {
            self.phase = Phase::Authenticating;
            vec![Action::Send("AUTHENTICATE PLAIN".to_string())]
        } else {
            self.end()
        }
    }

    /// `CAP NEW` after registration re-requests anything we support.
    fn handle_new(&mut self, msg: &Message) -> Vec<Action> {
        let mut wanted = Vec::new();
        for token in msg.arg(2).unwrap_or("").split_whitespace() {
            self.caps.advertise(token);
            let name = token.split('=').next().unwrap_or(token);
            if self.caps.to_request().iter().any(|c| c == name) && !self.caps.is_enabled(name) {
                wanted.push(name.to_string());
            }
        }
        if wanted.is_empty() || self.phase != Phase::Ended {
            Vec::new()
        } else {
            vec![Action::Send(format!("CAP REQ :{}", wanted.join(" ")))]
        }
    }

    fn handle_authenticate(&mut self, msg: &Message) -> Vec<Action> {
        if self.phase != Phase::Authenticating || msg.arg(0) != Some("+") {
            return Vec::new();
        }
        let Some(ref password) = self.password else {
            return self.end();
        };
        let payload = sasl::plain_payload(&self.nickname, password);
        sasl::chunk_payload(&payload)
            .into_iter()
            .map(|chunk| Action::Send(format!("AUTHENTICATE {chunk}")))
            .collect()
    }

    fn end(&mut self) -> Vec<Action> {
        self.phase = Phase::Ended;
        vec![Action::Send("CAP END".to_string()), Action::Ended]
    }
}
