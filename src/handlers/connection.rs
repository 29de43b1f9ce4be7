//! Connection lifecycle handlers: PING, registration, ISUPPORT, MOTD,
//! nick errors, and error numerics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::commands;
use crate::dispatch::{Context, Handler, HandlerError};
use crate::event::Event;
use crate::isupport::{self, ChanModes, PrefixSpec};
use crate::message::Message;

pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let token = msg.arg(0).ok_or(HandlerError::MissingParam(0))?;
        ctx.state.lock().server_info.ping_token = Some(token.to_string());
        ctx.send_raw(format!("PONG :{token}"))
            .map_err(|_| HandlerError::Disconnected)?;
        Ok(())
    }
}

/// 004: server name and version.
pub struct MyInfoHandler;

#[async_trait]
impl Handler for MyInfoHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let mut state = ctx.state.lock();
        if let Some(name) = msg.arg(1) {
            state.server_info.name = Some(name.to_string());
        }
        state.server_info.version = msg.arg(2).map(String::from);
        Ok(())
    }
}

/// 900: SASL login confirmed; records our services account.
pub struct LoggedInHandler;

#[async_trait]
impl Handler for LoggedInHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let account = msg.arg(2).map(String::from);
        if let Some(user) = ctx.state.lock().self_user_mut() {
            user.account = account;
        }
        Ok(())
    }
}

/// `ERROR` from the server: the connection is going away.
pub struct ServerErrorHandler;

#[async_trait]
impl Handler for ServerErrorHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let reason = msg.arg(0).unwrap_or("connection terminated");
        warn!(%reason, "server error");
        ctx.network_failed(reason);
        Ok(())
    }
}

/// 001: the server accepted our registration. The nick in the reply is
/// authoritative (it may have been truncated or changed).
pub struct WelcomeHandler;

#[async_trait]
impl Handler for WelcomeHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg.arg(0).ok_or(HandlerError::MissingParam(0))?;
        let mut state = ctx.state.lock();
        state.set_self_nick(nick);
        if let Some(ref prefix) = msg.prefix {
            state.server_info.name = Some(prefix.clone());
        }
        Ok(())
    }
}

/// 005: RPL_ISUPPORT tokens.
pub struct IsupportHandler;

#[async_trait]
impl Handler for IsupportHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        // Skip the leading target nick; the trailing text filters itself
        // out by containing spaces.
        let params = msg.params.get(1..).unwrap_or_default();
        let mut state = ctx.state.lock();
        for entry in isupport::parse_tokens(params) {
            match (entry.key.as_str(), entry.value.as_deref()) {
                ("PREFIX", Some(value)) => {
                    if let Some(spec) = PrefixSpec::parse(value) {
                        state.server_info.prefix = spec;
                    }
                }
                ("CHANMODES", Some(value)) => {
                    if let Some(cm) = ChanModes::parse(value) {
                        state.server_info.chanmodes = cm;
                    }
                }
                ("WHOX", _) => state.server_info.extended_who = true,
                ("NETWORK", Some(value)) => {
                    state.server_info.network = Some(value.to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// 375/372/376/422: MOTD accumulation. The end of the MOTD (or its
/// absence) is the point where registration is complete.
pub struct MotdHandler;

#[async_trait]
impl Handler for MotdHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        match msg.command_upper().as_str() {
            "375" => {
                ctx.state.lock().motd = Some(String::new());
            }
            "372" => {
                let line = msg
                    .params
                    .last()
                    .map(String::as_str)
                    .unwrap_or("")
                    .trim_start_matches("- ")
                    .to_string();
                let mut state = ctx.state.lock();
                let motd = state.motd.get_or_insert_with(String::new);
                if !motd.is_empty() {
                    motd.push('\n');
                }
                motd.push_str(&line);
                drop(state);
                ctx.events.emit(Event::MotdLine(line));
            }
            _ => {
                // 376 or 422.
                let motd = ctx.state.lock().motd.clone();
                ctx.events.emit(Event::Motd(motd));
                self.finish_registration(ctx);
            }
        }
        Ok(())
    }
}

impl MotdHandler {
    fn finish_registration(&self, ctx: &Arc<Context>) {
        if ctx.registered.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("registration complete");
        ctx.events.emit(Event::Registered);
        if ctx.config.whois_on_connect {
            let ctx = Arc::clone(ctx);
            // Not on the dispatch path: the WHOIS wait needs the 318 to
            // be dispatched to resolve.
            tokio::spawn(async move {
                let nick = ctx.state.lock().self_nick().to_string();
                match commands::whois(&ctx, &nick).await {
                    Ok(whois) => {
                        if let Some(user) = ctx.state.lock().self_user_mut() {
                            user.realname = whois.realname.clone();
                            user.user = whois.user.clone();
                            user.hostname = whois.hostname.clone();
                            user.account = whois.logged_in_as.clone();
                        }
                    }
                    Err(err) => debug!(%err, "whois on connect failed"),
                }
            });
        }
    }
}

/// 431/432/433/436: our nick was rejected or is in use.
pub struct NickErrorHandler;

#[async_trait]
impl Handler for NickErrorHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let attempted = msg.arg(1).unwrap_or("").to_string();
        ctx.events.emit(Event::NickInUse {
            attempted: attempted.clone(),
        });
        ctx.events.emit(Event::ErrorReply(msg.clone()));

        if !ctx.registered.load(Ordering::SeqCst) && ctx.config.random_nick_when_refused {
            let fallback = format!(
                "{}{}",
                ctx.config.nickname,
                rand::thread_rng().gen_range(1000..10000)
            );
            debug!(%attempted, %fallback, "nick refused, retrying");
            ctx.state.lock().set_self_nick(&fallback);
            ctx.send_raw(format!("NICK {fallback}"))
                .map_err(|_| HandlerError::Disconnected)?;
        }
        Ok(())
    }
}

/// Error numerics that do not need dedicated handling (401-407).
pub struct ErrorReplyHandler;

#[async_trait]
impl Handler for ErrorReplyHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        ctx.events.emit(Event::ErrorReply(msg.clone()));
        Ok(())
    }
}
