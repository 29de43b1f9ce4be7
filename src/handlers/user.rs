//! User-level handlers: messages, nick and account tracking, and
//! WHOIS/WHO reply accumulation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::dispatch::{Context, Handler, HandlerError};
use crate::event::Event;
use crate::message::Message;
use crate::state::{ExtendedWho, WhoxFields};

pub struct PrivmsgHandler;

#[async_trait]
impl Handler for PrivmsgHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let target = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();
        let text = msg.arg(1).unwrap_or("").to_string();
        let source = match msg.prefix {
            Some(ref prefix) => {
                ctx.state.lock().get_or_add_user(prefix);
                prefix.clone()
            }
            None => String::new(),
        };
        ctx.events.emit(Event::Privmsg {
            source,
            target,
            text,
        });
        Ok(())
    }
}

pub struct NoticeHandler;

#[async_trait]
impl Handler for NoticeHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        ctx.events.emit(Event::Notice {
            source: msg.prefix.clone(),
            target: msg.arg(0).unwrap_or("").to_string(),
            text: msg.arg(1).unwrap_or("").to_string(),
        });
        Ok(())
    }
}

pub struct NickHandler;

#[async_trait]
impl Handler for NickHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let old = msg
            .source_nick()
            .ok_or(HandlerError::MissingParam(0))?
            .to_string();
        let new = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();
        ctx.state.lock().rename_user(&old, &new);
        ctx.events.emit(Event::NickChanged { old, new });
        Ok(())
    }
}

pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg
            .source_nick()
            .ok_or(HandlerError::MissingParam(0))?
            .to_string();
        ctx.state.lock().remove_user(&nick);
        ctx.events.emit(Event::UserQuit {
            nick,
            reason: msg.arg(0).map(String::from),
        });
        Ok(())
    }
}

/// account-notify: a user logged in or out of services.
pub struct AccountHandler;

#[async_trait]
impl Handler for AccountHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg
            .source_nick()
            .ok_or(HandlerError::MissingParam(0))?
            .to_string();
        let account = match msg.arg(0) {
            Some("*") | None => None,
            Some(account) => Some(account.to_string()),
        };
        if let Some(user) = ctx.state.lock().user_mut(&nick) {
            user.account = account;
        }
        Ok(())
    }
}

/// chghost: a user's ident or host changed.
pub struct ChghostHandler;

#[async_trait]
impl Handler for ChghostHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg
            .source_nick()
            .ok_or(HandlerError::MissingParam(0))?
            .to_string();
        let user_part = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();
        let host_part = msg.arg(1).ok_or(HandlerError::MissingParam(1))?.to_string();
        if let Some(user) = ctx.state.lock().user_mut(&nick) {
            user.user = Some(user_part);
            user.hostname = Some(host_part);
        }
        Ok(())
    }
}

/// 311/312/313/317/319/330: accumulate into the pending WHOIS operation.
pub struct WhoisReplyHandler;

#[async_trait]
impl Handler for WhoisReplyHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg.arg(1).ok_or(HandlerError::MissingParam(1))?;
        let key = format!("WHOIS {nick}");
        let numeric = msg.command_upper();
        let found = ctx.requests.with_state(&key, |state| {
            let Some(whois) = state.as_whois_mut() else {
                return;
            };
            match numeric.as_str() {
                "311" => {
                    whois.nick = nick.to_string();
                    whois.user = msg.arg(2).map(String::from);
                    whois.hostname = msg.arg(3).map(String::from);
                    whois.realname = msg.arg(5).map(String::from);
                }
                "312" => {
                    whois.server = msg.arg(2).map(String::from);
                    whois.server_info = msg.arg(3).map(String::from);
                }
                "313" => whois.operator = true,
                "317" => {
                    whois.seconds_idle = msg.arg(2).and_then(|s| s.parse().ok());
                }
                "319" => {
                    let channels = msg.params.last().map(String::as_str).unwrap_or("");
                    whois
                        .channels
                        .extend(channels.split_whitespace().map(String::from));
                }
                "330" => {
                    whois.logged_in_as = msg.arg(2).map(String::from);
                }
                _ => {}
            }
        });
        if found.is_none() {
            trace!(%key, "whois reply without a pending request");
        }
        Ok(())
    }
}

/// 318: end of WHOIS.
pub struct WhoisEndHandler;

#[async_trait]
impl Handler for WhoisEndHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg.arg(1).ok_or(HandlerError::MissingParam(1))?;
        let key = format!("WHOIS {nick}");
        let whois = ctx
            .requests
            .with_state(&key, |state| state.as_whois_mut().cloned());
        if let Some(Some(whois)) = whois {
            ctx.events.emit(Event::WhoisReceived(whois));
        }
        if let Err(err) = ctx.requests.complete(&key) {
            debug!(%err, "unsolicited end of whois");
        }
        Ok(())
    }
}

fn pending_who_keys(ctx: &Context, target: &str) -> Vec<String> {
    ctx.requests.keys_with_prefix(&format!("WHO {target}"))
}

/// 352: one plain WHO row.
pub struct WhoReplyHandler;

#[async_trait]
impl Handler for WhoReplyHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(1).unwrap_or("*");
        let nick = msg.arg(5).unwrap_or("");
        let row = ExtendedWho {
            channel: msg.arg(1).map(String::from),
            user: msg.arg(2).map(String::from),
            hostname: msg.arg(3).map(String::from),
            server: msg.arg(4).map(String::from),
            nick: msg.arg(5).map(String::from),
            flags: msg.arg(6).map(String::from),
            hops: msg
                .arg(7)
                .and_then(|t| t.split_whitespace().next())
                .and_then(|h| h.parse().ok()),
            realname: msg
                .arg(7)
                .and_then(|t| t.split_once(' '))
                .map(|(_, name)| name.to_string()),
            ..Default::default()
        };

        // The reply row matches a pending query keyed on either the
        // channel or the nick that was asked about.
        let mut keys = pending_who_keys(ctx, channel);
        if keys.is_empty() {
            keys = pending_who_keys(ctx, nick);
        }
        for key in keys {
            ctx.requests.with_state(&key, |state| {
                if let Some(query) = state.as_who_mut() {
                    query.rows.push(row.clone());
                }
            });
        }
        Ok(())
    }
}

/// 354: one WHOX row. The querytype token ties the row to its query.
pub struct WhoxReplyHandler;

#[async_trait]
impl Handler for WhoxReplyHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let querytype = msg.arg(1).ok_or(HandlerError::MissingParam(1))?;
        let key = ctx
            .requests
            .keys_with_prefix("WHO ")
            .into_iter()
            .find(|k| k.ends_with(&format!(" {querytype}")));
        let Some(key) = key else {
            trace!(%querytype, "whox row without a matching query");
            return Ok(());
        };

        ctx.requests.with_state(&key, |state| {
            let Some(query) = state.as_who_mut() else {
                return;
            };
            let mut row = ExtendedWho::default();
            // Field values follow the querytype in request-letter order.
            for (i, field) in query.fields.reply_fields().enumerate() {
                let Some(value) = msg.arg(2 + i) else { break };
                match field {
                    WhoxFields::CHANNEL => row.channel = Some(value.to_string()),
                    WhoxFields::USERNAME => row.user = Some(value.to_string()),
                    WhoxFields::IP => row.ip = Some(value.to_string()),
                    WhoxFields::HOSTNAME => row.hostname = Some(value.to_string()),
                    WhoxFields::SERVER => row.server = Some(value.to_string()),
                    WhoxFields::NICK => row.nick = Some(value.to_string()),
                    WhoxFields::FLAGS => row.flags = Some(value.to_string()),
                    WhoxFields::HOPS => row.hops = value.parse().ok(),
                    WhoxFields::IDLE => row.seconds_idle = value.parse().ok(),
                    WhoxFields::ACCOUNT => {
                        // "0" means not logged in.
                        row.account = (value != "0").then(|| value.to_string());
                    }
                    WhoxFields::OP_LEVEL => row.op_level = Some(value.to_string()),
                    WhoxFields::REALNAME => row.realname = Some(value.to_string()),
                    _ => {}
                }
            }
            query.rows.push(row);
        });
        Ok(())
    }
}

/// 315: end of WHO, for both plain and WHOX queries.
pub struct WhoEndHandler;

#[async_trait]
impl Handler for WhoEndHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let target = msg.arg(1).ok_or(HandlerError::MissingParam(1))?;
        let keys = pending_who_keys(ctx, target);
        if keys.is_empty() {
            debug!(%target, "unsolicited end of who");
            return Ok(());
        }
        for key in keys {
            let rows = ctx.requests.with_state(&key, |state| {
                state.as_who_mut().map(|q| q.rows.clone())
            });
            if let Some(Some(rows)) = rows {
                ctx.events.emit(Event::WhoReceived(rows));
            }
            if let Err(err) = ctx.requests.complete(&key) {
                debug!(%err, "who completion raced");
            }
        }
        Ok(())
    }
}
