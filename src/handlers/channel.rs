//! Channel membership and metadata handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::commands;
use crate::dispatch::{Context, Handler, HandlerError};
use crate::event::Event;
use crate::message::Message;
use crate::prefix::Prefix;
use crate::state::WhoxFields;

pub struct JoinHandler;

#[async_trait]
impl Handler for JoinHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg
            .source_nick()
            .ok_or(HandlerError::MissingParam(0))?
            .to_string();
        let channel = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();

        let is_self = {
            let mut state = ctx.state.lock();
            if let Some(ref prefix) = msg.prefix {
                state.get_or_add_user(prefix);
            }
            state.add_membership(&nick, &channel);
            // extended-join carries the account and realname.
            if let Some(account) = msg.arg(1) {
                if let Some(user) = state.user_mut(&nick) {
                    user.account = (account != "*").then(|| account.to_string());
                    user.realname = msg.arg(2).map(String::from);
                }
            }
            state.is_self(&nick)
        };

        if is_self {
            // Release anything waiting for this join to be confirmed.
            ctx.named_events.signal(&commands::join_event(&channel));

            if ctx.negotiator.lock().caps().is_enabled("account-notify") {
                // Accounts of existing members are not pushed to us, so
                // seed them with one WHOX sweep.
                let ctx = Arc::clone(ctx);
                let channel = channel.clone();
                tokio::spawn(async move {
                    let fields = WhoxFields::NICK | WhoxFields::ACCOUNT;
                    match commands::who(&ctx, &channel, fields).await {
                        Ok(rows) => {
                            let mut state = ctx.state.lock();
                            for row in rows {
                                if let Some(ref nick) = row.nick {
                                    if let Some(user) = state.user_mut(nick) {
                                        user.account = row.account.clone();
                                    }
                                }
                            }
                        }
                        Err(err) => debug!(%err, "account sweep failed"),
                    }
                });
            }
        }

        ctx.events.emit(Event::UserJoined { nick, channel });
        Ok(())
    }
}

pub struct PartHandler;

#[async_trait]
impl Handler for PartHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let nick = msg
            .source_nick()
            .ok_or(HandlerError::MissingParam(0))?
            .to_string();
        let channel = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();
        {
            let mut state = ctx.state.lock();
            if state.is_self(&nick) {
                state.remove_channel(&channel);
            } else {
                state.remove_membership(&nick, &channel);
            }
        }
        ctx.events.emit(Event::UserParted {
            nick,
            channel,
            reason: msg.arg(1).map(String::from),
        });
        Ok(())
    }
}

pub struct KickHandler;

#[async_trait]
impl Handler for KickHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();
        let nick = msg.arg(1).ok_or(HandlerError::MissingParam(1))?.to_string();
        let kicked_by = msg.source_nick().unwrap_or("").to_string();
        {
            let mut state = ctx.state.lock();
            if state.is_self(&nick) {
                state.remove_channel(&channel);
            } else {
                state.remove_membership(&nick, &channel);
            }
        }
        ctx.events.emit(Event::UserKicked {
            nick,
            channel,
            kicked_by,
            reason: msg.arg(2).map(String::from),
        });
        Ok(())
    }
}

/// TOPIC command and 332 both update the stored topic.
pub struct TopicHandler;

#[async_trait]
impl Handler for TopicHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        apply_topic(ctx, msg.arg(0), msg.arg(1))
    }
}

pub struct TopicReplyHandler;

#[async_trait]
impl Handler for TopicReplyHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        apply_topic(ctx, msg.arg(1), msg.arg(2))
    }
}

/// 331: the channel has no topic.
pub struct NoTopicHandler;

#[async_trait]
impl Handler for NoTopicHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        apply_topic(ctx, msg.arg(1), Some(""))
    }
}

fn apply_topic(
    ctx: &Arc<Context>,
    channel: Option<&str>,
    topic: Option<&str>,
) -> Result<(), HandlerError> {
    let channel = channel.ok_or(HandlerError::MissingParam(0))?.to_string();
    let topic = topic.unwrap_or("").to_string();
    if let Some(chan) = ctx.state.lock().channel_mut(&channel) {
        chan.topic = Some(topic.clone());
    }
    ctx.events.emit(Event::TopicReceived { channel, topic });
    Ok(())
}

/// 353: one NAMES line.
///
/// Servers may deliver the NAMES burst before our own JOIN confirmation
/// has been dispatched. When the channel is still unknown the line is
/// parked on the join named event and re-dispatched once the JOIN lands;
/// if the join never lands the event expires and the line is dropped.
pub struct NamesHandler;

#[async_trait]
impl Handler for NamesHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(2).ok_or(HandlerError::MissingParam(2))?.to_string();
        let names = msg.arg(3).unwrap_or("").to_string();

        if ctx.state.lock().channel(&channel).is_none() {
            let ctx = Arc::clone(ctx);
            let line = msg.to_string();
            let event = commands::join_event(&channel);
            tokio::spawn(async move {
                if ctx.named_events.wait(&event, Duration::from_secs(60)).await {
                    ctx.redispatch(line);
                } else {
                    trace!(%event, "names burst for a join that never confirmed");
                }
            });
            return Ok(());
        }

        let prefix_spec = ctx.state.lock().server_info.prefix.clone();
        let mut state = ctx.state.lock();
        for token in names.split_whitespace() {
            // Strip status sigils (possibly several with multi-prefix).
            let mut modes = Vec::new();
            let mut rest = token;
            while let Some(mode) = rest.chars().next().and_then(|c| prefix_spec.mode_for_sigil(c)) {
                modes.push(mode);
                rest = &rest[1..];
            }
            if rest.is_empty() {
                continue;
            }
            // userhost-in-names sends full hostmasks.
            let parsed = Prefix::parse(rest);
            state.get_or_add_user(rest);
            state.add_membership(&parsed.nick, &channel);
            if let Some(chan) = state.channel_mut(&channel) {
                if let Some(member) = chan.members.get_mut(&crate::casemap::irc_to_lower(&parsed.nick))
                {
                    member.extend(modes);
                }
            }
        }
        Ok(())
    }
}

/// 366: end of NAMES. Kicks off the optional on-join follow-ups.
pub struct NamesEndHandler;

#[async_trait]
impl Handler for NamesEndHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(1).ok_or(HandlerError::MissingParam(1))?.to_string();
        ctx.events.emit(Event::NamesReceived {
            channel: channel.clone(),
        });

        if ctx.state.lock().channel(&channel).is_none() {
            return Ok(());
        }

        if ctx.config.mode_on_join {
            let ctx = Arc::clone(ctx);
            let channel = channel.clone();
            tokio::spawn(async move {
                if let Err(err) = commands::channel_modes(&ctx, &channel).await {
                    debug!(%err, "mode on join failed");
                }
            });
        }

        if ctx.config.whois_on_join {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                tokio::time::sleep(ctx.config.join_whois_delay).await;
                let members: Vec<String> = match ctx.state.lock().channel(&channel) {
                    Some(chan) => chan.members.keys().cloned().collect(),
                    None => return,
                };
                for nick in members {
                    if let Err(err) = commands::whois(&ctx, &nick).await {
                        debug!(%nick, %err, "whois on join failed");
                    }
                }
            });
        }
        Ok(())
    }
}
