//! Mode change application and mode list replies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::casemap::irc_to_lower;
use crate::dispatch::{Context, Handler, HandlerError};
use crate::event::Event;
use crate::message::Message;
use crate::state::Mask;

/// Apply a mode string to tracked state.
///
/// Unknown mode characters are skipped; a parameterized mode with no
/// argument left stops processing of the remainder of the string.
fn apply_modes(ctx: &Context, target: &str, modes: &str, args: &[&str]) {
    let mut state = ctx.state.lock();
    let is_channel = target.starts_with('#') || target.starts_with('&');

    if !is_channel {
        // Only our own user modes are reported to us.
        if let Some(user) = state.self_user_mut() {
            let mut adding = true;
            for c in modes.chars() {
                match c {
                    '+' => adding = true,
                    '-' => adding = false,
                    c if adding => {
                        user.modes.insert(c);
                    }
                    c => {
                        user.modes.remove(&c);
                    }
                }
            }
        }
        return;
    }

    let prefix_modes = state.server_info.prefix.modes.clone();
    let chanmodes = state.server_info.chanmodes.clone();
    let Some(chan) = state.channel_mut(target) else {
        trace!(%target, "mode change for unknown channel");
        return;
    };

    let mut adding = true;
    let mut args = args.iter();
    for c in modes.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            c if prefix_modes.contains(&c) => {
                let Some(nick) = args.next() else {
                    debug!(mode = %c, "membership mode without a nick");
                    break;
                };
                if let Some(member) = chan.members.get_mut(&irc_to_lower(nick)) {
                    if adding {
                        member.insert(c);
                    } else {
                        member.remove(&c);
                    }
                }
            }
            c if chanmodes.list.contains(&c) => {
                // List modes always carry a mask; the lists themselves
                // are only tracked through explicit queries.
                if args.next().is_none() {
                    debug!(mode = %c, "list mode without a mask");
                    break;
                }
            }
            c if chanmodes.always_param.contains(&c) => {
                if args.next().is_none() {
                    debug!(mode = %c, "parameterized mode without an argument");
                    break;
                }
                if adding {
                    chan.modes.insert(c);
                } else {
                    chan.modes.remove(&c);
                }
            }
            c if chanmodes.set_param.contains(&c) => {
                if adding && args.next().is_none() {
                    debug!(mode = %c, "parameterized mode without an argument");
                    break;
                }
                if adding {
                    chan.modes.insert(c);
                } else {
                    chan.modes.remove(&c);
                }
            }
            c if chanmodes.flags.contains(&c) => {
                if adding {
                    chan.modes.insert(c);
                } else {
                    chan.modes.remove(&c);
                }
            }
            c => trace!(mode = %c, "skipping unknown mode character"),
        }
    }
}

pub struct ModeHandler;

#[async_trait]
impl Handler for ModeHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let target = msg.arg(0).ok_or(HandlerError::MissingParam(0))?.to_string();
        let modes = msg.arg(1).ok_or(HandlerError::MissingParam(1))?.to_string();
        let args: Vec<&str> = msg.params.get(2..).unwrap_or_default().iter().map(String::as_str).collect();
        apply_modes(ctx, &target, &modes, &args);
        ctx.events.emit(Event::ModeChanged {
            target,
            set_by: msg.source_nick().map(String::from),
            changes: modes,
        });
        Ok(())
    }
}

/// 324: the full current mode string of a channel, completing any
/// pending `MODE <channel>` query.
pub struct ChannelModesReplyHandler;

#[async_trait]
impl Handler for ChannelModesReplyHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(1).ok_or(HandlerError::MissingParam(1))?.to_string();
        let modes = msg.arg(2).unwrap_or("").to_string();
        let args: Vec<&str> = msg.params.get(3..).unwrap_or_default().iter().map(String::as_str).collect();
        if let Some(chan) = ctx.state.lock().channel_mut(&channel) {
            chan.modes.clear();
        }
        apply_modes(ctx, &channel, &modes, &args);

        let key = format!("MODE {channel}");
        if let Err(err) = ctx.requests.complete(&key) {
            debug!(%err, "unsolicited channel modes reply");
        }
        Ok(())
    }
}

/// One entry of a channel mode list (367/348/346/728).
pub struct MaskEntryHandler {
    pub mode: char,
}

#[async_trait]
impl Handler for MaskEntryHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(1).ok_or(HandlerError::MissingParam(1))?;
        // 728 repeats the mode character before the mask.
        let offset = if msg.arg(2) == Some("q") && self.mode == 'q' {
            3
        } else {
            2
        };
        let mask = Mask {
            mask: msg
                .arg(offset)
                .ok_or(HandlerError::MissingParam(offset))?
                .to_string(),
            set_by: msg.arg(offset + 1).unwrap_or("").to_string(),
            set_at: msg
                .arg(offset + 2)
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .unwrap_or(msg.received_at),
        };

        let key = format!("GETMODE {} {channel}", self.mode);
        let found = ctx.requests.with_state(&key, |state| {
            if let Some(masks) = state.as_masks_mut() {
                masks.push(mask);
            }
        });
        if found.is_none() {
            trace!(%key, "mode list entry without a pending request");
        }
        Ok(())
    }
}

/// End of a channel mode list (368/349/347/729).
pub struct MaskEndHandler {
    pub mode: char,
}

#[async_trait]
impl Handler for MaskEndHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let channel = msg.arg(1).ok_or(HandlerError::MissingParam(1))?;
        let key = format!("GETMODE {} {channel}", self.mode);
        if let Err(err) = ctx.requests.complete(&key) {
            debug!(%err, "unsolicited end of mode list");
        }
        Ok(())
    }
}
