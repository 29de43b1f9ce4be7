//! Outgoing command surface.
//!
//! Free functions over the shared [`Context`] so both the public client
//! API and reply handlers (which issue follow-up queries) go through the
//! same paths. Commands that expect a multi-line reply register a keyed
//! operation with the request manager before sending and wait for the
//! terminating numeric; issuing a duplicate of a pending query joins it
//! instead of sending again.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;

use crate::casemap::irc_to_lower;
use crate::dispatch::Context;
use crate::error::{ClientError, ConnectionError};
use crate::request::{RequestState, WhoQuery};
use crate::state::{ExtendedWho, Mask, Whois, WhoxFields};

/// Query WHOIS data for a nick, waiting for the full reply.
pub async fn whois(ctx: &Arc<Context>, nick: &str) -> Result<Whois, ClientError> {
    let key = format!("WHOIS {nick}");
    let mut handle = ctx.requests.begin(
        &key,
        RequestState::Whois(Whois {
            nick: nick.to_string(),
            ..Default::default()
        }),
    );
    if !handle.joined() {
        ctx.send_raw(format!("WHOIS {nick}"))?;
    }
    handle.wait(ctx.config.request_timeout).await?;
    let whois = handle.with_state(|s| match s.as_whois_mut() {
        Some(w) => w.clone(),
        None => Whois::default(),
    });
    Ok(whois)
}

/// Run a WHO query against a nick, channel, or mask. Uses WHOX with the
/// given fields when the server advertises it; with plain WHO the field
/// selection is ignored and standard 352 rows are returned.
pub async fn who(
    ctx: &Arc<Context>,
    target: &str,
    fields: WhoxFields,
) -> Result<Vec<ExtendedWho>, ClientError> {
    let extended = ctx.state.lock().server_info.extended_who && !fields.is_empty();
    let (key, line, state) = if extended {
        // The random querytype token comes back in every 354 row, tying
        // rows to this query when several WHOs are in flight.
        let querytype: u16 = rand::thread_rng().gen_range(0..1000);
        (
            format!("WHO {target} {querytype}"),
            format!("WHO {target} %{},{querytype}", fields.request_letters()),
            RequestState::Who(WhoQuery {
                fields,
                rows: Vec::new(),
            }),
        )
    } else {
        (
            format!("WHO {target}"),
            format!("WHO {target}"),
            RequestState::Who(WhoQuery::default()),
        )
    };

    let mut handle = ctx.requests.begin(&key, state);
    if !handle.joined() {
        ctx.send_raw(line)?;
    }
    handle.wait(ctx.config.request_timeout).await?;
    let rows = handle.with_state(|s| match s.as_who_mut() {
        Some(q) => std::mem::take(&mut q.rows),
        None => Vec::new(),
    });
    Ok(rows)
}

/// Fetch the current modes of a channel (324 reply).
pub async fn channel_modes(ctx: &Arc<Context>, channel: &str) -> Result<HashSet<char>, ClientError> {
    let key = format!("MODE {channel}");
    let mut handle = ctx.requests.begin(&key, RequestState::None);
    if !handle.joined() {
        ctx.send_raw(format!("MODE {channel}"))?;
    }
    handle.wait(ctx.config.request_timeout).await?;
    let modes = ctx
        .state
        .lock()
        .channel(channel)
        .map(|c| c.modes.clone())
        .unwrap_or_default();
    Ok(modes)
}

/// Fetch a channel mode list (bans `b`, exceptions `e`, invites `I`,
/// quiets `q`).
pub async fn mode_list(
    ctx: &Arc<Context>,
    channel: &str,
    mode: char,
) -> Result<Vec<Mask>, ClientError> {
    let key = format!("GETMODE {mode} {channel}");
    let mut handle = ctx.requests.begin(&key, RequestState::Masks(Vec::new()));
    if !handle.joined() {
        ctx.send_raw(format!("MODE {channel} +{mode}"))?;
    }
    handle.wait(ctx.config.request_timeout).await?;
    let masks = handle.with_state(|s| match s.as_masks_mut() {
        Some(m) => std::mem::take(m),
        None => Vec::new(),
    });
    Ok(masks)
}

/// Join a channel. Registers the join named event first so replies that
/// race the JOIN confirmation (such as an early NAMES burst) can wait on
/// it.
pub fn join(ctx: &Arc<Context>, channel: &str, key: Option<&str>) -> Result<(), ConnectionError> {
    ctx.named_events.register(&join_event(channel));
    match key {
        Some(key) => ctx.send_raw(format!("JOIN {channel} {key}")),
        None => ctx.send_raw(format!("JOIN {channel}")),
    }
}

/// The named event fired when our own JOIN to `channel` is confirmed.
pub fn join_event(channel: &str) -> String {
    format!("JOIN {}", irc_to_lower(channel))
}

pub fn part(ctx: &Arc<Context>, channel: &str, reason: Option<&str>) -> Result<(), ConnectionError> {
    match reason {
        Some(reason) => ctx.send_raw(format!("PART {channel} :{reason}")),
        None => ctx.send_raw(format!("PART {channel}")),
    }
}

pub fn privmsg(ctx: &Arc<Context>, target: &str, text: &str) -> Result<(), ConnectionError> {
    match ctx.config.privmsg_prefix {
        Some(ref prefix) => ctx.send_raw(format!("PRIVMSG {target} :{prefix}{text}")),
        None => ctx.send_raw(format!("PRIVMSG {target} :{text}")),
    }
}

/// Send a CTCP ACTION ("/me").
pub fn action(ctx: &Arc<Context>, target: &str, text: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("PRIVMSG {target} :\u{1}ACTION {text}\u{1}"))
}

pub fn notice(ctx: &Arc<Context>, target: &str, text: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("NOTICE {target} :{text}"))
}

pub fn set_topic(ctx: &Arc<Context>, channel: &str, topic: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("TOPIC {channel} :{topic}"))
}

pub fn request_topic(ctx: &Arc<Context>, channel: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("TOPIC {channel}"))
}

pub fn kick(
    ctx: &Arc<Context>,
    channel: &str,
    nick: &str,
    reason: Option<&str>,
) -> Result<(), ConnectionError> {
    match reason {
        Some(reason) => ctx.send_raw(format!("KICK {channel} {nick} :{reason}")),
        None => ctx.send_raw(format!("KICK {channel} {nick}")),
    }
}

pub fn invite(ctx: &Arc<Context>, channel: &str, nick: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("INVITE {nick} {channel}"))
}

pub fn set_mode(ctx: &Arc<Context>, target: &str, modes: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("MODE {target} {modes}"))
}

pub fn nick(ctx: &Arc<Context>, new_nick: &str) -> Result<(), ConnectionError> {
    ctx.send_raw(format!("NICK {new_nick}"))
}

pub fn quit(ctx: &Arc<Context>, reason: Option<&str>) -> Result<(), ConnectionError> {
    match reason {
        Some(reason) => ctx.send_raw(format!("QUIT :{reason}")),
        None => ctx.send_raw("QUIT"),
    }
}
