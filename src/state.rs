//! Tracked network state.
//!
//! [`NetworkState`] mirrors what the server has told us so far: known
//! users, joined channels, and the membership edges between them. All
//! lookups are keyed by RFC 1459 casefolded names. Membership is stored
//! on both sides of the edge and the mutators here keep the two sides
//! consistent.

use std::collections::{HashMap, HashSet};
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Utc};

use crate::casemap::irc_to_lower;
use crate::isupport::{ChanModes, PrefixSpec};
use crate::prefix::Prefix;

/// A user visible to the client.
#[derive(Clone, Debug, Default)]
pub struct User {
    pub nick: String,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    /// Services account, if known (empty tracking until account-notify or
    /// WHO with account fields fills it in).
    pub account: Option<String>,
    /// User modes, only tracked for ourselves.
    pub modes: HashSet<char>,
    /// Casefolded names of channels shared with this user.
    pub channels: HashSet<String>,
}

impl User {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Default::default()
        }
    }

    /// Merge identifying fields from a hostmask prefix.
    pub fn update_from_prefix(&mut self, prefix: &Prefix) {
        self.nick = prefix.nick.clone();
        if prefix.user.is_some() {
            self.user = prefix.user.clone();
        }
        if prefix.host.is_some() {
            self.hostname = prefix.host.clone();
        }
    }

    pub fn hostmask(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick,
            self.user.as_deref().unwrap_or("*"),
            self.hostname.as_deref().unwrap_or("*")
        )
    }
}

/// A channel the client has joined or is learning about.
#[derive(Clone, Debug, Default)]
pub struct Channel {
    pub name: String,
    pub topic: Option<String>,
    /// Flag-style channel modes currently set.
    pub modes: HashSet<char>,
    /// Membership modes per casefolded nick (e.g. `o`, `v`).
    pub members: HashMap<String, HashSet<char>>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Server identity and capabilities learned at registration time.
#[derive(Clone, Debug)]
pub struct ServerInfo {
    /// Name the server introduced itself with (from the 001 prefix).
    pub name: Option<String>,
    pub version: Option<String>,
    pub network: Option<String>,
    /// Token of the last PING the server sent, reused for keepalives.
    pub ping_token: Option<String>,
    pub prefix: PrefixSpec,
    pub chanmodes: ChanModes,
    /// Whether the server advertises WHOX.
    pub extended_who: bool,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            network: None,
            ping_token: None,
            prefix: PrefixSpec::default(),
            chanmodes: ChanModes::default(),
            extended_who: false,
        }
    }
}

/// One entry of a channel mode list (bans, exceptions, invites, quiets).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    pub mask: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

/// Accumulated WHOIS reply data.
#[derive(Clone, Debug, Default)]
pub struct Whois {
    pub nick: String,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    pub server_info: Option<String>,
    pub operator: bool,
    pub seconds_idle: Option<u64>,
    pub logged_in_as: Option<String>,
    pub channels: Vec<String>,
}

/// One row of a WHOX (354) reply. Fields not requested stay at their
/// defaults.
#[derive(Clone, Debug, Default)]
pub struct ExtendedWho {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub server: Option<String>,
    pub nick: Option<String>,
    pub flags: Option<String>,
    pub hops: Option<u32>,
    pub seconds_idle: Option<u64>,
    pub account: Option<String>,
    pub op_level: Option<String>,
    pub realname: Option<String>,
}

/// WHOX field selector, one bit per requestable field letter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WhoxFields(u16);

impl WhoxFields {
    pub const CHANNEL: Self = Self(1 << 0); // c
    pub const USERNAME: Self = Self(1 << 1); // u
    pub const IP: Self = Self(1 << 2); // i
    pub const HOSTNAME: Self = Self(1 << 3); // h
    pub const SERVER: Self = Self(1 << 4); // s
    pub const NICK: Self = Self(1 << 5); // n
    pub const FLAGS: Self = Self(1 << 6); // f
    pub const HOPS: Self = Self(1 << 7); // d
    pub const IDLE: Self = Self(1 << 8); // l
    pub const ACCOUNT: Self = Self(1 << 9); // a
    pub const OP_LEVEL: Self = Self(1 << 10); // o
    pub const REALNAME: Self = Self(1 << 11); // r

    /// Field letters paired with their bit, in 354 reply order. The
    /// querytype token (`t`) is always requested and is not part of the
    /// selectable set.
    const LETTERS: [(Self, char); 12] = [
        (Self::CHANNEL, 'c'),
        (Self::USERNAME, 'u'),
        (Self::IP, 'i'),
        (Self::HOSTNAME, 'h'),
        (Self::SERVER, 's'),
        (Self::NICK, 'n'),
        (Self::FLAGS, 'f'),
        (Self::HOPS, 'd'),
        (Self::IDLE, 'l'),
        (Self::ACCOUNT, 'a'),
        (Self::OP_LEVEL, 'o'),
        (Self::REALNAME, 'r'),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The request string for the `%fields` part of a WHO command, always
    /// including `t` so replies carry the querytype token.
    pub fn request_letters(self) -> String {
        let mut out = String::from("t");
        for (bit, letter) in Self::LETTERS {
            if self.contains(bit) {
                out.push(letter);
            }
        }
        out
    }

    /// Fields present in a reply row, in parameter order after the
    /// querytype token.
    pub fn reply_fields(self) -> impl Iterator<Item = Self> {
        Self::LETTERS
            .into_iter()
            .map(|(bit, _)| bit)
            .filter(move |bit| self.contains(*bit))
    }
}

impl BitOr for WhoxFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for WhoxFields {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Everything we currently know about the network.
#[derive(Debug, Default)]
pub struct NetworkState {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
    /// Casefolded nick of our own connection.
    self_nick: String,
    pub server_info: ServerInfo,
    pub motd: Option<String>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_self_nick(&mut self, nick: &str) {
        let folded = irc_to_lower(nick);
        if let Some(mut user) = self.users.remove(&self.self_nick) {
            user.nick = nick.to_string();
            self.users.insert(folded.clone(), user);
        } else {
            self.users.insert(folded.clone(), User::new(nick));
        }
        self.self_nick = folded;
    }

    pub fn self_nick(&self) -> &str {
        self.users
            .get(&self.self_nick)
            .map(|u| u.nick.as_str())
            .unwrap_or("")
    }

    pub fn is_self(&self, nick: &str) -> bool {
        irc_to_lower(nick) == self.self_nick
    }

    pub fn self_user_mut(&mut self) -> Option<&mut User> {
        self.users.get_mut(&self.self_nick)
    }

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&irc_to_lower(nick))
    }

    pub fn user_mut(&mut self, nick: &str) -> Option<&mut User> {
        self.users.get_mut(&irc_to_lower(nick))
    }

    /// Look up a user by nick or hostmask, creating it if unknown and
    /// merging ident/host details when the source is a hostmask.
    pub fn get_or_add_user(&mut self, source: &str) -> &mut User {
        let prefix = Prefix::parse(source);
        let key = irc_to_lower(&prefix.nick);
        let user = self
            .users
            .entry(key)
            .or_insert_with(|| User::new(&prefix.nick));
        user.update_from_prefix(&prefix);
        user
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&irc_to_lower(name))
    }

    pub fn get_or_add_channel(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(irc_to_lower(name))
            .or_insert_with(|| Channel::new(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Record that `nick` is in `channel`, on both sides of the edge.
    /// Creates the user and channel if they are unknown.
    pub fn add_membership(&mut self, nick: &str, channel: &str) {
        let nick_key = irc_to_lower(nick);
        let chan_key = irc_to_lower(channel);
        self.users
            .entry(nick_key.clone())
            .or_insert_with(|| User::new(nick))
            .channels
            .insert(chan_key.clone());
        self.channels
            .entry(chan_key)
            .or_insert_with(|| Channel::new(channel))
            .members
            .entry(nick_key)
            .or_default();
    }

    /// Drop the membership edge between `nick` and `channel` on both sides.
    /// Users left with no shared channels (other than ourselves) are
    /// forgotten entirely.
    pub fn remove_membership(&mut self, nick: &str, channel: &str) {
        let nick_key = irc_to_lower(nick);
        let chan_key = irc_to_lower(channel);
        if let Some(chan) = self.channels.get_mut(&chan_key) {
            chan.members.remove(&nick_key);
        }
        if let Some(user) = self.users.get_mut(&nick_key) {
            user.channels.remove(&chan_key);
            if user.channels.is_empty() && nick_key != self.self_nick {
                self.users.remove(&nick_key);
            }
        }
    }

    /// Forget a user everywhere (QUIT).
    pub fn remove_user(&mut self, nick: &str) {
        let nick_key = irc_to_lower(nick);
        if let Some(user) = self.users.remove(&nick_key) {
            for chan_key in user.channels {
                if let Some(chan) = self.channels.get_mut(&chan_key) {
                    chan.members.remove(&nick_key);
                }
            }
        }
    }

    /// Forget a channel everywhere (our own PART or KICK).
    pub fn remove_channel(&mut self, name: &str) {
        let chan_key = irc_to_lower(name);
        if let Some(chan) = self.channels.remove(&chan_key) {
            let members: Vec<String> = chan.members.into_keys().collect();
            for nick_key in members {
                if let Some(user) = self.users.get_mut(&nick_key) {
                    user.channels.remove(&chan_key);
                    if user.channels.is_empty() && nick_key != self.self_nick {
                        self.users.remove(&nick_key);
                    }
                }
            }
        }
    }

    /// Re-key a user after a NICK change, updating every membership edge.
    pub fn rename_user(&mut self, old: &str, new: &str) {
        let old_key = irc_to_lower(old);
        let new_key = irc_to_lower(new);
        if let Some(mut user) = self.users.remove(&old_key) {
            user.nick = new.to_string();
            for chan_key in &user.channels {
                if let Some(chan) = self.channels.get_mut(chan_key) {
                    if let Some(modes) = chan.members.remove(&old_key) {
                        chan.members.insert(new_key.clone(), modes);
                    }
                }
            }
            self.users.insert(new_key.clone(), user);
        }
        if old_key == self.self_nick {
            self.self_nick = new_key;
        }
    }

    /// Every user edge must have a matching channel edge and vice versa.
    #[cfg(test)]
    fn membership_is_symmetric(&self) -> bool {
        for (nick_key, user) in &self.users {
            for chan_key in &user.channels {
                match self.channels.get(chan_key) {
                    Some(chan) if chan.members.contains_key(nick_key) => {}
                    _ => return false,
                }
            }
        }
        for (chan_key, chan) in &self.channels {
            for nick_key in chan.members.keys() {
                match self.users.get(nick_key) {
                    Some(user) if user.channels.contains(chan_key) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}
