//! IRC message prefix (source) parsing.
//!
//! A prefix is either a server name or a user hostmask of the form
//! `nick!user@host`. Handlers use this to resolve the acting user.

/// A decomposed message source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefix {
    /// Nick, or the server name when the prefix is not a hostmask.
    pub nick: String,
    /// Ident/username portion, if present.
    pub user: Option<String>,
    /// Hostname portion, if present.
    pub host: Option<String>,
}

impl Prefix {
    /// Parse a prefix string (without the leading `:`).
    pub fn parse(raw: &str) -> Self {
        let (nick, rest) = match raw.split_once('!') {
            Some((nick, rest)) => (nick, Some(rest)),
            None => match raw.split_once('@') {
                // user@host without an ident separator
                Some((nick, host)) => {
                    return Self {
                        nick: nick.to_string(),
                        user: None,
                        host: Some(host.to_string()),
                    }
                }
                None => (raw, None),
            },
        };
        match rest {
            Some(rest) => {
                let (user, host) = match rest.rsplit_once('@') {
                    Some((user, host)) => (Some(user), Some(host)),
                    None => (Some(rest), None),
                };
                Self {
                    nick: nick.to_string(),
                    user: user.map(String::from),
                    host: host.map(String::from),
                }
            }
            None => Self {
                nick: nick.to_string(),
                user: None,
                host: None,
            },
        }
    }

    /// Whether this prefix carries user and host parts.
    pub fn is_hostmask(&self) -> bool {
        self.user.is_some() || self.host.is_some()
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.nick)?;
        if let Some(ref user) = self.user {
            write!(f, "!{}", user)?;
        }
        if let Some(ref host) = self.host {
            write!(f, "@{}", host)?;
        }
        Ok(())
    }
}
