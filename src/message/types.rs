//! Owned IRC message types.

use std::fmt;

use chrono::{DateTime, Utc};

use super::tags::escape_tag_value;

/// A single IRCv3 message tag.
///
/// A tag present without `=value` has `value: None`; `key=` (empty after
/// the `=`) has `value: Some("")`. The two are distinct on the wire and
/// stay distinct here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// Tag key, including any vendor prefix and client-tag marker.
    pub key: String,
    /// Unescaped tag value, if one was supplied.
    pub value: Option<String>,
}

impl Tag {
    /// Create a new tag.
    pub fn new(key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Self {
            key: key.into(),
            value: value.map(Into::into),
        }
    }
}

/// A parsed IRC message.
///
/// Commands keep their original case for replay and logging; dispatch
/// uppercases separately.
#[derive(Clone, Debug)]
pub struct Message {
    /// IRCv3 tags in wire order.
    pub tags: Vec<Tag>,
    /// Message source (`nick!user@host` or server name), without the `:`.
    pub prefix: Option<String>,
    /// The command or numeric, original case preserved.
    pub command: String,
    /// Positional parameters; the trailing parameter is the last entry.
    pub params: Vec<String>,
    /// When this message happened: the server-supplied `time`/`t` tag if
    /// present, otherwise the local receipt time.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Get parameter `i`, if present.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(String::as_str)
    }

    /// Look up a tag by key.
    pub fn tag(&self, key: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.key == key)
    }

    /// The command uppercased, as used for dispatch.
    pub fn command_upper(&self) -> String {
        self.command.to_ascii_uppercase()
    }

    /// The nick portion of the prefix, if the prefix looks like a hostmask.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }
}

impl fmt::Display for Message {
    /// Re-serialize to wire form (without the trailing `\r\n`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            f.write_str("@")?;
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                f.write_str(&tag.key)?;
                if let Some(ref value) = tag.value {
                    f.write_str("=")?;
                    escape_tag_value(f, value)?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;
        if let Some((last, init)) = self.params.split_last() {
            for param in init {
                write!(f, " {}", param)?;
            }
            if last.is_empty() || last.starts_with(':') || last.contains(' ') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(prefix: Option<&str>, command: &str, params: &[&str]) -> Message {
        Message {
            tags: Vec::new(),
            prefix: prefix.map(String::from),
            command: command.to_string(),
            params: params.iter().map(|s| s.to_string()).collect(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn display_plain() {
        let m = msg(None, "PING", &["tolsun.oulu.fi"]);
        assert_eq!(m.to_string(), "PING tolsun.oulu.fi");
    }

    #[test]
    fn display_trailing_with_spaces() {
        let m = msg(Some("nick!u@h"), "PRIVMSG", &["#chan", "hello world"]);
        assert_eq!(m.to_string(), ":nick!u@h PRIVMSG #chan :hello world");
    }

    #[test]
    fn display_empty_trailing() {
        let m = msg(None, "TOPIC", &["#chan", ""]);
        assert_eq!(m.to_string(), "TOPIC #chan :");
    }

    #[test]
    fn display_tags_escaped() {
        let m = Message {
            tags: vec![
                Tag::new("id", Some("123")),
                Tag::new("note", Some("a;b c")),
                Tag::new("flag", None::<String>),
            ],
            prefix: None,
            command: "TAGMSG".to_string(),
            params: vec!["#chan".to_string()],
            received_at: Utc::now(),
        };
        assert_eq!(m.to_string(), "@id=123;note=a\\:b\\sc;flag TAGMSG #chan");
    }

    #[test]
    fn source_nick_from_hostmask() {
        let m = msg(Some("alice!ident@example.net"), "JOIN", &["#chan"]);
        assert_eq!(m.source_nick(), Some("alice"));

        let m = msg(Some("irc.example.net"), "001", &["alice"]);
        assert_eq!(m.source_nick(), Some("irc.example.net"));
    }
}
