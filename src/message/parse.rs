//! Nom-based IRC message parser.
//!
//! Parses the outer message grammar (`[@tags] [:prefix] <command>
//! [params...] [:trailing]`), then unescapes tags and derives the message
//! timestamp from the `time`/`t` tags. Parsing is total per line: a
//! malformed line yields an error for that line only.

use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::error::{MessageParseError, ProtocolError};

use super::tags::unescape_tag_value;
use super::types::{Message, Tag};

/// Parse IRCv3 message tags (the part after `@` and before the first space).
///
/// Spaces inside tag values are escaped as `\s`, so the first literal
/// space always terminates the tag section.
fn tag_section(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

/// Parse the message prefix (the part after `:` and before the first space).
fn prefix_section(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name (letters or digits).
fn command_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

fn outer(input: &str) -> IResult<&str, (Option<&str>, Option<&str>, &str, Vec<&str>)> {
    let (input, tags) = opt(tag_section)(input)?;
    let (input, _) = space0(input)?;
    let (input, prefix) = opt(prefix_section)(input)?;
    let (input, _) = space0(input)?;
    let (input, command) = command_token(input)?;

    let mut params: Vec<&str> = Vec::new();
    let mut rest = input;
    while let Some(b' ') = rest.as_bytes().first().copied() {
        rest = &rest[1..];
        if let Some(b':') = rest.as_bytes().first().copied() {
            // Trailing parameter absorbs the remainder of the line verbatim.
            params.push(&rest[1..]);
            rest = "";
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        let param = &rest[..end];
        if param.is_empty() {
            break;
        }
        params.push(param);
        rest = &rest[end..];
    }

    Ok((rest, (tags, prefix, command, params)))
}

fn parse_tags(section: &str) -> Vec<Tag> {
    section
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Tag {
                key: key.to_string(),
                value: Some(unescape_tag_value(value)),
            },
            None => Tag {
                key: entry.to_string(),
                value: None,
            },
        })
        .collect()
}

/// Derive the message timestamp from `time` (server-time, RFC 3339) or `t`
/// (epoch seconds) tags, falling back to the local clock.
///
/// chrono represents a leap second as a sub-second nanosecond count of at
/// least one billion; such instants do not exist in UTC proper and the
/// original wire value is rejected rather than clamped.
fn derive_timestamp(tags: &[Tag]) -> Result<DateTime<Utc>, MessageParseError> {
    if let Some(value) = tags
        .iter()
        .find(|t| t.key == "time")
        .and_then(|t| t.value.as_deref())
    {
        let parsed = DateTime::parse_from_rfc3339(value)
            .map_err(|_| MessageParseError::InvalidTimestamp(value.to_string()))?;
        if parsed.timestamp_subsec_nanos() >= 1_000_000_000 {
            return Err(MessageParseError::InvalidTimestamp(value.to_string()));
        }
        return Ok(parsed.with_timezone(&Utc));
    }

    if let Some(value) = tags
        .iter()
        .find(|t| t.key == "t")
        .and_then(|t| t.value.as_deref())
    {
        let secs: i64 = value
            .parse()
            .map_err(|_| MessageParseError::InvalidTimestamp(value.to_string()))?;
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| MessageParseError::InvalidTimestamp(value.to_string()));
    }

    Ok(Utc::now())
}

impl Message {
    /// Parse a raw line (without its terminator) into a [`Message`].
    pub fn parse(line: &str) -> Result<Message, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fail = |cause: MessageParseError| ProtocolError::InvalidMessage {
            string: line.to_string(),
            cause,
        };

        if line.is_empty() {
            return Err(fail(MessageParseError::EmptyMessage));
        }

        let (_, (tags, prefix, command, params)) =
            outer(line).map_err(|_| fail(MessageParseError::InvalidCommand))?;

        let tags = tags.map(parse_tags).unwrap_or_default();
        let received_at = derive_timestamp(&tags).map_err(fail)?;

        Ok(Message {
            tags,
            prefix: prefix.map(String::from),
            command: command.to_string(),
            params: params.into_iter().map(String::from).collect(),
            received_at,
        })
    }
}

impl std::str::FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::parse(s)
    }
}
