//! RPL_ISUPPORT (005) token parsing.
//!
//! The engine only consumes the tokens it needs: PREFIX (to strip status
//! sigils in NAMES replies), CHANMODES (to classify mode characters), WHOX
//! (extended WHO support), and NETWORK.

/// A single `KEY` or `KEY=value` token from a 005 line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsupportEntry {
    pub key: String,
    pub value: Option<String>,
}

/// Parse the tokens of one 005 line.
///
/// `params` excludes the leading target nick and the trailing
/// "are supported by this server" text.
pub fn parse_tokens(params: &[String]) -> Vec<IsupportEntry> {
    params
        .iter()
        .filter(|p| !p.is_empty() && !p.contains(' '))
        .map(|p| match p.split_once('=') {
            Some((k, v)) => IsupportEntry {
                key: k.to_string(),
                value: Some(v.to_string()),
            },
            None => IsupportEntry {
                key: p.clone(),
                value: None,
            },
        })
        .collect()
}

/// The PREFIX token: channel membership modes and their status sigils.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixSpec {
    /// Mode characters, most privileged first (e.g. `ov`).
    pub modes: Vec<char>,
    /// Status sigils in the same order (e.g. `@+`).
    pub sigils: Vec<char>,
}

impl PrefixSpec {
    /// Parse a `(modes)sigils` value such as `(ov)@+`.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('(')?;
        let (modes, sigils) = rest.split_once(')')?;
        if modes.chars().count() != sigils.chars().count() {
            return None;
        }
        Some(Self {
            modes: modes.chars().collect(),
            sigils: sigils.chars().collect(),
        })
    }

    /// The membership mode for a status sigil, if any.
    pub fn mode_for_sigil(&self, sigil: char) -> Option<char> {
        self.sigils
            .iter()
            .position(|&s| s == sigil)
            .map(|i| self.modes[i])
    }
}

impl Default for PrefixSpec {
    fn default() -> Self {
        Self {
            modes: vec!['o', 'v'],
            sigils: vec!['@', '+'],
        }
    }
}

/// The CHANMODES token: mode characters grouped by argument behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChanModes {
    /// Type A: list modes (always take a mask argument).
    pub list: Vec<char>,
    /// Type B: always take an argument.
    pub always_param: Vec<char>,
    /// Type C: take an argument only when set.
    pub set_param: Vec<char>,
    /// Type D: never take an argument.
    pub flags: Vec<char>,
}

impl ChanModes {
    /// Parse a `A,B,C,D` value such as `beI,k,l,imnpst`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut groups = s.split(',');
        let list = groups.next()?.chars().collect();
        let always_param = groups.next()?.chars().collect();
        let set_param = groups.next()?.chars().collect();
        let flags = groups.next()?.chars().collect();
        Some(Self {
            list,
            always_param,
            set_param,
            flags,
        })
    }
}

impl Default for ChanModes {
    fn default() -> Self {
        // RFC 1459-ish baseline used until the server tells us otherwise.
        Self {
            list: vec!['b', 'e', 'I'],
            always_param: vec!['k'],
            set_param: vec!['l'],
            flags: vec!['i', 'm', 'n', 'p', 's', 't'],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_key_value_tokens() {
        let entries = parse_tokens(&params(&["PREFIX=(ov)@+", "WHOX", "NETWORK=ExampleNet"]));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, "PREFIX");
        assert_eq!(entries[0].value.as_deref(), Some("(ov)@+"));
        assert_eq!(entries[1].key, "WHOX");
        assert_eq!(entries[1].value, None);
    }

    #[test]
    fn skips_trailing_text() {
        let entries = parse_tokens(&params(&["WHOX", "are supported by this server"]));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn parses_prefix_spec() {
        let spec = PrefixSpec::parse("(qaohv)~&@%+").unwrap();
        assert_eq!(spec.mode_for_sigil('~'), Some('q'));
        assert_eq!(spec.mode_for_sigil('+'), Some('v'));
        assert_eq!(spec.mode_for_sigil('?'), None);
    }

    #[test]
    fn rejects_mismatched_prefix_spec() {
        assert!(PrefixSpec::parse("(ov)@").is_none());
        assert!(PrefixSpec::parse("ov@+").is_none());
    }

    #[test]
    fn parses_chanmodes() {
        let cm = ChanModes::parse("beI,k,l,imnpst").unwrap();
        assert_eq!(cm.list, vec!['b', 'e', 'I']);
        assert_eq!(cm.always_param, vec!['k']);
        assert_eq!(cm.set_param, vec!['l']);
        assert!(cm.flags.contains(&'t'));
    }
}
