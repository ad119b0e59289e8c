//! The `Command` wire type and its textual codec.
//!
//! Every control message the hub exchanges with a worker is a `Command`:
//! a name, a set of named arguments, and the source/destination the hub
//! uses for routing and logging. The textual form is `name(k1="v1",k2="v2")`
//! — see spec §3 and §9 ("Command as data"). Both the emit path and the
//! parse path go through this one codec so the two directions can never
//! silently diverge.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure to parse a `Command`'s textual form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command text")]
    Empty,
    #[error("missing '(' after command name")]
    MissingOpenParen,
    #[error("command text does not end with ')'")]
    MissingCloseParen,
    #[error("unterminated quoted value for key '{0}'")]
    UnterminatedQuote(String),
    #[error("expected '=\"' after key '{0}'")]
    ExpectedEquals(String),
    #[error("trailing characters after closing ')'")]
    TrailingCharacters,
}

/// A structured control message travelling on a command channel.
///
/// `source`/`destination` are routing metadata the hub attaches when it
/// builds a `Command` to send; they are not part of the wire text (the
/// channel itself determines the peer), but we carry them through so a
/// `Command` received off a channel is self-describing for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<(String, String)>,
    pub source: String,
    pub destination: String,
}

impl Command {
    pub fn new(name: impl Into<String>, source: impl Into<String>, destination: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            args: Vec::new(),
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Look up an argument by key. Named args, so first match wins.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// The textual wire form, ignoring `source`/`destination`.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Parse a wire-form string, attaching the given source/destination.
    pub fn parse_with_route(
        text: &str,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Self, CommandParseError> {
        let mut cmd = Self::from_str(text)?;
        cmd.source = source.into();
        cmd.destination = destination.into();
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (k, v)) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}=\"{}\"", k, escape(v))?;
        }
        write!(f, ")")
    }
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(CommandParseError::Empty);
        }
        let open = text.find('(').ok_or(CommandParseError::MissingOpenParen)?;
        if !text.ends_with(')') {
            return Err(CommandParseError::MissingCloseParen);
        }
        let name = text[..open].to_string();
        let body = &text[open + 1..text.len() - 1];

        let mut args = Vec::new();
        let chars: Vec<char> = body.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            // key
            let key_start = i;
            while i < chars.len() && chars[i] != '=' {
                i += 1;
            }
            let key: String = chars[key_start..i].iter().collect();
            let key = key.trim().to_string();
            if key.is_empty() {
                break;
            }
            if i >= chars.len() || chars[i] != '=' || i + 1 >= chars.len() || chars[i + 1] != '"' {
                return Err(CommandParseError::ExpectedEquals(key));
            }
            i += 2; // skip =\"

            let mut value = String::new();
            let mut closed = false;
            while i < chars.len() {
                match chars[i] {
                    '\\' if i + 1 < chars.len() => {
                        value.push(chars[i + 1]);
                        i += 2;
                    }
                    '"' => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    c => {
                        value.push(c);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(CommandParseError::UnterminatedQuote(key));
            }
            args.push((key, value));

            // skip comma separator
            if i < chars.len() && chars[i] == ',' {
                i += 1;
            } else if i < chars.len() {
                return Err(CommandParseError::TrailingCharacters);
            }
        }

        Ok(Command {
            name,
            args,
            source: String::new(),
            destination: String::new(),
        })
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_command() {
        let cmd = Command::new("make_call", "HUB", "VoipIO1").with_arg("destination", "sip:alice@example.com");
        let wire = cmd.to_wire();
        assert_eq!(wire, "make_call(destination=\"sip:alice@example.com\")");
        let parsed = Command::parse_with_route(&wire, "HUB", "VoipIO1").unwrap();
        assert_eq!(parsed.name, "make_call");
        assert_eq!(parsed.arg("destination"), Some("sip:alice@example.com"));
    }

    #[test]
    fn round_trips_multiple_args_in_order() {
        let cmd = Command::new("black_list", "HUB", "VoipIO1")
            .with_arg("remote_uri", "sip:mallory@example.com")
            .with_arg("expire", "1700000000");
        let wire = cmd.to_wire();
        let parsed: Command = wire.parse().unwrap();
        assert_eq!(parsed.args, cmd.args);
    }

    #[test]
    fn round_trips_zero_arg_command() {
        let cmd = Command::new("hangup", "HUB", "VoipIO1");
        let wire = cmd.to_wire();
        assert_eq!(wire, "hangup()");
        let parsed: Command = wire.parse().unwrap();
        assert_eq!(parsed.name, "hangup");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn tolerates_quotes_and_commas_inside_values() {
        let cmd = Command::new("synthesize", "HUB", "TTS1").with_arg("text", "say \"hi, there\"");
        let wire = cmd.to_wire();
        let parsed: Command = wire.parse().unwrap();
        assert_eq!(parsed.arg("text"), Some("say \"hi, there\""));
    }

    #[test]
    fn rejects_missing_parens() {
        assert!(Command::from_str("make_call").is_err());
        assert!(Command::from_str("make_call(destination=\"x\"").is_err());
    }
}
