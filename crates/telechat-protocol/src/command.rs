//! Command grammar for client input lines.
//!
//! A line is matched against a fixed, ordered set of patterns and turned into
//! a [`Command`]. Anything that is not a recognized command and is not empty
//! is broadcast text.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// `/exit` command.
pub const EXIT: &str = "/exit";
/// `/quit` command.
pub const QUIT: &str = "/quit";
/// `/showusers` command.
pub const SHOW_USERS: &str = "/showusers";
/// `/unignore` command.
pub const UNIGNORE: &str = "/unignore";
/// `/unsubscribe` command.
pub const UNSUBSCRIBE: &str = "/unsubscribe";
/// `/help` command.
pub const HELP: &str = "/help";

static IGNORE: LazyLock<Regex> = LazyLock::new(|| compile(r"^/ignore ([a-z]+)$"));
static CHANNEL: LazyLock<Regex> = LazyLock::new(|| compile(r"^/channel (\d+) (.*)$"));
static PM: LazyLock<Regex> = LazyLock::new(|| compile(r"^/pm ([a-z]+) (.*)$"));
static SUBSCRIBE: LazyLock<Regex> = LazyLock::new(|| compile(r"^/subscribe (\d+)$"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("command patterns are valid")
}

/// Command summary shown by `/help`, in display order.
pub const HELP_ENTRIES: &[(&str, &str)] = &[
    ("/exit", "quit the chat application"),
    ("/quit", "quit the chat application"),
    ("/showusers", "list all connected users"),
    ("/ignore <user>", "ignore all messages from user"),
    ("/unignore", "remove all users from ignore list"),
    ("/channel <channel number> <message>", "send message to channel"),
    ("/pm <user> <message>", "send private message to user"),
    ("/subscribe <channel number>", "subscribe to channel"),
    ("/unsubscribe", "stop channel subscription"),
    ("/help", "displays this information"),
];

/// Render the `/help` output.
#[must_use]
pub fn help_text() -> String {
    let mut text: String = HELP_ENTRIES
        .iter()
        .map(|(command, description)| format!("{command}: {description}\r\n"))
        .collect();
    text.push_str("\r\n");
    text
}

/// Errors produced while parsing a recognized command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The channel number does not fit a channel id.
    #[error("invalid channel number: {0}")]
    InvalidChannel(String),
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End the session.
    Exit,
    /// List connected users.
    ShowUsers,
    /// Stop showing broadcasts from a user.
    Ignore(String),
    /// Clear the ignore list.
    Unignore,
    /// Publish to a channel.
    Channel {
        /// Channel number.
        channel: u32,
        /// Message body.
        text: String,
    },
    /// Send a private message.
    PrivateMessage {
        /// Recipient name.
        recipient: String,
        /// Message body.
        text: String,
    },
    /// Join a channel.
    Subscribe(u32),
    /// Leave every channel.
    Unsubscribe,
    /// Show the command summary.
    Help,
    /// Plain text for everyone.
    Broadcast(String),
    /// Nothing was typed.
    Empty,
}

impl Command {
    /// Parse a line (terminator already removed).
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidChannel`] when a `/channel` or
    /// `/subscribe` number is out of range.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        if is_exit(line) {
            return Ok(Self::Exit);
        }
        if line == SHOW_USERS {
            return Ok(Self::ShowUsers);
        }
        if let Some(caps) = IGNORE.captures(line) {
            return Ok(Self::Ignore(caps[1].to_string()));
        }
        if line == UNIGNORE {
            return Ok(Self::Unignore);
        }
        if let Some(caps) = CHANNEL.captures(line) {
            return Ok(Self::Channel {
                channel: parse_channel(&caps[1])?,
                text: caps[2].to_string(),
            });
        }
        if let Some(caps) = PM.captures(line) {
            return Ok(Self::PrivateMessage {
                recipient: caps[1].to_string(),
                text: caps[2].to_string(),
            });
        }
        if let Some(caps) = SUBSCRIBE.captures(line) {
            return Ok(Self::Subscribe(parse_channel(&caps[1])?));
        }
        if line == UNSUBSCRIBE {
            return Ok(Self::Unsubscribe);
        }
        if line == HELP {
            return Ok(Self::Help);
        }
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        Ok(Self::Broadcast(line.to_string()))
    }
}

/// Check for `/exit` or `/quit`, ignoring case.
#[must_use]
pub fn is_exit(line: &str) -> bool {
    line.eq_ignore_ascii_case(EXIT) || line.eq_ignore_ascii_case(QUIT)
}

fn parse_channel(digits: &str) -> Result<u32, CommandError> {
    digits
        .parse()
        .map_err(|_| CommandError::InvalidChannel(digits.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_is_case_insensitive() {
        assert_eq!(Command::parse("/exit"), Ok(Command::Exit));
        assert_eq!(Command::parse("/QUIT"), Ok(Command::Exit));
        assert_eq!(Command::parse("/Exit"), Ok(Command::Exit));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::parse("/showusers"), Ok(Command::ShowUsers));
        assert_eq!(Command::parse("/unignore"), Ok(Command::Unignore));
        assert_eq!(Command::parse("/unsubscribe"), Ok(Command::Unsubscribe));
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse(""), Ok(Command::Empty));
    }

    #[test]
    fn test_ignore() {
        assert_eq!(
            Command::parse("/ignore andrew"),
            Ok(Command::Ignore("andrew".to_string()))
        );
        // Targets are lowercase words only; anything else is chat text.
        assert_eq!(
            Command::parse("/ignore Andrew"),
            Ok(Command::Broadcast("/ignore Andrew".to_string()))
        );
    }

    #[test]
    fn test_channel() {
        assert_eq!(
            Command::parse("/channel 5 hi there"),
            Ok(Command::Channel {
                channel: 5,
                text: "hi there".to_string()
            })
        );
        assert_eq!(
            Command::parse("/channel 7 "),
            Ok(Command::Channel {
                channel: 7,
                text: String::new()
            })
        );
        assert_eq!(
            Command::parse("/channel 99999999999 hi"),
            Err(CommandError::InvalidChannel("99999999999".to_string()))
        );
    }

    #[test]
    fn test_private_message() {
        assert_eq!(
            Command::parse("/pm bob secret plans"),
            Ok(Command::PrivateMessage {
                recipient: "bob".to_string(),
                text: "secret plans".to_string()
            })
        );
    }

    #[test]
    fn test_subscribe() {
        assert_eq!(Command::parse("/subscribe 5"), Ok(Command::Subscribe(5)));
        assert_eq!(
            Command::parse("/subscribe five"),
            Ok(Command::Broadcast("/subscribe five".to_string()))
        );
        assert!(Command::parse("/subscribe 4294967296").is_err());
    }

    #[test]
    fn test_broadcast() {
        assert_eq!(
            Command::parse("hello"),
            Ok(Command::Broadcast("hello".to_string()))
        );
        assert_eq!(
            Command::parse("/showusers now"),
            Ok(Command::Broadcast("/showusers now".to_string()))
        );
    }

    #[test]
    fn test_help_text() {
        let text = help_text();
        assert!(text.starts_with("/exit: quit the chat application\r\n"));
        assert!(text.contains("/pm <user> <message>: send private message to user\r\n"));
        assert!(text.ends_with("displays this information\r\n\r\n"));
    }
}
