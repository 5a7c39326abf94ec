//! # telechat-protocol
//!
//! The line-oriented socket protocol spoken by telechat clients.
//!
//! - [`codec`] turns a raw byte stream into complete lines and formats
//!   prompts and delivered chat lines.
//! - [`command`] parses a line into a [`Command`].
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use telechat_protocol::{Command, LineCodec};
//!
//! let mut codec = LineCodec::default();
//! let mut buf = BytesMut::from(&b"/subscribe 5\r\n"[..]);
//!
//! let line = codec.decode_from(&mut buf).unwrap().unwrap();
//! assert_eq!(Command::parse(&line).unwrap(), Command::Subscribe(5));
//! ```

pub mod codec;
pub mod command;

pub use codec::{delivery, prompt, LineCodec, ProtocolError, DEFAULT_MAX_LINE_LENGTH};
pub use command::{help_text, Command, CommandError};
