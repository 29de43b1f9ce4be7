//! Asynchronous IRC client protocol engine.
//!
//! The engine turns a byte stream into an ordered stream of parsed
//! messages, routes them through per-command handlers, and offers a
//! request/response command surface on top of the fire-and-forget wire
//! protocol:
//!
//! - [`codec::LineCodec`] frames lines out of arbitrary read chunks and
//!   decodes them with a configurable character encoding.
//! - [`message::Message`] carries IRCv3 tags, a prefix, the command, and
//!   parameters, with server-supplied timestamps honored.
//! - [`request::RequestManager`] correlates multi-line numeric replies
//!   (WHOIS, WHO, mode lists) back to the commands that caused them.
//! - [`sync::NamedEvents`] synchronizes on protocol milestones that have
//!   no request key, such as a JOIN being confirmed.
//! - [`negotiate::Negotiator`] drives IRCv3 capability negotiation and
//!   SASL PLAIN authentication during registration.
//! - [`client::IrcClient`] ties it together over TCP or TLS.
//!
//! Incoming lines are dispatched strictly in arrival order by a single
//! consumer; handlers that need to wait for later replies spawn tasks
//! instead of blocking that path.

pub mod caps;
pub mod casemap;
pub mod client;
pub mod codec;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handlers;
pub mod isupport;
pub mod message;
pub mod negotiate;
pub mod prefix;
pub mod request;
pub mod sasl;
pub mod state;
pub mod sync;

pub use client::IrcClient;
pub use config::ClientConfig;
pub use error::{ClientError, ConnectionError, MessageParseError, ProtocolError, RequestError};
pub use event::Event;
pub use message::{Message, Tag};
pub use prefix::Prefix;
pub use state::{Channel, ExtendedWho, Mask, NetworkState, User, Whois, WhoxFields};
