//! Default handlers for server commands and numerics.

mod cap;
mod channel;
mod connection;
mod mode;
mod user;

use crate::dispatch::Registry;

/// Build the registry of default handlers.
pub fn default_registry() -> Registry {
    let mut r = Registry::new();

    // Negotiation and SASL.
    for command in ["CAP", "AUTHENTICATE", "903", "904", "905", "906", "907"] {
        r.register(command, Box::new(cap::NegotiationHandler));
    }

    // Connection lifecycle.
    r.register("PING", Box::new(connection::PingHandler));
    r.register("ERROR", Box::new(connection::ServerErrorHandler));
    r.register("001", Box::new(connection::WelcomeHandler));
    r.register("004", Box::new(connection::MyInfoHandler));
    r.register("005", Box::new(connection::IsupportHandler));
    r.register("900", Box::new(connection::LoggedInHandler));
    for numeric in ["372", "375", "376", "422"] {
        r.register(numeric, Box::new(connection::MotdHandler));
    }
    for numeric in ["431", "432", "433", "436"] {
        r.register(numeric, Box::new(connection::NickErrorHandler));
    }
    for numeric in ["401", "402", "403", "404", "405", "406", "407"] {
        r.register(numeric, Box::new(connection::ErrorReplyHandler));
    }

    // Messages and user tracking.
    r.register("PRIVMSG", Box::new(user::PrivmsgHandler));
    r.register("NOTICE", Box::new(user::NoticeHandler));
    r.register("NICK", Box::new(user::NickHandler));
    r.register("QUIT", Box::new(user::QuitHandler));
    r.register("ACCOUNT", Box::new(user::AccountHandler));
    r.register("CHGHOST", Box::new(user::ChghostHandler));

    // WHOIS replies.
    for numeric in ["311", "312", "313", "317", "319", "330"] {
        r.register(numeric, Box::new(user::WhoisReplyHandler));
    }
    r.register("318", Box::new(user::WhoisEndHandler));

    // WHO replies.
    r.register("352", Box::new(user::WhoReplyHandler));
    r.register("354", Box::new(user::WhoxReplyHandler));
    r.register("315", Box::new(user::WhoEndHandler));

    // Channel membership and metadata.
    r.register("JOIN", Box::new(channel::JoinHandler));
    r.register("PART", Box::new(channel::PartHandler));
    r.register("KICK", Box::new(channel::KickHandler));
    r.register("TOPIC", Box::new(channel::TopicHandler));
    r.register("331", Box::new(channel::NoTopicHandler));
    r.register("332", Box::new(channel::TopicReplyHandler));
    r.register("353", Box::new(channel::NamesHandler));
    r.register("366", Box::new(channel::NamesEndHandler));

    // Modes and mode lists.
    r.register("MODE", Box::new(mode::ModeHandler));
    r.register("324", Box::new(mode::ChannelModesReplyHandler));
    for (entry, end, mode_char) in [
        ("367", "368", 'b'),
        ("348", "349", 'e'),
        ("346", "347", 'I'),
        ("728", "729", 'q'),
    ] {
        r.register(entry, Box::new(mode::MaskEntryHandler { mode: mode_char }));
        r.register(end, Box::new(mode::MaskEndHandler { mode: mode_char }));
    }

    r
}
