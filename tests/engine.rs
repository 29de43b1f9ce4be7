//! End-to-end engine tests over an in-memory duplex stream.
//!
//! A fake server drives the client line by line, so these exercise the
//! full path: framing, parsing, dispatch, correlation, and the command
//! surface.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use slirc_client::codec::LineCodec;
use slirc_client::{ClientConfig, Event, IrcClient, WhoxFields};

struct Server {
    io: Framed<DuplexStream, LineCodec>,
}

impl Server {
    fn start(config: ClientConfig) -> (IrcClient, Server) {
        let (client_io, server_io) = tokio::io::duplex(65536);
        let client = IrcClient::from_stream(config, client_io).unwrap();
        (
            client,
            Server {
                io: Framed::new(server_io, LineCodec::utf8()),
            },
        )
    }

    async fn recv(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.io.next())
            .await
            .expect("timed out waiting for a client line")
            .expect("client closed the stream")
            .expect("framing error")
    }

    async fn recv_until(&mut self, prefix: &str) -> String {
        loop {
            let line = self.recv().await;
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.io.send(line.to_string()).await.unwrap();
    }

    /// Walk the client through a minimal registration with no
    /// capabilities.
    async fn register(&mut self) {
        self.recv_until("USER ").await;
        self.send(":srv CAP * LS :").await;
        self.recv_until("CAP END").await;
        self.send(":srv 001 alice :Welcome to ExampleNet").await;
        self.send(":srv 376 alice :End of /MOTD command").await;
    }
}

fn quiet_config() -> ClientConfig {
    let mut config = ClientConfig::new("irc.example.net", "alice");
    config.whois_on_connect = false;
    config
}

async fn expect_event(
    rx: &mut broadcast::Receiver<Event>,
    mut pred: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll tracked state until `pred` holds.
async fn wait_for_state(client: &IrcClient, mut pred: impl FnMut(&IrcClient) -> bool) {
    for _ in 0..500 {
        if pred(client) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state condition never became true");
}

#[tokio::test]
async fn sasl_registration_end_to_end() {
    let config = quiet_config().with_password("hunter2");
    let (client, mut server) = Server::start(config);
    let mut events = client.events();

    assert_eq!(server.recv().await, "CAP LS 302");
    server.recv_until("USER ").await;

    server.send(":srv CAP * LS :sasl=PLAIN server-time").await;
    let req = server.recv_until("CAP REQ").await;
    assert!(req.contains("sasl"));
    assert!(req.contains("server-time"));

    server.send(":srv CAP alice ACK :sasl server-time").await;
    assert_eq!(server.recv_until("AUTHENTICATE").await, "AUTHENTICATE PLAIN");

    server.send("AUTHENTICATE +").await;
    let auth = server.recv_until("AUTHENTICATE ").await;
    let payload = auth.strip_prefix("AUTHENTICATE ").unwrap();
    assert_eq!(STANDARD.decode(payload).unwrap(), b"alice\0alice\0hunter2");

    server
        .send(":srv 903 alice :SASL authentication successful")
        .await;
    server.recv_until("CAP END").await;
    server.send(":srv 001 alice :Welcome").await;
    server.send(":srv 422 alice :MOTD File is missing").await;

    expect_event(&mut events, |e| matches!(e, Event::Registered)).await;
    assert!(client.is_registered());
}

#[tokio::test]
async fn sasl_failure_still_completes_registration() {
    let config = quiet_config().with_password("wrong");
    let (client, mut server) = Server::start(config);
    let mut events = client.events();

    server.recv_until("USER ").await;
    server.send(":srv CAP * LS :sasl").await;
    server.recv_until("CAP REQ").await;
    server.send(":srv CAP alice ACK :sasl").await;
    server.recv_until("AUTHENTICATE").await;
    server
        .send(":srv 904 alice :SASL authentication failed")
        .await;
    server.recv_until("CAP END").await;

    expect_event(&mut events, |e| matches!(e, Event::SaslFailed(_))).await;
}

#[tokio::test]
async fn whois_round_trip() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    let (result, _) = tokio::join!(client.whois("bob"), async {
        server.recv_until("WHOIS bob").await;
        server
            .send(":srv 311 alice bob ident example.net * :Bob Smith")
            .await;
        server.send(":srv 312 alice bob srv.example.net :A server").await;
        server.send(":srv 317 alice bob 42 1504923966 :seconds idle").await;
        server.send(":srv 319 alice bob :#rust @#ops").await;
        server
            .send(":srv 330 alice bob bob_account :is logged in as")
            .await;
        server.send(":srv 318 alice bob :End of /WHOIS list").await;
    });

    let whois = result.unwrap();
    assert_eq!(whois.nick, "bob");
    assert_eq!(whois.user.as_deref(), Some("ident"));
    assert_eq!(whois.hostname.as_deref(), Some("example.net"));
    assert_eq!(whois.realname.as_deref(), Some("Bob Smith"));
    assert_eq!(whois.server.as_deref(), Some("srv.example.net"));
    assert_eq!(whois.seconds_idle, Some(42));
    assert_eq!(whois.channels, vec!["#rust", "@#ops"]);
    assert_eq!(whois.logged_in_as.as_deref(), Some("bob_account"));
}

#[tokio::test]
async fn concurrent_whois_for_same_nick_sends_once() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    let (first, second, _) = tokio::join!(client.whois("bob"), client.whois("BOB"), async {
        server.recv_until("WHOIS bob").await;
        server
            .send(":srv 311 alice bob ident example.net * :Bob")
            .await;
        server.send(":srv 318 alice bob :End of /WHOIS list").await;
    });

    // Both requesters resolve off the single reply.
    assert_eq!(first.unwrap().user.as_deref(), Some("ident"));
    assert_eq!(second.unwrap().user.as_deref(), Some("ident"));

    // Only one WHOIS line ever reached the server.
    let extra = tokio::time::timeout(Duration::from_millis(200), server.io.next()).await;
    assert!(extra.is_err(), "unexpected extra line: {extra:?}");
}

#[tokio::test]
async fn names_burst_before_join_confirmation_is_replayed() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    client.join("#rust").unwrap();
    server.recv_until("JOIN #rust").await;

    // NAMES delivered ahead of the JOIN echo; the engine parks it until
    // the join is confirmed, then replays it through the queue.
    server.send(":srv 353 alice = #rust :alice @bob +carol").await;
    server.send(":alice!ident@example.net JOIN #rust").await;
    server.send(":srv 366 alice #rust :End of /NAMES list").await;

    wait_for_state(&client, |c| {
        c.state()
            .channel("#rust")
            .is_some_and(|chan| chan.members.len() == 3)
    })
    .await;

    let state = client.state();
    let chan = state.channel("#rust").unwrap();
    assert!(chan.members["bob"].contains(&'o'));
    assert!(chan.members["carol"].contains(&'v'));
    assert!(chan.members["alice"].is_empty());
}

#[tokio::test]
async fn membership_tracks_part_kick_and_quit() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    client.join("#rust").unwrap();
    server.recv_until("JOIN #rust").await;
    server.send(":alice!ident@example.net JOIN #rust").await;
    server.send(":srv 353 alice = #rust :alice bob carol dave").await;
    server.send(":srv 366 alice #rust :End of /NAMES list").await;
    wait_for_state(&client, |c| {
        c.state()
            .channel("#rust")
            .is_some_and(|chan| chan.members.len() == 4)
    })
    .await;

    server.send(":bob!b@h PART #rust :bye").await;
    server.send(":carol!c@h QUIT :Ping timeout").await;
    server.send(":alice!ident@example.net KICK #rust dave :spam").await;
    wait_for_state(&client, |c| {
        c.state()
            .channel("#rust")
            .is_some_and(|chan| chan.members.len() == 1)
    })
    .await;

    let state = client.state();
    assert!(state.user("bob").is_none());
    assert!(state.user("carol").is_none());
    assert!(state.user("dave").is_none());
    assert!(state.channel("#rust").unwrap().members.contains_key("alice"));
}

#[tokio::test]
async fn ban_list_query_round_trip() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    let (result, _) = tokio::join!(client.mode_list("#rust", 'b'), async {
        server.recv_until("MODE #rust +b").await;
        server
            .send(":srv 367 alice #rust *!*@spam.example op!o@h 1504923966")
            .await;
        server
            .send(":srv 367 alice #rust *!*@bad.example op!o@h 1504923970")
            .await;
        server
            .send(":srv 368 alice #rust :End of Channel Ban List")
            .await;
    });

    let masks = result.unwrap();
    assert_eq!(masks.len(), 2);
    assert_eq!(masks[0].mask, "*!*@spam.example");
    assert_eq!(masks[0].set_by, "op!o@h");
    assert_eq!(masks[0].set_at.timestamp(), 1504923966);
}

#[tokio::test]
async fn whox_query_uses_advertised_extension() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;
    server
        .send(":srv 005 alice WHOX PREFIX=(ov)@+ :are supported by this server")
        .await;
    wait_for_state(&client, |c| c.state().server_info.extended_who).await;

    let fields = WhoxFields::NICK | WhoxFields::ACCOUNT;
    let (result, _) = tokio::join!(client.who("#rust", fields), async {
        let line = server.recv_until("WHO #rust %").await;
        // "WHO #rust %tna,<querytype>"
        let (spec, querytype) = line.rsplit_once(',').unwrap();
        assert!(spec.ends_with("%tna"));
        server
            .send(&format!(":srv 354 alice {querytype} bob bob_account"))
            .await;
        server
            .send(&format!(":srv 354 alice {querytype} carol 0"))
            .await;
        server.send(":srv 315 alice #rust :End of WHO list").await;
    });

    let rows = result.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].nick.as_deref(), Some("bob"));
    assert_eq!(rows[0].account.as_deref(), Some("bob_account"));
    assert_eq!(rows[1].nick.as_deref(), Some("carol"));
    assert_eq!(rows[1].account, None);
}

#[tokio::test]
async fn channel_mode_query_round_trip() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    client.join("#rust").unwrap();
    server.recv_until("JOIN #rust").await;
    server.send(":alice!ident@example.net JOIN #rust").await;
    wait_for_state(&client, |c| c.state().channel("#rust").is_some()).await;

    let (result, _) = tokio::join!(client.channel_modes("#rust"), async {
        server.recv_until("MODE #rust").await;
        server.send(":srv 324 alice #rust +ntl 50").await;
    });

    let modes = result.unwrap();
    assert!(modes.contains(&'n'));
    assert!(modes.contains(&'t'));
    assert!(modes.contains(&'l'));
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;
    let _ = client;

    server.send("PING :srv.example.net").await;
    assert_eq!(server.recv_until("PONG").await, "PONG :srv.example.net");
}

#[tokio::test]
async fn clean_eof_surfaces_a_single_network_error() {
    let (client, mut server) = Server::start(quiet_config());
    let mut events = client.events();
    server.register().await;
    expect_event(&mut events, |e| matches!(e, Event::Registered)).await;

    // Server hangs up without an ERROR line.
    drop(server);
    expect_event(&mut events, |e| matches!(e, Event::NetworkError(_))).await;

    // The transport is marked dead...
    assert!(client.send_raw("PING :x").is_err());

    // ...and the failure is signalled exactly once.
    let extra = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            if let Ok(Event::NetworkError(_)) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "network error surfaced twice");
}

#[tokio::test]
async fn dispatch_preserves_privmsg_order() {
    let (client, mut server) = Server::start(quiet_config());
    let mut events = client.events();
    server.register().await;

    for i in 0..20 {
        server.send(&format!(":bob!b@h PRIVMSG alice :msg {i}")).await;
    }

    let mut seen = Vec::new();
    while seen.len() < 20 {
        if let Event::Privmsg { text, .. } =
            expect_event(&mut events, |e| matches!(e, Event::Privmsg { .. })).await
        {
            seen.push(text);
        }
    }
    let expected: Vec<String> = (0..20).map(|i| format!("msg {i}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn nick_rejection_during_registration_retries_randomly() {
    let (client, mut server) = Server::start(quiet_config());
    let _ = client;
    server.recv_until("USER ").await;
    server.send(":srv CAP * LS :").await;
    server.recv_until("CAP END").await;

    server.send(":srv 433 * alice :Nickname is already in use").await;
    let retry = server.recv_until("NICK ").await;
    let new_nick = retry.strip_prefix("NICK ").unwrap();
    assert!(new_nick.starts_with("alice"));
    assert_ne!(new_nick, "alice");
}

#[tokio::test]
async fn topic_updates_are_tracked() {
    let (client, mut server) = Server::start(quiet_config());
    server.register().await;

    client.join("#rust").unwrap();
    server.recv_until("JOIN #rust").await;
    server.send(":alice!ident@example.net JOIN #rust").await;
    server.send(":srv 332 alice #rust :old topic").await;
    wait_for_state(&client, |c| {
        c.state()
            .channel("#rust")
            .is_some_and(|chan| chan.topic.as_deref() == Some("old topic"))
    })
    .await;

    server.send(":bob!b@h TOPIC #rust :new topic").await;
    wait_for_state(&client, |c| {
        c.state()
            .channel("#rust")
            .is_some_and(|chan| chan.topic.as_deref() == Some("new topic"))
    })
    .await;
}
