//! The IRC client: connection setup, IO tasks, and the command API.
//!
//! [`IrcClient::connect`] dials TCP (optionally TLS) and spawns four
//! tasks: a reader that frames incoming lines onto the dispatch queue, a
//! single dispatch loop that consumes that queue in order, a writer that
//! drains outgoing lines, and a keepalive pinger. Anything that must
//! block on a correlated reply happens off the dispatch path.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::MutexGuard;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as TlsConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::LineCodec;
use crate::commands;
use crate::config::ClientConfig;
use crate::dispatch::{self, Context};
use crate::error::{ClientError, ConnectionError};
use crate::event::Event;
use crate::handlers;
use crate::negotiate::Action;
use crate::state::{ExtendedWho, Mask, NetworkState, Whois, WhoxFields};

/// An asynchronous IRC client.
pub struct IrcClient {
    ctx: Arc<Context>,
}

impl IrcClient {
    /// Connect to the configured server and start the engine.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let addr = (config.host.clone(), config.port);
        info!(host = %config.host, port = config.port, tls = config.use_tls, "connecting");
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(ConnectionError::Io)?;
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
        SockRef::from(&tcp)
            .set_tcp_keepalive(&keepalive)
            .map_err(ConnectionError::Io)?;

        if config.use_tls {
            let mut roots = RootCertStore::empty();
            for cert in rustls_native_certs::load_native_certs().certs {
                if let Err(err) = roots.add(cert) {
                    debug!(%err, "skipping unusable root certificate");
                }
            }
            let tls = TlsConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            let server_name = ServerName::try_from(config.host.clone())
                .map_err(|_| ConnectionError::InvalidServerName(config.host.clone()))?;
            let stream = TlsConnector::from(Arc::new(tls))
                .connect(server_name, tcp)
                .await
                .map_err(|err| ConnectionError::Tls(err.to_string()))?;
            Self::from_stream(config, stream)
        } else {
            Self::from_stream(config, tcp)
        }
    }

    /// Start the engine over an already-established duplex stream. This
    /// is how tests drive the client without a network.
    pub fn from_stream<S>(config: ClientConfig, stream: S) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let read_codec = LineCodec::new(&config.encoding)?;
        let write_codec = LineCodec::new(&config.encoding)?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, read_codec);
        let mut writer = FramedWrite::new(write_half, write_codec);

        // Incoming lines and handler re-dispatches share one queue so
        // ordering is a property of the queue alone.
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let ctx = Arc::new(Context::new(config, out_tx, line_tx.clone()));

        let registry = Arc::new(handlers::default_registry());
        tokio::spawn(dispatch::run(registry, Arc::clone(&ctx), line_rx));

        let reader_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(line)) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%err, "read failed");
                        reader_ctx.network_failed(&err.to_string());
                        break;
                    }
                    None => {
                        debug!("connection closed by peer");
                        reader_ctx.network_failed("connection closed");
                        break;
                    }
                }
            }
            // Dropping `line_tx` closes the queue (the re-dispatch sender
            // is gone after `network_failed`), stopping dispatch.
            debug!("reader finished");
        });

        let writer_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if let Err(err) = writer.send(line).await {
                    warn!(%err, "write failed");
                    writer_ctx.network_failed(&err.to_string());
                    break;
                }
            }
            debug!("writer finished");
        });

        let ping_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_ctx.config.ping_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                if ping_ctx.net_error.load(Ordering::SeqCst) {
                    break;
                }
                if !ping_ctx.registered.load(Ordering::SeqCst) {
                    continue;
                }
                let target = {
                    let state = ping_ctx.state.lock();
                    state
                        .server_info
                        .ping_token
                        .clone()
                        .or_else(|| state.server_info.name.clone())
                        .unwrap_or_else(|| ping_ctx.config.host.clone())
                };
                if ping_ctx.send_raw(format!("PING :{target}")).is_err() {
                    break;
                }
            }
        });

        let client = Self { ctx };
        for action in client.ctx.negotiator.lock().start() {
            if let Action::Send(line) = action {
                client.ctx.send_raw(line)?;
            }
        }
        Ok(client)
    }

    /// Subscribe to the client's event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.ctx.events.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Snapshot access to tracked network state.
    pub fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.ctx.state.lock()
    }

    pub fn is_registered(&self) -> bool {
        self.ctx.registered.load(Ordering::SeqCst)
    }

    /// Send a raw line verbatim.
    pub fn send_raw(&self, line: impl Into<String>) -> Result<(), ConnectionError> {
        if self.ctx.net_error.load(Ordering::SeqCst) {
            return Err(ConnectionError::NotConnected);
        }
        self.ctx.send_raw(line)
    }

    /// WHOIS a nick and wait for the accumulated reply.
    pub async fn whois(&self, nick: &str) -> Result<Whois, ClientError> {
        commands::whois(&self.ctx, nick).await
    }

    /// WHO a target, using WHOX field selection where the server
    /// supports it.
    pub async fn who(
        &self,
        target: &str,
        fields: WhoxFields,
    ) -> Result<Vec<ExtendedWho>, ClientError> {
        commands::who(&self.ctx, target, fields).await
    }

    /// Fetch a channel's current modes.
    pub async fn channel_modes(&self, channel: &str) -> Result<HashSet<char>, ClientError> {
        commands::channel_modes(&self.ctx, channel).await
    }

    /// Fetch a channel mode list (`b`, `e`, `I`, or `q`).
    pub async fn mode_list(&self, channel: &str, mode: char) -> Result<Vec<Mask>, ClientError> {
        commands::mode_list(&self.ctx, channel, mode).await
    }

    pub fn join(&self, channel: &str) -> Result<(), ConnectionError> {
        commands::join(&self.ctx, channel, None)
    }

    /// Join a key-protected channel.
    pub fn join_with_key(&self, channel: &str, key: &str) -> Result<(), ConnectionError> {
        commands::join(&self.ctx, channel, Some(key))
    }

    pub fn part(&self, channel: &str, reason: Option<&str>) -> Result<(), ConnectionError> {
        commands::part(&self.ctx, channel, reason)
    }

    pub fn privmsg(&self, target: &str, text: &str) -> Result<(), ConnectionError> {
        commands::privmsg(&self.ctx, target, text)
    }

    /// Send a CTCP ACTION.
    pub fn action(&self, target: &str, text: &str) -> Result<(), ConnectionError> {
        commands::action(&self.ctx, target, text)
    }

    pub fn notice(&self, target: &str, text: &str) -> Result<(), ConnectionError> {
        commands::notice(&self.ctx, target, text)
    }

    pub fn set_topic(&self, channel: &str, topic: &str) -> Result<(), ConnectionError> {
        commands::set_topic(&self.ctx, channel, topic)
    }

    pub fn request_topic(&self, channel: &str) -> Result<(), ConnectionError> {
        commands::request_topic(&self.ctx, channel)
    }

    pub fn kick(
        &self,
        channel: &str,
        nick: &str,
        reason: Option<&str>,
    ) -> Result<(), ConnectionError> {
        commands::kick(&self.ctx, channel, nick, reason)
    }

    pub fn invite(&self, channel: &str, nick: &str) -> Result<(), ConnectionError> {
        commands::invite(&self.ctx, channel, nick)
    }

    pub fn set_mode(&self, target: &str, modes: &str) -> Result<(), ConnectionError> {
        commands::set_mode(&self.ctx, target, modes)
    }

    pub fn nick(&self, new_nick: &str) -> Result<(), ConnectionError> {
        commands::nick(&self.ctx, new_nick)
    }

    pub fn quit(&self, reason: Option<&str>) -> Result<(), ConnectionError> {
        commands::quit(&self.ctx, reason)
    }
}
