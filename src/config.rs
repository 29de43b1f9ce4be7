//! Client configuration.

use std::time::Duration;

use crate::caps::DEFAULT_CAPS;

/// Settings for one IRC connection.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub nickname: String,
    pub username: String,
    pub realname: String,
    /// Used for SASL PLAIN when the server supports it, otherwise sent as
    /// a legacy PASS at registration.
    pub password: Option<String>,
    pub use_tls: bool,
    /// Encoding label for the wire codec (e.g. `"utf-8"`, `"latin1"`).
    pub encoding: String,
    /// Capabilities to request when the server advertises them.
    pub supported_caps: Vec<String>,
    /// WHOIS ourselves once registration completes.
    pub whois_on_connect: bool,
    /// WHOIS every member shortly after joining a channel.
    pub whois_on_join: bool,
    /// Delay before the whois-on-join sweep.
    pub join_whois_delay: Duration,
    /// Request channel modes after joining a channel.
    pub mode_on_join: bool,
    /// Retry with a random nick when ours is taken during registration.
    pub random_nick_when_refused: bool,
    /// Prepended to every outgoing PRIVMSG body (e.g. a bot marker).
    pub privmsg_prefix: Option<String>,
    /// Interval between client-initiated PINGs.
    pub ping_interval: Duration,
    /// Default timeout for correlated request waits. `None` waits
    /// indefinitely.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        Self {
            host: host.into(),
            port: 6667,
            username: nickname.clone(),
            realname: nickname.clone(),
            nickname,
            password: None,
            use_tls: false,
            encoding: "utf-8".to_string(),
            supported_caps: DEFAULT_CAPS.iter().map(|s| s.to_string()).collect(),
            whois_on_connect: true,
            whois_on_join: false,
            join_whois_delay: Duration::from_secs(1),
            mode_on_join: false,
            random_nick_when_refused: true,
            privmsg_prefix: None,
            ping_interval: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self.port = 6697;
        self
    }

    pub fn with_user(mut self, username: impl Into<String>, realname: impl Into<String>) -> Self {
        self.username = username.into();
        self.realname = realname.into();
        self
    }
}
