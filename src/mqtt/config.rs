use rumqttc::{MqttOptions, QoS, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::MqttError;

pub const DEFAULT_BROKER_URL: &str =
    "wss://0d495914d04845f5914e55fd3e65c6e4.s1.eu.hivemq.cloud:8884/mqtt";

/// Broker address and credentials.
///
/// Accepted URL forms:
/// - `wss://host[:port]/path` WebSocket over TLS
/// - `ws://host[:port]/path` plain WebSocket
/// - `mqtts://host[:port]` or `ssl://host[:port]` TLS over TCP
/// - `mqtt://host[:port]`, `tcp://host[:port]` or `host[:port]` plain TCP
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerEndpoint {
    pub url: String,
    pub user: String,
    pub pw: String,
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            user: String::new(),
            pw: String::new(),
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    /// Formats as "user@url", password left out.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}@{}", self.user, self.url)
        }
    }
}

impl fmt::Debug for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("pw", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Tls,
    Ws,
    Wss,
}

/// Result of splitting a broker URL into what `MqttOptions::new` expects.
///
/// For WebSocket transports rumqttc wants the complete URL as the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn resolve(&self) -> Result<ResolvedEndpoint, MqttError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(MqttError::InvalidEndpoint("empty broker url".into()));
        }

        let (kind, rest) = match url.split_once("://") {
            Some(("wss", rest)) => (TransportKind::Wss, rest),
            Some(("ws", rest)) => (TransportKind::Ws, rest),
            Some(("mqtts" | "ssl", rest)) => (TransportKind::Tls, rest),
            Some(("mqtt" | "tcp", rest)) => (TransportKind::Tcp, rest),
            Some((scheme, _)) => {
                return Err(MqttError::InvalidEndpoint(format!(
                    "unsupported scheme '{}'",
                    scheme
                )))
            }
            None => (TransportKind::Tcp, url),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(MqttError::InvalidEndpoint(format!("missing host in '{}'", url)));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    MqttError::InvalidEndpoint(format!("bad port '{}': {}", port, e))
                })?;
                (host, port)
            }
            None => (authority, kind.default_port()),
        };

        if host.is_empty() {
            return Err(MqttError::InvalidEndpoint(format!("missing host in '{}'", url)));
        }

        let host = match kind {
            TransportKind::Ws | TransportKind::Wss => url.to_string(),
            TransportKind::Tcp | TransportKind::Tls => host.to_string(),
        };

        Ok(ResolvedEndpoint { kind, host, port })
    }
}

impl TransportKind {
    fn default_port(self) -> u16 {
        match self {
            TransportKind::Tcp => 1883,
            TransportKind::Tls => 8883,
            TransportKind::Ws => 80,
            TransportKind::Wss => 443,
        }
    }

    fn transport(self) -> Transport {
        match self {
            TransportKind::Tcp => Transport::Tcp,
            TransportKind::Tls => Transport::tls_with_default_config(),
            TransportKind::Ws => Transport::Ws,
            TransportKind::Wss => Transport::wss_with_default_config(),
        }
    }
}

/// Connection settings for the single control session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Empty means `relaypanel-<pid>`
    pub client_id: String,
    pub clean_session: bool,
    pub reconnect_period_ms: u64,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub request_capacity: usize,
    pub qos: u8,
    pub server: BrokerEndpoint,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            clean_session: true,
            reconnect_period_ms: 1000,
            keep_alive_secs: 60,
            connect_timeout_ms: 5000,
            request_capacity: 10,
            qos: 0,
            server: BrokerEndpoint::default(),
        }
    }
}

impl MqttConfig {
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn client_id(&self) -> String {
        match self.client_id.trim() {
            "" => format!("relaypanel-{}", std::process::id()),
            id => id.to_string(),
        }
    }

    pub fn qos(&self) -> Result<QoS, MqttError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MqttError::InvalidEndpoint(format!("invalid qos {}", other))),
        }
    }

    pub fn to_options(&self) -> Result<MqttOptions, MqttError> {
        let endpoint = self.server.resolve()?;
        let mut options = MqttOptions::new(self.client_id(), endpoint.host, endpoint.port);
        options
            .set_clean_session(self.clean_session)
            // keep-alive below 5s is rejected by rumqttc
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)))
            .set_transport(endpoint.kind.transport());

        if !self.server.user.is_empty() {
            options.set_credentials(self.server.user.clone(), self.server.pw.clone());
        }

        Ok(options)
    }
}
