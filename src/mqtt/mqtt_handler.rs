use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::error::MqttError;
use super::message_manager::MQTTMessage;

const MAX_ERROR_MESSAGES: usize = 16;
const MESSAGE_BUFFER: usize = 64;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

impl ConnectionState {
    /// Short human readable status shown by `status` and `watch`.
    pub fn status_text(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected to MQTT",
            ConnectionState::Failed | ConnectionState::Reconnecting => "MQTT Error",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MQTTStatus {
    fn connecting() -> Self {
        Self {
            connection_state: ConnectionState::Connecting,
            ..Default::default()
        }
    }

    fn touch(&mut self) {
        self.last_activity = Some(chrono::Local::now());
    }

    fn push_error(&mut self, message: String) {
        if self.error_messages.len() >= MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
        self.touch();
    }
}

/// An open session to a broker.
///
/// Implementations must never block in `try_publish`; the request is handed
/// off and delivery happens in the background.
pub trait Session: Send + Sync + 'static {
    fn status(&self) -> watch::Receiver<MQTTStatus>;

    fn messages(&self) -> broadcast::Receiver<MQTTMessage>;

    fn try_publish(&self, topic: &str, qos: QoS, payload: &str) -> Result<(), MqttError>;

    /// Requests a clean shutdown. Publishes queued before this call are
    /// still flushed when the session is connected.
    fn disconnect(&self) -> Result<(), MqttError>;

    fn connection_state(&self) -> ConnectionState {
        self.status().borrow().connection_state.clone()
    }
}

/// Factory for sessions, called once per connection lifetime by the
/// connection manager.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Opens a session that subscribes to `topic` on every (re)connect.
    fn open(&self, config: &MqttConfig, topic: &str) -> Result<Self::Session, MqttError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttConnector;

impl Connector for RumqttConnector {
    type Session = RumqttSession;

    fn open(&self, config: &MqttConfig, topic: &str) -> Result<RumqttSession, MqttError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| MqttError::Runtime(e.to_string()))?;
        let options = config.to_options()?;
        let qos = config.qos()?;

        let (client, event_loop) = AsyncClient::new(options, config.request_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(MQTTStatus::connecting());
        let status_tx = Arc::new(status_tx);
        let (messages, _) = broadcast::channel(MESSAGE_BUFFER);
        let cancel = CancellationToken::new();

        let event_loop_task = EventLoopTask {
            event_loop,
            client: client.clone(),
            topic: topic.to_string(),
            qos,
            reconnect_period: config.reconnect_period(),
            status: status_tx.clone(),
            messages: messages.clone(),
            cancel: cancel.clone(),
        };
        runtime.spawn(event_loop_task.run());

        debug!(
            "Spawned MQTT event loop for {} (clean session: {}, reconnect every {:?})",
            config.server,
            config.clean_session,
            config.reconnect_period()
        );

        Ok(RumqttSession {
            client,
            status_tx,
            status_rx,
            messages,
            cancel,
        })
    }
}

/// Session backed by `rumqttc::AsyncClient` and a spawned event loop.
pub struct RumqttSession {
    client: AsyncClient,
    status_tx: Arc<watch::Sender<MQTTStatus>>,
    status_rx: watch::Receiver<MQTTStatus>,
    messages: broadcast::Sender<MQTTMessage>,
    cancel: CancellationToken,
}

impl Session for RumqttSession {
    fn status(&self) -> watch::Receiver<MQTTStatus> {
        self.status_rx.clone()
    }

    fn messages(&self) -> broadcast::Receiver<MQTTMessage> {
        self.messages.subscribe()
    }

    fn try_publish(&self, topic: &str, qos: QoS, payload: &str) -> Result<(), MqttError> {
        if self.cancel.is_cancelled() {
            return Err(MqttError::SessionClosed);
        }
        self.client
            .try_publish(topic, qos, false, payload.as_bytes().to_vec())?;
        self.status_tx.send_modify(|status| {
            status.messages_sent += 1;
            status.touch();
        });
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        if self.connection_state() != ConnectionState::Connected {
            // nothing to flush, stop the reconnect loop right away
            self.cancel.cancel();
            return Ok(());
        }

        if let Err(e) = self.client.try_disconnect() {
            warn!("Clean disconnect failed, stopping event loop: {}", e);
            self.cancel.cancel();
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for RumqttSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct EventLoopTask {
    event_loop: EventLoop,
    client: AsyncClient,
    topic: String,
    qos: QoS,
    reconnect_period: Duration,
    status: Arc<watch::Sender<MQTTStatus>>,
    messages: broadcast::Sender<MQTTMessage>,
    cancel: CancellationToken,
}

impl EventLoopTask {
    async fn run(mut self) {
        info!("Starting MQTT event loop");

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT relay connected ({:?})", ack.code);
                    self.status.send_modify(|status| {
                        status.connection_state = ConnectionState::Connected;
                        status.touch();
                    });
                    // polling must not stall here, so no awaiting subscribe
                    match self.client.try_subscribe(self.topic.as_str(), self.qos) {
                        Ok(()) => debug!("Subscribe to {} queued", self.topic),
                        Err(e) => error!("Failed to subscribe to {}: {}", self.topic, e),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = MQTTMessage::from_publish(&publish);
                    info!("Received on {}: {}", message.topic(), message.content());
                    self.status.send_modify(|status| {
                        status.messages_received += 1;
                        status.touch();
                    });
                    // no observers is fine
                    self.messages.send(message).ok();
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    info!("Subscribed to {} ({:?})", self.topic, ack.return_codes);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker closed the MQTT session");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT session disconnected");
                    break;
                }
                Ok(other) => debug!("MQTT event: {:?}", other),
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    let state = match &e {
                        ConnectionError::ConnectionRefused(_) => ConnectionState::Failed,
                        _ => ConnectionState::Reconnecting,
                    };
                    self.status.send_modify(|status| {
                        status.connection_state = state;
                        status.push_error(e.to_string());
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_period) => {
                            debug!("Reconnecting to MQTT broker");
                        }
                    }
                }
            }
        }

        self.status.send_modify(|status| {
            status.connection_state = ConnectionState::Disconnected;
            status.touch();
        });
        info!("MQTT event loop stopped");
    }
}
