//! Connection Manager - the one shared MQTT session of the process
//!
//! Owns a single lazily opened session and hands out the same handle to every
//! caller. Callers receive the manager explicitly (usually as an `Arc`), and
//! the manager is the only place that opens or closes the session.
//!
//! Publishing is best-effort: [`ConnectionManager::publish`] never waits for
//! the network and reports what happened to the attempt as a
//! [`PublishOutcome`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::QoS;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::error::MqttError;
use super::message_manager::MQTTMessage;
use super::mqtt_handler::{ConnectionState, Connector, MQTTStatus, Session};

/// What happened to a single publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the client. Not a delivery confirmation.
    Sent,
    /// No connected session, nothing was sent.
    NotConnected,
    /// The transport refused the request.
    TransportError(String),
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent)
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Sent => write!(f, "sent"),
            PublishOutcome::NotConnected => write!(f, "not sent, MQTT not connected"),
            PublishOutcome::TransportError(e) => write!(f, "not sent, transport error: {}", e),
        }
    }
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    config: MqttConfig,
    topic: String,
    qos: QoS,
    session: Mutex<Option<Arc<C::Session>>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// `topic` is subscribed on every successful connect.
    pub fn new(connector: C, config: MqttConfig, topic: impl Into<String>) -> Result<Self, MqttError> {
        let qos = config.qos()?;
        Ok(Self {
            connector,
            config,
            topic: topic.into(),
            qos,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Returns the shared session, opening it on first use.
    ///
    /// The slot lock is held across the open so concurrent first callers
    /// still end up with a single session.
    pub fn connect(&self) -> Result<Arc<C::Session>, MqttError> {
        let mut slot = self.session.lock().map_err(|_| MqttError::LockPoisoned)?;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        info!("Opening MQTT session to {}", self.config.server);
        let session = match self.connector.open(&self.config, &self.topic) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!("MQTT connect to {} failed: {}", self.config.server, e);
                return Err(e);
            }
        };
        *slot = Some(session.clone());
        Ok(session)
    }

    fn current(&self) -> Option<Arc<C::Session>> {
        match self.session.lock() {
            Ok(slot) => slot.clone(),
            Err(e) => {
                error!("MQTT session slot unavailable: {}", e);
                None
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current()
            .map(|session| session.connection_state() == ConnectionState::Connected)
            .unwrap_or(false)
    }

    /// Publishes if and only if the session reports `Connected`.
    pub fn publish(&self, topic: &str, payload: &str) -> PublishOutcome {
        let session = match self.current() {
            Some(session) if session.connection_state() == ConnectionState::Connected => session,
            _ => {
                warn!("MQTT not connected yet! Dropping '{}' on {}", payload, topic);
                return PublishOutcome::NotConnected;
            }
        };

        match session.try_publish(topic, self.qos, payload) {
            Ok(()) => {
                debug!("Published '{}' on {}", payload, topic);
                PublishOutcome::Sent
            }
            Err(e) => {
                error!("Failed to publish '{}' on {}: {}", payload, topic, e);
                PublishOutcome::TransportError(e.to_string())
            }
        }
    }

    pub fn status(&self) -> MQTTStatus {
        self.current()
            .map(|session| session.status().borrow().clone())
            .unwrap_or_default()
    }

    pub fn watch_status(&self) -> Option<watch::Receiver<MQTTStatus>> {
        self.current().map(|session| session.status())
    }

    pub fn messages(&self) -> Option<broadcast::Receiver<MQTTMessage>> {
        self.current().map(|session| session.messages())
    }

    /// Waits for the already opened session to report `Connected`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        let session = self.current().ok_or(MqttError::SessionClosed)?;
        let mut status = session.status();

        tokio::time::timeout(
            timeout,
            status.wait_for(|s| s.connection_state == ConnectionState::Connected),
        )
        .await
        .map_err(|_| MqttError::Timeout(timeout))?
        .map_err(|_| MqttError::SessionClosed)?;

        Ok(())
    }

    /// Tears the session down. A later `connect` opens a fresh one.
    pub async fn close(&self, grace: Duration) -> Result<(), MqttError> {
        let session = {
            let mut slot = self.session.lock().map_err(|_| MqttError::LockPoisoned)?;
            slot.take()
        };
        let Some(session) = session else {
            debug!("No MQTT session to close");
            return Ok(());
        };

        let mut status = session.status();
        session.disconnect()?;

        let stopped = tokio::time::timeout(
            grace,
            status.wait_for(|s| s.connection_state == ConnectionState::Disconnected),
        )
        .await;
        match stopped {
            Ok(_) => info!("MQTT session to {} closed", self.config.server),
            Err(_) => warn!("MQTT session did not close within {:?}", grace),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::test_support::FakeConnector;

    const TOPIC: &str = "rescue/pole/relay";

    fn manager() -> (ConnectionManager<FakeConnector>, FakeConnector) {
        let connector = FakeConnector::default();
        let manager = ConnectionManager::new(connector.clone(), MqttConfig::default(), TOPIC).unwrap();
        (manager, connector)
    }

    #[test]
    fn connect_is_idempotent() {
        let (manager, connector) = manager();
        let first = manager.connect().unwrap();
        let second = manager.connect().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.open_count(), 1);
        assert_eq!(first.subscribed_topic, TOPIC);
    }

    #[test]
    fn concurrent_first_connects_open_one_session() {
        let (manager, connector) = manager();
        let manager = Arc::new(manager);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.connect().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(connector.open_count(), 1);
    }

    #[test]
    fn publish_without_session_is_dropped() {
        let (manager, connector) = manager();
        assert_eq!(manager.publish(TOPIC, "0"), PublishOutcome::NotConnected);
        assert_eq!(connector.open_count(), 0);
        assert_eq!(manager.status().connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn publish_while_connecting_does_not_send() {
        let (manager, _) = manager();
        let session = manager.connect().unwrap();
        assert_eq!(manager.publish(TOPIC, "1"), PublishOutcome::NotConnected);
        assert!(session.sent().is_empty());
    }

    #[test]
    fn publish_while_connected_sends_once() {
        let (manager, _) = manager();
        let session = manager.connect().unwrap();
        session.set_state(ConnectionState::Connected);

        assert!(manager.publish(TOPIC, "1").is_sent());
        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, TOPIC);
        assert_eq!(sent[0].payload, "1");
        assert_eq!(sent[0].qos, QoS::AtMostOnce);
        assert_eq!(manager.status().messages_sent, 1);
    }

    #[test]
    fn transport_rejection_is_reported() {
        let (manager, _) = manager();
        let session = manager.connect().unwrap();
        session.set_state(ConnectionState::Connected);
        session.reject_sends();

        assert!(matches!(
            manager.publish(TOPIC, "0"),
            PublishOutcome::TransportError(_)
        ));
        assert!(session.sent().is_empty());
    }

    #[test]
    fn failed_connect_leaves_slot_empty() {
        let manager =
            ConnectionManager::new(FakeConnector::failing(), MqttConfig::default(), TOPIC).unwrap();
        assert!(manager.connect().is_err());
        assert!(manager.watch_status().is_none());
    }

    #[tokio::test]
    async fn wait_until_connected_resolves_on_state_change() {
        let (manager, _) = manager();
        let session = manager.connect().unwrap();

        let flip = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flip.set_state(ConnectionState::Connected);
        });

        manager
            .wait_until_connected(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn wait_until_connected_times_out() {
        let (manager, _) = manager();
        manager.connect().unwrap();
        let result = manager.wait_until_connected(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(MqttError::Timeout(_))));
    }

    #[tokio::test]
    async fn close_then_connect_opens_new_session() {
        let (manager, connector) = manager();
        let first = manager.connect().unwrap();
        first.set_state(ConnectionState::Connected);

        manager.close(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first.connection_state(), ConnectionState::Disconnected);
        assert_eq!(manager.publish(TOPIC, "0"), PublishOutcome::NotConnected);

        let second = manager.connect().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test]
    async fn inbound_messages_reach_observers() {
        let (manager, _) = manager();
        let session = manager.connect().unwrap();
        let mut messages = manager.messages().unwrap();

        session.deliver("1");
        let message = messages.recv().await.unwrap();
        assert_eq!(message.topic(), TOPIC);
        assert_eq!(message.content(), "1");
    }
}
