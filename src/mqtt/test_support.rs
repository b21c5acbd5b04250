//! In-memory session used by unit tests in place of a broker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rumqttc::QoS;
use tokio::sync::{broadcast, watch};

use super::config::MqttConfig;
use super::error::MqttError;
use super::message_manager::MQTTMessage;
use super::mqtt_handler::{ConnectionState, Connector, MQTTStatus, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
}

pub struct FakeSession {
    status: watch::Sender<MQTTStatus>,
    messages: broadcast::Sender<MQTTMessage>,
    sent: Mutex<Vec<SentMessage>>,
    reject_sends: AtomicBool,
    pub subscribed_topic: String,
}

impl FakeSession {
    pub fn new(topic: &str) -> Self {
        let (status, _) = watch::channel(MQTTStatus::default());
        let (messages, _) = broadcast::channel(8);
        Self {
            status,
            messages,
            sent: Mutex::new(Vec::new()),
            reject_sends: AtomicBool::new(false),
            subscribed_topic: topic.to_string(),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.status
            .send_modify(|status| status.connection_state = state);
    }

    pub fn reject_sends(&self) {
        self.reject_sends.store(true, Ordering::SeqCst);
    }

    pub fn deliver(&self, payload: &str) {
        self.messages
            .send(MQTTMessage::from_topic(
                self.subscribed_topic.clone(),
                payload.to_string(),
            ))
            .ok();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Session for FakeSession {
    fn status(&self) -> watch::Receiver<MQTTStatus> {
        self.status.subscribe()
    }

    fn messages(&self) -> broadcast::Receiver<MQTTMessage> {
        self.messages.subscribe()
    }

    fn try_publish(&self, topic: &str, qos: QoS, payload: &str) -> Result<(), MqttError> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(MqttError::SessionClosed);
        }
        self.sent.lock().unwrap().push(SentMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
        });
        self.status.send_modify(|status| status.messages_sent += 1);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}

/// Hands out `FakeSession`s and counts how often it was asked to.
#[derive(Default, Clone)]
pub struct FakeConnector {
    pub opened: Arc<AtomicUsize>,
    pub fail: bool,
}

impl FakeConnector {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    fn open(&self, config: &MqttConfig, topic: &str) -> Result<FakeSession, MqttError> {
        if self.fail {
            return Err(MqttError::InvalidEndpoint(config.server.url.clone()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let session = FakeSession::new(topic);
        session.set_state(ConnectionState::Connecting);
        Ok(session)
    }
}
