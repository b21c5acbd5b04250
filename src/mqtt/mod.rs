//! # MQTT Integration Module
//!
//! Everything relaypanel needs to talk to the relay broker: endpoint and
//! session configuration, the shared connection, and the rumqttc-backed
//! transport behind it.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs              - Broker endpoint, credentials, session options
//! ├── connection_manager.rs  - The single lazily opened session of the process
//! ├── error.rs               - MqttError
//! ├── message_manager.rs     - Inbound message representation
//! └── mqtt_handler.rs        - Session/Connector seam and the rumqttc event loop
//! ```
//!
//! ## Delivery Model
//!
//! Publishing is fire-and-forget. The manager only hands a payload to the
//! client when the session reports `Connected`; otherwise the attempt is
//! logged and dropped. Nothing is queued for later and nothing is retried.
//! Connection failures are logged and recorded in [`MQTTStatus`], the
//! rumqttc event loop keeps reconnecting on the configured interval.

pub mod config;
pub mod connection_manager;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{BrokerEndpoint, MqttConfig};
pub use connection_manager::{ConnectionManager, PublishOutcome};
pub use error::MqttError;
pub use message_manager::MQTTMessage;
pub use mqtt_handler::{ConnectionState, Connector, MQTTStatus, RumqttConnector, Session};
