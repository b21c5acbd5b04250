//! Error definitions for the MQTT connection layer

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the connection manager and its sessions
#[derive(Debug, Error)]
pub enum MqttError {
    /// The configured broker URL could not be turned into connection options
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    /// The rumqttc client rejected a request (queue full, event loop gone)
    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The session did not reach the requested state in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The session event loop has already stopped
    #[error("Session closed")]
    SessionClosed,

    /// Sessions spawn their event loop and need a running tokio runtime
    #[error("No tokio runtime: {0}")]
    Runtime(String),

    /// A thread panicked while holding the session slot lock
    #[error("Session lock poisoned")]
    LockPoisoned,
}
