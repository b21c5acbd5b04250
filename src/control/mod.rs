//! Relay control channel: the topic, the two payloads and the facade that
//! publishes them.

pub mod relay_control;

pub use relay_control::RelayControl;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_TOPIC: &str = "rescue/pole/relay";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Invalid control topic '{0}'")]
    InvalidTopic(String),

    #[error("Payload for {0} must not be empty")]
    EmptyPayload(RelayCommand),

    #[error("Activate and deactivate both publish '{0}'")]
    SamePayload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayCommand {
    /// Relay to the safe state
    Activate,
    /// Relay to the danger state
    Deactivate,
}

impl RelayCommand {
    /// Label shown next to the command, as on the control panel buttons.
    pub fn label(self) -> &'static str {
        match self {
            RelayCommand::Activate => "SAFE",
            RelayCommand::Deactivate => "DANGER",
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayCommand::Activate => write!(f, "activate"),
            RelayCommand::Deactivate => write!(f, "deactivate"),
        }
    }
}

/// The closed payload alphabet of the control topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadMap {
    pub activate: String,
    pub deactivate: String,
}

impl Default for PayloadMap {
    fn default() -> Self {
        Self {
            activate: "0".to_string(),
            deactivate: "1".to_string(),
        }
    }
}

impl PayloadMap {
    pub fn payload(&self, command: RelayCommand) -> &str {
        match command {
            RelayCommand::Activate => &self.activate,
            RelayCommand::Deactivate => &self.deactivate,
        }
    }

    /// Maps an observed payload back to the command that produces it.
    pub fn command_for(&self, payload: &str) -> Option<RelayCommand> {
        if payload == self.activate {
            Some(RelayCommand::Activate)
        } else if payload == self.deactivate {
            Some(RelayCommand::Deactivate)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.activate.is_empty() {
            return Err(ControlError::EmptyPayload(RelayCommand::Activate));
        }
        if self.deactivate.is_empty() {
            return Err(ControlError::EmptyPayload(RelayCommand::Deactivate));
        }
        if self.activate == self.deactivate {
            return Err(ControlError::SamePayload(self.activate.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Used for both subscribe and publish
    pub topic: String,
    pub payloads: PayloadMap,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            payloads: PayloadMap::default(),
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.topic.is_empty() || self.topic.contains(['+', '#']) {
            return Err(ControlError::InvalidTopic(self.topic.clone()));
        }
        self.payloads.validate()
    }
}
