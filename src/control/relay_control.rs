use std::sync::Arc;

use tracing::{error, info};

use super::{ControlConfig, ControlError, PayloadMap, RelayCommand};
use crate::mqtt::{ConnectionManager, Connector, PublishOutcome};

/// Activate/deactivate facade over the shared connection.
///
/// Every call is an independent publish attempt; there is no notion of the
/// relay's current state here.
pub struct RelayControl<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    topic: String,
    payloads: PayloadMap,
}

impl<C: Connector> RelayControl<C> {
    pub fn new(manager: Arc<ConnectionManager<C>>, config: &ControlConfig) -> Result<Self, ControlError> {
        config.validate()?;
        Ok(Self {
            manager,
            topic: config.topic.clone(),
            payloads: config.payloads.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payloads(&self) -> &PayloadMap {
        &self.payloads
    }

    pub fn activate(&self) -> PublishOutcome {
        self.send(RelayCommand::Activate)
    }

    pub fn deactivate(&self) -> PublishOutcome {
        self.send(RelayCommand::Deactivate)
    }

    pub fn send(&self, command: RelayCommand) -> PublishOutcome {
        if let Err(e) = self.manager.connect() {
            error!("Cannot {} relay, MQTT connect failed: {}", command, e);
            return PublishOutcome::TransportError(e.to_string());
        }

        let payload = self.payloads.payload(command);
        info!(
            "Relay {} ({}): publishing '{}' on {}",
            command,
            command.label(),
            payload,
            self.topic
        );
        self.manager.publish(&self.topic, payload)
    }
}
