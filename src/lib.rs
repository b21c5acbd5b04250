//! relaypanel - toggle a remote relay over a single shared MQTT session.
//!
//! The [`control::RelayControl`] facade publishes one of two fixed payloads on
//! the control topic through a [`mqtt::ConnectionManager`], which owns the one
//! broker connection of the process.

pub mod config;
pub mod control;
pub mod mqtt;
