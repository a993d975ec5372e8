//! Connector trait definitions.
//!
//! This module defines the contract between a reader controller and the
//! pluggable drivers that talk to physical RFID readers:
//!
//! - [`Connector`] is consumed by the controller. Every call may fail with a
//!   validation or an implementation error. Only
//!   [`Connector::execute_tag_operation`] and
//!   [`Connector::execute_port_operation`] report their outcome
//!   asynchronously, through the callback.
//! - [`ConnectorCallback`] is exposed to the driver. Drivers call it from
//!   whatever thread they own, at any time after
//!   [`Connector::set_callback`], including while the controller is being
//!   disposed.
//!
//! `Connector` uses native `async fn` methods (Rust 1.90 + Edition 2024
//! RPITIT). It is therefore not object-safe; the controller dispatches over
//! [`AnyConnector`](crate::devices::AnyConnector) instead.

#![allow(async_fn_in_trait)]

use crate::error::{ConnectorError, Result};
use crate::types::ReaderConfiguration;
use readerlink_core::{
    Message, Port, PortObservation, PortOperation, ReaderEvent, Tag, TagOperation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Optional connector behaviour the controller adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// The driver loses track of a tag once a write changes its EPC, so
    /// operations following such a write must be sent separately.
    LostEpcOnWrite,
}

impl Capability {
    /// Name used on the property/configuration surface.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LostEpcOnWrite => "LostEPCOnWrite",
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = ConnectorError;

    /// # Examples
    ///
    /// ```
    /// use readerlink_hardware::Capability;
    ///
    /// let capability: Capability = "LostEPCOnWrite".parse().unwrap();
    /// assert_eq!(capability, Capability::LostEpcOnWrite);
    ///
    /// assert!("Teleport".parse::<Capability>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LostEPCOnWrite" => Ok(Self::LostEpcOnWrite),
            other => Err(ConnectorError::validation(format!(
                "Unknown capability '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver for one physical reader.
///
/// Operation ids are assigned by the controller and are unique per
/// controller at any instant. A connector keeps defined operations across
/// `enable`/`disable` and forgets them on `undefine`.
pub trait Connector: Send + Sync {
    /// Open the connection to the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader cannot be reached or rejects the
    /// configured properties.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection to the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be closed cleanly.
    async fn disconnect(&mut self) -> Result<()>;

    /// Apply driver-specific properties.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown keys or bad values.
    async fn set_properties(&mut self, properties: &HashMap<String, String>) -> Result<()>;

    /// Register the callback results and events are reported through.
    fn set_callback(&mut self, callback: Arc<dyn ConnectorCallback>);

    /// Query an optional capability.
    ///
    /// # Errors
    ///
    /// Returns an error if the capability cannot be determined.
    async fn get_capability(&self, capability: Capability) -> Result<bool>;

    /// Read the reader configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the reader cannot be queried.
    async fn get_config(&self) -> Result<ReaderConfiguration>;

    /// Define a long-lived tag operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is invalid or not connected.
    async fn define_tag_operation(&mut self, id: u32, operation: &TagOperation) -> Result<()>;

    /// Forget a defined tag operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown.
    async fn undefine_tag_operation(&mut self, id: u32) -> Result<()>;

    /// Start reporting tags for a defined operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown or the driver failed.
    async fn enable_tag_operation(&mut self, id: u32) -> Result<()>;

    /// Stop reporting tags for a defined operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown or the driver failed.
    async fn disable_tag_operation(&mut self, id: u32) -> Result<()>;

    /// Execute a tag operation once.
    ///
    /// The result is reported through [`ConnectorCallback::notify_tag`] with
    /// the same `id`, possibly before this call returns.
    ///
    /// # Errors
    ///
    /// Returns a validation error if not connected, an implementation error
    /// if the driver failed to start the execution.
    async fn execute_tag_operation(&mut self, id: u32, operation: &TagOperation) -> Result<()>;

    /// Abort a running execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution cannot be aborted.
    async fn abort_tag_operation(&mut self, id: u32) -> Result<()>;

    /// Define a long-lived port observation.
    ///
    /// # Errors
    ///
    /// Returns an error if the observation is invalid or not connected.
    async fn define_port_observation(
        &mut self,
        id: u32,
        observation: &PortObservation,
    ) -> Result<()>;

    /// Forget a defined port observation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown.
    async fn undefine_port_observation(&mut self, id: u32) -> Result<()>;

    /// Start reporting port events for a defined observation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown or the driver failed.
    async fn enable_port_observation(&mut self, id: u32) -> Result<()>;

    /// Stop reporting port events for a defined observation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown or the driver failed.
    async fn disable_port_observation(&mut self, id: u32) -> Result<()>;

    /// Execute a port operation once.
    ///
    /// The result is reported through [`ConnectorCallback::notify_port`].
    ///
    /// # Errors
    ///
    /// Returns a validation error if not connected, an implementation error
    /// if the driver failed to start the execution.
    async fn execute_port_operation(&mut self, id: u32, operation: &PortOperation) -> Result<()>;

    /// Release every resource held by the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown failed; the connector is unusable
    /// afterwards either way.
    async fn dispose(&mut self) -> Result<()>;
}

/// Entry point drivers report results and events through.
///
/// Implementations must tolerate calls from arbitrary threads and calls that
/// arrive after the receiving side has gone away.
pub trait ConnectorCallback: Send + Sync {
    /// Report a tag for the operation `id`.
    fn notify_tag(&self, id: u32, tag: Tag);

    /// Report a port event or result for the observation/operation `id`.
    fn notify_port(&self, id: u32, port: Port);

    /// Report a message to the controller owning the connector.
    fn notify_message(&self, message: Message);

    /// Report a reader event for monitoring.
    fn notify_event(&self, event: ReaderEvent);

    /// Reserve an ephemeral local network port.
    ///
    /// # Errors
    ///
    /// Returns an error if every port of the pool is in use or blocked.
    fn network_port(&self) -> Result<u16>;

    /// Give back a port obtained from [`network_port`](Self::network_port).
    fn reset_network_port(&self, port: u16);

    /// Duration of one reader cycle.
    fn reader_cycle_duration(&self) -> Duration;
}
