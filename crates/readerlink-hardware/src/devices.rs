//! Enum wrapper for connector dispatch.
//!
//! Native `async fn` in traits (RPITIT, Edition 2024) is not object-safe, so
//! the controller cannot hold a `Box<dyn Connector>`. [`AnyConnector`]
//! provides concrete type dispatch instead: every variant wraps one driver,
//! the compiler sees concrete future types, and those futures stay `Send`
//! so they can run on tokio worker tasks.
//!
//! # Examples
//!
//! ```
//! use readerlink_hardware::devices::AnyConnector;
//! use readerlink_hardware::mock::MockConnector;
//!
//! let (connector, _handle) = MockConnector::new();
//! let any_connector = AnyConnector::Mock(connector);
//!
//! assert_eq!(any_connector.type_name(), "Mock");
//! ```

use crate::mock::MockConnector;
use crate::traits::{Capability, Connector, ConnectorCallback};
use crate::types::ReaderConfiguration;
use crate::Result;
use readerlink_core::{PortObservation, PortOperation, TagOperation};
use std::collections::HashMap;
use std::sync::Arc;

/// Enum wrapper for connector dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyConnector {
    /// In-memory connector for development and testing.
    Mock(MockConnector),
}

impl AnyConnector {
    /// Name of the connector type, as used by reader registries.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "Mock",
        }
    }
}

impl Connector for AnyConnector {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.disconnect().await,
        }
    }

    async fn set_properties(&mut self, properties: &HashMap<String, String>) -> Result<()> {
        match self {
            Self::Mock(device) => device.set_properties(properties).await,
        }
    }

    fn set_callback(&mut self, callback: Arc<dyn ConnectorCallback>) {
        match self {
            Self::Mock(device) => device.set_callback(callback),
        }
    }

    async fn get_capability(&self, capability: Capability) -> Result<bool> {
        match self {
            Self::Mock(device) => device.get_capability(capability).await,
        }
    }

    async fn get_config(&self) -> Result<ReaderConfiguration> {
        match self {
            Self::Mock(device) => device.get_config().await,
        }
    }

    async fn define_tag_operation(&mut self, id: u32, operation: &TagOperation) -> Result<()> {
        match self {
            Self::Mock(device) => device.define_tag_operation(id, operation).await,
        }
    }

    async fn undefine_tag_operation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.undefine_tag_operation(id).await,
        }
    }

    async fn enable_tag_operation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.enable_tag_operation(id).await,
        }
    }

    async fn disable_tag_operation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.disable_tag_operation(id).await,
        }
    }

    async fn execute_tag_operation(&mut self, id: u32, operation: &TagOperation) -> Result<()> {
        match self {
            Self::Mock(device) => device.execute_tag_operation(id, operation).await,
        }
    }

    async fn abort_tag_operation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.abort_tag_operation(id).await,
        }
    }

    async fn define_port_observation(
        &mut self,
        id: u32,
        observation: &PortObservation,
    ) -> Result<()> {
        match self {
            Self::Mock(device) => device.define_port_observation(id, observation).await,
        }
    }

    async fn undefine_port_observation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.undefine_port_observation(id).await,
        }
    }

    async fn enable_port_observation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.enable_port_observation(id).await,
        }
    }

    async fn disable_port_observation(&mut self, id: u32) -> Result<()> {
        match self {
            Self::Mock(device) => device.disable_port_observation(id).await,
        }
    }

    async fn execute_port_operation(&mut self, id: u32, operation: &PortOperation) -> Result<()> {
        match self {
            Self::Mock(device) => device.execute_port_operation(id, operation).await,
        }
    }

    async fn dispose(&mut self) -> Result<()> {
        match self {
            Self::Mock(device) => device.dispose().await,
        }
    }
}
