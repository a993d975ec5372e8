//! Connector types and controller construction.

use crate::config::ControllerConfig;
use crate::controller::ReaderController;
use crate::error::{ControllerError, Result};
use crate::event::ControllerEvent;
use readerlink_hardware::AnyConnector;
use readerlink_hardware::mock::MockConnector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Builds a fresh connector of one type.
pub type ConnectorFactory = Arc<dyn Fn() -> AnyConnector + Send + Sync>;

/// Known connector types, by name.
///
/// The default registry knows the `Mock` type. Controllers created by a
/// registry are independent of it and of each other.
///
/// # Examples
///
/// ```
/// use readerlink_controller::ReaderRegistry;
/// use std::collections::HashMap;
///
/// # #[tokio::main]
/// # async fn main() -> readerlink_controller::Result<()> {
/// let registry = ReaderRegistry::default();
/// assert_eq!(registry.types(), vec!["Mock"]);
///
/// let properties = HashMap::from([("Controller.Timeout".to_string(), "500".to_string())]);
/// let (controller, _events) = registry.create("Reader1", "Mock", &properties).await?;
/// assert_eq!(controller.config().execute_timeout.as_millis(), 500);
///
/// controller.dispose().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReaderRegistry {
    factories: HashMap<String, ConnectorFactory>,
    config: ControllerConfig,
}

impl ReaderRegistry {
    /// Create a registry without any connector type.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            config: ControllerConfig::default(),
        }
    }

    /// Base configuration of every controller created from now on.
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `factory` under `type_name`, replacing any previous one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> AnyConnector + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!("Registered connector type {}", type_name);
        self.factories.insert(type_name, Arc::new(factory));
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Create a controller named `name` around a new connector of
    /// `type_name`, then apply `properties`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownConnectorType`] for an unregistered
    /// type, or the error of a rejected property set. A controller whose
    /// properties were rejected is disposed before returning.
    pub async fn create(
        &self,
        name: &str,
        type_name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<(ReaderController, mpsc::UnboundedReceiver<ControllerEvent>)> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| ControllerError::UnknownConnectorType(type_name.to_string()))?;

        let (controller, events) = ReaderController::new(name, factory(), self.config.clone());
        if let Err(e) = controller.set_properties(properties).await {
            warn!("Rejected properties for {}: {}", name, e);
            controller.dispose().await;
            return Err(e);
        }

        debug!("Created {} controller {}", type_name, name);
        Ok((controller, events))
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register("Mock", || AnyConnector::Mock(MockConnector::new().0));
        registry
    }
}

impl std::fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderRegistry")
            .field("types", &self.types())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readerlink_hardware::mock::{MockCall, MockConnectorHandle};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_unknown_type() {
        let registry = ReaderRegistry::default();
        let result = registry.create("Reader1", "Impinj", &HashMap::new()).await;
        assert!(matches!(result, Err(ControllerError::UnknownConnectorType(t)) if t == "Impinj"));
    }

    #[tokio::test]
    async fn test_properties_reach_the_connector() {
        let handles: Arc<Mutex<Vec<MockConnectorHandle>>> = Arc::default();
        let sink = handles.clone();
        let mut registry = ReaderRegistry::new();
        registry.register("Dock", move || {
            let (connector, handle) = MockConnector::with_name("Dock Reader");
            sink.lock().unwrap().push(handle);
            AnyConnector::Mock(connector)
        });

        let properties = HashMap::from([
            ("Controller.ReconnectDelay".to_string(), "100".to_string()),
            ("Host".to_string(), "10.0.0.7".to_string()),
        ]);
        let (controller, _events) = registry.create("Reader1", "Dock", &properties).await.unwrap();

        assert_eq!(controller.config().reconnect_delay.as_millis(), 100);
        let handles = handles.lock().unwrap();
        let passed = handles[0].count_calls(|call| {
            matches!(call, MockCall::SetProperties(p) if p.len() == 1 && p["Host"] == "10.0.0.7")
        });
        assert_eq!(passed, 1);
    }

    #[tokio::test]
    async fn test_rejected_properties_dispose_the_controller() {
        let handles: Arc<Mutex<Vec<MockConnectorHandle>>> = Arc::default();
        let sink = handles.clone();
        let mut registry = ReaderRegistry::new();
        registry.register("Mock", move || {
            let (connector, handle) = MockConnector::new();
            sink.lock().unwrap().push(handle);
            AnyConnector::Mock(connector)
        });

        let properties = HashMap::from([("Controller.Colour".to_string(), "blue".to_string())]);
        let result = registry.create("Reader1", "Mock", &properties).await;

        assert!(matches!(result, Err(ControllerError::UnknownProperty(_))));
        assert!(handles.lock().unwrap()[0].is_disposed());
    }
}
