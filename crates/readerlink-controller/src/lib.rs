//! Reader connection and operation dispatch for the readerlink RFID
//! middleware.
//!
//! A [`ReaderController`] owns one connector and serves many logical
//! readers on top of it:
//!
//! - **Connection lifecycle**: connected exactly while something is defined,
//!   with background reconnection after a lost connection.
//! - **Long-lived operations**: tag operations and port observations shared
//!   by several logical readers, delivered in order from driver threads.
//! - **One-shot executions**: tag and port operations with a timeout, always
//!   answered with one result per requested operation id.
//! - **Write optimization**: writes fully overwritten by a later write are
//!   never sent to the driver.
//!
//! Connectors report through a [`QueuedCallbackHandler`], which also hands
//! out ephemeral network ports from a [`PortPool`].
//!
//! # Examples
//!
//! ```
//! use readerlink_controller::ReaderRegistry;
//! use readerlink_core::{Port, PortOp, PortOperation, Pin};
//! use std::collections::HashMap;
//!
//! # #[tokio::main]
//! # async fn main() -> readerlink_controller::Result<()> {
//! let registry = ReaderRegistry::default();
//! let (controller, _events) = registry.create("Reader1", "Mock", &HashMap::new()).await?;
//!
//! let operation = PortOperation::new(vec![PortOp::Write {
//!     id: "gate".to_string(),
//!     pin: Pin::output(1),
//!     state: 1,
//! }]);
//! controller
//!     .execute_port_operation(operation, |port: Port, _: &str| -> anyhow::Result<()> {
//!         assert!(port.completed);
//!         Ok(())
//!     })
//!     .await?;
//!
//! controller.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod caller;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod optimizer;
pub mod port_pool;
pub mod receiver;
pub mod registry;

mod worker;

// Re-export commonly used types for convenience
pub use callback::QueuedCallbackHandler;
pub use caller::{Caller, Notify, SharedCaller};
pub use config::ControllerConfig;
pub use controller::ReaderController;
pub use error::{ControllerError, Result};
pub use event::ControllerEvent;
pub use port_pool::PortPool;
pub use receiver::{PortExecutor, PortObservator, SharedErrorState, TagExecutor, TagOperator};
pub use registry::{ConnectorFactory, ReaderRegistry};
