//! Connector abstraction layer for the readerlink RFID middleware.
//!
//! A connector is the driver for one physical reader. This crate defines the
//! contract between drivers and the reader controller, plus an in-memory
//! mock used for development and testing.
//!
//! # Design
//!
//! - **Async-first**: every driver call is a native `async fn` in a trait
//!   (Rust 1.90 + Edition 2024 RPITIT).
//! - **Enum dispatch**: [`AnyConnector`] wraps the concrete drivers so the
//!   controller keeps `Send` futures without boxing.
//! - **Thread-agnostic callbacks**: drivers report through
//!   [`ConnectorCallback`] from whatever thread they own.
//! - **Error-aware**: operations return [`Result<T>`][error::Result] and
//!   errors tell validation failures apart from lost connections.
//!
//! # Examples
//!
//! ```no_run
//! use readerlink_core::TagOperation;
//! use readerlink_hardware::{Connector, Result};
//!
//! async fn inventory<C: Connector>(connector: &mut C, id: u32) -> Result<()> {
//!     connector.connect().await?;
//!     connector.define_tag_operation(id, &TagOperation::default()).await?;
//!     connector.enable_tag_operation(id).await
//! }
//! ```

pub mod devices;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::AnyConnector;
pub use error::{ConnectorError, Result};
pub use traits::{Capability, Connector, ConnectorCallback};
pub use types::ReaderConfiguration;
