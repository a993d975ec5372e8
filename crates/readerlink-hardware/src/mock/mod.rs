//! Mock connector implementations for testing and development.
//!
//! This module provides a simulated reader that can be scripted
//! programmatically without requiring physical hardware.

pub mod connector;

pub use connector::{ExecutionMode, MockCall, MockConnector, MockConnectorHandle};
