//! Core constants for the reader connection layer.
//!
//! This module collects the property keys understood by a reader controller,
//! their defaults, the EPC memory bank layout used when following writes, and
//! the ephemeral network port range handed out to connectors.
//!
//! # Property Surface
//!
//! | Key | Value | Default |
//! |-----|-------|---------|
//! | `Controller.Timeout` | non-negative integer (ms) | 3000 |
//! | `Controller.ReconnectDelay` | non-negative integer (ms) | 2000 |
//! | `Controller.OptimizeWriteOperations` | `true` / `false` | `true` |
//!
//! Keys starting with [`PROPERTY_PREFIX`] are owned by the controller. Every
//! other key belongs to the connector and is passed through unvalidated.
//!
//! # Usage
//!
//! ```
//! use readerlink_core::constants::*;
//! use std::time::Duration;
//!
//! assert!(PROPERTY_TIMEOUT.starts_with(PROPERTY_PREFIX));
//!
//! let timeout = Duration::from_millis(DEFAULT_EXECUTE_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 3);
//! ```

// ============================================================================
// Controller Properties
// ============================================================================

/// Prefix of every property consumed by the controller itself.
pub const PROPERTY_PREFIX: &str = "Controller.";

/// Timeout for one-shot executions, in milliseconds.
pub const PROPERTY_TIMEOUT: &str = "Controller.Timeout";

/// Delay between two reconnection attempts, in milliseconds.
pub const PROPERTY_RECONNECT_DELAY: &str = "Controller.ReconnectDelay";

/// Whether redundant writes are removed before execution.
pub const PROPERTY_OPTIMIZE_WRITE_OPERATIONS: &str = "Controller.OptimizeWriteOperations";

/// Default execution timeout in milliseconds.
pub const DEFAULT_EXECUTE_TIMEOUT_MS: u64 = 3000;

/// Default reconnection delay in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Default for write optimization.
pub const DEFAULT_OPTIMIZE_WRITE_OPERATIONS: bool = true;

/// Default reader cycle duration reported to connectors, in milliseconds.
pub const DEFAULT_READER_CYCLE_DURATION_MS: u64 = 500;

// ============================================================================
// EPC Memory Bank Layout
// ============================================================================

/// Bit offset of the protocol control word inside the EPC bank.
///
/// The first word of the EPC bank holds the stored CRC.
///
/// ```text
/// bit 0       16        32                 32 + 16 * words
///     | CRC   | PC      | EPC ...          |
/// ```
pub const PC_BIT_OFFSET: u16 = 16;

/// Bit offset of the EPC inside the EPC bank.
pub const EPC_BIT_OFFSET: u16 = 32;

/// Number of bits in one memory word.
pub const WORD_BITS: u16 = 16;

/// Shift extracting the EPC length (in words) from the PC word.
pub const PC_LENGTH_SHIFT: u16 = 11;

// ============================================================================
// Network Port Pool
// ============================================================================

/// First port of the ephemeral range handed out to connectors.
pub const MIN_NETWORK_PORT: u16 = 11000;

/// Number of ports in the pool.
///
/// ```
/// use readerlink_core::constants::{MIN_NETWORK_PORT, NETWORK_PORT_COUNT};
///
/// let last = MIN_NETWORK_PORT + NETWORK_PORT_COUNT as u16 - 1;
/// assert_eq!(last, 11099);
/// ```
pub const NETWORK_PORT_COUNT: usize = 100;

/// Minimum time a released port stays blocked, in milliseconds.
///
/// A freed TCP port may still be in OS-level teardown (`TIME_WAIT`) and must
/// not be handed to a new connector session before this delay has elapsed.
pub const PORT_BLOCKED_DELAY_MS: u64 = 60_500;
