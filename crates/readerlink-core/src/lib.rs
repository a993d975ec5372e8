//! Shared data model for the readerlink RFID middleware.
//!
//! Connectors and the reader controller exchange the types defined here:
//! tags and their memory banks, tag and port operations, per-operation
//! results, driver messages and reader events. Encoding of tag data beyond
//! the EPC-bank view needed to follow a write is left to the connectors.

pub mod constants;
pub mod error;
pub mod event;
pub mod operation;
pub mod port;
pub mod result;
pub mod tag;

pub use error::{Error, Result};
pub use event::{Message, MessageKind, ReaderEvent, ReaderEventKind};
pub use operation::{Field, Filter, LockPrivilege, Operation, TagOperation};
pub use port::{Pin, PinKind, Port, PortObservation, PortOp, PortOperation, PortResult};
pub use result::{OperationResult, ResultState};
pub use tag::{MemoryBank, Tag};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
