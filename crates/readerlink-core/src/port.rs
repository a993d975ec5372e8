//! GPIO port observations and operations.

use crate::result::ResultState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinKind {
    Input,
    Output,
}

/// A reader GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pin {
    pub id: u16,
    pub kind: PinKind,
}

impl Pin {
    /// Input pin.
    pub fn input(id: u16) -> Self {
        Self {
            id,
            kind: PinKind::Input,
        }
    }

    /// Output pin.
    pub fn output(id: u16) -> Self {
        Self {
            id,
            kind: PinKind::Output,
        }
    }
}

/// One port operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortOp {
    Read { id: String, pin: Pin },
    Write { id: String, pin: Pin, state: u8 },
}

impl PortOp {
    /// Operation id.
    pub fn id(&self) -> &str {
        match self {
            Self::Read { id, .. } | Self::Write { id, .. } => id,
        }
    }
}

/// A batch of port operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortOperation {
    pub operations: Vec<PortOp>,
}

impl PortOperation {
    pub fn new(operations: Vec<PortOp>) -> Self {
        Self { operations }
    }
}

/// Pins watched by a long-lived port observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortObservation {
    pub pins: Vec<Pin>,
}

impl PortObservation {
    pub fn new(pins: Vec<Pin>) -> Self {
        Self { pins }
    }
}

/// Result of a port operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortResult {
    pub state: ResultState,
    /// Pin level read or written.
    pub value: Option<u8>,
}

impl PortResult {
    pub fn success(value: Option<u8>) -> Self {
        Self {
            state: ResultState::Success,
            value,
        }
    }

    pub fn fault() -> Self {
        Self {
            state: ResultState::MiscErrorTotal,
            value: None,
        }
    }
}

/// A port event or the result of a port operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Pin that changed, for observations.
    pub pin: Option<Pin>,

    /// Level of the pin, for observations.
    pub state: Option<u8>,

    /// Time of the event.
    pub timestamp: DateTime<Utc>,

    /// Set once a one-shot execution has finished.
    pub completed: bool,

    /// Operation results keyed by operation id.
    pub results: BTreeMap<String, PortResult>,
}

impl Port {
    /// A pin level change.
    pub fn changed(pin: Pin, state: u8) -> Self {
        Self {
            pin: Some(pin),
            state: Some(state),
            timestamp: Utc::now(),
            completed: false,
            results: BTreeMap::new(),
        }
    }

    /// The synthesized result of a port execution that produced nothing.
    pub fn completed_empty() -> Self {
        Self {
            pin: None,
            state: None,
            timestamp: Utc::now(),
            completed: true,
            results: BTreeMap::new(),
        }
    }

    /// Add an operation result.
    pub fn with_result(mut self, id: impl Into<String>, result: PortResult) -> Self {
        self.results.insert(id.into(), result);
        self
    }
}
