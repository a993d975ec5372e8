//! Per-operation results reported by connectors.

use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// Outcome of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultState {
    Success,
    NonSpecificTagError,
    NoResponseFromTag,
    NonSpecificReaderError,
    MemoryOverrun,
    MemoryLocked,
    InsufficientPower,
    IncorrectPassword,
    ZeroKillPassword,
    OpNotPossible,
    /// Catch-all used for synthesized faults (timeouts, driver errors).
    MiscErrorTotal,
}

/// Result of one operation, shaped after the operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResult {
    Read { state: ResultState, data: Vec<u8> },
    Write { state: ResultState, words_written: u16 },
    Kill { state: ResultState },
    Lock { state: ResultState },
    Password { state: ResultState },
}

impl OperationResult {
    /// Result of the same kind as `operation` with the given state.
    pub fn with_state(operation: &Operation, state: ResultState) -> Self {
        match operation {
            Operation::Read { .. } => Self::Read {
                state,
                data: Vec::new(),
            },
            Operation::Write { .. } => Self::Write {
                state,
                words_written: 0,
            },
            Operation::Kill { .. } => Self::Kill { state },
            Operation::Lock { .. } => Self::Lock { state },
            Operation::Password { .. } => Self::Password { state },
        }
    }

    /// Synthesized fault for an operation that never produced a result.
    ///
    /// ```
    /// use readerlink_core::{Field, MemoryBank, Operation, OperationResult, ResultState};
    ///
    /// let read = Operation::read("r", Field::new(MemoryBank::Tid, 0, 32).unwrap());
    /// let fault = OperationResult::fault(&read);
    /// assert_eq!(fault.state(), ResultState::MiscErrorTotal);
    /// ```
    pub fn fault(operation: &Operation) -> Self {
        Self::with_state(operation, ResultState::MiscErrorTotal)
    }

    /// Synthesized success; writes report every word of their field.
    pub fn success(operation: &Operation) -> Self {
        match operation {
            Operation::Write { field, .. } => Self::Write {
                state: ResultState::Success,
                words_written: field.words(),
            },
            other => Self::with_state(other, ResultState::Success),
        }
    }

    /// Result state.
    pub fn state(&self) -> ResultState {
        match self {
            Self::Read { state, .. }
            | Self::Write { state, .. }
            | Self::Kill { state }
            | Self::Lock { state }
            | Self::Password { state } => *state,
        }
    }

    /// Check if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.state() == ResultState::Success
    }
}
