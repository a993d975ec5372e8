//! Tags as seen by a reader, and the EPC-bank view used to follow writes.
//!
//! A connector reports every tag it sees together with the results of the
//! operations it executed on it. The controller needs a minimal model of the
//! EPC memory bank so it can tell whether a write changes the identity of a
//! tag (the EPC) and restore the pre-operation identity when merging results.
//!
//! ```text
//! bit 0       16        32                 32 + 16 * words
//!     | CRC   | PC      | EPC ...          |
//! ```
//!
//! The CRC word is not tracked. The EPC length is taken from the top five
//! bits of the PC word whenever the PC is known.

use crate::constants::{EPC_BIT_OFFSET, PC_BIT_OFFSET, PC_LENGTH_SHIFT, WORD_BITS};
use crate::operation::{Filter, Operation};
use crate::result::OperationResult;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gen2 memory banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBank {
    /// Kill and access passwords.
    Reserved,

    /// CRC, protocol control word and EPC.
    Epc,

    /// Tag identifier, usually factory locked.
    Tid,

    /// User memory.
    User,
}

impl TryFrom<u8> for MemoryBank {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Reserved),
            1 => Ok(Self::Epc),
            2 => Ok(Self::Tid),
            3 => Ok(Self::User),
            other => Err(Error::UnknownMemoryBank(other)),
        }
    }
}

impl std::fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reserved => write!(f, "Reserved"),
            Self::Epc => write!(f, "EPC"),
            Self::Tid => write!(f, "TID"),
            Self::User => write!(f, "User"),
        }
    }
}

/// A tag observation reported by a connector.
///
/// # Examples
///
/// ```
/// use readerlink_core::Tag;
///
/// let tag = Tag::new(vec![0x30, 0x08, 0x33, 0xB2])
///     .with_antenna(1)
///     .with_tid(vec![0xE2, 0x80, 0x11, 0x00]);
///
/// assert_eq!(tag.epc_hex().as_deref(), Some("300833B2"));
/// assert_eq!(tag.pc, Some(0x1000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// EPC, `None` when the connector could not resolve it.
    pub epc: Option<Vec<u8>>,

    /// Protocol control word.
    pub pc: Option<u16>,

    /// TID, `None` when not read or not resolved.
    pub tid: Option<Vec<u8>>,

    /// Antenna the tag was seen on.
    pub antenna: u16,

    /// Received signal strength, if the connector reports it.
    pub rssi: Option<i32>,

    /// Time of the observation.
    pub first_seen: DateTime<Utc>,

    /// Set once a one-shot execution has finished with this tag.
    pub completed: bool,

    /// Operation results keyed by operation id.
    pub results: BTreeMap<String, OperationResult>,
}

impl Tag {
    /// Create a tag with the given EPC and a PC word matching its length.
    pub fn new(epc: Vec<u8>) -> Self {
        let words = epc.len().div_ceil(2) as u16;
        Self {
            pc: Some(words << PC_LENGTH_SHIFT),
            epc: Some(epc),
            ..Self::unidentified()
        }
    }

    /// Create a tag without EPC, PC or TID.
    pub fn unidentified() -> Self {
        Self {
            epc: None,
            pc: None,
            tid: None,
            antenna: 0,
            rssi: None,
            first_seen: Utc::now(),
            completed: false,
            results: BTreeMap::new(),
        }
    }

    /// The synthesized result of an execution that did not see any tag.
    pub fn completed_empty() -> Self {
        Self {
            completed: true,
            ..Self::unidentified()
        }
    }

    /// Build the EPC view implied by a filter set.
    ///
    /// ```
    /// use readerlink_core::{Filter, MemoryBank, Tag};
    ///
    /// let filter = Filter::equals(MemoryBank::Epc, 32, vec![0xAB, 0xCD]).unwrap();
    /// let tag = Tag::from_filter(&[filter]);
    /// assert_eq!(tag.epc, Some(vec![0xAB, 0xCD]));
    /// ```
    pub fn from_filter(filters: &[Filter]) -> Self {
        let mut tag = Self::unidentified();
        tag.apply_filter(filters);
        tag
    }

    /// Set the TID.
    pub fn with_tid(mut self, tid: Vec<u8>) -> Self {
        self.tid = Some(tid);
        self
    }

    /// Set the antenna.
    pub fn with_antenna(mut self, antenna: u16) -> Self {
        self.antenna = antenna;
        self
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Add an operation result.
    pub fn with_result(mut self, id: impl Into<String>, result: OperationResult) -> Self {
        self.results.insert(id.into(), result);
        self
    }

    /// EPC as upper-case hex.
    pub fn epc_hex(&self) -> Option<String> {
        self.epc
            .as_ref()
            .map(|epc| epc.iter().map(|b| format!("{:02X}", b)).collect())
    }

    /// Apply the effect of a successful operation to the EPC-bank view.
    ///
    /// Returns `true` if the EPC changed.
    ///
    /// ```
    /// use readerlink_core::{Field, MemoryBank, Operation, Tag};
    ///
    /// let mut tag = Tag::new(vec![0x11, 0x11]);
    /// let write = Operation::write("w1", Field::new(MemoryBank::Epc, 32, 16).unwrap(), vec![0x22, 0x22]).unwrap();
    ///
    /// assert!(tag.apply(&write));
    /// assert_eq!(tag.epc, Some(vec![0x22, 0x22]));
    /// ```
    pub fn apply(&mut self, operation: &Operation) -> bool {
        match operation {
            Operation::Write { field, data, .. } if field.bank == MemoryBank::Epc => {
                self.write_epc_bank(field.offset, field.length, data, None)
            }
            _ => false,
        }
    }

    /// Write the data of every matching EPC-bank filter into the view.
    ///
    /// Filters describe the identity a tag had when an operation was
    /// requested, so this restores the pre-operation EPC of a tag reported
    /// after its EPC was rewritten.
    pub fn apply_filter(&mut self, filters: &[Filter]) {
        for filter in filters
            .iter()
            .filter(|f| f.matching && f.bank == MemoryBank::Epc)
        {
            let mask = (!filter.mask.is_empty()).then_some(filter.mask.as_slice());
            self.write_epc_bank(filter.offset, filter.length, &filter.data, mask);
        }
    }

    fn epc_bank(&self) -> Vec<u8> {
        let mut bank = vec![0u8; 2];
        bank.extend(self.pc.unwrap_or(0).to_be_bytes());
        if let Some(epc) = &self.epc {
            bank.extend(epc);
        }
        bank
    }

    fn write_epc_bank(&mut self, offset: u16, length: u16, data: &[u8], mask: Option<&[u8]>) -> bool {
        let before = self.epc.clone();
        let mut bank = self.epc_bank();
        write_bits(&mut bank, offset.into(), length.into(), data, mask);

        let end = u32::from(offset) + u32::from(length);
        let pc_written = u32::from(offset) < u32::from(EPC_BIT_OFFSET)
            && end > u32::from(PC_BIT_OFFSET);
        let epc_start = usize::from(EPC_BIT_OFFSET / 8);

        if pc_written || self.pc.is_some() {
            let pc = u16::from_be_bytes([bank[2], bank[3]]);
            let words = usize::from(pc >> PC_LENGTH_SHIFT);
            let epc_end = epc_start + words * usize::from(WORD_BITS / 8);
            if bank.len() < epc_end {
                bank.resize(epc_end, 0);
            }
            self.pc = Some(pc);
            self.epc = Some(bank[epc_start..epc_end].to_vec());
        } else if bank.len() > epc_start {
            self.epc = Some(bank[epc_start..].to_vec());
        }

        self.epc != before
    }
}

/// Copy `length` bits of `data` (MSB first) to bit `offset` of `target`.
///
/// Bits whose mask bit is zero are left untouched. `target` grows as needed.
pub(crate) fn write_bits(
    target: &mut Vec<u8>,
    offset: usize,
    length: usize,
    data: &[u8],
    mask: Option<&[u8]>,
) {
    let needed = (offset + length).div_ceil(8);
    if target.len() < needed {
        target.resize(needed, 0);
    }

    for i in 0..length {
        if let Some(mask) = mask
            && !bit(mask, i)
        {
            continue;
        }
        let position = offset + i;
        let flag = 0x80u8 >> (position % 8);
        if bit(data, i) {
            target[position / 8] |= flag;
        } else {
            target[position / 8] &= !flag;
        }
    }
}

fn bit(bytes: &[u8], index: usize) -> bool {
    bytes
        .get(index / 8)
        .is_some_and(|b| b & (0x80 >> (index % 8)) != 0)
}
