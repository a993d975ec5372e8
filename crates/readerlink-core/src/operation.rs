//! Tag operations as handed to connectors.
//!
//! A [`TagOperation`] is a batch: a filter selecting the tags to work on and
//! an ordered list of [`Operation`]s executed on every selected tag. Each
//! operation carries an id chosen upstream; results are reported per id.

use crate::constants::{EPC_BIT_OFFSET, PC_BIT_OFFSET, WORD_BITS};
use crate::tag::{MemoryBank, Tag};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A bit range inside one memory bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Memory bank.
    pub bank: MemoryBank,

    /// Offset in bits.
    pub offset: u16,

    /// Length in bits.
    pub length: u16,
}

impl Field {
    /// Create a field.
    ///
    /// # Errors
    ///
    /// Returns an error if `length` is zero or the range exceeds the
    /// addressable 16-bit space.
    ///
    /// # Examples
    ///
    /// ```
    /// use readerlink_core::{Field, MemoryBank};
    ///
    /// let field = Field::new(MemoryBank::User, 0, 32).unwrap();
    /// assert_eq!(field.words(), 2);
    ///
    /// assert!(Field::new(MemoryBank::User, 0, 0).is_err());
    /// ```
    pub fn new(bank: MemoryBank, offset: u16, length: u16) -> Result<Self> {
        if length == 0 || offset.checked_add(length).is_none() {
            return Err(Error::InvalidFieldRange { offset, length });
        }
        Ok(Self {
            bank,
            offset,
            length,
        })
    }

    /// End of the range (exclusive), in bits.
    pub fn end(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.length)
    }

    /// Number of words touched by this field.
    pub fn words(&self) -> u16 {
        self.length.div_ceil(WORD_BITS)
    }

    /// Whether `other` lies entirely inside this field, in the same bank.
    pub fn contains(&self, other: &Field) -> bool {
        self.bank == other.bank && self.offset <= other.offset && self.end() >= other.end()
    }
}

/// Lock privilege applied by a lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPrivilege {
    Lock,
    Unlock,
    PermaLock,
    PermaUnlock,
}

/// One operation executed on a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Read a field.
    Read { id: String, field: Field },

    /// Write a field.
    Write {
        id: String,
        field: Field,
        data: Vec<u8>,
    },

    /// Kill the tag.
    Kill { id: String, password: u32 },

    /// Lock a memory bank.
    Lock {
        id: String,
        bank: MemoryBank,
        privilege: LockPrivilege,
    },

    /// Set the access password for the following operations.
    Password { id: String, password: u32 },
}

impl Operation {
    /// Create a read operation.
    pub fn read(id: impl Into<String>, field: Field) -> Self {
        Self::Read {
            id: id.into(),
            field,
        }
    }

    /// Create a write operation.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` holds fewer bits than the field length.
    pub fn write(id: impl Into<String>, field: Field, data: Vec<u8>) -> Result<Self> {
        let available = data.len() * 8;
        if available < usize::from(field.length) {
            return Err(Error::FieldDataTooShort {
                length: field.length,
                available,
            });
        }
        Ok(Self::Write {
            id: id.into(),
            field,
            data,
        })
    }

    /// Operation id.
    pub fn id(&self) -> &str {
        match self {
            Self::Read { id, .. }
            | Self::Write { id, .. }
            | Self::Kill { id, .. }
            | Self::Lock { id, .. }
            | Self::Password { id, .. } => id,
        }
    }

    /// The field written by this operation, if it is a write.
    pub fn written_field(&self) -> Option<&Field> {
        match self {
            Self::Write { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Check if this is a write operation.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

/// Tag selection criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Memory bank.
    pub bank: MemoryBank,

    /// Offset in bits.
    pub offset: u16,

    /// Length in bits.
    pub length: u16,

    /// Bit mask, empty meaning all bits.
    pub mask: Vec<u8>,

    /// Expected data.
    pub data: Vec<u8>,

    /// `true` to select matching tags, `false` to select the others.
    pub matching: bool,
}

impl Filter {
    /// Exact match of `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterTooLong`] if `data` does not fit the bank's
    /// 16-bit bit addressing from `offset`.
    pub fn equals(bank: MemoryBank, offset: u16, data: Vec<u8>) -> Result<Self> {
        let length = data
            .len()
            .checked_mul(8)
            .and_then(|bits| u16::try_from(bits).ok())
            .filter(|length| offset.checked_add(*length).is_some())
            .ok_or(Error::FilterTooLong {
                offset,
                bytes: data.len(),
            })?;
        Ok(Self {
            bank,
            offset,
            length,
            mask: Vec::new(),
            data,
            matching: true,
        })
    }

    /// Replace the EPC-bank filters by an exact match on the tag's identity.
    ///
    /// Filters on other banks are kept. When the tag's PC is known the new
    /// filter covers the PC word as well, so the EPC length is restored too.
    ///
    /// ```
    /// use readerlink_core::{Filter, MemoryBank, Tag};
    ///
    /// let original = vec![
    ///     Filter::equals(MemoryBank::Epc, 32, vec![0x11, 0x11]).unwrap(),
    ///     Filter::equals(MemoryBank::Tid, 0, vec![0xE2]).unwrap(),
    /// ];
    /// let rebased = Filter::rebase_on_epc(&original, &Tag::new(vec![0x22, 0x22]));
    ///
    /// assert_eq!(rebased.len(), 2);
    /// assert_eq!(rebased[0].bank, MemoryBank::Tid);
    /// assert_eq!(rebased[1].data, vec![0x08, 0x00, 0x22, 0x22]);
    /// ```
    pub fn rebase_on_epc(filters: &[Filter], tag: &Tag) -> Vec<Filter> {
        let mut rebased: Vec<Filter> = filters
            .iter()
            .filter(|f| f.bank != MemoryBank::Epc)
            .cloned()
            .collect();

        if let Some(epc) = &tag.epc {
            let identity = match tag.pc {
                Some(pc) => {
                    let mut data = pc.to_be_bytes().to_vec();
                    data.extend(epc);
                    Filter::equals(MemoryBank::Epc, PC_BIT_OFFSET, data)
                }
                None => Filter::equals(MemoryBank::Epc, EPC_BIT_OFFSET, epc.clone()),
            };
            match identity {
                Ok(identity) => rebased.push(identity),
                // EPC beyond the bank's addressing, keep the original selection
                Err(_) => rebased.extend(
                    filters
                        .iter()
                        .filter(|f| f.bank == MemoryBank::Epc)
                        .cloned(),
                ),
            }
        }
        rebased
    }
}

/// A batch of operations for the tags selected by a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOperation {
    /// Selection filter.
    pub filter: Vec<Filter>,

    /// Operations, executed in order.
    pub operations: Vec<Operation>,
}

impl TagOperation {
    /// Create a tag operation.
    pub fn new(filter: Vec<Filter>, operations: Vec<Operation>) -> Self {
        Self { filter, operations }
    }

    /// Ids of all operations, in order.
    pub fn operation_ids(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(Operation::id)
    }
}
