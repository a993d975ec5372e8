use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid field range: offset {offset}, length {length} bits")]
    InvalidFieldRange { offset: u16, length: u16 },

    #[error("Field data too short: {length} bits requested, {available} bits supplied")]
    FieldDataTooShort { length: u16, available: usize },

    #[error("Filter of {bytes} bytes does not fit at bit offset {offset}")]
    FilterTooLong { offset: u16, bytes: usize },

    #[error("Unknown memory bank: {0}")]
    UnknownMemoryBank(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
