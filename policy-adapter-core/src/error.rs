//! Error types for the core crate

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Too many rule fields: got {0}, at most 6 are stored")]
    TooManyFields(usize),

    #[error("Field index {0} is out of range, positions run 0 to 5")]
    FieldIndexOutOfRange(usize),

    #[error("Rule has an empty policy type")]
    MissingPolicyType,

    #[error("Invalid policy line: {0}")]
    InvalidPolicyLine(String),
}
