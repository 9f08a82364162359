use crate::{dynamic::DynamicTag, parse::FileParseError};
use std::io;

/// Hard failures. Problems with the *content* of a well-formed image are not
/// errors; they are reported through a [`crate::DiagnosticBag`] instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Record stream ended early: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },
    #[error("{0}")]
    Parse(#[from] FileParseError),
    #[error("Section {index} grew to {needed} bytes but only {available} are available")]
    SectionOverflow {
        index: usize,
        needed: u64,
        available: u64,
    },
    #[error("Section {index} is at 0x{declared:x} and cannot be moved to 0x{requested:x}")]
    SectionMoved {
        index: usize,
        declared: u64,
        requested: u64,
    },
    #[error("Dynamic entry {0:?} not found")]
    MissingTag(DynamicTag),
}

pub type Result<T> = std::result::Result<T, Error>;
