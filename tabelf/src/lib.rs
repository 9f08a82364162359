//! # `tabelf` - Tables in ELF
//!
//! Reads and writes the fixed-stride record tables stored in ELF sections,
//! for either address class and byte order, reporting malformed content as
//! diagnostics rather than failing the whole parse.

#[macro_use]
pub mod parse;

pub mod batch;
pub mod codec;
pub mod diagnostics;
pub mod dynamic;
mod error;
pub mod file;
pub mod section;

pub use codec::{ByteOrder, FileClass, Layout};
pub use diagnostics::{Diagnostic, DiagnosticBag, DiagnosticId, DiagnosticKind};
pub use dynamic::{DynamicEntry, DynamicFlag, DynamicTable, DynamicTag, TagType};
pub use error::{Error, Result};
pub use file::{DynamicSection, ElfFile, FileHeader, SectionFlag, SectionHeader, SectionType};
pub use section::{EntrySize, EntrySizeState, Record, SectionBase};
