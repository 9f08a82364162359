//! The dynamic linking table (`.dynamic`): the ordered tag/value list a
//! runtime loader walks to find dependencies, relocations and init/fini
//! hooks.

use crate::{
    codec::{FieldReader, FieldWriter, FileClass, Layout},
    diagnostics::DiagnosticBag,
    file::{SectionFlag, SectionType},
    section::{EntrySize, EntrySizeState, Record, SectionBase},
    Error,
};
use derive_try_from_primitive::TryFromPrimitive;
use enumflags2::BitFlags;
use std::{
    convert::TryFrom,
    fmt,
    io::{Read, Seek, Write},
};

/// Well-known dynamic tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(i64)]
pub enum DynamicTag {
    Null = 0,
    Needed = 1,
    PltRelSz = 2,
    PltGot = 3,
    Hash = 4,
    StrTab = 5,
    SymTab = 6,
    Rela = 7,
    RelaSz = 8,
    RelaEnt = 9,
    StrSz = 10,
    SymEnt = 11,
    Init = 12,
    Fini = 13,
    SoName = 14,
    RPath = 15,
    Symbolic = 16,
    Rel = 17,
    RelSz = 18,
    RelEnt = 19,
    PltRel = 20,
    Debug = 21,
    TextRel = 22,
    JmpRel = 23,
    BindNow = 24,
    InitArray = 25,
    FiniArray = 26,
    InitArraySz = 27,
    FiniArraySz = 28,
    RunPath = 29,
    Flags = 30,
    PreInitArray = 32,
    PreInitArraySz = 33,
}

impl DynamicTag {
    /// `DT_ENCODING` shares its number with `DT_PREINIT_ARRAY`. Above it,
    /// even tags hold pointers and odd tags hold plain values.
    pub const ENCODING: DynamicTag = DynamicTag::PreInitArray;

    /// First tag reserved for OS-specific semantics (`DT_LOOS`).
    pub const LO_OS: i64 = 0x6000_000d;
    /// Last tag reserved for OS-specific semantics (`DT_HIOS`).
    pub const HI_OS: i64 = 0x6fff_f000;
    /// First tag reserved for processor-specific semantics (`DT_LOPROC`).
    pub const LO_PROC: i64 = 0x7000_0000;
    /// Last tag reserved for processor-specific semantics (`DT_HIPROC`).
    pub const HI_PROC: i64 = 0x7fff_ffff;

    /// Tags whose value is an offset into the dynamic string table.
    pub fn is_string(self) -> bool {
        matches!(
            self,
            Self::Needed | Self::SoName | Self::RPath | Self::RunPath
        )
    }
}

/// How a raw tag number reads. Every variant keeps the number it was made
/// from, so [`TagType::raw`] always gives back the exact on-disk value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    Known(DynamicTag),
    /// From `DT_LOOS` up to `DT_LOPROC`. GNU puts its version and hash tags
    /// above `DT_HIOS`, so the gap between `DT_HIOS` and `DT_LOPROC` counts
    /// as OS-specific too.
    OsSpecific(i64),
    ProcessorSpecific(i64),
    Unknown(i64),
}

impl TagType {
    pub fn from_raw(raw: i64) -> Self {
        if let Ok(tag) = DynamicTag::try_from(raw) {
            return Self::Known(tag);
        }

        match raw {
            x if (DynamicTag::LO_OS..DynamicTag::LO_PROC).contains(&x) => Self::OsSpecific(x),
            x if (DynamicTag::LO_PROC..=DynamicTag::HI_PROC).contains(&x) => {
                Self::ProcessorSpecific(x)
            }
            x => Self::Unknown(x),
        }
    }

    pub fn raw(self) -> i64 {
        match self {
            Self::Known(tag) => tag as i64,
            Self::OsSpecific(x) | Self::ProcessorSpecific(x) | Self::Unknown(x) => x,
        }
    }

    pub fn known(self) -> Option<DynamicTag> {
        match self {
            Self::Known(tag) => Some(tag),
            _ => None,
        }
    }
}

impl From<DynamicTag> for TagType {
    fn from(tag: DynamicTag) -> Self {
        Self::Known(tag)
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(tag) => fmt::Debug::fmt(tag, f),
            Self::OsSpecific(x) => write!(f, "Os(0x{:x})", x),
            Self::ProcessorSpecific(x) => write!(f, "Proc(0x{:x})", x),
            Self::Unknown(x) => write!(f, "Unknown({})", x),
        }
    }
}

/// Bits of the `DT_FLAGS` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitFlags)]
#[repr(u64)]
pub enum DynamicFlag {
    Origin = 0x1,
    Symbolic = 0x2,
    TextRel = 0x4,
    BindNow = 0x8,
    StaticTls = 0x10,
}

/// One `Elf32_Dyn` / `Elf64_Dyn` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicEntry {
    pub tag: i64,
    pub value: u64,
}

impl DynamicEntry {
    pub fn new(tag: DynamicTag, value: u64) -> Self {
        Self {
            tag: tag as i64,
            value,
        }
    }

    pub fn from_raw(tag: i64, value: u64) -> Self {
        Self { tag, value }
    }

    /// The value read as an address (`d_ptr`).
    pub fn pointer(&self) -> u64 {
        self.value
    }

    pub fn tag_type(&self) -> TagType {
        TagType::from_raw(self.tag)
    }

    pub fn is(&self, tag: DynamicTag) -> bool {
        self.tag == tag as i64
    }

    /// For a `DT_FLAGS` entry, the flag bits it sets. Bits with no known
    /// meaning are left out of the view but kept in `value`.
    pub fn flags(&self) -> Option<BitFlags<DynamicFlag>> {
        if self.is(DynamicTag::Flags) {
            Some(BitFlags::from_bits_truncate(self.value))
        } else {
            None
        }
    }
}

impl Record for DynamicEntry {
    const NAME: &'static str = "dynamic";

    fn native_size(class: FileClass) -> u64 {
        2 * class.word_size() as u64
    }

    fn decode(layout: &Layout, raw: &[u8]) -> Self {
        let mut fields = FieldReader::new(layout, raw);
        let tag = fields.sword();
        let value = fields.word();
        Self { tag, value }
    }

    fn encode(&self, layout: &Layout, raw: &mut [u8]) {
        let mut fields = FieldWriter::new(layout, raw);
        fields.sword(self.tag);
        fields.word(self.value);
    }
}

/// The dynamic linking table of one section.
///
/// Entries keep their on-disk order, duplicates included, and the entry
/// count is always derived from the section size: a `DT_NULL` entry does not
/// end the table.
#[derive(Debug, Default, Clone)]
pub struct DynamicTable {
    section: SectionBase,
    entries: Vec<DynamicEntry>,
    stream: Vec<u8>,
}

impl DynamicTable {
    /// Name of a dynamic section created from scratch.
    pub const SECTION_NAME: &'static str = ".dynamic";
    /// Type of every section holding a dynamic table.
    pub const SECTION_TYPE: SectionType = SectionType::Dynamic;

    /// Flags of a dynamic section created from scratch: the table is loaded
    /// and the loader writes to it.
    pub fn section_flags() -> BitFlags<SectionFlag> {
        SectionFlag::Alloc | SectionFlag::Write
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// A table covering `size` bytes at file offset `offset`.
    pub fn at(offset: u64, size: u64) -> Self {
        Self {
            section: SectionBase::new(offset, size),
            ..Self::default()
        }
    }

    pub fn section(&self) -> &SectionBase {
        &self.section
    }

    pub fn offset(&self) -> u64 {
        self.section.offset()
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.section.set_offset(offset);
    }

    pub fn size(&self) -> u64 {
        self.section.size()
    }

    pub fn entry_size(&self) -> EntrySize {
        self.section.entry_size()
    }

    pub fn state(&self) -> EntrySizeState {
        self.section.state()
    }

    /// Binds the table to its container's layout.
    pub fn bind(&mut self, layout: Layout) {
        self.section.bind::<DynamicEntry>(layout);
        if !self.entries.is_empty() {
            self.update_size();
        }
    }

    /// Binds the table and reconciles the entry size the container declared
    /// for it (`sh_entsize`). See [`SectionBase::negotiate`].
    pub fn initialize_entry_size(
        &mut self,
        layout: Layout,
        declared: u64,
        diagnostics: &mut DiagnosticBag,
    ) {
        self.section
            .negotiate::<DynamicEntry>(layout, declared, diagnostics);
    }

    /// Replaces every entry with the records found at the table's offset.
    ///
    /// # Panics
    ///
    /// Panics if the table was never bound.
    pub fn read<R: Read + Seek>(&mut self, stream: &mut R) -> crate::Result<()> {
        self.entries.clear();
        self.entries = self.section.read_records(stream)?;
        Ok(())
    }

    /// Encodes every entry, in order, at the stream's current position.
    ///
    /// # Panics
    ///
    /// Panics if the table was never bound.
    pub fn write<W: Write>(&mut self, stream: &mut W) -> crate::Result<()> {
        self.section.write_records(stream, &self.entries)
    }

    /// The raw content most recently given to [`DynamicTable::set_stream`].
    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    /// Sets the table's backing content. The section size becomes the
    /// content's length; nothing is decoded until
    /// [`DynamicTable::read_stream`].
    pub fn set_stream(&mut self, stream: Vec<u8>) {
        self.section.set_size(stream.len() as u64);
        self.stream = stream;
    }

    /// Replaces every entry with the records decoded from the backing
    /// content, which starts at the table's first record.
    ///
    /// # Panics
    ///
    /// Panics if the table was never bound.
    pub fn read_stream(&mut self) -> crate::Result<()> {
        let mut content = std::io::Cursor::new(&self.stream[..]);
        let offset = self.section.offset();

        self.section.set_offset(0);
        let records = self.section.read_records(&mut content);
        self.section.set_offset(offset);

        self.entries = records?;
        Ok(())
    }

    pub fn entries(&self) -> &[DynamicEntry] {
        &self.entries
    }

    /// Entries for in-place edits. The count cannot change through this
    /// view, so the section size stays valid.
    pub fn entries_mut(&mut self) -> &mut [DynamicEntry] {
        &mut self.entries
    }

    /// Replaces every entry and resizes the section to match.
    pub fn set_entries(&mut self, entries: Vec<DynamicEntry>) {
        self.entries = entries;
        self.update_size();
    }

    pub fn push(&mut self, entry: DynamicEntry) {
        self.entries.push(entry);
        self.update_size();
    }

    /// Removes and returns the entry at `index`, resizing the section.
    pub fn remove(&mut self, index: usize) -> DynamicEntry {
        let entry = self.entries.remove(index);
        self.update_size();
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update_size(&mut self) {
        self.section.resize_for::<DynamicEntry>(self.entries.len());
    }

    /// Returns an iterator over the values of every entry with `tag`.
    pub fn values(&self, tag: DynamicTag) -> impl Iterator<Item = u64> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.is(tag))
            .map(|e| e.value)
    }

    /// The value of the first entry with `tag`.
    pub fn value(&self, tag: DynamicTag) -> Option<u64> {
        self.values(tag).next()
    }

    /// Like [`DynamicTable::value`], but a missing tag is an error.
    pub fn get(&self, tag: DynamicTag) -> crate::Result<u64> {
        self.value(tag).ok_or(Error::MissingTag(tag))
    }
}
