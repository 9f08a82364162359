//! A minimal ELF container: just enough of the file header and section
//! header table to locate the dynamic sections, bind them to the file's
//! layout, and write them back.

use crate::{
    codec::{ByteOrder, FieldReader, FieldWriter, FileClass, Layout},
    diagnostics::{DiagnosticBag, DiagnosticId},
    dynamic::{DynamicEntry, DynamicTable, DynamicTag},
    parse::{self, FileParseError},
    section::{EntrySizeState, Record, SectionBase},
    Error,
};
use derive_try_from_primitive::TryFromPrimitive;
use enumflags2::BitFlags;
use std::{
    convert::TryFrom,
    io::{Cursor, Seek, SeekFrom},
    ops::Range,
};

/// Magic bytes expected at the start of every ELF image: `0x7f`, `'E'`,
/// `'L'`, `'F'`.
const MAGIC: &[u8] = &[0x7f, 0x45, 0x4c, 0x46];

/// Size of `e_ident`.
const IDENT_SIZE: usize = 16;

/// Parses `e_ident` down to the layout the rest of the file uses.
fn parse_ident(i: parse::Input) -> parse::Result<Layout> {
    use nom::{
        bytes::complete::{tag, take},
        combinator::verify,
        error::context,
        number::complete::le_u8,
        sequence::tuple,
    };

    let (i, (_magic, class, order, _version, _os_abi, _padding)) = tuple((
        context("Magic", tag(MAGIC)),
        context("Class", FileClass::parse),
        context("Endianness", ByteOrder::parse),
        context("Version", verify(le_u8, |&x: &u8| x == 1)),
        context("OS ABI", le_u8),
        context("Padding", take(8_usize)),
    ))(i)?;

    Ok((i, Layout::new(class, order)))
}

/// The fields of the file header that follow `e_ident`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub typ: u16,
    pub machine: u16,
    pub version: u32,
    pub entry_point: u64,
    pub ph_offset: u64,
    pub sh_offset: u64,
    pub flags: u32,
    pub hdr_size: u16,
    pub ph_entsize: u16,
    pub ph_count: u16,
    pub sh_entsize: u16,
    pub sh_count: u16,
    pub sh_nidx: u16,
}

impl FileHeader {
    /// Serialized size of the whole file header, `e_ident` included.
    pub fn size(class: FileClass) -> usize {
        IDENT_SIZE + 24 + 3 * class.word_size()
    }

    fn decode(layout: &Layout, raw: &[u8]) -> Self {
        let mut f = FieldReader::new(layout, raw);
        Self {
            typ: f.u16(),
            machine: f.u16(),
            version: f.u32(),
            entry_point: f.word(),
            ph_offset: f.word(),
            sh_offset: f.word(),
            flags: f.u32(),
            hdr_size: f.u16(),
            ph_entsize: f.u16(),
            ph_count: f.u16(),
            sh_entsize: f.u16(),
            sh_count: f.u16(),
            sh_nidx: f.u16(),
        }
    }

    /// Encodes the header after `e_ident`.
    pub fn encode(&self, layout: &Layout, raw: &mut [u8]) {
        let mut f = FieldWriter::new(layout, raw);
        f.u16(self.typ);
        f.u16(self.machine);
        f.u32(self.version);
        f.word(self.entry_point);
        f.word(self.ph_offset);
        f.word(self.sh_offset);
        f.u32(self.flags);
        f.u16(self.hdr_size);
        f.u16(self.ph_entsize);
        f.u16(self.ph_count);
        f.u16(self.sh_entsize);
        f.u16(self.sh_count);
        f.u16(self.sh_nidx);
    }
}

/// The type of an ELF section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum SectionType {
    Null = 0,
    ProgBits = 1,
    SymTab = 2,
    StrTab = 3,
    Rela = 4,
    Hash = 5,
    Dynamic = 6,
    Note = 7,
    NoBits = 8,
    Rel = 9,
    ShLib = 10,
    DynSym = 11,
    InitArray = 14,
    FiniArray = 15,
    PreinitArray = 16,
    Group = 17,
    SymTabShndx = 18,
    GnuHash = 0x6fff_fff6,
    GnuVerdef = 0x6fff_fffd,
    GnuVerneed = 0x6fff_fffe,
    GnuVersym = 0x6fff_ffff,
}

/// Bits of `sh_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitFlags)]
#[repr(u64)]
pub enum SectionFlag {
    Write = 0x1,
    Alloc = 0x2,
    ExecInstr = 0x4,
    Merge = 0x10,
    Strings = 0x20,
    InfoLink = 0x40,
    LinkOrder = 0x80,
    OsNonConforming = 0x100,
    Group = 0x200,
    Tls = 0x400,
}

/// An ELF section header. `typ` stays numeric so that vendor section types
/// survive a rewrite; see [`SectionHeader::section_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Offset of the section's name in the section name string table.
    pub name: u32,
    pub typ: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl SectionHeader {
    pub fn section_type(&self) -> Option<SectionType> {
        SectionType::try_from(self.typ).ok()
    }

    /// Flag bits of the section. Unknown bits stay in `flags`.
    pub fn section_flags(&self) -> BitFlags<SectionFlag> {
        BitFlags::from_bits_truncate(self.flags)
    }

    /// File range where the section is stored, or `None` if its end does
    /// not fit in 64 bits.
    pub fn file_range(&self) -> Option<Range<u64>> {
        let end = self.offset.checked_add(self.size)?;
        Some(self.offset..end)
    }
}

impl Record for SectionHeader {
    const NAME: &'static str = "section header";

    fn native_size(class: FileClass) -> u64 {
        16 + 6 * class.word_size() as u64
    }

    fn decode(layout: &Layout, raw: &[u8]) -> Self {
        let mut f = FieldReader::new(layout, raw);
        Self {
            name: f.u32(),
            typ: f.u32(),
            flags: f.word(),
            addr: f.word(),
            offset: f.word(),
            size: f.word(),
            link: f.u32(),
            info: f.u32(),
            addralign: f.word(),
            entsize: f.word(),
        }
    }

    fn encode(&self, layout: &Layout, raw: &mut [u8]) {
        let mut f = FieldWriter::new(layout, raw);
        f.u32(self.name);
        f.u32(self.typ);
        f.word(self.flags);
        f.word(self.addr);
        f.word(self.offset);
        f.word(self.size);
        f.u32(self.link);
        f.u32(self.info);
        f.word(self.addralign);
        f.word(self.entsize);
    }
}

/// A dynamic table together with the section it was read from.
#[derive(Debug, Clone)]
pub struct DynamicSection {
    /// Index of the section in the section header table.
    pub index: usize,
    pub table: DynamicTable,
    /// Bytes available to the table in the image, as originally declared.
    extent: u64,
}

/// An ELF image whose dynamic sections have been decoded.
#[derive(Debug)]
pub struct ElfFile {
    image: Vec<u8>,
    layout: Layout,
    header: FileHeader,
    section_headers: Vec<SectionHeader>,
    dynamic: Vec<DynamicSection>,
}

impl ElfFile {
    /// Parses an ELF image.
    ///
    /// Only an unreadable file header is an error. Problems with individual
    /// sections are collected in the returned [`DiagnosticBag`], in the order
    /// they were found, and the affected section is skipped.
    pub fn parse(image: Vec<u8>) -> crate::Result<(Self, DiagnosticBag)> {
        let layout = match parse_ident(&image) {
            Ok((_, layout)) => layout,
            Err(e) => return Err(FileParseError::from_nom(&image, e).into()),
        };

        let hdr_size = FileHeader::size(layout.class);
        if image.len() < hdr_size {
            return Err(FileParseError::message(format!(
                "File header needs {} bytes, image has {}",
                hdr_size,
                image.len()
            ))
            .into());
        }
        let header = FileHeader::decode(&layout, &image[IDENT_SIZE..hdr_size]);
        log::debug!("parsed {} file header: {:?}", layout, header);

        let mut diagnostics = DiagnosticBag::new();
        let section_headers = read_section_headers(&image, &layout, &header, &mut diagnostics)?;

        let mut file = Self {
            image,
            layout,
            header,
            section_headers,
            dynamic: Vec::new(),
        };
        file.read_dynamic_sections(&mut diagnostics);

        Ok((file, diagnostics))
    }

    fn read_dynamic_sections(&mut self, diagnostics: &mut DiagnosticBag) {
        let mut stream = Cursor::new(&self.image[..]);

        for (index, sh) in self.section_headers.iter().enumerate() {
            if sh.section_type() != Some(DynamicTable::SECTION_TYPE) {
                continue;
            }

            if !fits(sh.offset, sh.size, self.image.len()) {
                diagnostics.error(
                    DiagnosticId::InvalidSectionRange,
                    format!(
                        "Section {} spans 0x{:x}+0x{:x}, past the end of the image (0x{:x} bytes)",
                        index,
                        sh.offset,
                        sh.size,
                        self.image.len()
                    ),
                );
                continue;
            }

            let linked = self.section_headers.get(sh.link as usize);
            if linked.and_then(SectionHeader::section_type) != Some(SectionType::StrTab) {
                diagnostics.warning(
                    DiagnosticId::InvalidStringTable,
                    format!(
                        "Dynamic section {} links to section {}, which is not a string table",
                        index, sh.link
                    ),
                );
            }

            let mut table = DynamicTable::at(sh.offset, sh.size);
            table.initialize_entry_size(self.layout, sh.entsize, diagnostics);
            if let Err(e) = table.read(&mut stream) {
                diagnostics.error(
                    DiagnosticId::SectionReadFailure,
                    format!("Could not read dynamic section {}: {}", index, e),
                );
                continue;
            }

            self.dynamic.push(DynamicSection {
                index,
                table,
                extent: sh.size,
            });
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.section_headers
    }

    /// The original image bytes.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn dynamic_tables(&self) -> &[DynamicSection] {
        &self.dynamic
    }

    /// Dynamic tables for editing. Edits take effect on the next
    /// [`ElfFile::write`].
    pub fn dynamic_tables_mut(&mut self) -> &mut [DynamicSection] {
        &mut self.dynamic
    }

    /// Returns a slice of the image corresponding to the given section, or
    /// `None` if the section does not fit in the image.
    pub fn section_slice(&self, section: &SectionHeader) -> Option<&[u8]> {
        let range = section.file_range()?;
        let start = usize::try_from(range.start).ok()?;
        let end = usize::try_from(range.end).ok()?;
        self.image.get(start..end)
    }

    /// Returns the null-terminated string at `offset` in the string table
    /// held by section `index`.
    pub fn string_at(&self, index: usize, offset: u64) -> Option<&[u8]> {
        let section = self.section_headers.get(index)?;
        let offset = usize::try_from(offset).ok()?;
        let slice = self.section_slice(section)?.get(offset..)?;
        slice.split(|&c| c == 0).next()
    }

    /// Name of the section at `index`, from the section name string table.
    pub fn section_name(&self, index: usize) -> Option<&[u8]> {
        let section = self.section_headers.get(index)?;
        self.string_at(self.header.sh_nidx as usize, u64::from(section.name))
    }

    /// Returns an iterator over the strings that the `tag` entries of a
    /// dynamic table point to, resolved through the string table the
    /// dynamic section links to. Unresolvable offsets yield an empty slice.
    pub fn dynamic_entry_strings<'a>(
        &'a self,
        dynamic: &'a DynamicSection,
        tag: DynamicTag,
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        let strtab = self
            .section_headers
            .get(dynamic.index)
            .map(|sh| sh.link as usize);

        dynamic.table.values(tag).map(move |offset| {
            strtab
                .and_then(|index| self.string_at(index, offset))
                .unwrap_or_default()
        })
    }

    /// Re-encodes every dynamic table into a copy of the image and updates
    /// each one's `sh_size` and `sh_entsize`. Nothing else in the image is
    /// touched; bytes a shrunken table no longer covers are zeroed.
    ///
    /// Sections are never relocated: a table that outgrew its section, or
    /// whose offset was changed, is an error and nothing is written.
    pub fn write(&mut self) -> crate::Result<Vec<u8>> {
        let layout = self.layout;
        let sh_offset = self.header.sh_offset;
        let sh_entsize = u64::from(self.header.sh_entsize);
        let sh_native = SectionHeader::native_size(layout.class) as usize;

        for dynamic in self.dynamic.iter().filter(|d| is_decoded(&d.table)) {
            let declared = self.section_headers[dynamic.index].offset;
            if dynamic.table.offset() != declared {
                return Err(Error::SectionMoved {
                    index: dynamic.index,
                    declared,
                    requested: dynamic.table.offset(),
                });
            }

            let needed = dynamic.table.len() as u64 * DynamicEntry::native_size(layout.class);
            if needed > dynamic.extent {
                return Err(Error::SectionOverflow {
                    index: dynamic.index,
                    needed,
                    available: dynamic.extent,
                });
            }
        }

        let mut image = self.image.clone();
        // Undecoded tables keep their original bytes.
        for dynamic in self.dynamic.iter_mut().filter(|d| is_decoded(&d.table)) {
            let offset = dynamic.table.offset();
            let mut stream = Cursor::new(&mut image);
            stream.seek(SeekFrom::Start(offset))?;
            dynamic.table.write(&mut stream)?;

            let written = dynamic.table.size();
            let tail = (offset + written) as usize..(offset + dynamic.extent) as usize;
            for b in &mut image[tail] {
                *b = 0;
            }

            let sh = &mut self.section_headers[dynamic.index];
            sh.size = written;
            sh.entsize = dynamic.table.entry_size().total();
            let start = (sh_offset + dynamic.index as u64 * sh_entsize) as usize;
            sh.encode(&layout, &mut image[start..start + sh_native]);
        }

        Ok(image)
    }
}

fn is_decoded(table: &DynamicTable) -> bool {
    !matches!(table.state(), EntrySizeState::Invalid { .. })
}

/// Whether `size` bytes at `offset` lie inside an image of `len` bytes.
fn fits(offset: u64, size: u64, len: usize) -> bool {
    offset
        .checked_add(size)
        .map_or(false, |end| end <= len as u64)
}

/// Reads the section header table. A header table that does not fit in the
/// image, or whose entries are too small, yields no sections.
fn read_section_headers(
    image: &[u8],
    layout: &Layout,
    header: &FileHeader,
    diagnostics: &mut DiagnosticBag,
) -> crate::Result<Vec<SectionHeader>> {
    if header.sh_count == 0 {
        return Ok(Vec::new());
    }

    let size = u64::from(header.sh_count) * u64::from(header.sh_entsize);
    if !fits(header.sh_offset, size, image.len()) {
        diagnostics.error(
            DiagnosticId::InvalidSectionRange,
            format!(
                "Section header table spans 0x{:x}+0x{:x}, past the end of the image (0x{:x} bytes)",
                header.sh_offset,
                size,
                image.len()
            ),
        );
        return Ok(Vec::new());
    }

    let mut table = SectionBase::new(header.sh_offset, size);
    table.negotiate::<SectionHeader>(*layout, u64::from(header.sh_entsize), diagnostics);
    table.read_records(&mut Cursor::new(image))
}
