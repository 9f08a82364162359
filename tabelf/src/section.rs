//! State shared by every fixed-stride record table: where it lives in the
//! image, which container layout it is bound to, and the per-record size
//! negotiated between what the container declares and what the table kind
//! natively uses.

use crate::{
    batch::{BatchReader, BatchWriter, BATCH_BYTES},
    codec::{FileClass, Layout},
    diagnostics::{DiagnosticBag, DiagnosticId},
    Result,
};
use std::io::{Read, Seek, SeekFrom, Write};

/// A record kind that can live in a table. The layout is written once;
/// field widths follow the [`Layout`] the table is bound to.
pub trait Record: Sized {
    /// Human-readable name of the record kind, used in diagnostics.
    const NAME: &'static str;

    /// Size in bytes of one record in its native layout for `class`.
    fn native_size(class: FileClass) -> u64;

    /// Decodes a record from exactly `native_size` bytes.
    fn decode(layout: &Layout, raw: &[u8]) -> Self;

    /// Encodes a record into exactly `native_size` bytes.
    fn encode(&self, layout: &Layout, raw: &mut [u8]);
}

/// The per-record stride of a table: the modeled part plus any trailing
/// bytes the container declared that are consumed but not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntrySize {
    pub base: u64,
    pub additional: u64,
}

impl EntrySize {
    pub fn total(&self) -> u64 {
        self.base + self.additional
    }
}

/// Where a table is in reconciling its declared entry size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySizeState {
    /// No container layout yet.
    Unbound,
    /// Native size known, declared size not checked.
    Bound,
    /// Declared size accepted; records can be decoded.
    Resolved,
    /// Declared size is smaller than a native record; nothing is decoded.
    Invalid { declared: u64, expected: u64 },
}

#[derive(Debug, Clone)]
pub struct SectionBase {
    offset: u64,
    size: u64,
    layout: Option<Layout>,
    entry_size: EntrySize,
    state: EntrySizeState,
}

impl Default for SectionBase {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl SectionBase {
    pub fn new(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            layout: None,
            entry_size: EntrySize::default(),
            state: EntrySizeState::Unbound,
        }
    }

    /// File offset of the first record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Size in bytes of the whole table.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn layout(&self) -> Option<Layout> {
        self.layout
    }

    pub fn entry_size(&self) -> EntrySize {
        self.entry_size
    }

    pub fn state(&self) -> EntrySizeState {
        self.state
    }

    /// Binds the table to its container's layout. The native record size of
    /// `T` becomes the entry size until a declared size is negotiated.
    pub fn bind<T: Record>(&mut self, layout: Layout) {
        self.layout = Some(layout);
        self.entry_size = EntrySize {
            base: T::native_size(layout.class),
            additional: 0,
        };
        self.state = EntrySizeState::Bound;
    }

    /// Binds to `layout` and reconciles the container's `declared` entry
    /// size against the native one. A declared size that is too small is
    /// reported to `diagnostics` and leaves the table undecodable; a larger
    /// one is accepted and its surplus skipped on every record.
    pub fn negotiate<T: Record>(
        &mut self,
        layout: Layout,
        declared: u64,
        diagnostics: &mut DiagnosticBag,
    ) {
        self.bind::<T>(layout);
        let native = self.entry_size.base;

        if declared < native {
            diagnostics.error(
                DiagnosticId::InvalidSectionEntrySize,
                format!(
                    "Invalid size [{}] for {} entry. Expecting [{}] bytes for {}.",
                    declared, T::NAME, native, layout.class
                ),
            );
            self.state = EntrySizeState::Invalid {
                declared,
                expected: native,
            };
            return;
        }

        self.entry_size.additional = declared - native;
        self.state = EntrySizeState::Resolved;
        log::debug!(
            "{} entries: {} bytes each ({} native, {} skipped)",
            T::NAME,
            declared,
            native,
            self.entry_size.additional
        );
    }

    fn expect_layout(&self) -> Layout {
        match self.layout {
            Some(layout) => layout,
            None => panic!("table must be bound to a container layout before use"),
        }
    }

    /// Number of whole records covered by the table's size. A trailing
    /// partial record is not counted.
    pub fn entry_count(&self) -> u64 {
        match self.state {
            EntrySizeState::Unbound | EntrySizeState::Invalid { .. } => 0,
            EntrySizeState::Bound | EntrySizeState::Resolved => {
                self.size / self.entry_size.total()
            }
        }
    }

    /// Seeks to the table and decodes every whole record in it, in order.
    /// Afterwards `size` covers exactly the decoded records.
    ///
    /// # Panics
    ///
    /// Panics if the table was never bound.
    pub fn read_records<T, R>(&mut self, stream: &mut R) -> Result<Vec<T>>
    where
        T: Record,
        R: Read + Seek,
    {
        let layout = self.expect_layout();
        if let EntrySizeState::Invalid { .. } = self.state {
            return Ok(Vec::new());
        }

        // The count comes from declared sizes, so it only bounds the read; the
        // stream decides how many records actually arrive.
        let count = self.entry_count() as usize;
        let base = self.entry_size.base as usize;

        stream.seek(SeekFrom::Start(self.offset))?;
        let mut records = Vec::with_capacity(count.min(BATCH_BYTES));
        let mut batch = BatchReader::skipping(
            stream,
            base,
            self.entry_size.additional,
            count,
            BATCH_BYTES,
        );
        while batch.has_next() {
            let raw = batch.read_next()?;
            records.push(T::decode(&layout, raw));
        }

        self.size = count as u64 * self.entry_size.total();
        log::debug!(
            "read {} {} entries at 0x{:x}",
            records.len(),
            T::NAME,
            self.offset
        );
        Ok(records)
    }

    /// Encodes `records`, in order, at the native stride to the stream's
    /// current position. The table's entry size and size are reset to match
    /// what was written.
    ///
    /// # Panics
    ///
    /// Panics if the table was never bound.
    pub fn write_records<T, W>(&mut self, stream: &mut W, records: &[T]) -> Result<()>
    where
        T: Record,
        W: Write,
    {
        let layout = self.expect_layout();
        let native = T::native_size(layout.class);

        let mut batch = BatchWriter::new(stream, native as usize, records.len());
        for record in records {
            record.encode(&layout, batch.next_record()?);
        }
        batch.finish()?;

        self.resize_for::<T>(records.len());
        log::debug!("wrote {} {} entries", records.len(), T::NAME);
        Ok(())
    }

    /// Recomputes the size for `count` records at native stride, after the
    /// owning table replaced its content. Does nothing while unbound: the
    /// native size is not known yet.
    pub fn resize_for<T: Record>(&mut self, count: usize) {
        if let Some(layout) = self.layout {
            let native = T::native_size(layout.class);
            self.entry_size = EntrySize {
                base: native,
                additional: 0,
            };
            self.state = EntrySizeState::Resolved;
            self.size = count as u64 * native;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteOrder;
    use std::io::Cursor;

    /// One address-sized word per record.
    #[derive(Debug, PartialEq)]
    struct Word(u64);

    impl Record for Word {
        const NAME: &'static str = "word";

        fn native_size(class: FileClass) -> u64 {
            class.word_size() as u64
        }

        fn decode(layout: &Layout, raw: &[u8]) -> Self {
            Word(layout.decode_word(raw))
        }

        fn encode(&self, layout: &Layout, raw: &mut [u8]) {
            layout.encode_word(self.0, raw)
        }
    }

    const LE32: Layout = Layout::new(FileClass::Is32, ByteOrder::Little);
    const BE64: Layout = Layout::new(FileClass::Is64, ByteOrder::Big);

    #[test]
    fn bind_uses_native_size() {
        let mut section = SectionBase::new(0, 0);
        assert_eq!(section.state(), EntrySizeState::Unbound);

        section.bind::<Word>(BE64);
        assert_eq!(section.state(), EntrySizeState::Bound);
        assert_eq!(section.entry_size(), EntrySize { base: 8, additional: 0 });
        assert_eq!(section.layout(), Some(BE64));
    }

    #[test]
    fn negotiate_exact() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 16);
        section.negotiate::<Word>(LE32, 4, &mut diagnostics);

        assert!(diagnostics.is_empty());
        assert_eq!(section.state(), EntrySizeState::Resolved);
        assert_eq!(section.entry_size(), EntrySize { base: 4, additional: 0 });
        assert_eq!(section.entry_count(), 4);
    }

    #[test]
    fn negotiate_larger_is_tolerated() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 24);
        section.negotiate::<Word>(LE32, 6, &mut diagnostics);

        assert!(diagnostics.is_empty());
        assert_eq!(section.entry_size(), EntrySize { base: 4, additional: 2 });
        assert_eq!(section.entry_count(), 4);
    }

    #[test]
    fn negotiate_smaller_is_reported() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 24);
        section.negotiate::<Word>(BE64, 4, &mut diagnostics);

        assert_eq!(
            section.state(),
            EntrySizeState::Invalid {
                declared: 4,
                expected: 8
            }
        );
        assert_eq!(section.entry_count(), 0);
        assert_eq!(diagnostics.len(), 1);

        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.id, DiagnosticId::InvalidSectionEntrySize);
        assert!(diagnostic.message.contains("[4]"));
        assert!(diagnostic.message.contains("[8]"));
    }

    #[test]
    fn read_skips_surplus_and_partial_records() {
        // Two leading bytes of padding, then three 6-byte records holding a
        // 4-byte word each, then half a record.
        let mut image = vec![0xee, 0xee];
        for word in &[1u32, 2, 3] {
            image.extend_from_slice(&word.to_le_bytes());
            image.extend_from_slice(&[0xff, 0xff]);
        }
        image.extend_from_slice(&[0x55; 3]);

        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(2, 21);
        section.negotiate::<Word>(LE32, 6, &mut diagnostics);

        let words: Vec<Word> = section.read_records(&mut Cursor::new(image)).unwrap();
        assert_eq!(words, [Word(1), Word(2), Word(3)]);
        assert_eq!(section.size(), 18);
    }

    #[test]
    fn invalid_reads_nothing() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 16);
        section.negotiate::<Word>(BE64, 2, &mut diagnostics);

        let words: Vec<Word> = section
            .read_records(&mut Cursor::new(vec![0; 16]))
            .unwrap();
        assert!(words.is_empty());
        assert_eq!(section.size(), 16);
    }

    #[test]
    fn huge_declared_entry_size_reads_nothing() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 48);
        section.negotiate::<Word>(BE64, 1 << 62, &mut diagnostics);

        assert!(diagnostics.is_empty());
        assert_eq!(section.entry_count(), 0);
        let words: Vec<Word> = section
            .read_records(&mut Cursor::new(vec![0; 48]))
            .unwrap();
        assert!(words.is_empty());
    }

    #[test]
    fn declared_size_past_the_stream_is_truncated() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 1 << 44);
        section.negotiate::<Word>(BE64, 8, &mut diagnostics);

        let result = section.read_records::<Word, _>(&mut Cursor::new(vec![0; 24]));
        assert!(matches!(result, Err(crate::Error::Truncated { .. })));
    }

    #[test]
    #[should_panic(expected = "must be bound")]
    fn unbound_read_panics() {
        let mut section = SectionBase::new(0, 8);
        let _ = section.read_records::<Word, _>(&mut Cursor::new(vec![0; 8]));
    }

    #[test]
    fn write_resets_to_native() {
        let mut diagnostics = DiagnosticBag::new();
        let mut section = SectionBase::new(0, 30);
        section.negotiate::<Word>(BE64, 10, &mut diagnostics);

        let mut out = Vec::new();
        section
            .write_records(&mut out, &[Word(0x0102), Word(3)])
            .unwrap();

        assert_eq!(out, [0, 0, 0, 0, 0, 0, 1, 2, 0, 0, 0, 0, 0, 0, 0, 3]);
        assert_eq!(section.entry_size(), EntrySize { base: 8, additional: 0 });
        assert_eq!(section.size(), 16);
    }
}
