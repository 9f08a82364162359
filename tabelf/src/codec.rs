//! Scalar field codec: converts on-disk fields to host values according to
//! the container's byte order, and selects field widths from its class.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use derive_more::Display;
use derive_try_from_primitive::TryFromPrimitive;
use std::convert::TryFrom;

/// The address class of an ELF container, as stored in `EI_CLASS`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum FileClass {
    #[display(fmt = "ELF32")]
    Is32 = 1,
    #[display(fmt = "ELF64")]
    Is64 = 2,
}

impl_parse_for_enum!(FileClass, le_u8);

impl FileClass {
    /// Size in bytes of an address-sized field (`Elf32_Addr` / `Elf64_Addr`).
    pub fn word_size(self) -> usize {
        match self {
            Self::Is32 => 4,
            Self::Is64 => 8,
        }
    }
}

/// The byte order of an ELF container, as stored in `EI_DATA`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ByteOrder {
    #[display(fmt = "little-endian")]
    Little = 1,
    #[display(fmt = "big-endian")]
    Big = 2,
}

impl_parse_for_enum!(ByteOrder, le_u8);

/// Generates a `decode_*` / `encode_*` pair on [`ByteOrder`] for each scalar
/// type. Both operate on the leading bytes of the given buffer and panic if
/// it is too short, which is a caller bug: record layouts are sized before
/// any field is touched.
macro_rules! impl_scalar_codec {
    ($($ty: ident => $decode: ident, $encode: ident, $read: ident, $write: ident;)*) => {
        impl ByteOrder {
            $(
                doc_comment::doc_comment! {
                    concat!(
                        "Decodes a `",
                        stringify!($ty),
                        "` from the leading bytes of `raw` in this byte order.",
                    ),
                    pub fn $decode(self, raw: &[u8]) -> $ty {
                        match self {
                            Self::Little => LittleEndian::$read(raw),
                            Self::Big => BigEndian::$read(raw),
                        }
                    }
                }

                doc_comment::doc_comment! {
                    concat!(
                        "Encodes a `",
                        stringify!($ty),
                        "` into the leading bytes of `raw` in this byte order.",
                    ),
                    pub fn $encode(self, value: $ty, raw: &mut [u8]) {
                        match self {
                            Self::Little => LittleEndian::$write(raw, value),
                            Self::Big => BigEndian::$write(raw, value),
                        }
                    }
                }
            )*
        }
    };
}

impl_scalar_codec! {
    u16 => decode_u16, encode_u16, read_u16, write_u16;
    u32 => decode_u32, encode_u32, read_u32, write_u32;
    u64 => decode_u64, encode_u64, read_u64, write_u64;
    i16 => decode_i16, encode_i16, read_i16, write_i16;
    i32 => decode_i32, encode_i32, read_i32, write_i32;
    i64 => decode_i64, encode_i64, read_i64, write_i64;
}

/// The container-wide encoding context: address class plus byte order.
///
/// A `Layout` is fixed once a container has been identified and is handed
/// explicitly to every table bound to that container.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(fmt = "{}, {}", class, order)]
pub struct Layout {
    pub class: FileClass,
    pub order: ByteOrder,
}

impl Layout {
    pub const fn new(class: FileClass, order: ByteOrder) -> Self {
        Self { class, order }
    }

    /// Size in bytes of an address-sized field for this class.
    pub fn word_size(&self) -> usize {
        self.class.word_size()
    }

    /// Decodes an unsigned address-sized field, zero-extended to 64 bits.
    pub fn decode_word(&self, raw: &[u8]) -> u64 {
        match self.class {
            FileClass::Is32 => u64::from(self.order.decode_u32(raw)),
            FileClass::Is64 => self.order.decode_u64(raw),
        }
    }

    /// Decodes a signed address-sized field, sign-extended to 64 bits.
    pub fn decode_sword(&self, raw: &[u8]) -> i64 {
        match self.class {
            FileClass::Is32 => i64::from(self.order.decode_i32(raw)),
            FileClass::Is64 => self.order.decode_i64(raw),
        }
    }

    /// Encodes an unsigned address-sized field. The 32-bit class keeps the
    /// low 32 bits.
    pub fn encode_word(&self, value: u64, raw: &mut [u8]) {
        match self.class {
            FileClass::Is32 => self.order.encode_u32(value as u32, raw),
            FileClass::Is64 => self.order.encode_u64(value, raw),
        }
    }

    /// Encodes a signed address-sized field. The 32-bit class keeps the low
    /// 32 bits.
    pub fn encode_sword(&self, value: i64, raw: &mut [u8]) {
        match self.class {
            FileClass::Is32 => self.order.encode_i32(value as i32, raw),
            FileClass::Is64 => self.order.encode_i64(value, raw),
        }
    }
}

/// Sequential field cursor over a single decoded record.
pub struct FieldReader<'a> {
    layout: Layout,
    raw: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(layout: &Layout, raw: &'a [u8]) -> Self {
        Self {
            layout: *layout,
            raw,
            pos: 0,
        }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let raw: &'a [u8] = self.raw;
        let field = &raw[self.pos..self.pos + len];
        self.pos += len;
        field
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, len: usize) {
        self.take(len);
    }

    pub fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn u16(&mut self) -> u16 {
        let order = self.layout.order;
        order.decode_u16(self.take(2))
    }

    pub fn u32(&mut self) -> u32 {
        let order = self.layout.order;
        order.decode_u32(self.take(4))
    }

    pub fn word(&mut self) -> u64 {
        let layout = self.layout;
        layout.decode_word(self.take(layout.word_size()))
    }

    pub fn sword(&mut self) -> i64 {
        let layout = self.layout;
        layout.decode_sword(self.take(layout.word_size()))
    }
}

/// Sequential field cursor for encoding a single record in place.
pub struct FieldWriter<'a> {
    layout: Layout,
    raw: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(layout: &Layout, raw: &'a mut [u8]) -> Self {
        Self {
            layout: *layout,
            raw,
            pos: 0,
        }
    }

    fn slot(&mut self, len: usize) -> &mut [u8] {
        let start = self.pos;
        self.pos += len;
        &mut self.raw[start..start + len]
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, len: usize) {
        self.slot(len);
    }

    pub fn u8(&mut self, value: u8) {
        self.slot(1)[0] = value;
    }

    pub fn u16(&mut self, value: u16) {
        let order = self.layout.order;
        order.encode_u16(value, self.slot(2));
    }

    pub fn u32(&mut self, value: u32) {
        let order = self.layout.order;
        order.encode_u32(value, self.slot(4));
    }

    pub fn word(&mut self, value: u64) {
        let layout = self.layout;
        layout.encode_word(value, self.slot(layout.word_size()));
    }

    pub fn sword(&mut self, value: i64) {
        let layout = self.layout;
        layout.encode_sword(value, self.slot(layout.word_size()));
    }
}
