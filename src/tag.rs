//! Tag descriptors for S7 memory addressing
//!
//! A [`Tag`] is an immutable, validated description of a PLC memory range:
//! memory area, DB number, data type, byte offset, bit offset and element
//! count. Tags are produced by the address parser or constructed directly,
//! consumed by the planner and codec, and never mutated.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::constants::{TS_BIT, TS_BYTE, TS_CHAR, TS_DWORD, TS_WORD};
use crate::error::{S7Error, S7Result};

/// Addresses above this cannot be packed into the 24-bit item address field
/// (`start * 8 + bit_offset`).
const MAX_START: u32 = (1 << 21) - 1;

/// PLC memory area, carrying its on-wire area code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// Flag memory (M / Merker).
    Merker,
    /// Data blocks, addressed by DB number.
    Db,
    /// Process inputs (I / E).
    Input,
    /// Process outputs (Q / A).
    Output,
    /// S7 counters.
    Counter,
    /// S7 timers.
    Timer,
}

impl MemoryArea {
    /// The single-byte area code used in item specifications.
    pub fn code(self) -> u8 {
        match self {
            MemoryArea::Merker => 0x83,
            MemoryArea::Db => 0x84,
            MemoryArea::Input => 0x81,
            MemoryArea::Output => 0x82,
            MemoryArea::Counter => 0x1C,
            MemoryArea::Timer => 0x1D,
        }
    }
}

/// S7 data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Single bit.
    Bit,
    /// Unsigned 8-bit.
    Byte,
    /// ASCII character.
    Char,
    /// Signed 16-bit.
    Int,
    /// Unsigned 16-bit.
    Word,
    /// Signed 32-bit.
    Dint,
    /// Unsigned 32-bit.
    Dword,
    /// IEEE-754 32-bit float.
    Real,
    /// IEEE-754 64-bit float.
    LReal,
    /// Length-prefixed ASCII string.
    String,
    /// Length-prefixed UTF-16 BE string.
    WString,
}

impl DataType {
    /// Total byte size of `length` elements of this type.
    ///
    /// Single dispatch on the type tag; the compiler lowers this to a jump
    /// table, there is no comparison chain.
    pub fn byte_size(self, length: u16) -> usize {
        let n = length as usize;
        match self {
            DataType::Bit => 1,
            DataType::Byte => n,
            DataType::Char => n,
            DataType::Int => 2 * n,
            DataType::Word => 2 * n,
            DataType::Dint => 4 * n,
            DataType::Dword => 4 * n,
            DataType::Real => 4 * n,
            DataType::LReal => 8 * n,
            DataType::String => n + 2,
            DataType::WString => 2 * n + 4,
        }
    }

    /// Transport size code used in read/write item specifications.
    ///
    /// LREAL, STRING and WSTRING are addressed as byte ranges; their item
    /// element count is the byte size rather than the element count.
    pub fn transport_size(self) -> u8 {
        match self {
            DataType::Bit => TS_BIT,
            DataType::Byte => TS_BYTE,
            DataType::Char => TS_CHAR,
            DataType::Int | DataType::Word => TS_WORD,
            DataType::Dint | DataType::Dword | DataType::Real => TS_DWORD,
            DataType::LReal | DataType::String | DataType::WString => TS_BYTE,
        }
    }

    /// True for STRING and WSTRING.
    pub fn is_string(self) -> bool {
        matches!(self, DataType::String | DataType::WString)
    }

    /// Address-token letter of this type, as accepted by the parser.
    pub fn letter(self) -> &'static str {
        match self {
            DataType::Bit => "X",
            DataType::Byte => "B",
            DataType::Char => "C",
            DataType::Int => "I",
            DataType::Word => "W",
            DataType::Dint => "DI",
            DataType::Dword => "DW",
            DataType::Real => "R",
            DataType::LReal => "LR",
            DataType::String => "S",
            DataType::WString => "WS",
        }
    }
}

/// Immutable descriptor of one PLC memory range.
///
/// Equality and hashing are structural over the six addressing fields; the
/// cached byte size is derived at construction and excluded.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    memory_area: MemoryArea,
    db_number: u16,
    data_type: DataType,
    start: u32,
    bit_offset: u8,
    length: u16,
    size: usize,
}

impl Tag {
    /// Create a validated tag.
    ///
    /// Fails with [`S7Error::Address`] when a field is out of range, when a
    /// bit offset is given for a non-BIT type, or when the DB number does
    /// not match the memory area.
    pub fn new(
        memory_area: MemoryArea,
        db_number: u16,
        data_type: DataType,
        start: u32,
        bit_offset: u8,
        length: u16,
    ) -> S7Result<Self> {
        if memory_area == MemoryArea::Db && db_number == 0 {
            return Err(S7Error::address(
                "db_number must be positive for the DB memory area",
            ));
        }
        if memory_area != MemoryArea::Db && db_number != 0 {
            return Err(S7Error::address(format!(
                "db_number must be 0 for {memory_area:?}, got {db_number}"
            )));
        }
        if bit_offset > 7 {
            return Err(S7Error::address(format!(
                "bit_offset must be between 0 and 7, got {bit_offset}"
            )));
        }
        if data_type != DataType::Bit && bit_offset != 0 {
            return Err(S7Error::address(format!(
                "bit_offset must be 0 for {data_type:?}, got {bit_offset}"
            )));
        }
        if length == 0 {
            return Err(S7Error::address("length must be positive"));
        }
        if start > MAX_START {
            return Err(S7Error::address(format!(
                "start offset {start} does not fit the 24-bit address field"
            )));
        }

        let size = data_type.byte_size(length);
        Ok(Self {
            memory_area,
            db_number,
            data_type,
            start,
            bit_offset,
            length,
            size,
        })
    }

    /// Memory area.
    pub fn memory_area(&self) -> MemoryArea {
        self.memory_area
    }

    /// DB number; 0 for non-DB areas.
    pub fn db_number(&self) -> u16 {
        self.db_number
    }

    /// Data type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Byte offset into the memory area.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Bit position within the start byte; 0 unless the type is BIT.
    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    /// Element count; the declared maximum character count for strings.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Total byte size of the addressed range, cached at construction.
    pub fn size(&self) -> usize {
        self.size
    }

    /// 24-bit item address: `start * 8 + bit_offset`.
    pub fn bit_address(&self) -> u32 {
        self.start * 8 + u32::from(self.bit_offset)
    }

    /// True when `other` addresses the same area/DB and a compatible type
    /// family, and its byte range lies wholly inside this tag's range.
    pub fn contains(&self, other: &Tag) -> bool {
        if self.memory_area != other.memory_area || self.db_number != other.db_number {
            return false;
        }
        // Strings only contain strings of the same type; byte-addressable
        // types form one family.
        if (self.data_type.is_string() || other.data_type.is_string())
            && self.data_type != other.data_type
        {
            return false;
        }
        let self_end = self.start as usize + self.size;
        let other_end = other.start as usize + other.size;
        self.start <= other.start && self_end >= other_end
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.memory_area == other.memory_area
            && self.db_number == other.db_number
            && self.data_type == other.data_type
            && self.start == other.start
            && self.bit_offset == other.bit_offset
            && self.length == other.length
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.memory_area.hash(state);
        self.db_number.hash(state);
        self.data_type.hash(state);
        self.start.hash(state);
        self.bit_offset.hash(state);
        self.length.hash(state);
    }
}

impl fmt::Display for Tag {
    /// Canonical address form; parseable back for the DB/I/Q/M areas.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.memory_area {
            MemoryArea::Db => write!(f, "DB{},", self.db_number)?,
            MemoryArea::Input => write!(f, "I")?,
            MemoryArea::Output => write!(f, "Q")?,
            MemoryArea::Merker => write!(f, "M")?,
            MemoryArea::Counter => write!(f, "COUNTER")?,
            MemoryArea::Timer => write!(f, "TIMER")?,
        }
        match self.data_type {
            DataType::Bit => write!(f, "X{}.{}", self.start, self.bit_offset),
            DataType::String | DataType::WString => {
                write!(f, "{}{}.{}", self.data_type.letter(), self.start, self.length)
            }
            other => write!(f, "{}{}", other.letter(), self.start),
        }
    }
}
