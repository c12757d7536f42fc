//! Textual address parsing
//!
//! Translates the address mini-language (`DB2,X0.7`, `MW40`, `I3.0`,
//! `DB102,S10.15`, ...) into validated [`Tag`] descriptors.
//!
//! Grammar, informally:
//!
//! ```text
//! addr  := DB <n> , <type><offset>[.<suffix>]
//!        | <area_letter><type_letter><offset>[.<bit>]
//!        | <area_letter><offset>.<bit>            ; short bit form
//! area_letter := I | E | Q | A | M
//! type_letter := X | B | C | I | W | DI | DW | R | LR | S | WS
//! ```
//!
//! For `X` the suffix is the bit offset (0-7); for `S`/`WS` it is the
//! declared string length; all other types take no suffix and have an
//! implied length of 1. Long type names (`BYTE`, `WORD`, `DINT`, ...) are
//! accepted as aliases.

use crate::error::{S7Error, S7Result};
use crate::tag::{DataType, MemoryArea, Tag};

/// What the `.suffix` of a token means.
#[derive(Clone, Copy, PartialEq)]
enum Suffix {
    /// No suffix allowed (scalar types).
    None,
    /// Suffix is the bit offset, required.
    BitOffset,
    /// Suffix is the declared string length, required.
    Length,
}

/// Parse a textual address into a tag.
///
/// # Example
///
/// ```
/// use voltage_s7::{parse_address, DataType, MemoryArea};
///
/// let tag = parse_address("DB1,X0.6").unwrap();
/// assert_eq!(tag.memory_area(), MemoryArea::Db);
/// assert_eq!(tag.data_type(), DataType::Bit);
/// assert_eq!(tag.bit_offset(), 6);
/// ```
pub fn parse_address(address: &str) -> S7Result<Tag> {
    let upper = address.trim().to_ascii_uppercase();
    let bytes = upper.as_bytes();

    if let Some(rest) = upper.strip_prefix("DB") {
        if rest.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
            return parse_db_address(address, rest);
        }
    }

    let area = match bytes.first() {
        Some(b'I') | Some(b'E') => MemoryArea::Input,
        Some(b'Q') | Some(b'A') => MemoryArea::Output,
        Some(b'M') => MemoryArea::Merker,
        _ => return Err(unparseable(address)),
    };

    let rest = &upper[1..];
    let (token, rest) = take_letters(rest);
    let (start, rest) = take_number(rest).ok_or_else(|| unparseable(address))?;
    let suffix = take_suffix(rest).map_err(|_| unparseable(address))?;

    if token.is_empty() {
        // Short bit form: the suffix is mandatory.
        if suffix.is_none() {
            return Err(unparseable(address));
        }
        return build(address, area, 0, "X", start, suffix);
    }
    build(address, area, 0, token, start, suffix)
}

fn parse_db_address(address: &str, rest: &str) -> S7Result<Tag> {
    let (db_number, rest) = take_number(rest).ok_or_else(|| unparseable(address))?;
    let rest = rest.strip_prefix(',').ok_or_else(|| unparseable(address))?;
    let (token, rest) = take_letters(rest);
    if token.is_empty() {
        return Err(unparseable(address));
    }
    let (start, rest) = take_number(rest).ok_or_else(|| unparseable(address))?;
    let suffix = take_suffix(rest).map_err(|_| unparseable(address))?;

    let db_number = u16::try_from(db_number)
        .map_err(|_| S7Error::address(format!("DB number out of range in '{address}'")))?;
    build(address, MemoryArea::Db, db_number, token, start, suffix)
}

fn build(
    address: &str,
    area: MemoryArea,
    db_number: u16,
    token: &str,
    start: u32,
    suffix: Option<u32>,
) -> S7Result<Tag> {
    let (data_type, kind) = match token {
        "X" => (DataType::Bit, Suffix::BitOffset),
        "B" | "BYTE" => (DataType::Byte, Suffix::None),
        "C" | "CHAR" => (DataType::Char, Suffix::None),
        "I" | "INT" => (DataType::Int, Suffix::None),
        "W" | "WORD" => (DataType::Word, Suffix::None),
        "DI" | "DINT" => (DataType::Dint, Suffix::None),
        "DW" | "DWORD" | "D" => (DataType::Dword, Suffix::None),
        "R" | "REAL" => (DataType::Real, Suffix::None),
        "LR" | "LREAL" => (DataType::LReal, Suffix::None),
        "S" | "STRING" => (DataType::String, Suffix::Length),
        "WS" | "WSTRING" => (DataType::WString, Suffix::Length),
        _ => return Err(unparseable(address)),
    };

    let (bit_offset, length) = match kind {
        Suffix::BitOffset => {
            let bit = suffix
                .ok_or_else(|| S7Error::address(format!("missing bit offset in '{address}'")))?;
            let bit = u8::try_from(bit).map_err(|_| {
                S7Error::address(format!("bit offset out of range in '{address}'"))
            })?;
            (bit, 1u16)
        }
        Suffix::Length => {
            let len = suffix
                .ok_or_else(|| S7Error::address(format!("missing string length in '{address}'")))?;
            let len = u16::try_from(len).map_err(|_| {
                S7Error::address(format!("string length out of range in '{address}'"))
            })?;
            (0, len)
        }
        Suffix::None => {
            if suffix.is_some() {
                return Err(S7Error::address(format!(
                    "bit offset not supported for address '{address}'"
                )));
            }
            (0, 1)
        }
    };

    Tag::new(area, db_number, data_type, start, bit_offset, length)
}

fn unparseable(address: &str) -> S7Error {
    S7Error::address(format!("impossible to parse address '{address}'"))
}

/// Split a leading run of ASCII letters off `input`.
fn take_letters(input: &str) -> (&str, &str) {
    let end = input
        .bytes()
        .position(|b| !b.is_ascii_alphabetic())
        .unwrap_or(input.len());
    input.split_at(end)
}

/// Split a leading run of ASCII digits off `input` and parse it.
fn take_number(input: &str) -> Option<(u32, &str)> {
    let end = input
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    let (digits, rest) = input.split_at(end);
    digits.parse::<u32>().ok().map(|n| (n, rest))
}

/// Parse an optional trailing `.<digits>` suffix; anything else is an error.
fn take_suffix(input: &str) -> Result<Option<u32>, ()> {
    if input.is_empty() {
        return Ok(None);
    }
    let rest = input.strip_prefix('.').ok_or(())?;
    match take_number(rest) {
        Some((value, "")) => Ok(Some(value)),
        _ => Err(()),
    }
}
