//! # S7 Codec
//!
//! Conversion between raw item payload bytes and typed [`S7Value`]s,
//! per tag. Everything on the wire is big-endian.
//!
//! ## Payload layouts
//!
//! | Type | Bytes | Layout |
//! |------|-------|--------|
//! | BIT | 1 | 0x00 / 0x01 |
//! | BYTE / CHAR | 1 per element | raw |
//! | INT / WORD | 2 per element | big-endian |
//! | DINT / DWORD / REAL | 4 per element | big-endian |
//! | LREAL | 8 per element | big-endian |
//! | STRING | max + 2 | `max(u8), cur(u8), cur ASCII bytes, padding` |
//! | WSTRING | 2·max + 4 | `max(u16), cur(u16), cur UTF-16 BE units, padding` |

use crate::error::{S7Error, S7Result};
use crate::tag::{DataType, Tag};
use crate::value::S7Value;

// ============================================================================
// Decoding
// ============================================================================

/// Decode the payload of a directly read item into a typed value.
///
/// A BIT item payload is the single 0x00/0x01 byte the PLC returns for a
/// bit-transport read.
pub fn decode_payload(tag: &Tag, data: &[u8]) -> S7Result<S7Value> {
    if tag.data_type() == DataType::Bit {
        let byte = *data
            .first()
            .ok_or_else(|| short_payload(tag, 1, data.len()))?;
        return Ok(S7Value::Bool(byte != 0));
    }
    decode_bytes(tag, data)
}

/// Decode one original tag out of a coalesced byte block.
///
/// `offset` is the tag's byte offset inside the block; BIT tags extract
/// their bit from the addressed byte.
pub fn decode_slice(tag: &Tag, block: &[u8], offset: usize) -> S7Result<S7Value> {
    if tag.data_type() == DataType::Bit {
        let byte = *block
            .get(offset)
            .ok_or_else(|| short_payload(tag, offset + 1, block.len()))?;
        return Ok(S7Value::Bool((byte >> tag.bit_offset()) & 0b1 != 0));
    }
    let end = offset + tag.size();
    let data = block
        .get(offset..end)
        .ok_or_else(|| short_payload(tag, end, block.len()))?;
    decode_bytes(tag, data)
}

fn decode_bytes(tag: &Tag, data: &[u8]) -> S7Result<S7Value> {
    let ty = tag.data_type();
    let data = if ty.is_string() {
        data
    } else {
        // Trailing pad bytes from the wire are not part of the value.
        data.get(..tag.size())
            .ok_or_else(|| short_payload(tag, tag.size(), data.len()))?
    };

    let value = match ty {
        DataType::Bit => S7Value::Bool(data[0] != 0),
        DataType::Byte => collapse(
            tag,
            data.iter().map(|&b| S7Value::Int(i64::from(b))).collect(),
        ),
        DataType::Char => {
            let text: String = data[..tag.size()]
                .iter()
                .map(|&b| char::from(b))
                .collect();
            S7Value::Text(text)
        }
        DataType::Int => collapse(
            tag,
            chunks2(data)
                .map(|b| S7Value::Int(i64::from(i16::from_be_bytes(b))))
                .collect(),
        ),
        DataType::Word => collapse(
            tag,
            chunks2(data)
                .map(|b| S7Value::Int(i64::from(u16::from_be_bytes(b))))
                .collect(),
        ),
        DataType::Dint => collapse(
            tag,
            chunks4(data)
                .map(|b| S7Value::Int(i64::from(i32::from_be_bytes(b))))
                .collect(),
        ),
        DataType::Dword => collapse(
            tag,
            chunks4(data)
                .map(|b| S7Value::Int(i64::from(u32::from_be_bytes(b))))
                .collect(),
        ),
        DataType::Real => collapse(
            tag,
            chunks4(data)
                .map(|b| S7Value::Real(f64::from(f32::from_be_bytes(b))))
                .collect(),
        ),
        DataType::LReal => collapse(
            tag,
            data.chunks_exact(8)
                .take(tag.length() as usize)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    S7Value::Real(f64::from_be_bytes(b))
                })
                .collect(),
        ),
        DataType::String => decode_string(tag, data)?,
        DataType::WString => decode_wstring(tag, data)?,
    };
    Ok(value)
}

fn decode_string(tag: &Tag, data: &[u8]) -> S7Result<S7Value> {
    if data.len() < 2 {
        return Err(short_payload(tag, 2, data.len()));
    }
    let max_len = data[0] as usize;
    let cur_len = (data[1] as usize).min(max_len);
    let end = 2 + cur_len;
    let bytes = data
        .get(2..end)
        .ok_or_else(|| short_payload(tag, end, data.len()))?;
    Ok(S7Value::Text(
        bytes.iter().map(|&b| char::from(b)).collect(),
    ))
}

fn decode_wstring(tag: &Tag, data: &[u8]) -> S7Result<S7Value> {
    if data.len() < 4 {
        return Err(short_payload(tag, 4, data.len()));
    }
    let max_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let cur_len = (u16::from_be_bytes([data[2], data[3]]) as usize).min(max_len);
    let end = 4 + 2 * cur_len;
    let raw = data
        .get(4..end)
        .ok_or_else(|| short_payload(tag, end, data.len()))?;
    let units: Vec<u16> = chunks2(raw).map(u16::from_be_bytes).collect();
    Ok(S7Value::Text(String::from_utf16_lossy(&units)))
}

/// Scalars stay scalar, arrays become `Array`; CHAR never reaches here.
fn collapse(tag: &Tag, mut values: Vec<S7Value>) -> S7Value {
    if tag.length() == 1 && values.len() == 1 {
        values.remove(0)
    } else {
        S7Value::Array(values)
    }
}

fn chunks2(data: &[u8]) -> impl Iterator<Item = [u8; 2]> + '_ {
    data.chunks_exact(2).map(|c| [c[0], c[1]])
}

fn chunks4(data: &[u8]) -> impl Iterator<Item = [u8; 4]> + '_ {
    data.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]])
}

fn short_payload(tag: &Tag, needed: usize, got: usize) -> S7Error {
    S7Error::protocol(format!(
        "short payload for {tag}: need {needed} bytes, got {got}"
    ))
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a typed value into the write payload for `tag`.
///
/// Validates value kind and cardinality: a scalar for `length == 1`, an
/// `Array` of exactly `length` elements otherwise, `Text` for CHAR/STRING/
/// WSTRING. The payload length always equals `tag.size()`.
pub fn encode_value(tag: &Tag, value: &S7Value) -> S7Result<Vec<u8>> {
    match tag.data_type() {
        DataType::Bit => {
            if tag.length() != 1 {
                return Err(S7Error::value(format!(
                    "BIT writes are single-bit only, {tag} has length {}",
                    tag.length()
                )));
            }
            match value {
                S7Value::Bool(b) => Ok(vec![u8::from(*b)]),
                other => Err(kind_mismatch(tag, "bool", other)),
            }
        }
        DataType::Byte => {
            // A raw byte buffer of the exact size is accepted as well.
            if let S7Value::Bytes(bytes) = value {
                if bytes.len() != tag.size() {
                    return Err(S7Error::value(format!(
                        "byte buffer for {tag} must hold {} bytes, got {}",
                        tag.size(),
                        bytes.len()
                    )));
                }
                return Ok(bytes.clone());
            }
            encode_numeric(tag, value, 1, |v, out| {
                let n = int_in_range(tag, v, 0, 255)?;
                out.push(n as u8);
                Ok(())
            })
        }
        DataType::Char => {
            let text = expect_text(tag, value)?;
            let bytes = ascii_bytes(tag, text)?;
            if bytes.len() != tag.length() as usize {
                return Err(S7Error::value(format!(
                    "CHAR data for {tag} must be exactly {} characters, got {}",
                    tag.length(),
                    bytes.len()
                )));
            }
            Ok(bytes)
        }
        DataType::Int => encode_numeric(tag, value, 2, |v, out| {
            let n = int_in_range(tag, v, i64::from(i16::MIN), i64::from(i16::MAX))?;
            out.extend_from_slice(&(n as i16).to_be_bytes());
            Ok(())
        }),
        DataType::Word => encode_numeric(tag, value, 2, |v, out| {
            let n = int_in_range(tag, v, 0, i64::from(u16::MAX))?;
            out.extend_from_slice(&(n as u16).to_be_bytes());
            Ok(())
        }),
        DataType::Dint => encode_numeric(tag, value, 4, |v, out| {
            let n = int_in_range(tag, v, i64::from(i32::MIN), i64::from(i32::MAX))?;
            out.extend_from_slice(&(n as i32).to_be_bytes());
            Ok(())
        }),
        DataType::Dword => encode_numeric(tag, value, 4, |v, out| {
            let n = int_in_range(tag, v, 0, i64::from(u32::MAX))?;
            out.extend_from_slice(&(n as u32).to_be_bytes());
            Ok(())
        }),
        DataType::Real => encode_numeric(tag, value, 4, |v, out| {
            let f = expect_number(tag, v)?;
            out.extend_from_slice(&(f as f32).to_be_bytes());
            Ok(())
        }),
        DataType::LReal => encode_numeric(tag, value, 8, |v, out| {
            let f = expect_number(tag, v)?;
            out.extend_from_slice(&f.to_be_bytes());
            Ok(())
        }),
        DataType::String => {
            let text = expect_text(tag, value)?;
            let bytes = ascii_bytes(tag, text)?;
            let max_len = tag.length() as usize;
            if bytes.len() > max_len {
                return Err(S7Error::value(format!(
                    "STRING data too long for {tag}: max length is {max_len}, got {}",
                    bytes.len()
                )));
            }
            let mut out = Vec::with_capacity(tag.size());
            out.push(max_len as u8);
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
            out.resize(tag.size(), 0);
            Ok(out)
        }
        DataType::WString => {
            let text = expect_text(tag, value)?;
            let units: Vec<u16> = text.encode_utf16().collect();
            let max_len = tag.length() as usize;
            if units.len() > max_len {
                return Err(S7Error::value(format!(
                    "WSTRING data too long for {tag}: max length is {max_len} chars, got {}",
                    units.len()
                )));
            }
            let mut out = Vec::with_capacity(tag.size());
            out.extend_from_slice(&(max_len as u16).to_be_bytes());
            out.extend_from_slice(&(units.len() as u16).to_be_bytes());
            for unit in units {
                out.extend_from_slice(&unit.to_be_bytes());
            }
            out.resize(tag.size(), 0);
            Ok(out)
        }
    }
}

fn encode_numeric(
    tag: &Tag,
    value: &S7Value,
    element_size: usize,
    mut encode_one: impl FnMut(&S7Value, &mut Vec<u8>) -> S7Result<()>,
) -> S7Result<Vec<u8>> {
    let length = tag.length() as usize;
    let mut out = Vec::with_capacity(length * element_size);
    if length == 1 {
        encode_one(value, &mut out)?;
        return Ok(out);
    }
    let items = match value {
        S7Value::Array(items) => items,
        other => return Err(kind_mismatch(tag, "array", other)),
    };
    if items.len() != length {
        return Err(S7Error::value(format!(
            "{tag} expects {length} elements, got {}",
            items.len()
        )));
    }
    for item in items {
        encode_one(item, &mut out)?;
    }
    Ok(out)
}

fn expect_text<'a>(tag: &Tag, value: &'a S7Value) -> S7Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| kind_mismatch(tag, "text", value))
}

fn expect_number(tag: &Tag, value: &S7Value) -> S7Result<f64> {
    match value {
        S7Value::Real(f) => Ok(*f),
        S7Value::Int(i) => Ok(*i as f64),
        other => Err(kind_mismatch(tag, "number", other)),
    }
}

fn int_in_range(tag: &Tag, value: &S7Value, min: i64, max: i64) -> S7Result<i64> {
    let n = match value {
        S7Value::Int(i) => *i,
        S7Value::Bool(b) => i64::from(*b),
        other => return Err(kind_mismatch(tag, "integer", other)),
    };
    if n < min || n > max {
        return Err(S7Error::value(format!(
            "value {n} out of range [{min}, {max}] for {tag}"
        )));
    }
    Ok(n)
}

fn ascii_bytes(tag: &Tag, text: &str) -> S7Result<Vec<u8>> {
    if !text.is_ascii() {
        return Err(S7Error::value(format!(
            "non-ASCII character in data for {tag}"
        )));
    }
    Ok(text.as_bytes().to_vec())
}

fn kind_mismatch(tag: &Tag, expected: &str, got: &S7Value) -> S7Error {
    S7Error::value(format!(
        "{tag} expects a {expected} value, got {}",
        got.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::MemoryArea;

    fn tag(ty: DataType, start: u32, bit: u8, len: u16) -> Tag {
        Tag::new(MemoryArea::Db, 1, ty, start, bit, len).unwrap()
    }

    #[test]
    fn test_decode_int_scalar() {
        let t = tag(DataType::Int, 30, 0, 1);
        assert_eq!(
            decode_payload(&t, &[0x61, 0xA8]).unwrap(),
            S7Value::Int(25000)
        );
        assert_eq!(
            decode_payload(&t, &[0xFF, 0xFE]).unwrap(),
            S7Value::Int(-2)
        );
    }

    #[test]
    fn test_decode_int_array() {
        let t = tag(DataType::Int, 0, 0, 3);
        let value = decode_payload(&t, &[0x00, 0x01, 0x00, 0x02, 0xFF, 0xFF]).unwrap();
        assert_eq!(
            value,
            S7Value::Array(vec![S7Value::Int(1), S7Value::Int(2), S7Value::Int(-1)])
        );
    }

    #[test]
    fn test_decode_word_vs_int() {
        let t = tag(DataType::Word, 0, 0, 1);
        assert_eq!(
            decode_payload(&t, &[0xFF, 0xFE]).unwrap(),
            S7Value::Int(65534)
        );
    }

    #[test]
    fn test_decode_real() {
        let t = tag(DataType::Real, 0, 0, 1);
        let value = decode_payload(&t, &20.5f32.to_be_bytes()).unwrap();
        assert!((value.as_f64() - 20.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_lreal() {
        let t = tag(DataType::LReal, 0, 0, 1);
        let value = decode_payload(&t, &3.141592653589793f64.to_be_bytes()).unwrap();
        assert!((value.as_f64() - 3.141592653589793).abs() < 1e-12);
    }

    #[test]
    fn test_decode_bit_direct() {
        let t = tag(DataType::Bit, 0, 6, 1);
        assert_eq!(decode_payload(&t, &[0x01]).unwrap(), S7Value::Bool(true));
        assert_eq!(decode_payload(&t, &[0x00]).unwrap(), S7Value::Bool(false));
    }

    #[test]
    fn test_decode_bit_from_packed_block() {
        // Bit 6 of the byte at block offset 2.
        let t = tag(DataType::Bit, 2, 6, 1);
        let block = [0x00, 0x00, 0b0100_0000];
        assert_eq!(decode_slice(&t, &block, 2).unwrap(), S7Value::Bool(true));
        let block = [0xFF, 0xFF, 0b1011_1111];
        assert_eq!(decode_slice(&t, &block, 2).unwrap(), S7Value::Bool(false));
    }

    #[test]
    fn test_decode_slice_int_inside_block() {
        let t = tag(DataType::Int, 4, 0, 1);
        let block = [0x00, 0x00, 0x00, 0x00, 0x61, 0xA8];
        assert_eq!(decode_slice(&t, &block, 4).unwrap(), S7Value::Int(25000));
    }

    #[test]
    fn test_decode_char_and_string() {
        let t = tag(DataType::Char, 0, 0, 3);
        assert_eq!(
            decode_payload(&t, b"abc").unwrap(),
            S7Value::Text("abc".into())
        );

        let t = tag(DataType::String, 0, 0, 10);
        let mut buf = vec![10u8, 5];
        buf.extend_from_slice(b"hello");
        buf.resize(12, 0);
        assert_eq!(
            decode_payload(&t, &buf).unwrap(),
            S7Value::Text("hello".into())
        );
    }

    #[test]
    fn test_decode_string_cur_len_clamped_to_max() {
        let t = tag(DataType::String, 0, 0, 4);
        // cur_len claims 200 but max is 4.
        let buf = [4u8, 200, b'a', b'b', b'c', b'd'];
        assert_eq!(
            decode_payload(&t, &buf).unwrap(),
            S7Value::Text("abcd".into())
        );
    }

    #[test]
    fn test_decode_wstring() {
        let t = tag(DataType::WString, 0, 0, 5);
        let mut buf = vec![0u8, 5, 0, 2];
        for unit in "hi".encode_utf16() {
            buf.extend_from_slice(&unit.to_be_bytes());
        }
        buf.resize(t.size(), 0);
        assert_eq!(decode_payload(&t, &buf).unwrap(), S7Value::Text("hi".into()));
    }

    #[test]
    fn test_decode_short_payload_fails() {
        let t = tag(DataType::Dint, 0, 0, 1);
        assert!(decode_payload(&t, &[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_encode_int() {
        let t = tag(DataType::Int, 30, 0, 1);
        assert_eq!(
            encode_value(&t, &S7Value::Int(25000)).unwrap(),
            vec![0x61, 0xA8]
        );
        assert!(encode_value(&t, &S7Value::Int(40000)).is_err());
        assert!(encode_value(&t, &S7Value::Text("x".into())).is_err());
    }

    #[test]
    fn test_encode_int_array() {
        let t = tag(DataType::Int, 0, 0, 2);
        let value = S7Value::Array(vec![S7Value::Int(1), S7Value::Int(-1)]);
        assert_eq!(
            encode_value(&t, &value).unwrap(),
            vec![0x00, 0x01, 0xFF, 0xFF]
        );

        let wrong_len = S7Value::Array(vec![S7Value::Int(1)]);
        assert!(encode_value(&t, &wrong_len).is_err());
    }

    #[test]
    fn test_encode_bit() {
        let t = tag(DataType::Bit, 0, 6, 1);
        assert_eq!(encode_value(&t, &S7Value::Bool(true)).unwrap(), vec![0x01]);
        assert_eq!(encode_value(&t, &S7Value::Bool(false)).unwrap(), vec![0x00]);
        assert!(encode_value(&t, &S7Value::Int(1)).is_err());
    }

    #[test]
    fn test_encode_real_accepts_int() {
        let t = tag(DataType::Real, 0, 0, 1);
        assert_eq!(
            encode_value(&t, &S7Value::Int(2)).unwrap(),
            2.0f32.to_be_bytes().to_vec()
        );
    }

    #[test]
    fn test_encode_string() {
        let t = tag(DataType::String, 0, 0, 8);
        let out = encode_value(&t, &S7Value::Text("abc".into())).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(&out[..5], &[8, 3, b'a', b'b', b'c']);
        assert!(out[5..].iter().all(|&b| b == 0));

        assert!(encode_value(&t, &S7Value::Text("way too long!".into())).is_err());
        assert!(encode_value(&t, &S7Value::Text("héllo".into())).is_err());
    }

    #[test]
    fn test_encode_wstring() {
        let t = tag(DataType::WString, 0, 0, 6);
        let out = encode_value(&t, &S7Value::Text("ab".into())).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], &[0, 6, 0, 2]);
        assert_eq!(&out[4..8], &[0, b'a', 0, b'b']);
    }

    #[test]
    fn test_encode_bytes_for_byte_array() {
        let t = tag(DataType::Byte, 0, 0, 4);
        assert_eq!(
            encode_value(&t, &S7Value::Bytes(vec![1, 2, 3, 4])).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert!(encode_value(&t, &S7Value::Bytes(vec![1, 2])).is_err());
    }

    #[test]
    fn test_encode_char_exact_length() {
        let t = tag(DataType::Char, 0, 0, 2);
        assert_eq!(
            encode_value(&t, &S7Value::Text("ok".into())).unwrap(),
            b"ok".to_vec()
        );
        assert!(encode_value(&t, &S7Value::Text("long".into())).is_err());
    }

    #[test]
    fn test_write_then_read_representation() {
        // Encoding then decoding restores the value (S7 round trip).
        let t = tag(DataType::Dint, 0, 0, 1);
        let encoded = encode_value(&t, &S7Value::Int(-123456)).unwrap();
        assert_eq!(decode_payload(&t, &encoded).unwrap(), S7Value::Int(-123456));

        let t = tag(DataType::String, 0, 0, 20);
        let encoded = encode_value(&t, &S7Value::Text("voltage".into())).unwrap();
        assert_eq!(
            decode_payload(&t, &encoded).unwrap(),
            S7Value::Text("voltage".into())
        );
    }
}
