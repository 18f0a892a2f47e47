//! Field decoding for fixed-width record slots.
//!
//! Each function takes the raw bytes of exactly one field slot. Decoding never
//! looks at neighbouring fields, so a single column can be read out of a record
//! without touching the rest of it.

use crate::header::{FieldDescriptor, FieldType};
use chrono::NaiveDate;
use dbfjoin_common::{Charset, Value};

/// Decodes one field slot. On failure returns a human-readable reason; the
/// caller attaches record and field context.
pub fn decode_field(
    field: &FieldDescriptor,
    raw: &[u8],
    charset: Charset,
) -> std::result::Result<Value, String> {
    if raw.len() != field.width as usize {
        return Err(format!(
            "slot has {} bytes, field width is {}",
            raw.len(),
            field.width
        ));
    }

    match field.field_type {
        FieldType::Character => decode_character(raw, charset),
        FieldType::Numeric | FieldType::Float => decode_numeric(field, raw),
        FieldType::Logical => decode_logical(raw),
        FieldType::Date => decode_date(raw),
        FieldType::Integer => decode_binary_integer(raw),
    }
}

fn decode_character(raw: &[u8], charset: Charset) -> std::result::Result<Value, String> {
    let text = decode_text(raw, charset)?;
    let trimmed = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if trimmed.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::String(trimmed.to_string()))
    }
}

fn decode_text(raw: &[u8], charset: Charset) -> std::result::Result<String, String> {
    match charset {
        Charset::Utf8 => std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| format!("invalid UTF-8: {}", e)),
        Charset::Latin1 => Ok(raw.iter().map(|&b| b as char).collect()),
    }
}

/// Numbers are right-aligned ASCII. Blank and `*`-filled (overflow) slots are
/// null.
fn decode_numeric(field: &FieldDescriptor, raw: &[u8]) -> std::result::Result<Value, String> {
    let text = std::str::from_utf8(raw).map_err(|_| "non-ASCII numeric".to_string())?;
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() || text.bytes().all(|b| b == b'*') {
        return Ok(Value::Null);
    }

    let as_double = || {
        text.parse::<f64>()
            .map_err(|_| format!("invalid number {:?}", text))
    };

    match field.value_type() {
        dbfjoin_common::ValueType::Integer => match text.parse::<i64>() {
            Ok(i) => Ok(Value::Integer(i)),
            Err(_) => {
                let d = as_double()?;
                if d.fract() == 0.0 {
                    Ok(Value::Integer(d as i64))
                } else {
                    Err(format!("fractional value {:?} in integer field", text))
                }
            }
        },
        _ => as_double().map(Value::Double),
    }
}

fn decode_logical(raw: &[u8]) -> std::result::Result<Value, String> {
    match raw.first() {
        Some(b'T' | b't' | b'Y' | b'y') => Ok(Value::Boolean(true)),
        Some(b'F' | b'f' | b'N' | b'n') => Ok(Value::Boolean(false)),
        Some(b'?' | b' ' | 0) | None => Ok(Value::Null),
        Some(other) => Err(format!("invalid logical byte 0x{:02X}", other)),
    }
}

fn decode_date(raw: &[u8]) -> std::result::Result<Value, String> {
    let text = std::str::from_utf8(raw).map_err(|_| "non-ASCII date".to_string())?;
    let text = text.trim();
    if text.is_empty() || text.bytes().all(|b| b == b'0') {
        return Ok(Value::Null);
    }
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .map(Value::Date)
        .map_err(|_| format!("invalid date {:?}", text))
}

fn decode_binary_integer(raw: &[u8]) -> std::result::Result<Value, String> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| format!("integer slot has {} bytes", raw.len()))?;
    Ok(Value::Integer(i32::from_le_bytes(bytes) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_type: FieldType, width: u8, decimal_count: u8) -> FieldDescriptor {
        FieldDescriptor {
            name: "F".to_string(),
            field_type,
            width,
            decimal_count,
            offset: 1,
        }
    }

    #[test]
    fn test_character_trims_padding() {
        let f = field(FieldType::Character, 8, 0);
        assert_eq!(
            decode_field(&f, b"  abc   ", Charset::Utf8).unwrap(),
            Value::from("abc")
        );
        assert_eq!(decode_field(&f, b"        ", Charset::Utf8).unwrap(), Value::Null);
    }

    #[test]
    fn test_character_charsets() {
        let f = field(FieldType::Character, 4, 0);
        let raw = [b'c', 0xE9, b' ', b' '];
        assert!(decode_field(&f, &raw, Charset::Utf8).is_err());
        assert_eq!(
            decode_field(&f, &raw, Charset::Latin1).unwrap(),
            Value::from("c\u{e9}")
        );
    }

    #[test]
    fn test_numeric_integer() {
        let f = field(FieldType::Numeric, 6, 0);
        assert_eq!(decode_field(&f, b"    42", Charset::Utf8).unwrap(), Value::Integer(42));
        assert_eq!(decode_field(&f, b"   -42", Charset::Utf8).unwrap(), Value::Integer(-42));
        assert_eq!(decode_field(&f, b"  42.0", Charset::Utf8).unwrap(), Value::Integer(42));
        assert!(decode_field(&f, b"  42.5", Charset::Utf8).is_err());
    }

    #[test]
    fn test_numeric_double() {
        let f = field(FieldType::Numeric, 8, 3);
        assert_eq!(
            decode_field(&f, b"   2.125", Charset::Utf8).unwrap(),
            Value::Double(2.125)
        );
        let f = field(FieldType::Float, 6, 0);
        assert_eq!(decode_field(&f, b"   1.5", Charset::Utf8).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn test_numeric_null_forms() {
        let f = field(FieldType::Numeric, 5, 0);
        assert_eq!(decode_field(&f, b"     ", Charset::Utf8).unwrap(), Value::Null);
        assert_eq!(decode_field(&f, b"*****", Charset::Utf8).unwrap(), Value::Null);
    }

    #[test]
    fn test_numeric_garbage_is_error() {
        let f = field(FieldType::Numeric, 5, 0);
        let err = decode_field(&f, b"  abc", Charset::Utf8).unwrap_err();
        assert!(err.contains("invalid number"));
    }

    #[test]
    fn test_logical() {
        let f = field(FieldType::Logical, 1, 0);
        assert_eq!(decode_field(&f, b"T", Charset::Utf8).unwrap(), Value::Boolean(true));
        assert_eq!(decode_field(&f, b"y", Charset::Utf8).unwrap(), Value::Boolean(true));
        assert_eq!(decode_field(&f, b"F", Charset::Utf8).unwrap(), Value::Boolean(false));
        assert_eq!(decode_field(&f, b"n", Charset::Utf8).unwrap(), Value::Boolean(false));
        assert_eq!(decode_field(&f, b"?", Charset::Utf8).unwrap(), Value::Null);
        assert!(decode_field(&f, b"X", Charset::Utf8).is_err());
    }

    #[test]
    fn test_date() {
        let f = field(FieldType::Date, 8, 0);
        assert_eq!(
            decode_field(&f, b"20240131", Charset::Utf8).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert_eq!(decode_field(&f, b"        ", Charset::Utf8).unwrap(), Value::Null);
        assert_eq!(decode_field(&f, b"00000000", Charset::Utf8).unwrap(), Value::Null);
        assert!(decode_field(&f, b"20241399", Charset::Utf8).is_err());
    }

    #[test]
    fn test_binary_integer() {
        let f = field(FieldType::Integer, 4, 0);
        assert_eq!(
            decode_field(&f, &(-7i32).to_le_bytes(), Charset::Utf8).unwrap(),
            Value::Integer(-7)
        );
    }

    #[test]
    fn test_slot_width_mismatch() {
        let f = field(FieldType::Integer, 4, 0);
        let err = decode_field(&f, &[1, 2], Charset::Utf8).unwrap_err();
        assert!(err.contains("field width is 4"));
    }
}
