//! Write-path range checking and type coercion.
//! `resolve_write_value` is the single entry point the adapter's write
//! path calls: it validates the incoming value against the tag's
//! declared type and the range-check table, applies decimal division
//! with rounding, and returns the value in the tag's own storage type,
//! ready for the endianness fix-up and enqueue.

use thiserror::Error;

use super::value::{TagType, TagValue};
use super::wire::demote_rounded;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum WriteValueError {
    #[error("tag type mismatch")]
    TypeMismatch,
    #[error("tag value out of range")]
    OutOfRange,
    #[error("decimal is not valid for this tag type")]
    DecimalInvalid,
}

/// Testable property #10: accepts any value with `|v| <= type.MAX` and
/// rejects any outside, boundary values included.
pub fn is_value_in_range(kind: TagType, v: f64) -> bool {
    use TagType::*;
    match kind {
        Int8 => v >= i8::MIN as f64 && v <= i8::MAX as f64,
        Uint8 => v >= 0.0 && v <= u8::MAX as f64,
        Int16 => v >= i16::MIN as f64 && v <= i16::MAX as f64,
        Uint16 | Word => v >= 0.0 && v <= u16::MAX as f64,
        Int32 => v >= i32::MIN as f64 && v <= i32::MAX as f64,
        Uint32 | Dword => v >= 0.0 && v <= u32::MAX as f64,
        Int64 => v >= i64::MIN as f64 && v <= i64::MAX as f64,
        Uint64 | Lword => v >= 0.0 && v <= u64::MAX as f64,
        Float => v.abs() <= f32::MAX as f64,
        Double => true,
        _ => true,
    }
}

pub fn resolve_write_value(
    kind: TagType,
    decimal: f64,
    incoming: &TagValue,
) -> Result<TagValue, WriteValueError> {
    match kind {
        TagType::Bit => {
            if decimal != 0.0 {
                return Err(WriteValueError::DecimalInvalid);
            }
            let i = incoming.as_i64().ok_or(WriteValueError::TypeMismatch)?;
            match i {
                0 => Ok(TagValue::Bit(false)),
                1 => Ok(TagValue::Bit(true)),
                _ => Err(WriteValueError::OutOfRange),
            }
        }
        TagType::Bool => {
            if decimal != 0.0 {
                return Err(WriteValueError::DecimalInvalid);
            }
            match incoming {
                TagValue::Bool(b) => Ok(TagValue::Bool(*b)),
                _ => Err(WriteValueError::TypeMismatch),
            }
        }
        TagType::String => {
            if decimal != 0.0 {
                return Err(WriteValueError::DecimalInvalid);
            }
            match incoming {
                TagValue::String(s) => Ok(TagValue::String(s.clone())),
                _ => Err(WriteValueError::TypeMismatch),
            }
        }
        TagType::Custom => match incoming {
            TagValue::Custom(v) => Ok(TagValue::Custom(v.clone())),
            _ => Err(WriteValueError::TypeMismatch),
        },
        TagType::Int8
        | TagType::Uint8
        | TagType::Int16
        | TagType::Uint16
        | TagType::Word
        | TagType::Int32
        | TagType::Uint32
        | TagType::Dword => narrow_integral(kind, decimal, incoming),
        TagType::Int64 | TagType::Uint64 | TagType::Lword => wide_integral(kind, decimal, incoming),
        TagType::Float => promote_then_range(kind, incoming, true),
        TagType::Double => promote_then_range(kind, incoming, false),
        _ => Err(WriteValueError::TypeMismatch),
    }
}

fn source_numeric(decimal: f64, incoming: &TagValue) -> Result<f64, WriteValueError> {
    match incoming {
        TagValue::Int64(i) => Ok(*i as f64),
        TagValue::Double(d) if decimal != 0.0 => Ok(*d),
        _ => Err(WriteValueError::TypeMismatch),
    }
}

fn narrow_integral(
    kind: TagType,
    decimal: f64,
    incoming: &TagValue,
) -> Result<TagValue, WriteValueError> {
    let raw = source_numeric(decimal, incoming)?;
    let scaled = if decimal != 0.0 {
        demote_rounded(raw, decimal)
    } else {
        raw
    };

    if !is_value_in_range(kind, scaled) {
        return Err(WriteValueError::OutOfRange);
    }

    Ok(match kind {
        TagType::Int8 => TagValue::Int8(scaled as i8),
        TagType::Uint8 => TagValue::Uint8(scaled as u8),
        TagType::Int16 => TagValue::Int16(scaled as i16),
        TagType::Uint16 => TagValue::Uint16(scaled as u16),
        TagType::Word => TagValue::Word(scaled as u16),
        TagType::Int32 => TagValue::Int32(scaled as i32),
        TagType::Uint32 => TagValue::Uint32(scaled as u32),
        TagType::Dword => TagValue::Dword(scaled as u32),
        _ => unreachable!("narrow_integral only called for narrow integral kinds"),
    })
}

fn wide_integral(
    kind: TagType,
    decimal: f64,
    incoming: &TagValue,
) -> Result<TagValue, WriteValueError> {
    let raw = source_numeric(decimal, incoming)?;
    let scaled = if decimal != 0.0 {
        demote_rounded(raw, decimal)
    } else {
        raw
    };

    if !is_value_in_range(kind, scaled) {
        return Err(WriteValueError::OutOfRange);
    }

    Ok(match kind {
        TagType::Int64 => TagValue::Int64(scaled as i64),
        TagType::Uint64 => TagValue::Uint64(scaled as u64),
        TagType::Lword => TagValue::Lword(scaled as u64),
        _ => unreachable!("wide_integral only called for wide integral kinds"),
    })
}

/// FLOAT/DOUBLE tags accept INT64 or DOUBLE sources; an incoming INT64
/// is promoted to DOUBLE before the range check.
fn promote_then_range(
    kind: TagType,
    incoming: &TagValue,
    is_f32: bool,
) -> Result<TagValue, WriteValueError> {
    let raw = match incoming {
        TagValue::Int64(i) => *i as f64,
        TagValue::Double(d) => *d,
        _ => return Err(WriteValueError::TypeMismatch),
    };

    if !is_value_in_range(kind, raw) {
        return Err(WriteValueError::OutOfRange);
    }

    Ok(if is_f32 {
        TagValue::Float(raw as f32)
    } else {
        TagValue::Double(raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_accepts_only_zero_or_one() {
        assert_eq!(
            resolve_write_value(TagType::Bit, 0.0, &TagValue::Int64(1)),
            Ok(TagValue::Bit(true))
        );
        assert_eq!(
            resolve_write_value(TagType::Bit, 0.0, &TagValue::Int64(2)),
            Err(WriteValueError::OutOfRange)
        );
    }

    /// Scenario S2: INT16 tag, decimal=0.1, client writes INT64(123) ->
    /// plugin sees INT16(1230).
    #[test]
    fn scenario_s2_decimal_write_rounds_and_scales() {
        let resolved = resolve_write_value(TagType::Int16, 0.1, &TagValue::Int64(123)).unwrap();
        assert_eq!(resolved.as_i64(), Some(1230));
    }

    #[test]
    fn decimal_forbidden_on_bit_bool_string() {
        assert_eq!(
            resolve_write_value(TagType::Bool, 0.5, &TagValue::Bool(true)),
            Err(WriteValueError::DecimalInvalid)
        );
        assert_eq!(
            resolve_write_value(TagType::String, 0.5, &TagValue::String("x".into())),
            Err(WriteValueError::DecimalInvalid)
        );
    }

    /// Testable property #10: boundary values for INT16.
    #[test]
    fn int16_boundary_values() {
        assert!(is_value_in_range(TagType::Int16, i16::MIN as f64));
        assert!(is_value_in_range(TagType::Int16, i16::MAX as f64));
        assert!(!is_value_in_range(TagType::Int16, i16::MIN as f64 - 1.0));
        assert!(!is_value_in_range(TagType::Int16, i16::MAX as f64 + 1.0));
    }

    #[test]
    fn float_rejects_beyond_flt_max() {
        let huge = f64::from(f32::MAX) * 2.0;
        assert_eq!(
            resolve_write_value(TagType::Float, 0.0, &TagValue::Double(huge)),
            Err(WriteValueError::OutOfRange)
        );
    }

    #[test]
    fn uint32_rejects_negative() {
        assert_eq!(
            resolve_write_value(TagType::Uint32, 0.0, &TagValue::Int64(-1)),
            Err(WriteValueError::OutOfRange)
        );
    }

    #[test]
    fn type_mismatch_when_source_type_unexpected() {
        assert_eq!(
            resolve_write_value(TagType::Int16, 0.0, &TagValue::String("x".into())),
            Err(WriteValueError::TypeMismatch)
        );
        assert_eq!(
            resolve_write_value(TagType::Int16, 0.0, &TagValue::Double(1.5)),
            Err(WriteValueError::TypeMismatch)
        );
    }
}
