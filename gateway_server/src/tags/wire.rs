//! Endianness fix-up and decimal/bias arithmetic applied when a value
//! crosses the cache/report boundary (emit) or the write boundary
//! (receive), plus the decimal-compaction pass used for float-noise
//! suppression on emit.
//!
//! The 32-bit endian names follow the same `ABCD/BADC/CDAB/DCBA`
//! mnemonic widely used by Modbus word-swap conventions:
//! `BigBig` = ABCD (straight big-endian), `LittleLittle` = DCBA
//! (straight little-endian), `BigLittle` = BADC (byte-swap within each
//! 16-bit half, halves stay in big-endian order), `LittleBig` = CDAB
//! (halves swap, byte order within each half stays big-endian).

use super::value::{Endian16, Endian32, Endian64};

/// The byte-order transform is its own inverse: applying it twice
/// restores the original 4 bytes, so the same function serves both
/// `encode32` and `decode32`.
fn transform32(be: [u8; 4], e: Endian32) -> [u8; 4] {
    match e {
        Endian32::BigBig => be,
        Endian32::LittleLittle => [be[3], be[2], be[1], be[0]],
        Endian32::BigLittle => [be[1], be[0], be[3], be[2]],
        Endian32::LittleBig => [be[2], be[3], be[0], be[1]],
    }
}

pub fn encode16(v: u16, e: Endian16) -> [u8; 2] {
    match e {
        Endian16::Little => v.to_le_bytes(),
        Endian16::Big => v.to_be_bytes(),
    }
}

pub fn decode16(bytes: [u8; 2], e: Endian16) -> u16 {
    match e {
        Endian16::Little => u16::from_le_bytes(bytes),
        Endian16::Big => u16::from_be_bytes(bytes),
    }
}

pub fn encode32(v: u32, e: Endian32) -> [u8; 4] {
    transform32(v.to_be_bytes(), e)
}

pub fn decode32(bytes: [u8; 4], e: Endian32) -> u32 {
    u32::from_be_bytes(transform32(bytes, e))
}

pub fn encode64(v: u64, e: Endian64) -> [u8; 8] {
    match e {
        Endian64::Little => v.to_le_bytes(),
        Endian64::Big => v.to_be_bytes(),
    }
}

pub fn decode64(bytes: [u8; 8], e: Endian64) -> u64 {
    match e {
        Endian64::Little => u64::from_le_bytes(bytes),
        Endian64::Big => u64::from_be_bytes(bytes),
    }
}

/// Promotes a raw numeric value to the reported `DOUBLE` per
/// `raw * decimal + bias`.
pub fn promote(raw: f64, decimal: f64, bias: f64) -> f64 {
    raw * decimal + bias
}

/// Inverse of [`promote`], used on the write path: divides the incoming
/// value by `decimal` (bias is not applied on write) and rounds to the
/// nearest integer for storage into an integral tag type.
pub fn demote_rounded(incoming: f64, decimal: f64) -> f64 {
    (incoming / decimal).round()
}

/// Scales a zero-precision, zero-bias `DOUBLE` by 10^5, rounds to an
/// integer, then scans the decimal digits for a run of five identical
/// `0` or `9` characters and truncates there to eliminate
/// floating-point representation noise (e.g. `19.999999997` -> `20.0`).
pub fn decimal_compaction(v: f64) -> f64 {
    let scaled = (v * 1e5).round();
    let digits = scaled.abs().to_string();
    let bytes = digits.as_bytes();

    let mut cut: Option<usize> = None;
    let mut run_char = 0u8;
    let mut run_len = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        if b == run_char {
            run_len += 1;
        } else if b == b'0' || b == b'9' {
            run_char = b;
            run_len = 1;
        } else {
            run_len = 0;
        }
        if run_len >= 5 {
            cut = Some(i + 1 - run_len);
            break;
        }
    }

    let truncated: f64 = match cut {
        Some(pos) => {
            let kept = &digits[..pos];
            if kept.is_empty() {
                0.0
            } else {
                kept.parse().unwrap_or(scaled.abs())
            }
        }
        None => scaled.abs(),
    };

    let signed = if scaled < 0.0 { -truncated } else { truncated };
    signed / 1e5
}
