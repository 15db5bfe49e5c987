//! The typed tag-value model: the semantic type set, the discriminated
//! value union, and the range/endian/decimal arithmetic the driver
//! adapter applies on the way in and out of the cache.

use serde::{Deserialize, Serialize};

/// Reserved `ERROR` sentinel codes. `TagValue::Error` is not limited to
/// these, but the adapter never emits any other code for these five
/// conditions.
pub mod error_codes {
    pub const NOT_READY: i32 = -1;
    pub const VALUE_EXPIRED: i32 = -2;
    pub const PLUGIN_NOT_RUNNING: i32 = -3;
    pub const READ_SYNC_UNSUPPORTED: i32 = -4;
    /// A plugin reported a group-wide failure (`update(tag=None)`)
    /// rather than a single tag's value.
    pub const PLUGIN_ERROR: i32 = -5;
}

/// The semantic type a [`Tag`](super::tag::Tag) is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Bit,
    Bool,
    Float,
    Double,
    String,
    Time,
    DateTime,
    /// Alias over `Uint16`, kept distinct so address-option validation can
    /// still tell a PLC "WORD" tag apart from an explicit unsigned tag.
    Word,
    /// Alias over `Uint32`.
    Dword,
    /// Alias over `Uint64`.
    Lword,
    Bytes,
    ArrayInt16,
    ArrayUint16,
    ArrayInt32,
    ArrayUint32,
    ArrayInt64,
    ArrayUint64,
    ArrayFloat,
    ArrayDouble,
    ArrayBool,
    ArrayString,
    Ptr,
    Custom,
    Error,
}

impl TagType {
    /// Width in bytes of a scalar numeric representation, for endian
    /// option validation. `None` for types with no fixed wire width.
    pub fn numeric_width(self) -> Option<u8> {
        use TagType::*;
        match self {
            Int8 | Uint8 | Bit | Bool => Some(1),
            Int16 | Uint16 | Word => Some(2),
            Int32 | Uint32 | Dword | Float => Some(4),
            Int64 | Uint64 | Lword | Double | Time | DateTime => Some(8),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        use TagType::*;
        matches!(
            self,
            Int8 | Uint8
                | Int16
                | Uint16
                | Int32
                | Uint32
                | Int64
                | Uint64
                | Float
                | Double
                | Word
                | Dword
                | Lword
        )
    }
}

/// 16-bit endian option. `L`/`B` are the plain little/big endian forms;
/// the 32/64-bit variants additionally control half-word swapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian16 {
    Little,
    Big,
}

/// 32-bit endian option: `LL`/`BB` are straight little/big endian,
/// `LB`/`BL` swap the byte order of each 16-bit half independently of
/// the half-word order (the "mixed endian" PLC encodings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian32 {
    LittleLittle,
    LittleBig,
    BigBig,
    BigLittle,
}

/// 64-bit endian option, analogous to [`Endian16`] at double width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian64 {
    Little,
    Big,
}

/// String length-prefix/encoding option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringEncoding {
    /// Length byte precedes the string (1-byte length, "H" = header).
    H,
    /// Length is implied by the declared address-option length ("L").
    L,
    /// Delimited, e.g. NUL-terminated ("D").
    D,
    /// Encoded length is a fixed external constant ("E").
    E,
}

/// Single-bit addressing operation within a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOp {
    Read,
    Set,
    Clear,
    Toggle,
}

/// The address-option union, discriminated by [`TagType`]. Only one
/// variant is meaningful for any given tag, selected by its declared
/// type at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AddressOption {
    None,
    Endian16(Endian16),
    Endian32(Endian32),
    Endian64(Endian64),
    StringOpt { length: u16, encoding: StringEncoding },
    BytesOpt { length: u16 },
    BitOpt { position: u8, op: BitOp },
}

/// A bounded byte array payload — used by `BYTES` and as the backing
/// store for `PTR`.
pub type ByteArray = Vec<u8>;

/// The tagged-union runtime value. Owned variants (`ArrayString`, `Ptr`,
/// `Custom`) own their heap payload directly; there is no manual
/// free/refcount dance because Rust ownership already gives the single
/// owner per value the source's cache destructor had to hand-enforce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Bit(bool),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    /// Milliseconds since midnight.
    Time(u32),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Word(u16),
    Dword(u32),
    Lword(u64),
    Bytes(ByteArray),
    ArrayInt16(Vec<i16>),
    ArrayUint16(Vec<u16>),
    ArrayInt32(Vec<i32>),
    ArrayUint32(Vec<u32>),
    ArrayInt64(Vec<i64>),
    ArrayUint64(Vec<u64>),
    ArrayFloat(Vec<f32>),
    ArrayDouble(Vec<f64>),
    ArrayBool(Vec<bool>),
    ArrayString(Vec<String>),
    Ptr {
        ty: Box<TagType>,
        length: usize,
        bytes: ByteArray,
    },
    Custom(serde_json::Value),
    Error(i32),
}

impl TagValue {
    pub fn not_ready() -> Self {
        TagValue::Error(error_codes::NOT_READY)
    }

    pub fn value_expired() -> Self {
        TagValue::Error(error_codes::VALUE_EXPIRED)
    }

    pub fn plugin_not_running() -> Self {
        TagValue::Error(error_codes::PLUGIN_NOT_RUNNING)
    }

    pub fn read_sync_unsupported() -> Self {
        TagValue::Error(error_codes::READ_SYNC_UNSUPPORTED)
    }

    pub fn plugin_error() -> Self {
        TagValue::Error(error_codes::PLUGIN_ERROR)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TagValue::Error(_))
    }

    pub fn tag_type(&self) -> TagType {
        use TagValue::*;
        match self {
            Int8(_) => TagType::Int8,
            Uint8(_) => TagType::Uint8,
            Int16(_) => TagType::Int16,
            Uint16(_) => TagType::Uint16,
            Int32(_) => TagType::Int32,
            Uint32(_) => TagType::Uint32,
            Int64(_) => TagType::Int64,
            Uint64(_) => TagType::Uint64,
            Bit(_) => TagType::Bit,
            Bool(_) => TagType::Bool,
            Float(_) => TagType::Float,
            Double(_) => TagType::Double,
            String(_) => TagType::String,
            Time(_) => TagType::Time,
            DateTime(_) => TagType::DateTime,
            Word(_) => TagType::Word,
            Dword(_) => TagType::Dword,
            Lword(_) => TagType::Lword,
            Bytes(_) => TagType::Bytes,
            ArrayInt16(_) => TagType::ArrayInt16,
            ArrayUint16(_) => TagType::ArrayUint16,
            ArrayInt32(_) => TagType::ArrayInt32,
            ArrayUint32(_) => TagType::ArrayUint32,
            ArrayInt64(_) => TagType::ArrayInt64,
            ArrayUint64(_) => TagType::ArrayUint64,
            ArrayFloat(_) => TagType::ArrayFloat,
            ArrayDouble(_) => TagType::ArrayDouble,
            ArrayBool(_) => TagType::ArrayBool,
            ArrayString(_) => TagType::ArrayString,
            Ptr { .. } => TagType::Ptr,
            Custom(_) => TagType::Custom,
            Error(_) => TagType::Error,
        }
    }

    /// Best-effort conversion to `f64`, used by decimal/bias promotion
    /// and by range checks against numeric tag types.
    pub fn as_f64(&self) -> Option<f64> {
        use TagValue::*;
        match *self {
            Int8(v) => Some(v as f64),
            Uint8(v) => Some(v as f64),
            Int16(v) => Some(v as f64),
            Uint16(v) => Some(v as f64),
            Int32(v) => Some(v as f64),
            Uint32(v) => Some(v as f64),
            Int64(v) => Some(v as f64),
            Uint64(v) => Some(v as f64),
            Word(v) => Some(v as f64),
            Dword(v) => Some(v as f64),
            Lword(v) => Some(v as f64),
            Float(v) => Some(v as f64),
            Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        use TagValue::*;
        match *self {
            Int8(v) => Some(v as i64),
            Uint8(v) => Some(v as i64),
            Int16(v) => Some(v as i64),
            Uint16(v) => Some(v as i64),
            Int32(v) => Some(v as i64),
            Uint32(v) => Some(v as i64),
            Int64(v) => Some(v),
            Uint64(v) => Some(v as i64),
            Word(v) => Some(v as i64),
            Dword(v) => Some(v as i64),
            Lword(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Compares two values for the cache's change-detection algorithm.
    /// Floats/doubles compare with tolerance `10^(-precision)` when
    /// `precision > 0`, else exactly; JSON uses deep equality; strings
    /// and byte arrays compare length then bytes.
    pub fn equal_for_change_detection(&self, other: &TagValue, precision: u8) -> bool {
        match (self, other) {
            (TagValue::Float(a), TagValue::Float(b)) => {
                float_eq_with_precision(*a as f64, *b as f64, precision)
            }
            (TagValue::Double(a), TagValue::Double(b)) => {
                float_eq_with_precision(*a, *b, precision)
            }
            (TagValue::Custom(a), TagValue::Custom(b)) => a == b,
            (TagValue::String(a), TagValue::String(b)) => a.len() == b.len() && a == b,
            (TagValue::Bytes(a), TagValue::Bytes(b)) => a.len() == b.len() && a == b,
            (TagValue::ArrayString(a), TagValue::ArrayString(b)) => a.len() == b.len() && a == b,
            (TagValue::Ptr { bytes: a, .. }, TagValue::Ptr { bytes: b, .. }) => {
                a.len() == b.len() && a == b
            }
            _ => values_bitwise_equal(self, other),
        }
    }
}

fn float_eq_with_precision(a: f64, b: f64, precision: u8) -> bool {
    if precision > 0 {
        let tolerance = 10f64.powi(-(precision as i32));
        (a - b).abs() <= tolerance
    } else {
        a == b
    }
}

/// Bitwise/structural equality fallback for non-float, non-string,
/// non-JSON variants (scalars, arrays of scalars).
fn values_bitwise_equal(a: &TagValue, b: &TagValue) -> bool {
    use TagValue::*;
    match (a, b) {
        (Int8(x), Int8(y)) => x == y,
        (Uint8(x), Uint8(y)) => x == y,
        (Int16(x), Int16(y)) => x == y,
        (Uint16(x), Uint16(y)) => x == y,
        (Int32(x), Int32(y)) => x == y,
        (Uint32(x), Uint32(y)) => x == y,
        (Int64(x), Int64(y)) => x == y,
        (Uint64(x), Uint64(y)) => x == y,
        (Bit(x), Bit(y)) => x == y,
        (Bool(x), Bool(y)) => x == y,
        (Time(x), Time(y)) => x == y,
        (DateTime(x), DateTime(y)) => x == y,
        (Word(x), Word(y)) => x == y,
        (Dword(x), Dword(y)) => x == y,
        (Lword(x), Lword(y)) => x == y,
        (ArrayInt16(x), ArrayInt16(y)) => x == y,
        (ArrayUint16(x), ArrayUint16(y)) => x == y,
        (ArrayInt32(x), ArrayInt32(y)) => x == y,
        (ArrayUint32(x), ArrayUint32(y)) => x == y,
        (ArrayInt64(x), ArrayInt64(y)) => x == y,
        (ArrayUint64(x), ArrayUint64(y)) => x == y,
        (ArrayBool(x), ArrayBool(y)) => x == y,
        (ArrayFloat(x), ArrayFloat(y)) => x == y,
        (ArrayDouble(x), ArrayDouble(y)) => x == y,
        (Error(x), Error(y)) => x == y,
        _ => false,
    }
}
