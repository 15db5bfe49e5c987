//! The tag data model (C) and tag value cache (C4).

pub mod cache;
pub mod range;
pub mod tag;
pub mod value;
pub mod wire;

pub use cache::{CacheElement, Metas, TagCache, META_SLOTS};
pub use range::{is_value_in_range, resolve_write_value, WriteValueError};
pub use tag::{
    CachePolicy, Group, Subscriber, Tag, TagAttribute, TagKey, ValidationError, WriteItem,
    INTERVAL_LIMIT_MS,
};
pub use value::{
    error_codes, AddressOption, BitOp, Endian16, Endian32, Endian64, StringEncoding, TagType,
    TagValue,
};
