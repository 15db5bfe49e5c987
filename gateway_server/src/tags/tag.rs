//! The `Tag`/`Group`/`Subscriber` data model and tag-level
//! validation.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::value::{AddressOption, TagType, TagValue};

pub const MAX_NAME_LEN: usize = 127;
pub const MAX_ADDRESS_LEN: usize = 127;
pub const MAX_DESCRIPTION_LEN: usize = 511;
pub const MAX_PRECISION: u8 = 17;
pub const MAX_FORMAT_TOKENS: usize = 8;
pub const BIAS_RANGE: f64 = 1000.0;

/// Groups are polled no faster than this, matching the source's
/// `INTERVAL_LIMIT`.
pub const INTERVAL_LIMIT_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagAttribute {
    bits: u8,
}

impl TagAttribute {
    pub const READ: u8 = 0b001;
    pub const WRITE: u8 = 0b010;
    pub const SUBSCRIBE: u8 = 0b100;

    pub fn new(bits: u8) -> Self {
        TagAttribute { bits }
    }

    pub fn has(self, flag: u8) -> bool {
        self.bits & flag != 0
    }

    pub fn is_readable(self) -> bool {
        self.has(Self::READ)
    }

    pub fn is_writable(self) -> bool {
        self.has(Self::WRITE)
    }

    pub fn is_subscribable(self) -> bool {
        self.has(Self::SUBSCRIBE)
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("tag name exceeds {MAX_NAME_LEN} characters")]
    TagNameTooLong,
    #[error("tag address exceeds {MAX_ADDRESS_LEN} characters")]
    TagAddressTooLong,
    #[error("tag description exceeds {MAX_DESCRIPTION_LEN} characters")]
    TagDescriptionTooLong,
    #[error("tag precision must be between 0 and {MAX_PRECISION}")]
    TagPrecisionInvalid,
    #[error("tag bias must be in range -{BIAS_RANGE}..{BIAS_RANGE} and only valid on numeric, non-write tags")]
    TagBiasInvalid,
    #[error("tag decimal scale is invalid for this tag type or attribute set")]
    TagDecimalInvalid,
    #[error("tag does not exist")]
    TagNotExist,
    #[error("group already exists")]
    GroupExist,
    #[error("group does not exist")]
    GroupNotExist,
}

/// A single addressable point on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub address: String,
    #[serde(skip, default)]
    pub attribute: TagAttrSerde,
    pub kind: TagType,
    pub precision: u8,
    pub decimal: f64,
    pub bias: f64,
    pub description: String,
    pub address_option: AddressOption,
    pub meta: Vec<u8>,
    pub format_tokens: Vec<String>,
}

/// `TagAttribute` isn't `Serialize`/`Deserialize` directly (it's a raw
/// bitset wrapper); persistence stores the bits as an integer via this
/// transparent newtype.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TagAttrSerde(pub u8);

impl From<TagAttrSerde> for TagAttribute {
    fn from(v: TagAttrSerde) -> Self {
        TagAttribute::new(v.0)
    }
}

impl Tag {
    pub fn attribute(&self) -> TagAttribute {
        TagAttribute::new(self.attribute.0)
    }

    /// Validates the static invariants: lengths, precision range,
    /// bias applicability/range, and decimal applicability by type.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.len() > MAX_NAME_LEN {
            return Err(ValidationError::TagNameTooLong);
        }
        if self.address.len() > MAX_ADDRESS_LEN {
            return Err(ValidationError::TagAddressTooLong);
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::TagDescriptionTooLong);
        }
        if self.precision > MAX_PRECISION {
            return Err(ValidationError::TagPrecisionInvalid);
        }

        let attr = self.attribute();
        if self.bias != 0.0 {
            if !self.kind.is_numeric() {
                return Err(ValidationError::TagBiasInvalid);
            }
            if attr.is_writable() {
                return Err(ValidationError::TagBiasInvalid);
            }
            if !(-BIAS_RANGE..=BIAS_RANGE).contains(&self.bias) {
                return Err(ValidationError::TagBiasInvalid);
            }
        }

        if self.decimal != 0.0 {
            let forbidden = matches!(self.kind, TagType::Bool | TagType::Bit | TagType::String);
            if forbidden {
                return Err(ValidationError::TagDecimalInvalid);
            }
        }

        Ok(())
    }
}

/// Identifies a `(driver_name, group_name, tag_name)` tuple, the key
/// used throughout the cache and reporting path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagKey {
    pub group: String,
    pub tag: String,
}

impl TagKey {
    pub fn new(group: impl Into<String>, tag: impl Into<String>) -> Self {
        TagKey {
            group: group.into(),
            tag: tag.into(),
        }
    }
}

/// A pending write, queued under the owning group's `wt_mtx` until the
/// write timer drains it.
#[derive(Debug, Clone)]
pub struct WriteItem {
    pub tag_name: String,
    pub value: TagValue,
    pub request_id: u64,
}

/// A bag of tags sharing one polling period and one subscriber set
/// within a driver.
pub struct Group {
    pub name: String,
    pub interval: Duration,
    pub tags: Vec<Tag>,
    pub change_timestamp: u64,
    pub apps: RwLock<Vec<Subscriber>>,
    pub write_queue: Mutex<VecDeque<WriteItem>>,
    pub cache_policy: CachePolicy,
}

/// Whether stale cache entries are allowed to surface in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    Interval,
    Never,
}

impl Group {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Group {
            name: name.into(),
            interval,
            tags: Vec::new(),
            change_timestamp: 0,
            apps: RwLock::new(Vec::new()),
            write_queue: Mutex::new(VecDeque::new()),
            cache_policy: CachePolicy::Interval,
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn find_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Interval updates below `INTERVAL_LIMIT_MS` are ignored.
    pub fn set_interval(&mut self, millis: u64) {
        if millis >= INTERVAL_LIMIT_MS {
            self.interval = Duration::from_millis(millis);
        }
    }
}

/// Identified by `(app_name, driver_name, group_name)`, unique per
/// triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    pub app_name: String,
    pub driver_name: String,
    pub group_name: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub static_tags: Option<String>,
}
