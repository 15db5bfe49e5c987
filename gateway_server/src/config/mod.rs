pub mod settings;

pub use settings::{OtelConfig, Settings, TagConfig};
