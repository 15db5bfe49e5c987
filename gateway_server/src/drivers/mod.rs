//! Protocol plugins implementing [`traits::DriverPlugin`].

pub mod opcua;
pub mod traits;

pub use opcua::OpcUaDriver;
pub use traits::{
    AdapterCallbacks, DriverConfig, DriverPlugin, ExtendedPluginOps, PluginDescriptor, PluginError,
    PluginGroup, PluginResult, SharedPlugin, WriteRequest,
};
