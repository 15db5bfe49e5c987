use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use opcua::{
    client::Client,
    types::{AttributeId, DataValue, NodeId, ReadValueId, Variant, WriteValue},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::{
    AdapterCallbacks, DriverConfig, DriverPlugin, PluginDescriptor, PluginError, PluginGroup,
    PluginResult, WriteRequest,
};
use crate::tags::{Tag, TagValue};

/// OPC-UA client plugin. The `opcua` client is not `Clone` and its
/// calls are `&mut self`, so the session lives behind a `Mutex` —
/// every `DriverPlugin` method still takes `&self`, matching the
/// generalized ABI.
pub struct OpcUaDriver {
    config: DriverConfig,
    descriptor: PluginDescriptor,
    client: Mutex<Option<Client>>,
    callbacks: Mutex<Option<Arc<dyn AdapterCallbacks>>>,
}

impl std::fmt::Debug for OpcUaDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcUaDriver").field("config", &self.config).finish()
    }
}

impl OpcUaDriver {
    pub fn new(config: DriverConfig) -> Self {
        OpcUaDriver {
            descriptor: PluginDescriptor {
                module_name: "opcua".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                kind: "client".into(),
            },
            config,
            client: Mutex::new(None),
            callbacks: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }


    /// Parses `ns=2;s=MyTag` / `ns=2;i=123` style addresses.
    fn parse_node_id(node_id_str: &str) -> Result<NodeId, Box<dyn StdError + Send + Sync>> {
        let parts: Vec<&str> = node_id_str.split(';').collect();
        if parts.len() != 2 {
            return Err(format!("invalid NodeId format: {}", node_id_str).into());
        }
        let ns = parts[0].trim_start_matches("ns=").parse::<u16>()?;
        let identifier = parts[1];
        if let Some(s) = identifier.strip_prefix("s=") {
            Ok(NodeId::new_string(ns, s.to_string()))
        } else if let Some(i) = identifier.strip_prefix("i=") {
            Ok(NodeId::new_numeric(ns, i.parse::<u32>()?))
        } else {
            Err(format!("unsupported NodeId identifier format: {}", identifier).into())
        }
    }

    fn data_value_to_tag_value(dv: &DataValue) -> TagValue {
        match dv.value() {
            Some(Variant::Boolean(b)) => TagValue::Bool(*b),
            Some(Variant::SByte(i)) => TagValue::Int8(*i),
            Some(Variant::Byte(u)) => TagValue::Uint8(*u),
            Some(Variant::Int16(i)) => TagValue::Int16(*i),
            Some(Variant::UInt16(u)) => TagValue::Uint16(*u),
            Some(Variant::Int32(i)) => TagValue::Int32(*i),
            Some(Variant::UInt32(u)) => TagValue::Uint32(*u),
            Some(Variant::Int64(i)) => TagValue::Int64(*i),
            Some(Variant::UInt64(u)) => TagValue::Uint64(*u),
            Some(Variant::Float(f)) => TagValue::Float(*f),
            Some(Variant::Double(d)) => TagValue::Double(*d),
            Some(Variant::String(s)) => TagValue::String(s.to_string()),
            _ => TagValue::Error(crate::tags::error_codes::NOT_READY),
        }
    }

    fn tag_value_to_variant(value: &TagValue) -> Option<Variant> {
        match value {
            TagValue::Bool(b) => Some(Variant::Boolean(*b)),
            TagValue::Bit(b) => Some(Variant::Boolean(*b)),
            TagValue::Int8(i) => Some(Variant::SByte(*i)),
            TagValue::Uint8(u) => Some(Variant::Byte(*u)),
            TagValue::Int16(i) => Some(Variant::Int16(*i)),
            TagValue::Uint16(u) | TagValue::Word(u) => Some(Variant::UInt16(*u)),
            TagValue::Int32(i) => Some(Variant::Int32(*i)),
            TagValue::Uint32(u) | TagValue::Dword(u) => Some(Variant::UInt32(*u)),
            TagValue::Int64(i) => Some(Variant::Int64(*i)),
            TagValue::Uint64(u) | TagValue::Lword(u) => Some(Variant::UInt64(*u)),
            TagValue::Float(f) => Some(Variant::Float(*f)),
            TagValue::Double(d) => Some(Variant::Double(*d)),
            TagValue::String(s) => Some(Variant::String(s.clone().into())),
            _ => None,
        }
    }
}

#[async_trait]
impl DriverPlugin for OpcUaDriver {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn open(&self, callbacks: Arc<dyn AdapterCallbacks>) -> PluginResult<()> {
        *self.callbacks.lock().await = Some(callbacks);
        debug!(driver = %self.config.id, "opcua plugin opened");
        Ok(())
    }

    async fn close(&self) -> PluginResult<()> {
        *self.callbacks.lock().await = None;
        Ok(())
    }

    async fn init(&self, _load_from_db: bool) -> PluginResult<()> {
        let mut client_guard = self.client.lock().await;
        if client_guard.is_some() {
            return Ok(());
        }
        info!(driver = %self.config.id, address = %self.config.address, "connecting opcua client");
        let client = Client::new(&self.config.address, None, None)
            .map_err(|e| PluginError::Transport(e.to_string()))?;
        *client_guard = Some(client);
        Ok(())
    }

    async fn uninit(&self) -> PluginResult<()> {
        let mut client_guard = self.client.lock().await;
        if client_guard.take().is_some() {
            info!(driver = %self.config.id, "opcua client disconnected");
        }
        Ok(())
    }

    async fn start(&self) -> PluginResult<()> {
        let guard = self.client.lock().await;
        if guard.is_none() {
            return Err(PluginError::NotRunning);
        }
        Ok(())
    }

    async fn stop(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn setting(&self, _setting_json: &str) -> PluginResult<()> {
        Ok(())
    }

    async fn validate_tag(&self, tag: &Tag) -> PluginResult<()> {
        Self::parse_node_id(&tag.address).map_err(|e| PluginError::InvalidSetting(e.to_string()))?;
        Ok(())
    }

    async fn group_timer(&self, group: &PluginGroup) -> PluginResult<()> {
        let mut client_guard = self.client.lock().await;
        let client = client_guard.as_mut().ok_or(PluginError::NotRunning)?;

        let mut requests = Vec::with_capacity(group.tags.len());
        for tag in &group.tags {
            let node_id =
                Self::parse_node_id(&tag.address).map_err(|e| PluginError::InvalidSetting(e.to_string()))?;
            requests.push(ReadValueId {
                node_id,
                attribute_id: AttributeId::Value as u32,
                index_range: None,
                data_encoding: None,
            });
        }

        let results = match client.read(&requests, 0.0).await {
            Ok(r) => r,
            Err(e) => {
                if let Some(callbacks) = self.callbacks.lock().await.clone() {
                    callbacks.update(&group.name, None, TagValue::plugin_error()).await;
                }
                return Err(PluginError::Transport(e.to_string()));
            }
        };

        let callbacks = self.callbacks.lock().await.clone();
        if let Some(callbacks) = callbacks {
            for (tag, dv) in group.tags.iter().zip(results.iter()) {
                callbacks
                    .update(&group.name, Some(&tag.name), Self::data_value_to_tag_value(dv))
                    .await;
            }
        }
        Ok(())
    }

    async fn group_sync(&self, group: &PluginGroup) -> Option<PluginResult<()>> {
        Some(self.group_timer(group).await)
    }

    async fn write_tag(&self, _req: &WriteRequest, tag: &Tag, value: TagValue) -> PluginResult<()> {
        let mut client_guard = self.client.lock().await;
        let client = client_guard.as_mut().ok_or(PluginError::NotRunning)?;
        let node_id =
            Self::parse_node_id(&tag.address).map_err(|e| PluginError::InvalidSetting(e.to_string()))?;
        let variant = Self::tag_value_to_variant(&value)
            .ok_or_else(|| PluginError::InvalidSetting("unsupported value type for write".into()))?;

        let write_value = WriteValue {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: None.into(),
            value: DataValue::new_now(variant),
        };

        client
            .write(&[write_value])
            .await
            .map_err(|e| PluginError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn write_tags(&self, req: &WriteRequest, items: &[(Tag, TagValue)]) -> PluginResult<()> {
        for (tag, value) in items {
            if let Err(e) = self.write_tag(req, tag, value.clone()).await {
                warn!(tag = %tag.name, error = %e, "write_tags: individual write failed");
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
