/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! File-backed inventory.
//!
//! The file is a mapping of device name to descriptor fields:
//!
//! ```yaml
//! rtr1:
//!   host: 10.0.0.1
//!   adapter: ssh2
//!   adapter_driver: cisco_ios
//!   credential_id: lab
//! _filters:
//!   core:
//!     description: core routers
//!     fields:
//!       name: "^core-"
//! ```
//!
//! The reserved `_filters` key declares named filters and is never treated
//! as a device.

use crate::inventory::{Inventory, InventoryError, InventoryFilter};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tom_models::DeviceDescriptor;
use tracing::info;

#[derive(Debug, Deserialize)]
struct NamedFilter {
    #[serde(default)]
    description: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

pub struct YamlInventory {
    devices: BTreeMap<String, serde_yaml::Value>,
    filters: BTreeMap<String, NamedFilter>,
}

impl YamlInventory {
    pub fn load(path: &str) -> Result<Self, InventoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| InventoryError::Backend(format!("cannot read {}: {}", path, e)))?;
        Self::from_str(&raw).map(|inv| {
            info!(path, devices = inv.devices.len(), "yaml inventory loaded");
            inv
        })
    }

    pub fn from_str(raw: &str) -> Result<Self, InventoryError> {
        let mut root: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(raw)
            .map_err(|e| InventoryError::Backend(format!("invalid inventory yaml: {}", e)))?;

        let filters = match root.remove("_filters") {
            Some(value) => serde_yaml::from_value(value)
                .map_err(|e| InventoryError::Backend(format!("invalid _filters block: {}", e)))?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            devices: root,
            filters,
        })
    }

    fn descriptor(&self, name: &str) -> Result<DeviceDescriptor, InventoryError> {
        let value = self
            .devices
            .get(name)
            .ok_or_else(|| InventoryError::NotFound(name.to_string()))?;
        serde_yaml::from_value(value.clone()).map_err(|e| InventoryError::InvalidEntry {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Raw node with the device name folded in, for filtering and export.
    fn raw_node(&self, name: &str, value: &serde_yaml::Value) -> serde_json::Value {
        let mut node = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut node {
            map.insert(
                "name".to_string(),
                serde_json::Value::String(name.to_string()),
            );
        }
        node
    }
}

#[async_trait]
impl Inventory for YamlInventory {
    async fn get_device(&self, name: &str) -> Result<DeviceDescriptor, InventoryError> {
        self.descriptor(name)
    }

    async fn list_devices(
        &self,
        filter: &InventoryFilter,
    ) -> Result<Vec<DeviceDescriptor>, InventoryError> {
        let mut devices = Vec::new();
        for (name, value) in &self.devices {
            if filter.matches(&self.raw_node(name, value)) {
                devices.push(self.descriptor(name)?);
            }
        }
        Ok(devices)
    }

    async fn list_raw(
        &self,
        filter: &InventoryFilter,
    ) -> Result<Vec<serde_json::Value>, InventoryError> {
        Ok(self
            .devices
            .iter()
            .map(|(name, value)| self.raw_node(name, value))
            .filter(|node| filter.matches(node))
            .collect())
    }

    fn filterable_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("name".to_string(), "Device name (key in the file)".to_string()),
            ("host".to_string(), "IP address or hostname".to_string()),
            ("adapter".to_string(), "Transport family (ssh2 or russh)".to_string()),
            (
                "adapter_driver".to_string(),
                "Driver key (cisco_ios, arista_eos, ...)".to_string(),
            ),
            ("credential_id".to_string(), "Credential reference".to_string()),
            ("port".to_string(), "SSH port number".to_string()),
        ])
    }

    fn named_filters(&self) -> BTreeMap<String, String> {
        self.filters
            .iter()
            .map(|(name, f)| (name.clone(), f.description.clone()))
            .collect()
    }

    fn resolve_named_filter(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.filters.get(name).map(|f| f.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tom_models::AdapterKind;

    const INVENTORY: &str = r#"
rtr1:
  host: 10.0.0.1
  adapter: ssh2
  adapter_driver: cisco_ios
  credential_id: lab
core-sw1:
  host: 10.0.1.1
  port: 2222
  adapter: russh
  adapter_driver: arista_eos
  credential_id: lab
_filters:
  arista:
    description: Arista switches
    fields:
      adapter_driver: "^arista"
"#;

    #[tokio::test]
    async fn resolves_complete_descriptors() {
        let inv = YamlInventory::from_str(INVENTORY).unwrap();
        let d = inv.get_device("core-sw1").await.unwrap();
        assert_eq!(d.host, "10.0.1.1");
        assert_eq!(d.port, 2222);
        assert_eq!(d.adapter, AdapterKind::Russh);
    }

    #[tokio::test]
    async fn unknown_devices_are_not_found() {
        let inv = YamlInventory::from_str(INVENTORY).unwrap();
        assert!(matches!(
            inv.get_device("nope").await,
            Err(InventoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn incomplete_entries_are_invalid_not_partial() {
        let inv = YamlInventory::from_str(
            "broken:\n  adapter: ssh2\n  adapter_driver: cisco_ios\n  credential_id: lab\n",
        )
        .unwrap();
        // Missing host must be an error, never a descriptor with a blank host.
        assert!(matches!(
            inv.get_device("broken").await,
            Err(InventoryError::InvalidEntry { .. })
        ));
    }

    #[tokio::test]
    async fn filters_select_matching_devices() {
        let inv = YamlInventory::from_str(INVENTORY).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("adapter_driver".to_string(), "cisco".to_string());
        let filter = InventoryFilter::compile(&fields).unwrap();
        let devices = inv.list_devices(&filter).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].host, "10.0.0.1");
    }

    #[tokio::test]
    async fn named_filters_resolve_to_field_patterns() {
        let inv = YamlInventory::from_str(INVENTORY).unwrap();
        assert_eq!(inv.named_filters().len(), 1);
        let fields = inv.resolve_named_filter("arista").unwrap();
        let filter = InventoryFilter::compile(&fields).unwrap();
        let raw = inv.list_raw(&filter).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0]["name"], "core-sw1");
    }

    #[tokio::test]
    async fn filters_key_is_not_a_device() {
        let inv = YamlInventory::from_str(INVENTORY).unwrap();
        let all = inv.list_raw(&InventoryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(inv.get_device("_filters").await.is_err());
    }
}
