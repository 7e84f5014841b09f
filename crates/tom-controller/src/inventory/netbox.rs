/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Source-of-truth inventory backed by a NetBox-style HTTP API.
//!
//! Devices are queried on demand; the platform slug reported by the source
//! is mapped to an adapter/driver pair through a fixed table. Devices without
//! a primary IP cannot be resolved into descriptors and surface as invalid
//! entries.

use crate::inventory::{Inventory, InventoryError, InventoryFilter};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tom_models::{AdapterKind, DeviceDescriptor};
use tom_utils::Settings;
use tracing::debug;

/// Platform slug to transport mapping. Unknown platforms fall back to the
/// blocking adapter with a generic driver.
const PLATFORM_MAP: &[(&str, AdapterKind, &str)] = &[
    ("cisco-ios", AdapterKind::Ssh2, "cisco_ios"),
    ("cisco-iosxe", AdapterKind::Russh, "cisco_iosxe"),
    ("cisco-nxos", AdapterKind::Russh, "cisco_nxos"),
    ("cisco-iosxr", AdapterKind::Russh, "cisco_iosxr"),
    ("arista-eos", AdapterKind::Russh, "arista_eos"),
    ("juniper-junos", AdapterKind::Russh, "juniper_junos"),
];

const DEFAULT_CREDENTIAL_ID: &str = "default";

#[derive(Debug, Deserialize)]
struct NbList {
    results: Vec<NbDevice>,
}

#[derive(Debug, Deserialize)]
struct NbDevice {
    name: String,
    #[serde(default)]
    primary_ip: Option<NbIp>,
    #[serde(default)]
    platform: Option<NbSlug>,
    #[serde(default)]
    site: Option<NbSlug>,
    #[serde(default)]
    status: Option<NbStatus>,
}

#[derive(Debug, Deserialize)]
struct NbIp {
    address: String,
}

#[derive(Debug, Deserialize)]
struct NbSlug {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct NbStatus {
    value: String,
}

pub struct NetboxInventory {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl NetboxInventory {
    pub fn new(settings: &Settings) -> Result<Self, InventoryError> {
        let base_url = settings
            .controller
            .netbox_url
            .clone()
            .ok_or_else(|| InventoryError::Backend("netbox_url is not configured".into()))?;
        let token = settings
            .controller
            .netbox_token
            .clone()
            .ok_or_else(|| InventoryError::Backend("netbox_token is not configured".into()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn query(&self, name: Option<&str>) -> Result<Vec<NbDevice>, InventoryError> {
        let mut url = format!("{}/api/dcim/devices/?limit=1000", self.base_url);
        if let Some(name) = name {
            url = format!("{}&name={}", url, name);
        }
        debug!(url = %url, "querying source of truth");
        let list: NbList = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await
            .map_err(|e| InventoryError::Backend(e.to_string()))?
            .error_for_status()
            .map_err(|e| InventoryError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| InventoryError::Backend(e.to_string()))?;
        Ok(list.results)
    }

    fn to_descriptor(device: &NbDevice) -> Result<DeviceDescriptor, InventoryError> {
        let ip = device
            .primary_ip
            .as_ref()
            .ok_or_else(|| InventoryError::InvalidEntry {
                name: device.name.clone(),
                reason: "no primary IP in source of truth".into(),
            })?;
        // Addresses come back in CIDR form.
        let host = ip.address.split('/').next().unwrap_or(&ip.address).to_string();

        let platform = device.platform.as_ref().map(|p| p.slug.as_str());
        let (adapter, driver) = platform
            .and_then(|slug| {
                PLATFORM_MAP
                    .iter()
                    .find(|(p, _, _)| *p == slug)
                    .map(|(_, a, d)| (*a, d.to_string()))
            })
            .unwrap_or((AdapterKind::Ssh2, "generic".to_string()));

        Ok(DeviceDescriptor {
            host,
            port: 22,
            adapter,
            adapter_driver: driver,
            credential_id: DEFAULT_CREDENTIAL_ID.to_string(),
            adapter_options: BTreeMap::new(),
        })
    }

    fn raw_node(device: &NbDevice) -> serde_json::Value {
        serde_json::json!({
            "name": device.name,
            "primary_ip": device.primary_ip.as_ref().map(|ip| ip.address.clone()),
            "platform": device.platform.as_ref().map(|p| p.slug.clone()),
            "site": device.site.as_ref().map(|s| s.slug.clone()),
            "status": device.status.as_ref().map(|s| s.value.clone()),
        })
    }
}

#[async_trait]
impl Inventory for NetboxInventory {
    async fn get_device(&self, name: &str) -> Result<DeviceDescriptor, InventoryError> {
        let devices = self.query(Some(name)).await?;
        let device = devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| InventoryError::NotFound(name.to_string()))?;
        Self::to_descriptor(device)
    }

    async fn list_devices(
        &self,
        filter: &InventoryFilter,
    ) -> Result<Vec<DeviceDescriptor>, InventoryError> {
        let devices = self.query(None).await?;
        devices
            .iter()
            .filter(|d| filter.matches(&Self::raw_node(d)))
            .map(Self::to_descriptor)
            .collect()
    }

    async fn list_raw(
        &self,
        filter: &InventoryFilter,
    ) -> Result<Vec<serde_json::Value>, InventoryError> {
        let devices = self.query(None).await?;
        Ok(devices
            .iter()
            .map(Self::raw_node)
            .filter(|node| filter.matches(node))
            .collect())
    }

    fn filterable_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("name".to_string(), "Device name".to_string()),
            ("primary_ip".to_string(), "Primary IP address (CIDR)".to_string()),
            ("platform".to_string(), "Platform slug".to_string()),
            ("site".to_string(), "Site slug".to_string()),
            ("status".to_string(), "Lifecycle status".to_string()),
        ])
    }

    fn named_filters(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "active".to_string(),
            "Devices in active status".to_string(),
        )])
    }

    fn resolve_named_filter(&self, name: &str) -> Option<BTreeMap<String, String>> {
        match name {
            "active" => Some(BTreeMap::from([(
                "status".to_string(),
                "^active$".to_string(),
            )])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(json: serde_json::Value) -> NbDevice {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn cidr_addresses_are_stripped() {
        let d = device(serde_json::json!({
            "name": "rtr1",
            "primary_ip": {"address": "10.0.0.1/24"},
            "platform": {"slug": "cisco-ios"}
        }));
        let desc = NetboxInventory::to_descriptor(&d).unwrap();
        assert_eq!(desc.host, "10.0.0.1");
        assert_eq!(desc.adapter, AdapterKind::Ssh2);
        assert_eq!(desc.adapter_driver, "cisco_ios");
    }

    #[test]
    fn unknown_platforms_fall_back_to_generic() {
        let d = device(serde_json::json!({
            "name": "mystery",
            "primary_ip": {"address": "10.0.0.9/32"}
        }));
        let desc = NetboxInventory::to_descriptor(&d).unwrap();
        assert_eq!(desc.adapter_driver, "generic");
    }

    #[test]
    fn missing_primary_ip_is_an_invalid_entry() {
        let d = device(serde_json::json!({"name": "no-ip"}));
        assert!(matches!(
            NetboxInventory::to_descriptor(&d),
            Err(InventoryError::InvalidEntry { .. })
        ));
    }
}
