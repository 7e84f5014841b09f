/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Inventory plugins.
//!
//! An inventory resolves device names to connection descriptors and exports
//! filtered device sets. Plugins are compiled in and selected by name at
//! startup; one instance serves the process lifetime.
//!
//! Filters are field-name to regex mappings, case-insensitive, combined with
//! logical AND. A named filter, when supplied, replaces the inline filters.

pub mod netbox;
pub mod yaml;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tom_models::DeviceDescriptor;
use tom_utils::Settings;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("device '{0}' not found in inventory")]
    NotFound(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid inventory entry for '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },
    #[error("inventory backend error: {0}")]
    Backend(String),
}

/// Compiled inline filter: every field pattern must match its field value.
#[derive(Debug, Default)]
pub struct InventoryFilter {
    patterns: Vec<(String, Regex)>,
}

impl InventoryFilter {
    /// Compiles a field → regex mapping. Empty patterns are skipped; an
    /// unparseable pattern is an error, surfaced as a validation failure.
    pub fn compile(fields: &BTreeMap<String, String>) -> Result<Self, InventoryError> {
        let mut patterns = Vec::new();
        for (field, pattern) in fields {
            if pattern.is_empty() {
                continue;
            }
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    InventoryError::InvalidFilter(format!("field '{}': {}", field, e))
                })?;
            patterns.push((field.clone(), regex));
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Combines two filters; a node must pass both sets of patterns. Used to
    /// AND the process-wide configured filter with a request's filter.
    pub fn and(mut self, other: InventoryFilter) -> Self {
        self.patterns.extend(other.patterns);
        self
    }

    /// Whether a raw inventory node passes every configured pattern.
    pub fn matches(&self, node: &serde_json::Value) -> bool {
        self.patterns.iter().all(|(field, regex)| {
            let value = match node.get(field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            regex.is_match(&value)
        })
    }
}

/// Capability set every inventory plugin provides.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Resolves a device name into a complete connection descriptor.
    async fn get_device(&self, name: &str) -> Result<DeviceDescriptor, InventoryError>;

    /// Descriptors for every device passing the filter.
    async fn list_devices(
        &self,
        filter: &InventoryFilter,
    ) -> Result<Vec<DeviceDescriptor>, InventoryError>;

    /// Plugin-native records for every device passing the filter.
    async fn list_raw(
        &self,
        filter: &InventoryFilter,
    ) -> Result<Vec<serde_json::Value>, InventoryError>;

    /// Fields usable in inline filters, with descriptions.
    fn filterable_fields(&self) -> BTreeMap<String, String>;

    /// Predefined named filters, with descriptions.
    fn named_filters(&self) -> BTreeMap<String, String>;

    /// Resolves a named filter into its field patterns.
    fn resolve_named_filter(&self, name: &str) -> Option<BTreeMap<String, String>>;
}

/// Constructs the configured inventory plugin. The set is fixed at compile
/// time; the configuration string selects one.
pub fn build_inventory(settings: &Settings) -> Result<Arc<dyn Inventory>, InventoryError> {
    match settings.controller.inventory_type.as_str() {
        "yaml" => Ok(Arc::new(yaml::YamlInventory::load(
            &settings.controller.inventory_file,
        )?)),
        "netbox" => Ok(Arc::new(netbox::NetboxInventory::new(settings)?)),
        other => Err(InventoryError::Backend(format!(
            "unknown inventory type '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(json: serde_json::Value) -> serde_json::Value {
        json
    }

    #[test]
    fn filters_and_together() {
        let mut fields = BTreeMap::new();
        fields.insert("adapter_driver".to_string(), "cisco".to_string());
        fields.insert("host".to_string(), r"^10\.".to_string());
        let filter = InventoryFilter::compile(&fields).unwrap();

        assert!(filter.matches(&node(serde_json::json!({
            "host": "10.1.1.1", "adapter_driver": "cisco_ios"
        }))));
        assert!(!filter.matches(&node(serde_json::json!({
            "host": "192.168.1.1", "adapter_driver": "cisco_ios"
        }))));
        assert!(!filter.matches(&node(serde_json::json!({
            "host": "10.1.1.1", "adapter_driver": "arista_eos"
        }))));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "RTR".to_string());
        let filter = InventoryFilter::compile(&fields).unwrap();
        assert!(filter.matches(&node(serde_json::json!({"name": "rtr1"}))));
    }

    #[test]
    fn missing_fields_never_match() {
        let mut fields = BTreeMap::new();
        fields.insert("site".to_string(), ".+".to_string());
        let filter = InventoryFilter::compile(&fields).unwrap();
        assert!(!filter.matches(&node(serde_json::json!({"name": "rtr1"}))));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "([unclosed".to_string());
        assert!(InventoryFilter::compile(&fields).is_err());
    }

    #[test]
    fn combined_filters_require_both_sides() {
        let mut configured = BTreeMap::new();
        configured.insert("status".to_string(), "^active$".to_string());
        let mut inline = BTreeMap::new();
        inline.insert("host".to_string(), r"^10\.".to_string());

        let filter = InventoryFilter::compile(&configured)
            .unwrap()
            .and(InventoryFilter::compile(&inline).unwrap());

        assert!(filter.matches(&node(serde_json::json!({
            "host": "10.1.1.1", "status": "active"
        }))));
        // Passing the request filter is not enough on its own.
        assert!(!filter.matches(&node(serde_json::json!({
            "host": "10.1.1.1", "status": "decommissioned"
        }))));
        assert!(!filter.matches(&node(serde_json::json!({
            "host": "192.168.1.1", "status": "active"
        }))));
    }

    #[test]
    fn empty_patterns_are_skipped() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), String::new());
        let filter = InventoryFilter::compile(&fields).unwrap();
        assert!(filter.is_empty());
        assert!(filter.matches(&node(serde_json::json!({"anything": true}))));
    }
}
