// Detected service records and per-service stats

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A service instance found by a plugin's detection strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedService {
    pub plugin_id: String,
    pub name: String,
    pub icon: String,
    pub base_url: String,
    /// Protocol generation, e.g. "v5"/"v6"; empty when unknown.
    pub version: String,
    /// Plugin-specific state carried across detection cycles (credentials, paths).
    pub meta: HashMap<String, String>,
}

impl DetectedService {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Running,
    Degraded,
    Error,
}

/// Semantic hint for how a summary value should be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Number,
    Percent,
    Status,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatItem {
    pub label: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: StatKind,
}

impl StatItem {
    pub fn new(label: impl Into<String>, value: impl Into<String>, kind: StatKind) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub plugin_id: String,
    pub name: String,
    pub icon: String,
    pub status: ServiceStatus,
    pub summary: Vec<StatItem>,
    pub stats: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub url: String,
}
