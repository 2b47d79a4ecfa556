// Service plugin capability set

use super::env::DetectionEnv;
use super::error::{Result, ServiceError};
use crate::models::{DetectedService, ServiceStatus, StatItem};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// What a plugin reports for one collection; the detector adds identity and URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceReport {
    pub status: ServiceStatus,
    pub summary: Vec<StatItem>,
    pub stats: Map<String, Value>,
    /// Protocol version learned while collecting, if the detection didn't know it.
    pub version: Option<String>,
}

impl ServiceReport {
    /// Converts typed plugin details into the free-form stats map.
    pub fn new(status: ServiceStatus, summary: Vec<StatItem>, details: &impl Serialize) -> Self {
        let stats = match serde_json::to_value(details) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            status,
            summary,
            stats,
            version: None,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Unique lowercase identifier, e.g. "pihole".
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Icon name shown by clients.
    fn icon(&self) -> &'static str;

    /// Runs the plugin's detection strategies in order; `None` when nothing answered.
    async fn detect(&self, env: &DetectionEnv) -> Option<DetectedService>;

    async fn collect(&self, svc: &DetectedService) -> Result<ServiceReport>;

    /// Runs a named action against a detected service and returns a short result message.
    async fn perform_action(
        &self,
        _svc: &DetectedService,
        action: &str,
        _params: &Map<String, Value>,
    ) -> Result<String> {
        Err(ServiceError::UnsupportedAction(action.to_string()))
    }

    /// Empty record carrying this plugin's identity.
    fn service_at(&self, base_url: String) -> DetectedService {
        DetectedService {
            plugin_id: self.id().to_string(),
            name: self.name().to_string(),
            icon: self.icon().to_string(),
            base_url,
            ..Default::default()
        }
    }
}
