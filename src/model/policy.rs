//! Replication policy records
//!
//! Policies are persisted and scheduled elsewhere; the core only validates
//! them and reads the fields that shape a transfer.

use crate::error::{ReplicationError, Result};
use crate::model::filter::Filter;
use crate::model::info::TriggerType;
use crate::model::registry::Registry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// Six-field cron expression, seconds first
    #[serde(default)]
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_settings: Option<TriggerSettings>,
}

impl Trigger {
    pub fn manual() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            trigger_settings: None,
        }
    }

    pub fn scheduled(cron: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Scheduled,
            trigger_settings: Some(TriggerSettings { cron: cron.into() }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trigger_type != TriggerType::Scheduled {
            return Ok(());
        }
        let cron = self
            .trigger_settings
            .as_ref()
            .map(|s| s.cron.trim())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ReplicationError::invalid("the cron string cannot be empty"))?;
        validate_cron(cron)
    }
}

/// Checks the shape of a six-field cron expression
fn validate_cron(cron: &str) -> Result<()> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(ReplicationError::invalid(format!(
            "invalid cron {}: expected 6 fields, got {}",
            cron,
            fields.len()
        )));
    }
    for field in fields {
        let valid = field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?' | '#'));
        if !valid {
            return Err(ReplicationError::invalid(format!("invalid cron field {} in {}", field, cron)));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_registry: Option<Registry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_registry: Option<Registry>,
    #[serde(default)]
    pub dest_namespace: String,
    /// How many leading path components of the source repository the namespace replaces; -1 keeps the path
    #[serde(default = "default_replace_count")]
    pub dest_namespace_replace_count: i8,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub replicate_deletion: bool,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    #[serde(default)]
    pub enabled: bool,
    /// KiB per second, 0 or negative for unlimited
    #[serde(default)]
    pub speed: i32,
    #[serde(default)]
    pub copy_by_chunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

fn default_replace_count() -> i8 {
    -1
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ReplicationError::invalid("empty name"));
        }
        match (&self.src_registry, &self.dest_registry) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(ReplicationError::invalid(
                    "exactly one of the source and destination registries must be set",
                ));
            }
            (Some(registry), None) | (None, Some(registry)) => registry.validate()?,
        }
        if self.dest_namespace.contains("//") || self.dest_namespace.starts_with('/') {
            return Err(ReplicationError::invalid(format!(
                "invalid destination namespace: {}",
                self.dest_namespace
            )));
        }
        if self.dest_namespace_replace_count < -1 {
            return Err(ReplicationError::invalid("invalid destination namespace replace count"));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        if let Some(trigger) = &self.trigger {
            trigger.validate()?;
        }
        if self.speed < 0 {
            return Err(ReplicationError::invalid(format!("speed {} is less than 0", self.speed)));
        }
        Ok(())
    }

    /// Destination repository for a source repository under this policy
    pub fn destination_repository(&self, source: &str) -> String {
        if self.dest_namespace.is_empty() {
            return source.to_string();
        }
        let namespace = self.dest_namespace.trim_end_matches('/');
        let components: Vec<&str> = source.split('/').collect();
        let kept = match self.dest_namespace_replace_count {
            // flatten: replace everything except the last component
            -1 => &components[components.len().saturating_sub(1)..],
            n => {
                let n = (n as usize).min(components.len());
                &components[n..]
            }
        };
        if kept.is_empty() {
            namespace.to_string()
        } else {
            format!("{}/{}", namespace, kept.join("/"))
        }
    }
}
