use crate::condition::AlertCondition;
use chrono::{DateTime, Utc};
use common::AlertId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Paused,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Active => f.write_str("active"),
            AlertStatus::Paused => f.write_str("paused"),
        }
    }
}

/// A configured alert
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: AlertId,
    pub name: String,
    pub underlying: String,
    pub condition: AlertCondition,
    pub message_template: String,
    pub cooldown_minutes: u32,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        self.condition.kind()
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Request to create an alert; unset fields take engine defaults
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub name: String,
    pub underlying: String,
    pub condition: AlertCondition,
    #[serde(default)]
    pub message_template: Option<String>,
    #[serde(default)]
    pub cooldown_minutes: Option<u32>,
}

impl NewAlert {
    pub fn new(name: impl Into<String>, underlying: impl Into<String>, condition: AlertCondition) -> Self {
        Self {
            name: name.into(),
            underlying: underlying.into(),
            condition,
            message_template: None,
            cooldown_minutes: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    pub fn with_cooldown(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = Some(minutes);
        self
    }
}

/// One delivered (or attempted) alert
#[derive(Debug, Clone, Serialize)]
pub struct AlertFiring {
    pub alert_id: AlertId,
    pub name: String,
    pub underlying: String,
    pub kind: &'static str,
    pub message: String,
    pub value: Option<f64>,
    pub fired_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub default_cooldown_minutes: u32,
    pub max_alerts: usize,
    pub presets: bool,
}

impl From<&config::AlertsConfig> for AlertSettings {
    fn from(config: &config::AlertsConfig) -> Self {
        Self {
            default_cooldown_minutes: config.default_cooldown_minutes,
            max_alerts: config.max_alerts,
            presets: config.presets,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self::from(&config::AlertsConfig::default())
    }
}
