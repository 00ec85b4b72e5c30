//! Alert registry and evaluation
//!
//! Each alert that fires gets a cooldown deadline. Until it passes the alert
//! is skipped no matter how often its condition holds. A firing only sets
//! the deadline when at least one notifier accepted it, so a delivery outage
//! never swallows a later legitimate alert. Deleting an alert drops its
//! deadline with it.

use crate::condition::AlertCondition;
use crate::error::{AlertError, AlertResult};
use crate::notifier::Notifier;
use crate::template::{default_template, render};
use crate::types::{Alert, AlertFiring, AlertSettings, AlertStatus, NewAlert};
use crate::view::MarketView;
use chrono::{DateTime, Duration, Utc};
use common::AlertId;
use observability::AlertMetrics;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AlertEngine {
    settings: AlertSettings,
    alerts: RwLock<HashMap<AlertId, Alert>>,
    cooldowns: Mutex<HashMap<AlertId, DateTime<Utc>>>,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    metrics: AlertMetrics,
}

impl AlertEngine {
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            settings,
            alerts: RwLock::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            notifiers: RwLock::new(Vec::new()),
            metrics: AlertMetrics::new(),
        }
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        info!(notifier = notifier.name(), "Alert notifier registered");
        self.notifiers.write().push(notifier);
    }

    pub fn create(&self, request: NewAlert) -> AlertResult<Alert> {
        if request.name.trim().is_empty() {
            return Err(AlertError::Invalid("name is empty".to_string()));
        }
        if request.underlying.trim().is_empty() {
            return Err(AlertError::Invalid("underlying is empty".to_string()));
        }
        request.condition.validate().map_err(AlertError::Invalid)?;

        let mut alerts = self.alerts.write();
        if alerts.len() >= self.settings.max_alerts {
            return Err(AlertError::LimitReached(self.settings.max_alerts));
        }

        let message_template = request
            .message_template
            .unwrap_or_else(|| default_template(&request.condition).to_string());
        let alert = Alert {
            id: AlertId::new(),
            name: request.name,
            underlying: request.underlying,
            condition: request.condition,
            message_template,
            cooldown_minutes: request
                .cooldown_minutes
                .unwrap_or(self.settings.default_cooldown_minutes),
            status: AlertStatus::Active,
            created_at: Utc::now(),
            last_fired_at: None,
            trigger_count: 0,
        };
        info!(
            alert_id = %alert.id,
            name = %alert.name,
            underlying = %alert.underlying,
            kind = alert.kind(),
            "Alert created"
        );
        alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// All alerts, optionally for one underlying, oldest first
    pub fn list(&self, underlying: Option<&str>) -> Vec<Alert> {
        let mut out: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|a| underlying.map_or(true, |u| a.underlying == u))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        out
    }

    pub fn get(&self, id: AlertId) -> AlertResult<Alert> {
        self.alerts.read().get(&id).cloned().ok_or(AlertError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_status(&self, id: AlertId, status: AlertStatus) -> AlertResult<()> {
        let mut alerts = self.alerts.write();
        let alert = alerts.get_mut(&id).ok_or(AlertError::NotFound(id))?;
        alert.status = status;
        info!(alert_id = %id, status = %status, "Alert status changed");
        Ok(())
    }

    pub fn pause(&self, id: AlertId) -> AlertResult<()> {
        self.set_status(id, AlertStatus::Paused)
    }

    /// Resume evaluation; a running cooldown is kept
    pub fn resume(&self, id: AlertId) -> AlertResult<()> {
        self.set_status(id, AlertStatus::Active)
    }

    pub fn delete(&self, id: AlertId) -> AlertResult<Alert> {
        let alert = self.alerts.write().remove(&id).ok_or(AlertError::NotFound(id))?;
        self.cooldowns.lock().remove(&id);
        info!(alert_id = %id, name = %alert.name, "Alert deleted");
        Ok(alert)
    }

    /// Install the standard PCR, OI and IV-rank alerts for `underlying`.
    ///
    /// Presets that already exist by name are left alone.
    pub fn install_presets(&self, underlying: &str) -> AlertResult<Vec<Alert>> {
        let existing: Vec<String> = self
            .list(Some(underlying))
            .into_iter()
            .map(|a| a.name)
            .collect();
        let mut created = Vec::new();
        for preset in presets(underlying) {
            if existing.contains(&preset.name) {
                continue;
            }
            created.push(self.create(preset)?);
        }
        debug!(underlying, created = created.len(), "Preset alerts installed");
        Ok(created)
    }

    /// Remaining cooldown deadline for `id`, if one is running at `now`
    pub fn cooling_until(&self, id: AlertId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cooldowns.lock().get(&id).copied().filter(|until| now < *until)
    }

    /// Check every active alert for the view's underlying and deliver those
    /// that fire. Returns the firings that reached at least one notifier.
    pub async fn evaluate(&self, view: &MarketView, now: DateTime<Utc>) -> Vec<AlertFiring> {
        self.metrics.record_evaluation();

        let candidates: Vec<(AlertFiring, u32)> = {
            let alerts = self.alerts.read();
            let cooldowns = self.cooldowns.lock();
            let due = alerts
                .values()
                .filter(|a| a.underlying == view.underlying && a.is_active())
                .filter(|a| cooldowns.get(&a.id).map_or(true, |until| now >= *until))
                .filter_map(|a| {
                    let trigger = a.condition.evaluate(view)?;
                    let firing = AlertFiring {
                        alert_id: a.id,
                        name: a.name.clone(),
                        underlying: a.underlying.clone(),
                        kind: a.kind(),
                        message: render(&a.message_template, &a.name, &a.condition, view, trigger.value),
                        value: trigger.value,
                        fired_at: now,
                    };
                    Some((firing, a.cooldown_minutes))
                })
                .collect();
            due
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        let notifiers: Vec<Arc<dyn Notifier>> = self.notifiers.read().clone();
        let mut delivered = Vec::with_capacity(candidates.len());
        for (firing, cooldown_minutes) in candidates {
            if !self.deliver(&notifiers, &firing).await {
                warn!(
                    alert_id = %firing.alert_id,
                    name = %firing.name,
                    "Alert not delivered; cooldown not started"
                );
                continue;
            }

            {
                let mut alerts = self.alerts.write();
                // deleted while delivering
                let Some(alert) = alerts.get_mut(&firing.alert_id) else {
                    continue;
                };
                alert.last_fired_at = Some(now);
                alert.trigger_count += 1;
            }
            self.cooldowns
                .lock()
                .insert(firing.alert_id, now + Duration::minutes(i64::from(cooldown_minutes)));
            self.metrics.record_fired(firing.kind);
            delivered.push(firing);
        }
        delivered
    }

    async fn deliver(&self, notifiers: &[Arc<dyn Notifier>], firing: &AlertFiring) -> bool {
        let mut any = false;
        for notifier in notifiers {
            match notifier.notify(firing).await {
                Ok(()) => any = true,
                Err(e) => {
                    self.metrics.record_delivery_failure();
                    warn!(alert_id = %firing.alert_id, notifier = notifier.name(), error = %e, "Alert delivery failed");
                }
            }
        }
        any
    }
}

fn presets(underlying: &str) -> Vec<NewAlert> {
    vec![
        NewAlert::new(
            format!("{} PCR High", underlying),
            underlying,
            AlertCondition::PcrAbove { threshold: 1.5 },
        )
        .with_template("{underlying} PCR {pcr} - extreme bearish sentiment"),
        NewAlert::new(
            format!("{} PCR Low", underlying),
            underlying,
            AlertCondition::PcrBelow { threshold: 0.5 },
        )
        .with_template("{underlying} PCR {pcr} - extreme bullish sentiment"),
        NewAlert::new(
            format!("{} OI Spike", underlying),
            underlying,
            AlertCondition::OiChangePct { threshold: 10.0 },
        )
        .with_template("{underlying} significant OI change: {oi_change_pct}%"),
        NewAlert::new(
            format!("{} IV High", underlying),
            underlying,
            AlertCondition::IvRankAbove { threshold: 70.0 },
        )
        .with_template("{underlying} IV rank {iv_rank} - favours selling options"),
        NewAlert::new(
            format!("{} IV Low", underlying),
            underlying,
            AlertCondition::IvRankBelow { threshold: 30.0 },
        )
        .with_template("{underlying} IV rank {iv_rank} - favours buying options"),
    ]
}
