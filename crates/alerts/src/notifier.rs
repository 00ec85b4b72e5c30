//! Alert delivery channels

use crate::error::{AlertError, AlertResult};
use crate::types::AlertFiring;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, firing: &AlertFiring) -> AlertResult<()>;
}

/// Writes each firing to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, firing: &AlertFiring) -> AlertResult<()> {
        info!(
            alert_id = %firing.alert_id,
            underlying = %firing.underlying,
            kind = firing.kind,
            "{}",
            firing.message
        );
        Ok(())
    }
}

/// Fans firings out to in-process subscribers.
///
/// Delivery fails when nobody is subscribed.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<AlertFiring>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertFiring> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, firing: &AlertFiring) -> AlertResult<()> {
        self.tx
            .send(firing.clone())
            .map(|_| ())
            .map_err(|_| AlertError::Delivery {
                notifier: self.name().to_string(),
                reason: "no subscribers".to_string(),
            })
    }
}
