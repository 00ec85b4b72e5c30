//! Threshold and pattern alerts over options analytics
//!
//! Alerts watch a [`MarketView`] captured from the analytics coordinator:
//! price levels and moves, OI change, PCR, IV rank, volume spikes, buildup
//! patterns and net Greeks. Firings go out through [`Notifier`]s and are
//! gated by a per-alert cooldown.
//!
//! # Modules
//!
//! - [`condition`] - Alert conditions and evaluation
//! - [`view`] - Market readings an alert is checked against
//! - [`engine`] - Registry, cooldowns and delivery
//! - [`notifier`] - Delivery channels
//! - [`template`] - Message placeholders and defaults

pub mod condition;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod template;
pub mod types;
pub mod view;

pub use condition::{AlertCondition, Direction, GreekKind};
pub use engine::AlertEngine;
pub use error::{AlertError, AlertResult};
pub use notifier::{ChannelNotifier, LogNotifier, Notifier};
pub use types::{Alert, AlertFiring, AlertSettings, AlertStatus, NewAlert};
pub use view::MarketView;
