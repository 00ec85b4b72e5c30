//! Alert message templates
//!
//! Templates use `{name}` placeholders. Unknown names are left as written;
//! readings that are unavailable render as `n/a`.

use crate::condition::AlertCondition;
use crate::view::MarketView;

const UNAVAILABLE: &str = "n/a";

pub fn default_template(condition: &AlertCondition) -> &'static str {
    match condition {
        AlertCondition::PriceAbove { .. } => "{underlying} price {price} crossed above {threshold}",
        AlertCondition::PriceBelow { .. } => "{underlying} price {price} dropped below {threshold}",
        AlertCondition::PriceChangePct { .. } => "{underlying} price changed {price_change_pct}%",
        AlertCondition::OiChangePct { .. } => "{underlying} OI changed {oi_change_pct}%",
        AlertCondition::PcrAbove { .. } => "{underlying} PCR {pcr} crossed above {threshold}",
        AlertCondition::PcrBelow { .. } => "{underlying} PCR {pcr} dropped below {threshold}",
        AlertCondition::IvRankAbove { .. } => "{underlying} IV rank {iv_rank} is elevated",
        AlertCondition::IvRankBelow { .. } => "{underlying} IV rank {iv_rank} is depressed",
        AlertCondition::VolumeSpike { .. } => "{underlying} volume spike: {volume} vs avg {avg_volume}",
        AlertCondition::Buildup { .. } => "{underlying} OI buildup: {pattern}",
        AlertCondition::GreeksThreshold { .. } => "{underlying} net {greek} threshold crossed: {value}",
    }
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| UNAVAILABLE.to_string(), |v| format!("{:.2}", v))
}

/// Fill `template` from the alert's condition and the view it fired on
pub fn render(template: &str, name: &str, condition: &AlertCondition, view: &MarketView, value: Option<f64>) -> String {
    let greek = match condition {
        AlertCondition::GreeksThreshold { greek, .. } => greek.as_str(),
        _ => UNAVAILABLE,
    };
    let values: [(&str, String); 13] = [
        ("underlying", view.underlying.clone()),
        ("name", name.to_string()),
        ("threshold", number(condition.threshold())),
        ("value", number(value)),
        ("price", number(view.price)),
        ("price_change_pct", number(view.price_change_pct)),
        ("oi_change_pct", number(view.oi_change_pct)),
        ("pcr", number(view.pcr)),
        ("iv_rank", number(view.iv_rank)),
        ("volume", number(view.volume)),
        ("avg_volume", number(view.avg_volume)),
        ("pattern", view.buildup.map_or(UNAVAILABLE, |p| p.as_str()).to_string()),
        ("greek", greek.to_string()),
    ];

    let mut message = template.to_string();
    for (key, value) in values.iter() {
        let placeholder = format!("{{{}}}", key);
        if message.contains(&placeholder) {
            message = message.replace(&placeholder, value);
        }
    }
    message
}
