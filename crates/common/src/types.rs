//! Common types used across the confluence engine
//!
//! This module provides the fundamental market data and identity types
//! shared by the analytics, provider, scalper and alert crates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique identifier for scalper trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeId(pub Uuid);

impl TradeId {
    /// Create a new random TradeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TradeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Option type (call or put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Call option
    Call,
    /// Put option
    Put,
}

impl OptionType {
    /// Returns the opposite leg type
    pub fn inverse(&self) -> Self {
        match self {
            OptionType::Call => OptionType::Put,
            OptionType::Put => OptionType::Call,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, OptionType::Call)
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "CE"),
            OptionType::Put => write!(f, "PE"),
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "call" | "ce" | "c" => Ok(OptionType::Call),
            "put" | "pe" | "p" => Ok(OptionType::Put),
            _ => Err(crate::Error::UnknownOptionType(s.to_string())),
        }
    }
}

/// Directional market view derived from analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn is_directional(&self) -> bool {
        !matches!(self, Sentiment::Neutral)
    }

    /// Combine two independent reads; disagreement collapses to neutral
    pub fn combine(self, other: Sentiment) -> Sentiment {
        match (self, other) {
            (a, b) if a == b => a,
            (a, Sentiment::Neutral) => a,
            (Sentiment::Neutral, b) => b,
            _ => Sentiment::Neutral,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Bullish => write!(f, "bullish"),
            Sentiment::Bearish => write!(f, "bearish"),
            Sentiment::Neutral => write!(f, "neutral"),
        }
    }
}

/// Identity of a single option leg
///
/// Strike participates in equality and hashing through its bit pattern, so
/// two contracts are the same leg only when built from the same strike value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: f64,
    pub option_type: OptionType,
}

impl OptionContract {
    pub fn new(
        underlying: impl Into<String>,
        expiry: NaiveDate,
        strike: f64,
        option_type: OptionType,
    ) -> Self {
        Self {
            underlying: underlying.into(),
            expiry,
            strike,
            option_type,
        }
    }

    /// Exchange-style trading symbol, e.g. `NIFTY24OCT25000CE`
    pub fn symbol(&self) -> String {
        format!(
            "{}{}{}{}",
            self.underlying,
            self.expiry.format("%y%b").to_string().to_uppercase(),
            self.strike,
            self.option_type
        )
    }
}

impl PartialEq for OptionContract {
    fn eq(&self, other: &Self) -> bool {
        self.underlying == other.underlying
            && self.expiry == other.expiry
            && self.strike.to_bits() == other.strike.to_bits()
            && self.option_type == other.option_type
    }
}

impl Eq for OptionContract {}

impl Hash for OptionContract {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.underlying.hash(state);
        self.expiry.hash(state);
        self.strike.to_bits().hash(state);
        self.option_type.hash(state);
    }
}

impl std::fmt::Display for OptionContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.underlying, self.expiry, self.strike, self.option_type
        )
    }
}

/// Point-in-time market data for one option leg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSnapshot {
    pub contract: OptionContract,
    pub ltp: f64,
    pub oi: u64,
    #[serde(default)]
    pub oi_change: i64,
    #[serde(default)]
    pub volume: u64,
    pub underlying_price: f64,
    /// Exchange-quoted implied volatility as a decimal, if any
    #[serde(default)]
    pub iv: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A full option chain fetched in one provider call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub underlying: String,
    pub spot: f64,
    pub timestamp: DateTime<Utc>,
    pub snapshots: Vec<OptionSnapshot>,
}

impl OptionChain {
    /// Distinct expiries, ascending
    pub fn expiries(&self) -> Vec<NaiveDate> {
        let mut expiries: Vec<NaiveDate> =
            self.snapshots.iter().map(|s| s.contract.expiry).collect();
        expiries.sort();
        expiries.dedup();
        expiries
    }

    pub fn nearest_expiry(&self) -> Option<NaiveDate> {
        self.snapshots.iter().map(|s| s.contract.expiry).min()
    }

    /// Snapshots for a single expiry
    pub fn for_expiry(&self, expiry: NaiveDate) -> impl Iterator<Item = &OptionSnapshot> {
        self.snapshots
            .iter()
            .filter(move |s| s.contract.expiry == expiry)
    }

    /// Distinct strikes for an expiry, ascending
    pub fn strikes(&self, expiry: NaiveDate) -> Vec<f64> {
        let mut strikes: Vec<f64> = self.for_expiry(expiry).map(|s| s.contract.strike).collect();
        strikes.sort_by(|a, b| a.total_cmp(b));
        strikes.dedup();
        strikes
    }

    /// Strike closest to spot for an expiry
    pub fn atm_strike(&self, expiry: NaiveDate) -> Option<f64> {
        self.strikes(expiry)
            .into_iter()
            .min_by(|a, b| (a - self.spot).abs().total_cmp(&(b - self.spot).abs()))
    }

    pub fn find(
        &self,
        expiry: NaiveDate,
        strike: f64,
        option_type: OptionType,
    ) -> Option<&OptionSnapshot> {
        self.snapshots.iter().find(|s| {
            s.contract.expiry == expiry
                && s.contract.strike == strike
                && s.contract.option_type == option_type
        })
    }
}

/// Last-traded quote for any instrument (underlying or option leg)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub quantity: u64,
    pub timestamp: DateTime<Utc>,
}

/// Exchange clock offset from UTC (IST, +05:30)
pub const EXCHANGE_UTC_OFFSET_SECS: i64 = 5 * 3600 + 30 * 60;

/// Calendar date of the exchange session `timestamp` falls in
pub fn trading_date(timestamp: DateTime<Utc>) -> NaiveDate {
    (timestamp + chrono::Duration::seconds(EXCHANGE_UTC_OFFSET_SECS)).date_naive()
}

impl Tick {
    pub fn trading_date(&self) -> NaiveDate {
        trading_date(self.timestamp)
    }

    pub fn new(symbol: impl Into<String>, price: f64, quantity: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            quantity,
            timestamp,
        }
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub fn as_seconds(&self) -> i64 {
        match self {
            CandleInterval::OneMinute => 60,
            CandleInterval::FiveMinutes => 300,
            CandleInterval::FifteenMinutes => 900,
            CandleInterval::OneHour => 3600,
            CandleInterval::OneDay => 86400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::OneDay => "1d",
        }
    }
}

impl std::str::FromStr for CandleInterval {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1m" => Ok(CandleInterval::OneMinute),
            "5m" => Ok(CandleInterval::FiveMinutes),
            "15m" => Ok(CandleInterval::FifteenMinutes),
            "1h" => Ok(CandleInterval::OneHour),
            "1d" => Ok(CandleInterval::OneDay),
            _ => Err(crate::Error::UnknownInterval(s.to_string())),
        }
    }
}

/// OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: CandleInterval,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    /// Start a new bar from the first trade in its window
    pub fn open_with(
        symbol: impl Into<String>,
        interval: CandleInterval,
        open_time: DateTime<Utc>,
        price: f64,
        quantity: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity,
        }
    }

    pub fn update(&mut self, price: f64, quantity: u64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 31).unwrap()
    }

    #[test]
    fn test_contract_identity() {
        let a = OptionContract::new("NIFTY", expiry(), 25000.0, OptionType::Call);
        let b = OptionContract::new("NIFTY", expiry(), 25000.0, OptionType::Call);
        let c = OptionContract::new("NIFTY", expiry(), 25000.0, OptionType::Put);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        assert_eq!(a.symbol(), "NIFTY24OCT25000CE");
    }

    #[test]
    fn test_trading_date_uses_exchange_clock() {
        use chrono::TimeZone;
        // 18:29 UTC is 23:59 IST, 18:31 UTC is already the next day
        let late = Utc.with_ymd_and_hms(2024, 10, 21, 18, 29, 0).unwrap();
        let rolled = Utc.with_ymd_and_hms(2024, 10, 21, 18, 31, 0).unwrap();
        assert_eq!(trading_date(late), NaiveDate::from_ymd_opt(2024, 10, 21).unwrap());
        assert_eq!(trading_date(rolled), NaiveDate::from_ymd_opt(2024, 10, 22).unwrap());
    }

    #[test]
    fn test_sentiment_combine() {
        use Sentiment::*;
        assert_eq!(Bullish.combine(Bullish), Bullish);
        assert_eq!(Bullish.combine(Neutral), Bullish);
        assert_eq!(Neutral.combine(Bearish), Bearish);
        assert_eq!(Bullish.combine(Bearish), Neutral);
    }

    #[test]
    fn test_option_type_parse() {
        assert_eq!("CE".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("put".parse::<OptionType>().unwrap(), OptionType::Put);
        assert!(matches!("x".parse::<OptionType>(), Err(crate::Error::UnknownOptionType(_))));
        assert_eq!("5m".parse::<CandleInterval>().unwrap(), CandleInterval::FiveMinutes);
        assert!("2m".parse::<CandleInterval>().is_err());
        assert_eq!(OptionType::Call.inverse(), OptionType::Put);
    }

    #[test]
    fn test_chain_atm_strike() {
        let ts = Utc::now();
        let snapshots = [24900.0, 25000.0, 25100.0]
            .iter()
            .map(|&k| OptionSnapshot {
                contract: OptionContract::new("NIFTY", expiry(), k, OptionType::Call),
                ltp: 10.0,
                oi: 100,
                oi_change: 0,
                volume: 0,
                underlying_price: 25040.0,
                iv: None,
                timestamp: ts,
            })
            .collect();
        let chain = OptionChain {
            underlying: "NIFTY".into(),
            spot: 25040.0,
            timestamp: ts,
            snapshots,
        };
        assert_eq!(chain.atm_strike(expiry()), Some(25000.0));
        assert_eq!(chain.expiries(), vec![expiry()]);
    }
}
