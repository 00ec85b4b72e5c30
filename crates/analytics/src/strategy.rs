//! Multi-leg option strategies
//!
//! A strategy is a set of long and short legs on one underlying. At expiry
//! its P&L is piecewise linear in the underlying price with kinks only at
//! strikes, so it is evaluated exactly at zero and at each strike. The slope
//! past the highest strike (net call quantity) decides whether profit or
//! loss is unbounded.
//!
//! Legs priced from a chain carry Greeks from [`GreeksEngine::compute_at`];
//! the strategy's Greeks are the quantity-weighted sum, negated for shorts.

use crate::black_scholes::{intrinsic_value, GreeksEngine};
use crate::error::AnalyticsError;
use crate::types::Greeks;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use common::{OptionChain, OptionContract, OptionSnapshot, OptionType, Sentiment};
use serde::Serialize;
use tracing::debug;

/// IV rank under which buying single options is suggested
const CHEAP_IV_RANK: f64 = 30.0;
/// IV rank under which long straddles are suggested
const CHEAP_STRADDLE_IV_RANK: f64 = 40.0;
/// IV rank above which premium selling is suggested
const RICH_IV_RANK: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LongCall,
    LongPut,
    ShortCall,
    ShortPut,
    BullCallSpread,
    BearPutSpread,
    BullPutSpread,
    BearCallSpread,
    IronCondor,
    IronButterfly,
    LongStraddle,
    ShortStraddle,
    LongStrangle,
    ShortStrangle,
    CalendarSpread,
    Custom,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StrategyKind::LongCall => "Long Call",
            StrategyKind::LongPut => "Long Put",
            StrategyKind::ShortCall => "Short Call",
            StrategyKind::ShortPut => "Short Put",
            StrategyKind::BullCallSpread => "Bull Call Spread",
            StrategyKind::BearPutSpread => "Bear Put Spread",
            StrategyKind::BullPutSpread => "Bull Put Spread",
            StrategyKind::BearCallSpread => "Bear Call Spread",
            StrategyKind::IronCondor => "Iron Condor",
            StrategyKind::IronButterfly => "Iron Butterfly",
            StrategyKind::LongStraddle => "Long Straddle",
            StrategyKind::ShortStraddle => "Short Straddle",
            StrategyKind::LongStrangle => "Long Strangle",
            StrategyKind::ShortStrangle => "Short Strangle",
            StrategyKind::CalendarSpread => "Calendar Spread",
            StrategyKind::Custom => "Custom",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyLeg {
    pub contract: OptionContract,
    pub side: Side,
    pub quantity: u32,
    /// Per-unit premium paid or received
    pub premium: f64,
    pub greeks: Option<Greeks>,
    pub implied_vol: Option<f64>,
}

impl StrategyLeg {
    pub fn new(contract: OptionContract, side: Side, quantity: u32, premium: f64) -> Self {
        Self {
            contract,
            side,
            quantity,
            premium,
            greeks: None,
            implied_vol: None,
        }
    }

    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity as f64
    }

    /// Debit is positive, credit negative
    pub fn net_premium(&self) -> f64 {
        self.premium * self.signed_quantity()
    }

    pub fn payoff_at(&self, price: f64) -> f64 {
        let intrinsic = intrinsic_value(price, self.contract.strike, self.contract.option_type);
        (intrinsic - self.premium) * self.signed_quantity()
    }
}

/// Best or worst outcome at expiry, as a magnitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Bound {
    Limited(f64),
    Unlimited,
}

impl Bound {
    pub fn limited(&self) -> Option<f64> {
        match self {
            Bound::Limited(v) => Some(*v),
            Bound::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PayoffPoint {
    pub price: f64,
    pub pnl: f64,
    /// P&L relative to the absolute net premium; `None` for zero-cost structures
    pub pnl_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    /// Legs that contributed; legs without Greeks are left out
    pub legs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Strategy {
    pub name: String,
    pub kind: StrategyKind,
    pub underlying: String,
    pub spot: f64,
    pub legs: Vec<StrategyLeg>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyAnalysis {
    pub name: String,
    pub kind: StrategyKind,
    pub underlying: String,
    pub spot: f64,
    pub net_premium: f64,
    pub max_profit: Bound,
    pub max_loss: Bound,
    pub breakevens: Vec<f64>,
    pub greeks: NetGreeks,
    pub curve: Vec<PayoffPoint>,
}

impl Strategy {
    /// Rejects empty strategies, zero quantities, negative premiums and legs
    /// on another underlying.
    pub fn new(
        name: impl Into<String>,
        kind: StrategyKind,
        underlying: impl Into<String>,
        spot: f64,
        legs: Vec<StrategyLeg>,
    ) -> Result<Self> {
        let underlying = underlying.into();
        if legs.is_empty() {
            return Err(AnalyticsError::InvalidInput("strategy has no legs".into()));
        }
        if !(spot > 0.0 && spot.is_finite()) {
            return Err(AnalyticsError::InvalidInput(format!("spot {} is not positive", spot)));
        }
        for leg in &legs {
            if leg.contract.underlying != underlying {
                return Err(AnalyticsError::InvalidInput(format!(
                    "leg {} is not on {}",
                    leg.contract, underlying
                )));
            }
            if leg.quantity == 0 {
                return Err(AnalyticsError::InvalidInput(format!("leg {} has zero quantity", leg.contract)));
            }
            if !(leg.premium >= 0.0 && leg.premium.is_finite()) {
                return Err(AnalyticsError::InvalidInput(format!(
                    "leg {} has premium {}",
                    leg.contract, leg.premium
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            kind,
            underlying,
            spot,
            legs,
        })
    }

    pub fn net_premium(&self) -> f64 {
        self.legs.iter().map(StrategyLeg::net_premium).sum()
    }

    /// P&L at expiry with the underlying at `price`.
    ///
    /// Every leg settles at intrinsic, so for calendars this is the payoff
    /// with the far leg closed at intrinsic on the near expiry.
    pub fn payoff_at(&self, price: f64) -> f64 {
        self.legs.iter().map(|leg| leg.payoff_at(price)).sum()
    }

    fn kinks(&self) -> Vec<f64> {
        let mut points: Vec<f64> = std::iter::once(0.0)
            .chain(self.legs.iter().map(|leg| leg.contract.strike))
            .collect();
        points.sort_by(f64::total_cmp);
        points.dedup();
        points
    }

    /// Change in P&L per point above the highest strike
    fn upside_slope(&self) -> f64 {
        self.legs
            .iter()
            .filter(|leg| leg.contract.option_type == OptionType::Call)
            .map(StrategyLeg::signed_quantity)
            .sum()
    }

    pub fn max_profit(&self) -> Bound {
        if self.upside_slope() > 0.0 {
            return Bound::Unlimited;
        }
        let best = self
            .kinks()
            .into_iter()
            .map(|p| self.payoff_at(p))
            .fold(f64::NEG_INFINITY, f64::max);
        Bound::Limited(best)
    }

    pub fn max_loss(&self) -> Bound {
        if self.upside_slope() < 0.0 {
            return Bound::Unlimited;
        }
        let worst = self
            .kinks()
            .into_iter()
            .map(|p| self.payoff_at(p))
            .fold(f64::INFINITY, f64::min);
        Bound::Limited((-worst).max(0.0))
    }

    /// Underlying prices where the expiry P&L crosses zero, ascending
    pub fn breakevens(&self) -> Vec<f64> {
        let points = self.kinks();
        let values: Vec<f64> = points.iter().map(|p| self.payoff_at(*p)).collect();
        let mut out = Vec::new();

        for i in 0..points.len() {
            let (p1, v1) = (points[i], values[i]);
            if v1 == 0.0 {
                out.push(p1);
                continue;
            }
            if let Some((&p2, &v2)) = points.get(i + 1).zip(values.get(i + 1)) {
                if v1 * v2 < 0.0 {
                    out.push(p1 - v1 * (p2 - p1) / (v2 - v1));
                }
            }
        }

        // the ray past the highest strike
        let slope = self.upside_slope();
        if let (Some(&last), Some(&value)) = (points.last(), values.last()) {
            if value * slope < 0.0 {
                out.push(last - value / slope);
            }
        }

        out.sort_by(f64::total_cmp);
        out.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        out
    }

    pub fn net_greeks(&self) -> NetGreeks {
        self.legs.iter().fold(NetGreeks::default(), |mut acc, leg| {
            if let Some(g) = &leg.greeks {
                let q = leg.signed_quantity();
                acc.delta += g.delta * q;
                acc.gamma += g.gamma * q;
                acc.theta += g.theta * q;
                acc.vega += g.vega * q;
                acc.legs += 1;
            }
            acc
        })
    }

    /// Fill in Greeks for legs without them, valuing each at its premium
    /// against the strategy's spot. Returns how many legs were priced.
    pub fn price_greeks(&mut self, engine: &GreeksEngine, now: DateTime<Utc>) -> usize {
        let mut priced = 0;
        for leg in self.legs.iter_mut().filter(|leg| leg.greeks.is_none()) {
            let snapshot = OptionSnapshot {
                contract: leg.contract.clone(),
                ltp: leg.premium,
                oi: 0,
                oi_change: 0,
                volume: 0,
                underlying_price: self.spot,
                iv: None,
                timestamp: now,
            };
            match engine.compute_at(&snapshot, now) {
                Some(result) => {
                    leg.greeks = Some(result.greeks);
                    leg.implied_vol = Some(result.implied_vol);
                    priced += 1;
                }
                None => debug!(contract = %leg.contract, "Leg not priceable; Greeks left empty"),
            }
        }
        priced
    }

    /// Expiry P&L at `steps + 1` evenly spaced prices within `range_pct` of spot
    pub fn pnl_curve(&self, range_pct: f64, steps: usize) -> Vec<PayoffPoint> {
        let steps = steps.max(1);
        let low = self.spot * (1.0 - range_pct);
        let high = self.spot * (1.0 + range_pct);
        let step = (high - low) / steps as f64;
        let basis = self.net_premium().abs();

        (0..=steps)
            .map(|i| {
                let price = low + step * i as f64;
                let pnl = self.payoff_at(price);
                PayoffPoint {
                    price,
                    pnl,
                    pnl_pct: (basis > 0.0).then(|| pnl / basis * 100.0),
                }
            })
            .collect()
    }

    pub fn analyze(&self, range_pct: f64, steps: usize) -> StrategyAnalysis {
        StrategyAnalysis {
            name: self.name.clone(),
            kind: self.kind,
            underlying: self.underlying.clone(),
            spot: self.spot,
            net_premium: self.net_premium(),
            max_profit: self.max_profit(),
            max_loss: self.max_loss(),
            breakevens: self.breakevens(),
            greeks: self.net_greeks(),
            curve: self.pnl_curve(range_pct, steps),
        }
    }
}

/// Builds common structures from the legs of one chain, premiums at LTP
pub struct StrategyBuilder<'a> {
    chain: &'a OptionChain,
    engine: &'a GreeksEngine,
}

impl<'a> StrategyBuilder<'a> {
    pub fn new(chain: &'a OptionChain, engine: &'a GreeksEngine) -> Self {
        Self { chain, engine }
    }

    /// One leg from the chain, priced as of the chain's timestamp
    pub fn leg(
        &self,
        expiry: NaiveDate,
        strike: f64,
        option_type: OptionType,
        side: Side,
        quantity: u32,
    ) -> Result<StrategyLeg> {
        let snapshot = self
            .chain
            .snapshots
            .iter()
            .find(|s| {
                s.contract.expiry == expiry && s.contract.strike == strike && s.contract.option_type == option_type
            })
            .ok_or_else(|| {
                AnalyticsError::InvalidInput(format!(
                    "{} {} {} {} not in chain",
                    self.chain.underlying, expiry, strike, option_type
                ))
            })?;

        let mut leg = StrategyLeg::new(snapshot.contract.clone(), side, quantity, snapshot.ltp);
        if let Some(result) = self.engine.compute_at(snapshot, self.chain.timestamp) {
            leg.greeks = Some(result.greeks);
            leg.implied_vol = Some(result.implied_vol);
        }
        Ok(leg)
    }

    fn build(&self, kind: StrategyKind, name: String, legs: Vec<StrategyLeg>) -> Result<Strategy> {
        Strategy::new(name, kind, self.chain.underlying.clone(), self.chain.spot, legs)
    }

    pub fn single(&self, expiry: NaiveDate, strike: f64, option_type: OptionType, side: Side, quantity: u32) -> Result<Strategy> {
        let kind = match (side, option_type) {
            (Side::Long, OptionType::Call) => StrategyKind::LongCall,
            (Side::Long, OptionType::Put) => StrategyKind::LongPut,
            (Side::Short, OptionType::Call) => StrategyKind::ShortCall,
            (Side::Short, OptionType::Put) => StrategyKind::ShortPut,
        };
        let leg = self.leg(expiry, strike, option_type, side, quantity)?;
        self.build(kind, format!("{}_{}_{}", kind, self.chain.underlying, strike), vec![leg])
    }

    pub fn straddle(&self, expiry: NaiveDate, strike: f64, side: Side, quantity: u32) -> Result<Strategy> {
        let kind = match side {
            Side::Long => StrategyKind::LongStraddle,
            Side::Short => StrategyKind::ShortStraddle,
        };
        let legs = vec![
            self.leg(expiry, strike, OptionType::Call, side, quantity)?,
            self.leg(expiry, strike, OptionType::Put, side, quantity)?,
        ];
        self.build(kind, format!("Straddle_{}_{}", self.chain.underlying, strike), legs)
    }

    pub fn strangle(&self, expiry: NaiveDate, put_strike: f64, call_strike: f64, side: Side, quantity: u32) -> Result<Strategy> {
        if put_strike >= call_strike {
            return Err(AnalyticsError::InvalidInput(format!(
                "strangle put strike {} must be below call strike {}",
                put_strike, call_strike
            )));
        }
        let kind = match side {
            Side::Long => StrategyKind::LongStrangle,
            Side::Short => StrategyKind::ShortStrangle,
        };
        let legs = vec![
            self.leg(expiry, put_strike, OptionType::Put, side, quantity)?,
            self.leg(expiry, call_strike, OptionType::Call, side, quantity)?,
        ];
        self.build(
            kind,
            format!("Strangle_{}_{}_{}", self.chain.underlying, put_strike, call_strike),
            legs,
        )
    }

    /// Long the lower call, short the higher
    pub fn bull_call_spread(&self, expiry: NaiveDate, lower: f64, higher: f64, quantity: u32) -> Result<Strategy> {
        ordered_strikes(&[lower, higher])?;
        let legs = vec![
            self.leg(expiry, lower, OptionType::Call, Side::Long, quantity)?,
            self.leg(expiry, higher, OptionType::Call, Side::Short, quantity)?,
        ];
        self.build(
            StrategyKind::BullCallSpread,
            format!("BullCall_{}_{}_{}", self.chain.underlying, lower, higher),
            legs,
        )
    }

    /// Long the higher put, short the lower
    pub fn bear_put_spread(&self, expiry: NaiveDate, lower: f64, higher: f64, quantity: u32) -> Result<Strategy> {
        ordered_strikes(&[lower, higher])?;
        let legs = vec![
            self.leg(expiry, higher, OptionType::Put, Side::Long, quantity)?,
            self.leg(expiry, lower, OptionType::Put, Side::Short, quantity)?,
        ];
        self.build(
            StrategyKind::BearPutSpread,
            format!("BearPut_{}_{}_{}", self.chain.underlying, lower, higher),
            legs,
        )
    }

    /// Strikes ascending: bought put, sold put, sold call, bought call
    pub fn iron_condor(&self, expiry: NaiveDate, strikes: [f64; 4], quantity: u32) -> Result<Strategy> {
        ordered_strikes(&strikes)?;
        let [put_buy, put_sell, call_sell, call_buy] = strikes;
        let legs = vec![
            self.leg(expiry, put_buy, OptionType::Put, Side::Long, quantity)?,
            self.leg(expiry, put_sell, OptionType::Put, Side::Short, quantity)?,
            self.leg(expiry, call_sell, OptionType::Call, Side::Short, quantity)?,
            self.leg(expiry, call_buy, OptionType::Call, Side::Long, quantity)?,
        ];
        self.build(
            StrategyKind::IronCondor,
            format!("IronCondor_{}_{}_{}", self.chain.underlying, put_sell, call_sell),
            legs,
        )
    }
}

fn ordered_strikes(strikes: &[f64]) -> Result<()> {
    if strikes.windows(2).all(|w| w[0] < w[1]) {
        Ok(())
    } else {
        Err(AnalyticsError::InvalidInput(format!("strikes {:?} must be strictly ascending", strikes)))
    }
}

/// Expected path of the underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketView {
    Bullish,
    Bearish,
    Neutral,
    /// Large move expected, direction unknown
    Volatile,
}

impl From<Sentiment> for MarketView {
    fn from(sentiment: Sentiment) -> Self {
        match sentiment {
            Sentiment::Bullish => MarketView::Bullish,
            Sentiment::Bearish => MarketView::Bearish,
            Sentiment::Neutral => MarketView::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: StrategyKind,
    pub rationale: &'static str,
    pub risk: RiskLevel,
}

/// Strategies suited to a view and IV rank (0-100), most aggressive first
pub fn recommend(view: MarketView, iv_rank: f64) -> Vec<Recommendation> {
    let pick = |kind, rationale, risk| Recommendation { kind, rationale, risk };
    let mut out = Vec::new();
    match view {
        MarketView::Bullish => {
            if iv_rank < CHEAP_IV_RANK {
                out.push(pick(StrategyKind::LongCall, "Low IV; options are cheap to buy", RiskLevel::High));
            }
            out.push(pick(StrategyKind::BullCallSpread, "Defined-risk bullish position", RiskLevel::Medium));
        }
        MarketView::Bearish => {
            if iv_rank < CHEAP_IV_RANK {
                out.push(pick(StrategyKind::LongPut, "Low IV; options are cheap to buy", RiskLevel::High));
            }
            out.push(pick(StrategyKind::BearPutSpread, "Defined-risk bearish position", RiskLevel::Medium));
        }
        MarketView::Neutral => {
            if iv_rank > RICH_IV_RANK {
                out.push(pick(StrategyKind::IronCondor, "High IV; collect premium in a range", RiskLevel::Medium));
            }
            out.push(pick(StrategyKind::CalendarSpread, "Near leg decays faster than far leg", RiskLevel::Low));
        }
        MarketView::Volatile => {
            if iv_rank < CHEAP_STRADDLE_IV_RANK {
                out.push(pick(StrategyKind::LongStraddle, "Low IV; volatility is cheap", RiskLevel::High));
            }
            out.push(pick(StrategyKind::LongStrangle, "Cheaper than a straddle; needs a bigger move", RiskLevel::High));
        }
    }
    out
}
