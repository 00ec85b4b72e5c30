use common::{OptionContract, OptionType};
use serde::{Deserialize, Serialize};

/// Inputs to the Black-Scholes model
#[derive(Debug, Clone, Copy)]
pub struct BsInputs {
    pub spot: f64,
    pub strike: f64,
    /// Time to expiry in years
    pub time: f64,
    /// Annualized volatility as a decimal
    pub vol: f64,
    pub rate: f64,
    pub option_type: OptionType,
}

impl BsInputs {
    /// True when the model is undefined for these inputs
    pub fn is_degenerate(&self) -> bool {
        !(self.spot.is_finite()
            && self.strike.is_finite()
            && self.time.is_finite()
            && self.vol.is_finite()
            && self.rate.is_finite())
            || self.spot <= 0.0
            || self.strike <= 0.0
            || self.time <= 0.0
            || self.vol <= 0.0
    }

    pub fn with_vol(self, vol: f64) -> Self {
        Self { vol, ..self }
    }
}

/// Option sensitivities in trader units
///
/// Theta is per calendar day, vega per 1 vol point and rho per 1 rate point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvConfidence {
    /// Solver converged on the market price
    High,
    /// Solver failed; implied vol is the configured default
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Moneyness {
    Itm,
    Atm,
    Otm,
}

/// Greeks and valuation for one contract at one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreeksResult {
    pub contract: OptionContract,
    pub spot: f64,
    pub market_price: f64,
    pub time_to_expiry: f64,
    pub d1: f64,
    pub d2: f64,
    pub theoretical_price: f64,
    pub greeks: Greeks,
    /// Volatility solved from the market price (decimal)
    pub implied_vol: f64,
    pub iv_confidence: IvConfidence,
    pub iv_iterations: u32,
    pub intrinsic: f64,
    pub time_value: f64,
    pub moneyness: Moneyness,
}

impl GreeksResult {
    pub fn delta(&self) -> f64 {
        self.greeks.delta
    }

    pub fn is_low_confidence(&self) -> bool {
        self.iv_confidence == IvConfidence::Low
    }
}
