use crate::types::{BsInputs, Greeks, GreeksResult, IvConfidence, Moneyness};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use common::{OptionChain, OptionSnapshot, OptionType};
use std::f64::consts::PI;
use tracing::{debug, trace};

pub const MIN_VOL: f64 = 0.001;
pub const MAX_VOL: f64 = 5.0;
pub const DAYS_PER_YEAR: f64 = 365.0;
const SECONDS_PER_YEAR: f64 = DAYS_PER_YEAR * 24.0 * 3600.0;

/// Exchange close on expiry day (15:30 IST) expressed in UTC
const EXPIRY_CLOSE_UTC: (u32, u32) = (10, 0);

pub fn norm_pdf(x: f64) -> f64 {
    (1.0 / (2.0 * PI).sqrt()) * (-0.5 * x * x).exp()
}

pub fn norm_cdf(x: f64) -> f64 {
    let k = 1.0 / (1.0 + 0.2316419 * x.abs());
    let poly = k * (0.319381530
        + k * (-0.356563782
        + k * (1.781477937
        + k * (-1.821255978
        + k * 1.330274429))));

    let approx = 1.0 - norm_pdf(x) * poly;

    if x >= 0.0 {
        approx
    } else {
        1.0 - approx
    }
}

pub fn d1_d2(input: &BsInputs) -> Option<(f64, f64)> {
    if input.is_degenerate() {
        return None;
    }
    let sqrt_t = input.time.sqrt();
    let d1 = ((input.spot / input.strike).ln()
        + (input.rate + 0.5 * input.vol * input.vol) * input.time)
        / (input.vol * sqrt_t);
    let d2 = d1 - input.vol * sqrt_t;
    Some((d1, d2))
}

pub fn black_scholes_price(input: &BsInputs) -> Option<f64> {
    let (d1, d2) = d1_d2(input)?;
    let s = input.spot;
    let discounted_k = input.strike * (-input.rate * input.time).exp();

    let price = match input.option_type {
        OptionType::Call => s * norm_cdf(d1) - discounted_k * norm_cdf(d2),
        OptionType::Put => discounted_k * norm_cdf(-d2) - s * norm_cdf(-d1),
    };

    Some(price.max(0.0))
}

pub fn intrinsic_value(spot: f64, strike: f64, option_type: OptionType) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

/// Vega per unit of volatility, as used by the IV solver
fn raw_vega(input: &BsInputs) -> Option<f64> {
    let (d1, _) = d1_d2(input)?;
    Some(input.spot * norm_pdf(d1) * input.time.sqrt())
}

pub fn black_scholes_greeks(input: &BsInputs) -> Option<Greeks> {
    let (d1, d2) = d1_d2(input)?;
    let s = input.spot;
    let k = input.strike;
    let t = input.time;
    let v = input.vol;
    let r = input.rate;

    let pdf = norm_pdf(d1);
    let sqrt_t = t.sqrt();
    let discount = (-r * t).exp();

    let delta = match input.option_type {
        OptionType::Call => norm_cdf(d1),
        OptionType::Put => norm_cdf(d1) - 1.0,
    };

    let gamma = pdf / (s * v * sqrt_t);

    let annual_theta = match input.option_type {
        OptionType::Call => -(s * pdf * v) / (2.0 * sqrt_t) - r * k * discount * norm_cdf(d2),
        OptionType::Put => -(s * pdf * v) / (2.0 * sqrt_t) + r * k * discount * norm_cdf(-d2),
    };

    let rho = match input.option_type {
        OptionType::Call => k * t * discount * norm_cdf(d2),
        OptionType::Put => -k * t * discount * norm_cdf(-d2),
    };

    Some(Greeks {
        delta,
        gamma,
        theta: annual_theta / DAYS_PER_YEAR,
        vega: s * pdf * sqrt_t / 100.0,
        rho: rho / 100.0,
    })
}

/// Outcome of the implied volatility solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvSolution {
    pub vol: f64,
    pub confidence: IvConfidence,
    pub iterations: u32,
}

/// Newton-Raphson implied volatility.
///
/// Starts at `initial_vol` and stops once the step is below `tolerance`.
/// Non-convergence, a non-positive vega or an excursion outside
/// [`MIN_VOL`, `MAX_VOL`] falls back to `initial_vol` with low confidence.
pub fn implied_volatility(
    market_price: f64,
    input: &BsInputs,
    initial_vol: f64,
    tolerance: f64,
    max_iterations: u32,
) -> IvSolution {
    let fallback = |iterations| IvSolution {
        vol: initial_vol,
        confidence: IvConfidence::Low,
        iterations,
    };

    if !(market_price > 0.0 && market_price.is_finite()) {
        return fallback(0);
    }

    let mut vol = initial_vol;
    for iteration in 1..=max_iterations {
        let trial = input.with_vol(vol);
        let (Some(price), Some(vega)) = (black_scholes_price(&trial), raw_vega(&trial)) else {
            return fallback(iteration);
        };
        if vega <= 0.0 || !vega.is_finite() {
            trace!(iteration, vol, "IV solve hit non-positive vega");
            return fallback(iteration);
        }

        let next = vol - (price - market_price) / vega;
        if !next.is_finite() || !(MIN_VOL..=MAX_VOL).contains(&next) {
            trace!(iteration, next, "IV solve left the admissible range");
            return fallback(iteration);
        }

        if (next - vol).abs() < tolerance {
            return IvSolution {
                vol: next,
                confidence: IvConfidence::High,
                iterations: iteration,
            };
        }
        vol = next;
    }

    fallback(max_iterations)
}

/// Years from `now` until the close of `expiry` day
pub fn time_to_expiry(expiry: NaiveDate, now: DateTime<Utc>) -> f64 {
    let close = NaiveTime::from_hms_opt(EXPIRY_CLOSE_UTC.0, EXPIRY_CLOSE_UTC.1, 0)
        .unwrap_or(NaiveTime::MIN);
    let expiry_at = expiry.and_time(close).and_utc();
    (expiry_at - now).num_seconds() as f64 / SECONDS_PER_YEAR
}

#[derive(Debug, Clone)]
pub struct GreeksEngineConfig {
    pub risk_free_rate: f64,
    pub default_volatility: f64,
    pub atm_band: f64,
    pub iv_max_iterations: u32,
    pub iv_tolerance: f64,
}

impl Default for GreeksEngineConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.10,
            default_volatility: 0.20,
            atm_band: 0.005,
            iv_max_iterations: 50,
            iv_tolerance: 1e-4,
        }
    }
}

impl From<&config::GreeksConfig> for GreeksEngineConfig {
    fn from(cfg: &config::GreeksConfig) -> Self {
        Self {
            risk_free_rate: cfg.risk_free_rate,
            default_volatility: cfg.default_volatility,
            atm_band: cfg.atm_band,
            iv_max_iterations: cfg.iv_max_iterations,
            iv_tolerance: cfg.iv_tolerance,
        }
    }
}

/// Prices contracts and solves implied volatility.
///
/// Stateless apart from configuration, so one engine is shared by every
/// underlying.
#[derive(Debug, Clone, Default)]
pub struct GreeksEngine {
    config: GreeksEngineConfig,
}

impl GreeksEngine {
    pub fn new(config: GreeksEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GreeksEngineConfig {
        &self.config
    }

    pub fn moneyness(&self, spot: f64, strike: f64, option_type: OptionType) -> Moneyness {
        if spot > 0.0 && ((strike - spot) / spot).abs() <= self.config.atm_band {
            return Moneyness::Atm;
        }
        match (option_type, spot > strike) {
            (OptionType::Call, true) | (OptionType::Put, false) => Moneyness::Itm,
            _ => Moneyness::Otm,
        }
    }

    /// Solve IV for a market price using the configured seed and limits
    pub fn solve_iv(&self, market_price: f64, inputs: &BsInputs) -> IvSolution {
        implied_volatility(
            market_price,
            inputs,
            self.config.default_volatility,
            self.config.iv_tolerance,
            self.config.iv_max_iterations,
        )
    }

    /// Price and Greeks for one snapshot.
    ///
    /// Greeks use the quoted volatility when present, otherwise the
    /// configured default. Returns `None` for degenerate inputs.
    pub fn compute(&self, snapshot: &OptionSnapshot, time_to_expiry: f64) -> Option<GreeksResult> {
        let contract = &snapshot.contract;
        let vol = snapshot
            .iv
            .filter(|v| *v > 0.0 && v.is_finite())
            .unwrap_or(self.config.default_volatility);
        let inputs = BsInputs {
            spot: snapshot.underlying_price,
            strike: contract.strike,
            time: time_to_expiry,
            vol,
            rate: self.config.risk_free_rate,
            option_type: contract.option_type,
        };

        let (d1, d2) = d1_d2(&inputs)?;
        let theoretical_price = black_scholes_price(&inputs)?;
        let greeks = black_scholes_greeks(&inputs)?;
        let iv = self.solve_iv(snapshot.ltp, &inputs);

        let intrinsic = intrinsic_value(inputs.spot, inputs.strike, contract.option_type);
        let time_value = (snapshot.ltp - intrinsic).max(0.0);

        if iv.confidence == IvConfidence::Low {
            debug!(
                contract = %contract,
                ltp = snapshot.ltp,
                iterations = iv.iterations,
                "IV solve fell back to default volatility"
            );
        }

        Some(GreeksResult {
            contract: contract.clone(),
            spot: inputs.spot,
            market_price: snapshot.ltp,
            time_to_expiry,
            d1,
            d2,
            theoretical_price,
            greeks,
            implied_vol: iv.vol,
            iv_confidence: iv.confidence,
            iv_iterations: iv.iterations,
            intrinsic,
            time_value,
            moneyness: self.moneyness(inputs.spot, inputs.strike, contract.option_type),
        })
    }

    /// Price a snapshot as of `now`, deriving time to expiry from the contract
    pub fn compute_at(&self, snapshot: &OptionSnapshot, now: DateTime<Utc>) -> Option<GreeksResult> {
        self.compute(snapshot, time_to_expiry(snapshot.contract.expiry, now))
    }

    /// Enrich every leg of a chain; degenerate legs (e.g. expired) are skipped
    pub fn enrich_chain(&self, chain: &OptionChain) -> Vec<GreeksResult> {
        let results: Vec<GreeksResult> = chain
            .snapshots
            .iter()
            .filter_map(|s| self.compute_at(s, chain.timestamp))
            .collect();

        debug!(
            underlying = %chain.underlying,
            legs = chain.snapshots.len(),
            priced = results.len(),
            "Chain enriched"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::OptionContract;

    fn inputs(spot: f64, strike: f64, time: f64, vol: f64, option_type: OptionType) -> BsInputs {
        BsInputs {
            spot,
            strike,
            time,
            vol,
            rate: 0.10,
            option_type,
        }
    }

    fn snapshot(strike: f64, ltp: f64, spot: f64, option_type: OptionType) -> OptionSnapshot {
        OptionSnapshot {
            contract: OptionContract::new(
                "NIFTY",
                NaiveDate::from_ymd_opt(2024, 10, 31).unwrap(),
                strike,
                option_type,
            ),
            ltp,
            oi: 1000,
            oi_change: 0,
            volume: 0,
            underlying_price: spot,
            iv: Some(0.15),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_put_call_parity() {
        for &(spot, strike, days, vol) in &[
            (24800.0, 25000.0, 5.0, 0.15),
            (24800.0, 24000.0, 30.0, 0.25),
            (510.0, 500.0, 90.0, 0.40),
        ] {
            let t = days / DAYS_PER_YEAR;
            let call = black_scholes_price(&inputs(spot, strike, t, vol, OptionType::Call)).unwrap();
            let put = black_scholes_price(&inputs(spot, strike, t, vol, OptionType::Put)).unwrap();
            let rhs = spot - strike * (-0.10 * t).exp();
            assert!(((call - put) - rhs).abs() < 1e-6 * spot, "parity broken at K={}", strike);
        }
    }

    #[test]
    fn test_implied_vol_roundtrip() {
        let base = inputs(24800.0, 25000.0, 5.0 / DAYS_PER_YEAR, 0.15, OptionType::Call);
        let price = black_scholes_price(&base).unwrap();

        let solved = implied_volatility(price, &base, 0.20, 1e-4, 50);
        assert_eq!(solved.confidence, IvConfidence::High);
        assert!((solved.vol - 0.15).abs() < 1e-3, "recovered {}", solved.vol);
    }

    #[test]
    fn test_reference_scenario() {
        let base = inputs(24800.0, 25000.0, 5.0 / DAYS_PER_YEAR, 0.15, OptionType::Call);
        let (d1, _) = d1_d2(&base).unwrap();
        let greeks = black_scholes_greeks(&base).unwrap();
        assert!((d1 + 0.37).abs() < 0.01, "d1 = {}", d1);
        assert!((greeks.delta - 0.355).abs() < 0.005, "delta = {}", greeks.delta);

        let engine = GreeksEngine::default();
        let price = black_scholes_price(&base).unwrap();
        let result = engine
            .compute(&snapshot(25000.0, price, 24800.0, OptionType::Call), 5.0 / DAYS_PER_YEAR)
            .unwrap();
        assert_eq!(result.intrinsic, 0.0);
        assert!(result.time_value > 0.0);
        assert_eq!(result.moneyness, Moneyness::Otm);
        assert!((result.greeks.delta - greeks.delta).abs() < 1e-12);
    }

    #[test]
    fn test_greek_signs_and_units() {
        let t = 30.0 / DAYS_PER_YEAR;
        let call = black_scholes_greeks(&inputs(25000.0, 25000.0, t, 0.15, OptionType::Call)).unwrap();
        let put = black_scholes_greeks(&inputs(25000.0, 25000.0, t, 0.15, OptionType::Put)).unwrap();

        assert!(call.delta > 0.5 && call.delta < 0.6);
        assert!(put.delta < 0.0);
        assert!((call.delta - put.delta - 1.0).abs() < 1e-12);
        assert!((call.gamma - put.gamma).abs() < 1e-12);
        assert!(call.theta < 0.0);
        assert!(call.rho > 0.0 && put.rho < 0.0);

        // Vega per vol point approximates a one-point bump in price
        let up = black_scholes_price(&inputs(25000.0, 25000.0, t, 0.16, OptionType::Call)).unwrap();
        let base = black_scholes_price(&inputs(25000.0, 25000.0, t, 0.15, OptionType::Call)).unwrap();
        assert!(((up - base) - call.vega).abs() < 0.05 * call.vega);
    }

    #[test]
    fn test_degenerate_inputs_return_none() {
        assert!(d1_d2(&inputs(24800.0, 25000.0, 0.0, 0.15, OptionType::Call)).is_none());
        assert!(black_scholes_price(&inputs(0.0, 25000.0, 0.1, 0.15, OptionType::Call)).is_none());
        assert!(black_scholes_greeks(&inputs(24800.0, -1.0, 0.1, 0.15, OptionType::Put)).is_none());

        let engine = GreeksEngine::default();
        assert!(engine.compute(&snapshot(25000.0, 50.0, 24800.0, OptionType::Call), -0.01).is_none());
        assert!(engine.compute(&snapshot(25000.0, 50.0, f64::NAN, OptionType::Call), 0.1).is_none());
    }

    #[test]
    fn test_unreachable_price_falls_back_low_confidence() {
        // Deep ITM call quoted below intrinsic has no implied volatility
        let base = inputs(26000.0, 24000.0, 5.0 / DAYS_PER_YEAR, 0.20, OptionType::Call);
        let solved = implied_volatility(1000.0, &base, 0.20, 1e-4, 50);
        assert_eq!(solved.confidence, IvConfidence::Low);
        assert_eq!(solved.vol, 0.20);

        let zero = implied_volatility(0.0, &base, 0.20, 1e-4, 50);
        assert_eq!(zero.confidence, IvConfidence::Low);
        assert_eq!(zero.iterations, 0);
    }

    #[test]
    fn test_moneyness_band() {
        let engine = GreeksEngine::default();
        assert_eq!(engine.moneyness(25000.0, 25100.0, OptionType::Call), Moneyness::Atm);
        assert_eq!(engine.moneyness(25000.0, 25200.0, OptionType::Call), Moneyness::Otm);
        assert_eq!(engine.moneyness(25000.0, 25200.0, OptionType::Put), Moneyness::Itm);
        assert_eq!(engine.moneyness(25000.0, 24800.0, OptionType::Call), Moneyness::Itm);
    }

    #[test]
    fn test_time_to_expiry_uses_session_close() {
        let expiry = NaiveDate::from_ymd_opt(2024, 10, 31).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 10, 26, 10, 0, 0).unwrap();
        let t = time_to_expiry(expiry, now);
        assert!((t - 5.0 / DAYS_PER_YEAR).abs() < 1e-9);

        let after = Utc.with_ymd_and_hms(2024, 10, 31, 11, 0, 0).unwrap();
        assert!(time_to_expiry(expiry, after) < 0.0);
    }
}
