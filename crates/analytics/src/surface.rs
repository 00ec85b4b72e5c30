use crate::types::{GreeksResult, IvConfidence};
use chrono::{DateTime, NaiveDate, Utc};
use common::OptionType;
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::collections::BTreeMap;

/// Call and put implied vol quoted at one strike
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SmilePoint {
    pub call_iv: Option<f64>,
    pub put_iv: Option<f64>,
}

impl SmilePoint {
    fn mid(&self) -> Option<f64> {
        match (self.call_iv, self.put_iv) {
            (Some(c), Some(p)) => Some((c + p) / 2.0),
            (c, p) => c.or(p),
        }
    }
}

/// OTM put minus OTM call implied vol at matched distance from spot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkewReading {
    pub expiry: NaiveDate,
    pub put_strike: f64,
    pub call_strike: f64,
    pub put_iv: f64,
    pub call_iv: f64,
    pub skew: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TermPoint {
    pub expiry: NaiveDate,
    pub iv: f64,
}

/// Per-expiry volatility smiles built from one enriched chain.
///
/// Only legs whose IV solve converged contribute; fallback vols would
/// flatten the smile to the configured default.
#[derive(Debug, Clone, Serialize)]
pub struct VolSurface {
    pub underlying: String,
    pub spot: f64,
    pub updated_at: DateTime<Utc>,
    smiles: BTreeMap<NaiveDate, BTreeMap<OrderedFloat<f64>, SmilePoint>>,
}

impl VolSurface {
    pub fn from_results(
        underlying: impl Into<String>,
        spot: f64,
        updated_at: DateTime<Utc>,
        results: &[GreeksResult],
    ) -> Self {
        let mut smiles: BTreeMap<NaiveDate, BTreeMap<OrderedFloat<f64>, SmilePoint>> = BTreeMap::new();

        for r in results.iter().filter(|r| r.iv_confidence == IvConfidence::High) {
            let point = smiles
                .entry(r.contract.expiry)
                .or_default()
                .entry(OrderedFloat(r.contract.strike))
                .or_default();
            match r.contract.option_type {
                OptionType::Call => point.call_iv = Some(r.implied_vol),
                OptionType::Put => point.put_iv = Some(r.implied_vol),
            }
        }

        Self {
            underlying: underlying.into(),
            spot,
            updated_at,
            smiles,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.smiles.is_empty()
    }

    pub fn expiries(&self) -> impl Iterator<Item = &NaiveDate> {
        self.smiles.keys()
    }

    pub fn iv_at(&self, expiry: NaiveDate, strike: f64, option_type: OptionType) -> Option<f64> {
        let point = self.smiles.get(&expiry)?.get(&OrderedFloat(strike))?;
        match option_type {
            OptionType::Call => point.call_iv,
            OptionType::Put => point.put_iv,
        }
    }

    /// IV at the strike nearest spot, averaging call and put when both exist
    pub fn atm_iv(&self, expiry: NaiveDate) -> Option<f64> {
        let smile = self.smiles.get(&expiry)?;
        smile
            .iter()
            .filter(|(_, p)| p.mid().is_some())
            .min_by(|(a, _), (b, _)| (a.0 - self.spot).abs().total_cmp(&(b.0 - self.spot).abs()))
            .and_then(|(_, p)| p.mid())
    }

    /// ATM IV of the front expiry
    pub fn representative_iv(&self) -> Option<f64> {
        self.smiles.keys().find_map(|e| self.atm_iv(*e))
    }

    /// Skew on the front expiry at `distance` (fraction of spot) OTM on each side
    pub fn skew(&self, distance: f64) -> Option<SkewReading> {
        let (expiry, smile) = self.smiles.iter().next()?;
        let put_target = self.spot * (1.0 - distance);
        let call_target = self.spot * (1.0 + distance);

        let nearest = |target: f64, pick: fn(&SmilePoint) -> Option<f64>, otm: &dyn Fn(f64) -> bool| {
            smile
                .iter()
                .filter(|(k, p)| otm(k.0) && pick(*p).is_some())
                .min_by(|(a, _), (b, _)| (a.0 - target).abs().total_cmp(&(b.0 - target).abs()))
                .and_then(|(k, p)| pick(p).map(|iv| (k.0, iv)))
        };

        let spot = self.spot;
        let (put_strike, put_iv) = nearest(put_target, |p| p.put_iv, &|k| k < spot)?;
        let (call_strike, call_iv) = nearest(call_target, |p| p.call_iv, &|k| k > spot)?;

        Some(SkewReading {
            expiry: *expiry,
            put_strike,
            call_strike,
            put_iv,
            call_iv,
            skew: put_iv - call_iv,
        })
    }

    /// (expiry, ATM IV) across expiries, nearest first
    pub fn term_structure(&self) -> Vec<TermPoint> {
        self.smiles
            .keys()
            .filter_map(|e| self.atm_iv(*e).map(|iv| TermPoint { expiry: *e, iv }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Greeks, Moneyness};
    use common::OptionContract;

    fn leg(expiry: NaiveDate, strike: f64, option_type: OptionType, iv: f64, confidence: IvConfidence) -> GreeksResult {
        GreeksResult {
            contract: OptionContract::new("NIFTY", expiry, strike, option_type),
            spot: 25000.0,
            market_price: 100.0,
            time_to_expiry: 0.02,
            d1: 0.0,
            d2: 0.0,
            theoretical_price: 100.0,
            greeks: Greeks { delta: 0.5, gamma: 0.0, theta: 0.0, vega: 0.0, rho: 0.0 },
            implied_vol: iv,
            iv_confidence: confidence,
            iv_iterations: 3,
            intrinsic: 0.0,
            time_value: 100.0,
            moneyness: Moneyness::Otm,
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, d).unwrap()
    }

    #[test]
    fn test_skew_matches_distance() {
        let e = date(7);
        let results = vec![
            leg(e, 24500.0, OptionType::Put, 0.19, IvConfidence::High),
            leg(e, 24000.0, OptionType::Put, 0.22, IvConfidence::High),
            leg(e, 25000.0, OptionType::Call, 0.15, IvConfidence::High),
            leg(e, 25000.0, OptionType::Put, 0.15, IvConfidence::High),
            leg(e, 25500.0, OptionType::Call, 0.13, IvConfidence::High),
            leg(e, 26000.0, OptionType::Call, 0.12, IvConfidence::High),
        ];
        let surface = VolSurface::from_results("NIFTY", 25000.0, Utc::now(), &results);
        let skew = surface.skew(0.02).unwrap();
        assert_eq!(skew.put_strike, 24500.0);
        assert_eq!(skew.call_strike, 25500.0);
        assert!((skew.skew - 0.06).abs() < 1e-12);
        assert_eq!(surface.atm_iv(e), Some(0.15));
    }

    #[test]
    fn test_low_confidence_legs_excluded() {
        let e = date(7);
        let results = vec![
            leg(e, 25000.0, OptionType::Call, 0.20, IvConfidence::Low),
            leg(e, 24500.0, OptionType::Put, 0.19, IvConfidence::High),
        ];
        let surface = VolSurface::from_results("NIFTY", 25000.0, Utc::now(), &results);
        assert!(surface.iv_at(e, 25000.0, OptionType::Call).is_none());
        assert!(surface.skew(0.02).is_none());
    }

    #[test]
    fn test_term_structure_ordered() {
        let results = vec![
            leg(date(28), 25000.0, OptionType::Call, 0.17, IvConfidence::High),
            leg(date(7), 25000.0, OptionType::Call, 0.14, IvConfidence::High),
            leg(date(14), 25000.0, OptionType::Put, 0.155, IvConfidence::High),
        ];
        let surface = VolSurface::from_results("NIFTY", 25000.0, Utc::now(), &results);
        let term = surface.term_structure();
        assert_eq!(term.iter().map(|p| p.expiry).collect::<Vec<_>>(), vec![date(7), date(14), date(28)]);
        assert_eq!(surface.representative_iv(), Some(0.14));
    }
}
