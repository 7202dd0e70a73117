use serde::{Deserialize, Serialize};

use crate::{
    event::NormalizedEvent,
    factors::{EmissionFactor, ResolvedFactors},
};

/// Version recorded for a stage when no factor was applied to it.
pub const UNAPPLIED_FACTOR_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub co2_kg: f64,
    pub water_l: f64,
    pub energy_mj: f64,
}

impl StageMetrics {
    fn accumulate(&mut self, amount: f64, factor: Option<&EmissionFactor>) {
        if let Some(factor) = factor {
            self.co2_kg += amount * factor.co2;
            self.water_l += amount * factor.water;
            self.energy_mj += amount * factor.energy;
        }
    }

    fn rounded(self) -> Self {
        Self {
            co2_kg: round4(self.co2_kg),
            water_l: round4(self.water_l),
            energy_mj: round4(self.energy_mj),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub ingredients: StageMetrics,
    pub packaging: StageMetrics,
    pub transport: StageMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorVersions {
    pub ingredient_factors_version: String,
    pub packaging_version: String,
    pub transport_version: String,
}

impl Default for FactorVersions {
    fn default() -> Self {
        Self {
            ingredient_factors_version: UNAPPLIED_FACTOR_VERSION.to_string(),
            packaging_version: UNAPPLIED_FACTOR_VERSION.to_string(),
            transport_version: UNAPPLIED_FACTOR_VERSION.to_string(),
        }
    }
}

/// The outcome of one computation: totals, per-stage figures and the factor versions used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LcaMetrics {
    pub co2_kg: f64,
    pub water_l: f64,
    pub energy_mj: f64,
    pub breakdown: Breakdown,
    pub versions: FactorVersions,
}

impl LcaMetrics {
    /// The first total that is not a finite number. Stages only add up non-negative
    /// figures, so an overflow anywhere in the breakdown shows up in the totals.
    pub fn non_finite_total(&self) -> Option<&'static str> {
        [
            ("co2_kg", self.co2_kg),
            ("water_l", self.water_l),
            ("energy_mj", self.energy_mj),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Compute the impact of an event from the factors resolved for it. Pure: the same
/// event and factors always give the same metrics.
///
/// Ingredient and packaging masses are converted from grams to kilograms. Transport is
/// charged per tonne-kilometre of the transported weight. Stage figures are rounded to
/// 4 decimals and totals are the rounded sum of the rounded stages, so the breakdown
/// always adds up to the totals.
pub fn compute(event: &NormalizedEvent, factors: &ResolvedFactors) -> LcaMetrics {
    let mut ingredients = StageMetrics::default();
    let mut packaging = StageMetrics::default();
    let mut transport = StageMetrics::default();
    let mut versions = FactorVersions::default();

    for (index, line) in event.ingredients.iter().enumerate() {
        let factor = factors.ingredients.get(index).and_then(Option::as_ref);
        // Only the last applied version is kept when categories are mixed
        if let Some(factor) = factor {
            versions.ingredient_factors_version = factor.version.clone();
        }
        ingredients.accumulate(line.quantity_g / 1000.0, factor);
    }

    if let Some(pack) = &event.packaging {
        let factor = factors.packaging.as_ref();
        if let Some(factor) = factor {
            versions.packaging_version = factor.version.clone();
        }
        packaging.accumulate(pack.weight_g / 1000.0, factor);
    }

    if let Some(leg) = &event.transport {
        let factor = factors.transport.as_ref();
        if let Some(factor) = factor {
            versions.transport_version = factor.version.clone();
        }
        let tonne_km = (leg.weight_g / 1000.0 / 1000.0) * leg.distance_km;
        transport.accumulate(tonne_km, factor);
    }

    let breakdown = Breakdown {
        ingredients: ingredients.rounded(),
        packaging: packaging.rounded(),
        transport: transport.rounded(),
    };

    LcaMetrics {
        co2_kg: round4(
            breakdown.ingredients.co2_kg + breakdown.packaging.co2_kg + breakdown.transport.co2_kg,
        ),
        water_l: round4(
            breakdown.ingredients.water_l
                + breakdown.packaging.water_l
                + breakdown.transport.water_l,
        ),
        energy_mj: round4(
            breakdown.ingredients.energy_mj
                + breakdown.packaging.energy_mj
                + breakdown.transport.energy_mj,
        ),
        breakdown,
        versions,
    }
}
