// Full layout estimate for one project: model areas, unit totals and the reconciled unit mix.
use std::fmt;

use crate::encoder::PredictionInput;
use crate::model::{LayoutModel, RawPrediction};
use crate::policy::PolicyTable;
use crate::preprocess::{HistoricalTables, UnitType, DEFAULT_ROAD_SHARE_OF_PUBLIC, DEFAULT_UNITS_PER_ALLEY};
use crate::reconcile::{self, RatioSource};
use crate::units;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutput {
    pub public_area_sqm: f64,
    pub saleable_area_sqm: f64,
    pub green_area_sqm: f64,
    pub road_area_sqm: f64,
    pub total_units: f64,
    pub alley_count: f64,
    /// Townhome, semi-detached, detached, commercial.
    pub units: [f64; 4],
    pub ratio_source: RatioSource,
}

/// Everything a prediction reads, built once and shared read-only.
#[derive(Debug, Clone, Copy)]
pub struct Estimator<'a> {
    model: &'a LayoutModel,
    tables: &'a HistoricalTables,
    policy: &'a PolicyTable,
}

impl<'a> Estimator<'a> {
    pub fn new(model: &'a LayoutModel, tables: &'a HistoricalTables, policy: &'a PolicyTable) -> Self {
        Self {
            model,
            tables,
            policy,
        }
    }

    pub fn estimate(&self, input: &PredictionInput) -> PredictionOutput {
        let raw = self.model.predict(input);
        self.assemble(input, &raw)
    }

    /// Builds the output from an already computed raw prediction.
    pub fn assemble(&self, input: &PredictionInput, raw: &RawPrediction) -> PredictionOutput {
        let area = input.area_sqm;
        let public_area_sqm = (raw.public_ratio() * area).max(0.0);
        let saleable_area_sqm = (raw.saleable_ratio() * area).max(0.0);
        let green_area_sqm = (raw.green_ratio() * area).max(0.0);

        let road_share = match self.tables.road_share_of_public() {
            Some(share) => share,
            None => DEFAULT_ROAD_SHARE_OF_PUBLIC,
        };
        let road_area_sqm = public_area_sqm * road_share;

        let total_units = (raw.units_per_rai() * units::sqm_to_rai(area)).max(0.0);

        let reconciled = reconcile::reconcile_shares(
            &input.grade,
            area,
            raw.unit_shares(),
            &self.tables.lookup,
            self.policy,
        );
        let unit_counts = reconcile::unit_counts(total_units, &reconciled.shares);

        let per_alley = match self.tables.units_per_alley(&input.grade) {
            Some(n) if n > 0.0 => n,
            _ => DEFAULT_UNITS_PER_ALLEY,
        };

        PredictionOutput {
            public_area_sqm,
            saleable_area_sqm,
            green_area_sqm,
            road_area_sqm,
            total_units,
            alley_count: total_units / per_alley,
            units: unit_counts,
            ratio_source: reconciled.source,
        }
    }
}

impl fmt::Display for PredictionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let areas = [
            ("Public area", self.public_area_sqm),
            ("Saleable area", self.saleable_area_sqm),
            ("Green area", self.green_area_sqm),
            ("Road area", self.road_area_sqm),
        ];
        for (name, sqm) in areas {
            writeln!(f, "{:<24} {:>12.0} sq. wah", name, units::sqm_to_wah(sqm))?;
        }
        writeln!(f, "{:<24} {:>12.0} units", "Total units", self.total_units)?;
        writeln!(f, "{:<24} {:>12.0} alleys", "Alleys", self.alley_count)?;
        writeln!(f, "\nBy unit type ({:?} ratios):", self.ratio_source)?;
        for kind in UnitType::ALL {
            writeln!(f, "  {:<22} {:>12.0} units", kind.label(), self.units[kind.index()])?;
        }
        Ok(())
    }
}
