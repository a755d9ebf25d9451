//! Forced reference efficiencies replacing the measured ones.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::CreateDataError;
use crate::archive::efficiency::EfficiencyGrids;
use crate::archive::grid::{BinGrid, bin_str};
use crate::layout::Float;

/// `[detection, false alarm]` in percent, for every bin or bin by bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EfficiencyValues {
    Uniform([Float; 2]),
    /// Indexed `[et_bin][eta_bin]`.
    PerBin(Vec<Vec<[Float; 2]>>),
}

fn shape_error(reason: String) -> CreateDataError {
    log::error!("{reason}");
    CreateDataError::EfficiencyValues(reason)
}

impl EfficiencyValues {
    pub fn check_shape(&self, shape: (usize, usize)) -> Result<(), CreateDataError> {
        let EfficiencyValues::PerBin(rows) = self else {
            return Ok(());
        };
        let (n_et, n_eta) = shape;
        if rows.len() != n_et {
            return Err(shape_error(format!(
                "The number of etBins ({n_et}) does not match with efficiencyValues ({})",
                rows.len()
            )));
        }
        if let Some(row) = rows.iter().find(|row| row.len() != n_eta) {
            return Err(shape_error(format!(
                "The number of etaBins ({n_eta}) does not match with efficiencyValues ({})",
                row.len()
            )));
        }
        Ok(())
    }

    /// Reference pairs laid out on a grid of `shape`.
    pub fn resolve(&self, shape: (usize, usize)) -> Result<BinGrid<[Float; 2]>, CreateDataError> {
        self.check_shape(shape)?;
        Ok(match self {
            EfficiencyValues::Uniform(pair) => BinGrid::filled(shape, *pair),
            EfficiencyValues::PerBin(rows) => BinGrid::from_fn(shape, |et, eta| rows[et][eta]),
        })
    }

    /// Forces the signal and background efficiencies of every benchmark and
    /// returns how many (bin, benchmark) pairs were rewritten.
    pub fn apply(
        &self,
        shape: (usize, usize),
        signal: &mut EfficiencyGrids,
        background: &mut EfficiencyGrids,
    ) -> Result<usize, CreateDataError> {
        let references = self.resolve(shape)?;
        let benchmarks: BTreeSet<String> =
            signal.keys().chain(background.keys()).cloned().collect();
        let mut rewritten = 0;
        for ((et, eta), &[detection, false_alarm]) in references.iter() {
            for name in &benchmarks {
                log::warn!(
                    "Rewriting the Efficiency value of {name} ({}) to \
                     {detection:.2} | {false_alarm:.2}",
                    bin_str(et, eta)
                );
                for (grids, value) in [(&mut *signal, detection), (&mut *background, false_alarm)] {
                    let cell = grids.get_mut(name).and_then(|grid| grid.get_mut(et, eta));
                    if let Some(record) = cell {
                        record.set_efficiency(value);
                    }
                }
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::efficiency::EfficiencyRecord;

    fn grids(shape: (usize, usize)) -> EfficiencyGrids {
        ["Loose", "Tight"]
            .into_iter()
            .map(|name| {
                let grid = BinGrid::filled(shape, EfficiencyRecord::new(name, 1, 4).unwrap());
                (name.to_string(), grid)
            })
            .collect()
    }

    #[test]
    fn matrix_overrides_every_bin() {
        let shape = (2, 3);
        let values = EfficiencyValues::PerBin(
            (0..2)
                .map(|et| (0..3).map(|eta| [90.0 + (et * 3 + eta) as Float, 1.0]).collect())
                .collect(),
        );
        let (mut sgn, mut bkg) = (grids(shape), grids(shape));
        assert_eq!(values.apply(shape, &mut sgn, &mut bkg).unwrap(), 12);
        for grid in sgn.values() {
            for ((et, eta), record) in grid.iter() {
                assert!(record.is_forced());
                assert_eq!(record.efficiency(), 90.0 + (et * 3 + eta) as Float);
            }
        }
        assert!(bkg.values().flat_map(|grid| grid.iter()).all(|(_, rec)| rec.efficiency() == 1.0));
        assert_eq!(sgn["Tight"].get(1, 2).unwrap().passed(), 1);
    }

    #[test]
    fn pair_is_broadcast() {
        let shape = (1, 2);
        let (mut sgn, mut bkg) = (grids(shape), grids(shape));
        let rewritten = EfficiencyValues::Uniform([97.0, 2.5])
            .apply(shape, &mut sgn, &mut bkg)
            .unwrap();
        assert_eq!(rewritten, 4);
        assert_eq!(bkg["Loose"].get(0, 1).unwrap().efficiency(), 2.5);
    }

    #[test]
    fn matrix_must_match_bins() {
        let values = EfficiencyValues::PerBin(vec![vec![[97.0, 2.0]; 3]; 2]);
        assert!(values.check_shape((2, 3)).is_ok());
        assert!(matches!(
            values.check_shape((3, 3)),
            Err(CreateDataError::EfficiencyValues(_))
        ));
        assert!(values.check_shape((2, 2)).is_err());
    }

    #[test]
    fn toml_accepts_both_forms() {
        #[derive(Deserialize)]
        struct Holder {
            values: EfficiencyValues,
        }
        let pair: Holder = toml::from_str("values = [97.0, 2.0]").unwrap();
        assert_eq!(pair.values, EfficiencyValues::Uniform([97.0, 2.0]));
        let matrix: Holder = toml::from_str("values = [[[97.0, 2.0], [95.0, 3.0]]]").unwrap();
        assert_eq!(
            matrix.values,
            EfficiencyValues::PerBin(vec![vec![[97.0, 2.0], [95.0, 3.0]]])
        );
    }
}
