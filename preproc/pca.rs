//! Principal component projection.

use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh, UPLO};

use super::batch::PatternBatch;
use super::primitives::{check_features, fit_data, optional_vector, vector_or_null};
use super::{PreProcError, RawParams, Transform, not_fitted};
use crate::layout::Float;
use crate::raw::{RawDict, RawDictExt, RawValue};

/// How many components a fit keeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PcaTarget {
    /// Smallest number of components whose explained variance exceeds the
    /// fraction.
    Energy(Float),
    Components(usize),
    All,
}

/// Eigenpairs of a symmetric matrix sorted by decreasing eigenvalue, each
/// eigenvector oriented so that its largest entry is positive.
pub(crate) fn sorted_eigenpairs(
    matrix: &Array2<Float>,
) -> Result<(Array1<Float>, Array2<Float>), PreProcError> {
    let (values, vectors) = matrix.eigh(UPLO::Lower)?;
    let order: Vec<usize> = (0..values.len()).rev().collect();
    let values = values.select(Axis(0), &order);
    let mut vectors = vectors.select(Axis(1), &order);
    for mut column in vectors.columns_mut() {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0, |best: Float, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }
    Ok((values, vectors))
}

/// Number of leading components needed to exceed `energy` of the variance.
pub(crate) fn components_for_energy(ratios: &Array1<Float>, energy: Float) -> usize {
    let mut cumulative = 0.0;
    for (idx, ratio) in ratios.iter().enumerate() {
        cumulative += ratio;
        if cumulative > energy {
            return idx + 1;
        }
    }
    ratios.len()
}

#[derive(Debug, Clone, PartialEq)]
struct PcaFit {
    mean: Array1<Float>,
    basis: Array2<Float>,
    explained_variance_ratio: Array1<Float>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pca {
    target: PcaTarget,
    fit: Option<PcaFit>,
}

impl Default for Pca {
    fn default() -> Self {
        Self::new(PcaTarget::All)
    }
}

impl Pca {
    pub fn new(target: PcaTarget) -> Self {
        Self { target, fit: None }
    }

    pub fn target(&self) -> PcaTarget {
        self.target
    }

    /// Explained variance ratio of every component, largest first.
    pub fn variance(&self) -> Option<&Array1<Float>> {
        self.fit.as_ref().map(|fit| &fit.explained_variance_ratio)
    }

    pub fn n_components(&self) -> Option<usize> {
        self.fit.as_ref().map(|fit| fit.basis.ncols())
    }

    fn energy_percent(&self) -> Option<u32> {
        match self.target {
            PcaTarget::Energy(energy) => Some((energy * 100.0).trunc() as u32),
            PcaTarget::All => Some(100),
            PcaTarget::Components(_) => None,
        }
    }

    fn validate(&self) -> Result<(), PreProcError> {
        let reason = match self.target {
            PcaTarget::Energy(energy) if !(energy > 0.0 && energy <= 1.0) => {
                format!("energy must lie in (0, 1], got {energy}")
            }
            PcaTarget::Components(0) => "at least one component is required".to_string(),
            _ => return Ok(()),
        };
        Err(PreProcError::Config {
            name: self.name(),
            reason,
        })
    }
}

impl Transform for Pca {
    fn name(&self) -> String {
        match (self.energy_percent(), self.target) {
            (Some(pct), _) => format!("PrincipalComponentAnalysis_{pct}"),
            (None, PcaTarget::Components(n)) => format!("PrincipalComponentAnalysis_c{n}"),
            (None, _) => "PrincipalComponentAnalysis".to_string(),
        }
    }

    fn short_name(&self) -> String {
        match (self.energy_percent(), self.target) {
            (Some(pct), _) => format!("PCA_{pct}"),
            (None, PcaTarget::Components(n)) => format!("PCA_c{n}"),
            (None, _) => "PCA".to_string(),
        }
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let fit = self.fit.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        batch.map_canonical(|data| {
            check_features(&self.name(), fit.mean.len(), &data)?;
            Ok((&data - &fit.mean).dot(&fit.basis))
        })
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        self.validate()?;
        let data = fit_data(&self.name(), batch)?;
        let (n_obs, n_features) = data.dim();
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
        let centred = &data - &mean;
        let dof = n_obs.saturating_sub(1).max(1) as Float;
        let covariance = centred.t().dot(&centred) / dof;

        let (values, vectors) = sorted_eigenpairs(&covariance)?;
        let values = values.mapv(|v| v.max(0.0));
        let total = values.sum();
        let explained_variance_ratio = if total > 0.0 {
            values / total
        } else {
            Array1::zeros(n_features)
        };

        let keep = match self.target {
            PcaTarget::Energy(energy) if energy < 1.0 => {
                components_for_energy(&explained_variance_ratio, energy)
            }
            PcaTarget::Energy(_) | PcaTarget::All => n_features,
            PcaTarget::Components(n) => {
                if n > n_features {
                    return Err(PreProcError::Config {
                        name: self.name(),
                        reason: format!("{n} components requested from {n_features} features"),
                    });
                }
                n
            }
        };
        log::info!(
            "PCA applied ({}). Using only {keep} components of {n_features}",
            self.name()
        );

        let basis = vectors.slice(ndarray::s![.., ..keep]).to_owned();
        self.fit = Some(PcaFit {
            mean,
            basis,
            explained_variance_ratio,
        });
        self.apply(batch)
    }

    fn release(&mut self) {
        self.fit = None;
    }
}

impl RawParams for Pca {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        match self.target {
            PcaTarget::Energy(energy) => {
                raw.insert("target".into(), RawValue::text("energy"));
                raw.insert("energy".into(), RawValue::Float(energy));
            }
            PcaTarget::Components(n) => {
                raw.insert("target".into(), RawValue::text("components"));
                raw.insert("nComponents".into(), RawValue::count(n));
            }
            PcaTarget::All => {
                raw.insert("target".into(), RawValue::text("all"));
            }
        }
        raw.insert(
            "mean".into(),
            vector_or_null(self.fit.as_ref().map(|fit| &fit.mean)),
        );
        raw.insert(
            "variance".into(),
            vector_or_null(self.fit.as_ref().map(|fit| &fit.explained_variance_ratio)),
        );
        raw.insert(
            "basis".into(),
            self.fit
                .as_ref()
                .map_or(RawValue::Null, |fit| RawValue::matrix(fit.basis.view())),
        );
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        let target = match raw.require_str("target")? {
            "energy" => PcaTarget::Energy(raw.require_f64("energy")?),
            "components" => PcaTarget::Components(raw.require_usize("nComponents")?),
            "all" => PcaTarget::All,
            other => {
                return Err(PreProcError::Config {
                    name: "PCA".to_string(),
                    reason: format!("unknown target '{other}'"),
                });
            }
        };
        let mean = optional_vector(raw, "mean")?;
        let variance = optional_vector(raw, "variance")?;
        let basis = match raw.get("basis") {
            None | Some(RawValue::Null) => None,
            Some(value) => Some(value.require_matrix("basis")?),
        };
        let fit = match (mean, basis, variance) {
            (Some(mean), Some(basis), Some(explained_variance_ratio)) => Some(PcaFit {
                mean,
                basis,
                explained_variance_ratio,
            }),
            _ => None,
        };
        Ok(Self { target, fit })
    }
}
