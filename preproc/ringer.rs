//! Normalizations that know the calorimeter ring geometry.

use ndarray::{Array1, Axis, concatenate, s};

use super::batch::PatternBatch;
use super::primitives::{check_features, guard_zero, norm1_rows};
use super::{PreProcError, RawParams, Transform};
use crate::base_info::{BaseInfo, BaseInfoKind};
use crate::layout::Float;
use crate::raw::{RawDict, RawDictExt, RawValue};

/// Number of rings and radial step of each calorimeter layer, inner to outer:
/// presampler, three electromagnetic and three hadronic layers.
const RING_LAYERS: [(usize, Float); 7] = [
    (8, 0.025),
    (64, 0.003125),
    (8, 0.025),
    (8, 0.05),
    (4, 0.1),
    (4, 0.1),
    (4, 0.2),
];

pub const N_RINGS: usize = 100;

/// Ring pseudo-distances: ring `i` of a layer sits at `i * step`.
pub fn ring_distances() -> Array1<Float> {
    RING_LAYERS
        .iter()
        .flat_map(|&(count, step)| (0..count).map(move |idx| step * idx as Float))
        .collect()
}

fn sign(value: Float) -> Float {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Ring energies weighted by their pseudo-distance, `x^alpha * r^beta`, and
/// normalized by `sum(x^alpha)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RingerRp {
    alpha: Float,
    beta: Float,
    r_vec: Array1<Float>,
}

impl Default for RingerRp {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl RingerRp {
    pub fn new(alpha: Float, beta: Float) -> Self {
        Self {
            alpha,
            beta,
            r_vec: ring_distances().mapv(|r| r.powf(beta)),
        }
    }

    pub fn alpha(&self) -> Float {
        self.alpha
    }

    pub fn beta(&self) -> Float {
        self.beta
    }

    pub fn r_vec(&self) -> &Array1<Float> {
        &self.r_vec
    }
}

impl Transform for RingerRp {
    fn name(&self) -> String {
        format!("RingerRp_a{}_b{}", self.alpha, self.beta).replace('.', "dot")
    }

    fn short_name(&self) -> String {
        "Rp".to_string()
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        log::debug!("(alpha, beta) = ({}, {})", self.alpha, self.beta);
        batch.map_canonical(|data| {
            check_features(&self.name(), self.r_vec.len(), &data)?;
            let powered = data.mapv(|value| value.powf(self.alpha));
            let norms = powered
                .sum_axis(Axis(1))
                .mapv(guard_zero)
                .insert_axis(Axis(1));
            Ok((powered * &self.r_vec) / &norms)
        })
    }
}

impl RawParams for RingerRp {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("alpha".into(), RawValue::Float(self.alpha));
        raw.insert("beta".into(), RawValue::Float(self.beta));
        raw.insert("rVec".into(), RawValue::vector(self.r_vec.view()));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        let mut pp = Self::new(raw.require_f64("alpha")?, raw.require_f64("beta")?);
        if raw.contains_key("rVec") {
            pp.r_vec = raw.require_vector("rVec")?;
        }
        Ok(pp)
    }
}

/// Norm-1 over the rings plus rescaled pseudorapidity and clipped pile-up.
///
/// Expects each observation to hold the 100 rings followed by eta and the
/// pile-up estimate, as produced by [`Transform::concatenate`].
#[derive(Debug, Clone, PartialEq)]
pub struct RingerEtaMu {
    eta_min: Float,
    eta_max: Float,
    pileup_threshold: Float,
}

impl Default for RingerEtaMu {
    fn default() -> Self {
        Self::new(0.0, 2.5, 60.0)
    }
}

impl RingerEtaMu {
    pub fn new(eta_min: Float, eta_max: Float, pileup_threshold: Float) -> Self {
        Self {
            eta_min,
            eta_max,
            pileup_threshold,
        }
    }

    fn validate(&self) -> Result<(), PreProcError> {
        if self.eta_max == 0.0 || self.pileup_threshold <= 0.0 {
            return Err(PreProcError::Config {
                name: self.name(),
                reason: format!(
                    "eta_max ({}) must be nonzero and the pile-up threshold ({}) positive",
                    self.eta_max, self.pileup_threshold
                ),
            });
        }
        Ok(())
    }
}

impl Transform for RingerEtaMu {
    fn name(&self) -> String {
        "ExpertNormalizationRingerEtaMu".to_string()
    }

    fn short_name(&self) -> String {
        "ExNREM".to_string()
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        self.validate()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), N_RINGS + 2, &data)?;
            let rings = norm1_rows(data.slice(s![.., ..N_RINGS]));
            let eta = data.slice(s![.., N_RINGS..N_RINGS + 1]).mapv(|eta| {
                (eta.abs() - self.eta_min.abs()) * sign(eta) / self.eta_max
            });
            let mu = data
                .slice(s![.., N_RINGS + 1..N_RINGS + 2])
                .mapv(|mu| mu.min(self.pileup_threshold) / self.pileup_threshold);
            Ok(concatenate(Axis(1), &[rings.view(), eta.view(), mu.view()])?)
        })
    }

    fn concatenate(
        &self,
        batch: &PatternBatch,
        extra: &[BaseInfo],
    ) -> Result<PatternBatch, PreProcError> {
        if extra.len() != batch.len() {
            return Err(PreProcError::ExtraMismatch {
                expected: batch.len(),
                found: extra.len(),
            });
        }
        log::info!("Concatenate extra patterns...");
        batch.map_canonical_indexed(|index, data| {
            let info = &extra[index];
            let eta = info.get(BaseInfoKind::Eta).insert_axis(Axis(1));
            let pileup = info.get(BaseInfoKind::PileUp).insert_axis(Axis(1));
            Ok(concatenate(Axis(1), &[data.view(), eta, pileup])?)
        })
    }
}

impl RawParams for RingerEtaMu {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("etamin".into(), RawValue::Float(self.eta_min));
        raw.insert("etamax".into(), RawValue::Float(self.eta_max));
        raw.insert("pileupThreshold".into(), RawValue::Float(self.pileup_threshold));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self::new(
            raw.require_f64("etamin")?,
            raw.require_f64("etamax")?,
            raw.require_f64("pileupThreshold")?,
        ))
    }
}
