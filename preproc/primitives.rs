use ndarray::{Array1, Array2, ArrayView2, Axis, s};

use super::batch::PatternBatch;
use super::{PreProcError, RawParams, Transform, not_fitted};
use crate::layout::Float;
use crate::raw::{RawDict, RawDictExt, RawValue};

// Degenerate denominators are replaced by one.
pub(crate) fn guard_zero(value: Float) -> Float {
    if value == 0.0 { 1.0 } else { value }
}

pub(crate) fn check_features(
    name: &str,
    expected: usize,
    data: &ArrayView2<'_, Float>,
) -> Result<(), PreProcError> {
    let found = data.ncols();
    if found != expected {
        return Err(PreProcError::FeatureMismatch {
            name: name.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

pub(crate) fn fit_data(name: &str, batch: &PatternBatch) -> Result<Array2<Float>, PreProcError> {
    let joint = batch.joint()?;
    if joint.nrows() == 0 {
        return Err(PreProcError::NoObservations {
            name: name.to_string(),
        });
    }
    Ok(joint)
}

fn column_mean(data: &Array2<Float>) -> Array1<Float> {
    data.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()))
}

fn inverse_rms(data: &Array2<Float>) -> Array1<Float> {
    let mean_square = data
        .mapv(|value| value * value)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()));
    mean_square.mapv(|ms| 1.0 / guard_zero(ms.sqrt()))
}

/// Divides every observation by the sum of its features.
pub(crate) fn norm1_rows(data: ArrayView2<'_, Float>) -> Array2<Float> {
    let norms = data.sum_axis(Axis(1)).mapv(guard_zero).insert_axis(Axis(1));
    &data / &norms
}

pub(crate) fn optional_vector(
    raw: &RawDict,
    key: &str,
) -> Result<Option<Array1<Float>>, PreProcError> {
    match raw.get(key) {
        None | Some(RawValue::Null) => Ok(None),
        Some(value) => Ok(Some(value.require_vector(key)?)),
    }
}

pub(crate) fn vector_or_null(values: Option<&Array1<Float>>) -> RawValue {
    values.map_or(RawValue::Null, |values| RawValue::vector(values.view()))
}

/// Leaves the data untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoPreProc;

impl Transform for NoPreProc {
    fn name(&self) -> String {
        "NoPreProc".to_string()
    }

    fn short_name(&self) -> String {
        "NoPP".to_string()
    }

    fn is_revertible(&self) -> bool {
        true
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        Ok(batch.clone())
    }

    fn revert(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        Ok(batch.clone())
    }
}

impl RawParams for NoPreProc {
    fn to_raw_params(&self) -> RawDict {
        RawDict::new()
    }

    fn from_raw_params(_: &RawDict) -> Result<Self, PreProcError> {
        Ok(NoPreProc)
    }
}

/// Subtracts the per-feature mean of the training data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveMean {
    mean: Option<Array1<Float>>,
}

impl RemoveMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean(&self) -> Option<&Array1<Float>> {
        self.mean.as_ref()
    }

    fn fitted(&self) -> Result<&Array1<Float>, PreProcError> {
        self.mean.as_ref().ok_or_else(|| not_fitted(self.name()))
    }
}

impl Transform for RemoveMean {
    fn name(&self) -> String {
        "rm_mean".to_string()
    }

    fn short_name(&self) -> String {
        "no_mu".to_string()
    }

    fn is_revertible(&self) -> bool {
        true
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let mean = self.fitted()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), mean.len(), &data)?;
            Ok(&data - mean)
        })
    }

    fn revert(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let mean = self.fitted()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), mean.len(), &data)?;
            Ok(&data + mean)
        })
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let data = fit_data(&self.name(), batch)?;
        self.mean = Some(column_mean(&data));
        self.apply(batch)
    }

    fn release(&mut self) {
        self.mean = None;
    }
}

impl RawParams for RemoveMean {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("mean".into(), vector_or_null(self.mean.as_ref()));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self {
            mean: optional_vector(raw, "mean")?,
        })
    }
}

/// Scales every feature to unit root mean square.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitaryRms {
    inv_rms: Option<Array1<Float>>,
}

impl UnitaryRms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rms(&self) -> Option<Array1<Float>> {
        self.inv_rms.as_ref().map(|inv| inv.mapv(|v| 1.0 / v))
    }

    fn fitted(&self) -> Result<&Array1<Float>, PreProcError> {
        self.inv_rms.as_ref().ok_or_else(|| not_fitted(self.name()))
    }
}

impl Transform for UnitaryRms {
    fn name(&self) -> String {
        "UnitRMS".to_string()
    }

    fn short_name(&self) -> String {
        "1rms".to_string()
    }

    fn is_revertible(&self) -> bool {
        true
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let inv_rms = self.fitted()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), inv_rms.len(), &data)?;
            Ok(&data * inv_rms)
        })
    }

    fn revert(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let inv_rms = self.fitted()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), inv_rms.len(), &data)?;
            Ok(&data / inv_rms)
        })
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let data = fit_data(&self.name(), batch)?;
        self.inv_rms = Some(inverse_rms(&data));
        self.apply(batch)
    }

    fn release(&mut self) {
        self.inv_rms = None;
    }
}

impl RawParams for UnitaryRms {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("invRMS".into(), vector_or_null(self.inv_rms.as_ref()));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self {
            inv_rms: optional_vector(raw, "invRMS")?,
        })
    }
}

/// Removes the mean and scales the centred data to unit RMS in one fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapStd {
    mean: Option<Array1<Float>>,
    inv_rms: Option<Array1<Float>>,
}

impl MapStd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean(&self) -> Option<&Array1<Float>> {
        self.mean.as_ref()
    }

    pub fn rms(&self) -> Option<Array1<Float>> {
        self.inv_rms.as_ref().map(|inv| inv.mapv(|v| 1.0 / v))
    }

    fn fitted(&self) -> Result<(&Array1<Float>, &Array1<Float>), PreProcError> {
        match (&self.mean, &self.inv_rms) {
            (Some(mean), Some(inv_rms)) => Ok((mean, inv_rms)),
            _ => Err(not_fitted(self.name())),
        }
    }
}

impl Transform for MapStd {
    fn name(&self) -> String {
        "MapStd".to_string()
    }

    fn short_name(&self) -> String {
        "std".to_string()
    }

    fn is_revertible(&self) -> bool {
        true
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let (mean, inv_rms) = self.fitted()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), mean.len(), &data)?;
            Ok((&data - mean) * inv_rms)
        })
    }

    fn revert(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let (mean, inv_rms) = self.fitted()?;
        batch.map_canonical(|data| {
            check_features(&self.name(), mean.len(), &data)?;
            Ok((&data / inv_rms) + mean)
        })
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let data = fit_data(&self.name(), batch)?;
        let mean = column_mean(&data);
        let centred = &data - &mean;
        self.inv_rms = Some(inverse_rms(&centred));
        self.mean = Some(mean);
        self.apply(batch)
    }

    fn release(&mut self) {
        self.mean = None;
        self.inv_rms = None;
    }
}

impl RawParams for MapStd {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("mean".into(), vector_or_null(self.mean.as_ref()));
        raw.insert("invRMS".into(), vector_or_null(self.inv_rms.as_ref()));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self {
            mean: optional_vector(raw, "mean")?,
            inv_rms: optional_vector(raw, "invRMS")?,
        })
    }
}

/// Divides every observation by the sum of its features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Norm1;

impl Transform for Norm1 {
    fn name(&self) -> String {
        "Norm1".to_string()
    }

    fn short_name(&self) -> String {
        "N1".to_string()
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        batch.map_canonical(|data| Ok(norm1_rows(data)))
    }
}

impl RawParams for Norm1 {
    fn to_raw_params(&self) -> RawDict {
        RawDict::new()
    }

    fn from_raw_params(_: &RawDict) -> Result<Self, PreProcError> {
        Ok(Norm1)
    }
}

/// Keeps only the first `n` features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirstNthPatterns {
    n: usize,
}

impl FirstNthPatterns {
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    pub fn n(&self) -> usize {
        self.n
    }
}

impl Transform for FirstNthPatterns {
    fn name(&self) -> String {
        format!("First_{}Pat", self.n)
    }

    fn short_name(&self) -> String {
        format!("F{}P", self.n)
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        batch.map_canonical(|data| {
            if data.ncols() < self.n {
                log::error!("Data has not enough patterns for {}", self.name());
                return Err(PreProcError::FeatureMismatch {
                    name: self.name(),
                    expected: self.n,
                    found: data.ncols(),
                });
            }
            Ok(data.slice(s![.., ..self.n]).to_owned())
        })
    }
}

impl RawParams for FirstNthPatterns {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("nth".into(), RawValue::count(self.n));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self::new(raw.require_usize("nth")?))
    }
}

/// Multiplies the patterns by a fixed `(features_in, features_out)` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    matrix: Array2<Float>,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            matrix: Array2::zeros((0, 0)),
        }
    }
}

impl Projection {
    pub fn new(matrix: Array2<Float>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &Array2<Float> {
        &self.matrix
    }
}

impl Transform for Projection {
    fn name(&self) -> String {
        "Proj".to_string()
    }

    fn short_name(&self) -> String {
        "P".to_string()
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        if self.matrix.is_empty() {
            return Err(not_fitted(self.name()));
        }
        batch.map_canonical(|data| {
            check_features(&self.name(), self.matrix.nrows(), &data)?;
            Ok(data.dot(&self.matrix))
        })
    }
}

impl RawParams for Projection {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("matrix".into(), RawValue::matrix(self.matrix.view()));
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self::new(raw.require_matrix("matrix")?))
    }
}

/// Fixed scale factors for the six track variables: delta eta1, delta p over
/// p, rescaled delta phi, d0 significance, unbiased d0 and the TRT electron
/// probability.
const TRACK_FACTORS: [Float; 6] = [0.05, 1.0, 0.05, 6.0, 0.2, 1.0];

/// Divides the leading track variables by fixed factors.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSimpleNorm {
    factors: Vec<Float>,
}

impl Default for TrackSimpleNorm {
    fn default() -> Self {
        Self {
            factors: TRACK_FACTORS.to_vec(),
        }
    }
}

impl TrackSimpleNorm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factors(&self) -> &[Float] {
        &self.factors
    }
}

impl Transform for TrackSimpleNorm {
    fn name(&self) -> String {
        "Tracking data simple normalization.".to_string()
    }

    fn short_name(&self) -> String {
        "TrackSimple".to_string()
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        batch.map_canonical(|data| {
            if data.ncols() < self.factors.len() {
                return Err(PreProcError::FeatureMismatch {
                    name: self.name(),
                    expected: self.factors.len(),
                    found: data.ncols(),
                });
            }
            let mut scaled = data.to_owned();
            for (mut column, factor) in scaled.columns_mut().into_iter().zip(&self.factors) {
                column.mapv_inplace(|value| value / factor);
            }
            Ok(scaled)
        })
    }
}

impl RawParams for TrackSimpleNorm {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert(
            "factors".into(),
            RawValue::vector(Array1::from(self.factors.clone()).view()),
        );
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        Ok(Self {
            factors: raw.require_vector("factors")?.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn training_batch() -> PatternBatch {
        PatternBatch::signal_background(
            Layout::ObservationsAsRows,
            array![[1.0, 0.0, 4.0], [3.0, 0.0, 8.0]],
            array![[5.0, 0.0, -6.0]],
        )
    }

    fn assert_batches_close(left: &PatternBatch, right: &PatternBatch) {
        assert_eq!(left.len(), right.len());
        for (a, b) in left.groups().iter().zip(right.groups()) {
            assert_eq!(a.label, b.label);
            assert_abs_diff_eq!(a.data, b.data, epsilon = 1e-12);
        }
    }

    #[test]
    fn fitting_returns_what_apply_reproduces() {
        let batch = training_batch();
        let mut stages: Vec<Box<dyn Transform>> = vec![
            Box::new(RemoveMean::new()),
            Box::new(UnitaryRms::new()),
            Box::new(MapStd::new()),
            Box::new(Norm1),
            Box::new(FirstNthPatterns::new(2)),
        ];
        for stage in stages.iter_mut() {
            let fitted = stage.take_params(&batch).unwrap();
            let applied = stage.apply(&batch).unwrap();
            assert_batches_close(&fitted, &applied);
        }
    }

    #[test]
    fn revertible_primitives_round_trip() {
        let batch = training_batch();
        let mut stages: Vec<Box<dyn Transform>> = vec![
            Box::new(NoPreProc),
            Box::new(RemoveMean::new()),
            Box::new(UnitaryRms::new()),
            Box::new(MapStd::new()),
        ];
        for stage in stages.iter_mut() {
            assert!(stage.is_revertible());
            let forward = stage.take_params(&batch).unwrap();
            let back = stage.run(&forward, true).unwrap();
            assert_batches_close(&back, &batch);
        }
    }

    #[test]
    fn mean_removal_uses_training_mean() {
        let mut pp = RemoveMean::new();
        let out = pp.take_params(&training_batch()).unwrap();
        assert_eq!(pp.mean().unwrap(), &array![3.0, 0.0, 2.0]);
        assert_abs_diff_eq!(out.data(0).unwrap(), &array![[-2.0, 0.0, 2.0], [0.0, 0.0, 6.0]]);

        let fresh = PatternBatch::single(Layout::ObservationsAsRows, array![[10.0, 10.0, 10.0]]);
        let applied = pp.apply(&fresh).unwrap();
        assert_eq!(applied.data(0).unwrap(), &array![[7.0, 10.0, 8.0]]);
    }

    #[test]
    fn zero_rms_column_stays_finite() {
        let mut rms = UnitaryRms::new();
        let out = rms.take_params(&training_batch()).unwrap();
        assert!(out.groups().iter().all(|g| g.data.iter().all(|v| v.is_finite())));
        assert_eq!(rms.rms().unwrap()[1], 1.0);

        let mut std = MapStd::new();
        let out = std.take_params(&training_batch()).unwrap();
        assert!(out.groups().iter().all(|g| g.data.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn map_std_centres_and_scales() {
        let mut std = MapStd::new();
        let out = std.take_params(&training_batch()).unwrap();
        let joint = out.joint().unwrap();
        let mean = joint.mean_axis(Axis(0)).unwrap();
        assert_abs_diff_eq!(mean, array![0.0, 0.0, 0.0], epsilon = 1e-12);
        let rms = joint.mapv(|v| v * v).mean_axis(Axis(0)).unwrap().mapv(f64::sqrt);
        assert_abs_diff_eq!(rms[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rms[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn norm1_rows_sum_to_one_and_zero_rows_survive() {
        let batch = PatternBatch::single(
            Layout::ObservationsAsRows,
            array![[1.0, 3.0], [0.0, 0.0], [2.0, 2.0]],
        );
        let out = Norm1.apply(&batch).unwrap();
        let data = out.data(0).unwrap();
        assert_abs_diff_eq!(data.row(0).sum(), 1.0, epsilon = 1e-12);
        assert_eq!(data.row(1).to_vec(), vec![0.0, 0.0]);
        assert_abs_diff_eq!(data.row(2).sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn norm1_respects_column_layout() {
        let batch =
            PatternBatch::single(Layout::ObservationsAsColumns, array![[1.0, 2.0], [3.0, 2.0]]);
        let out = Norm1.apply(&batch).unwrap();
        assert_abs_diff_eq!(out.data(0).unwrap(), &array![[0.25, 0.5], [0.75, 0.5]]);
    }

    #[test]
    fn apply_before_fit_fails() {
        let batch = training_batch();
        assert!(matches!(
            RemoveMean::new().apply(&batch),
            Err(PreProcError::NotFitted { .. })
        ));
        assert!(matches!(
            MapStd::new().revert(&batch),
            Err(PreProcError::NotFitted { .. })
        ));
        assert!(matches!(
            Projection::default().apply(&batch),
            Err(PreProcError::NotFitted { .. })
        ));
    }

    #[test]
    fn release_forgets_parameters() {
        let mut pp = MapStd::new();
        pp.take_params(&training_batch()).unwrap();
        pp.release();
        assert!(pp.mean().is_none());
        assert!(pp.apply(&training_batch()).is_err());
    }

    #[test]
    fn norm1_cannot_be_reverted() {
        let err = Norm1.revert(&training_batch()).unwrap_err();
        assert!(matches!(err, PreProcError::Unsupported { ref name } if name == "Norm1"));
    }

    #[test]
    fn first_nth_truncates_or_fails() {
        let out = FirstNthPatterns::new(2).apply(&training_batch()).unwrap();
        assert_eq!(out.data(1).unwrap(), &array![[5.0, 0.0]]);
        assert!(FirstNthPatterns::new(4).apply(&training_batch()).is_err());
        assert_eq!(FirstNthPatterns::new(4).name(), "First_4Pat");
        assert_eq!(FirstNthPatterns::new(4).short_name(), "F4P");
    }

    #[test]
    fn projection_multiplies_by_matrix() {
        let pp = Projection::new(array![[1.0], [1.0], [0.5]]);
        let out = pp.apply(&training_batch()).unwrap();
        assert_eq!(out.data(0).unwrap(), &array![[3.0], [7.0]]);
        assert_eq!(out.data(1).unwrap(), &array![[2.0]]);
    }

    #[test]
    fn track_variables_are_divided_by_factors() {
        let batch = PatternBatch::single(
            Layout::ObservationsAsRows,
            array![[0.05, 2.0, 0.1, 12.0, 0.2, 0.5, 7.0]],
        );
        let out = TrackSimpleNorm::new().apply(&batch).unwrap();
        assert_abs_diff_eq!(
            out.data(0).unwrap(),
            &array![[1.0, 2.0, 2.0, 2.0, 1.0, 0.5, 7.0]],
            epsilon = 1e-12
        );
    }
}
