//! Pre-processing transforms applied to patterns before tuning.
//!
//! Every transform implements [`Transform`]. Stateful transforms start
//! empty, learn their parameters in [`Transform::take_params`] (which also
//! returns the transformed training data) and keep them until
//! [`Transform::release`]. The closed [`PreProc`] enum gathers all concrete
//! transforms so chains can be cloned, compared and persisted.

use std::fmt;
use thiserror::Error;

use crate::base_info::BaseInfo;
use crate::raw::{RawDict, RawDictExt, RawError, RawValue};

pub mod batch;
pub mod chain;
pub mod file;
pub mod kernel_pca;
pub mod pca;
pub mod primitives;
pub mod ringer;

pub use batch::{PatternBatch, PatternGroup};
pub use chain::{PreProcChain, PreProcCollection};
pub use file::{PreProcFile, PreProcFileError};
pub use kernel_pca::{Kernel, KernelPca};
pub use pca::{Pca, PcaTarget};
pub use primitives::{
    FirstNthPatterns, MapStd, NoPreProc, Norm1, Projection, RemoveMean, TrackSimpleNorm,
    UnitaryRms,
};
pub use ringer::{RingerEtaMu, RingerRp};

#[derive(Debug, Error)]
pub enum PreProcError {
    #[error("Attempted to apply {name} before taking its parameters")]
    NotFitted { name: String },
    #[error("It is impossible to revert {name}")]
    Unsupported { name: String },
    #[error("{name} expects {expected} features but the data has {found}")]
    FeatureMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("{name} cannot be fit on a batch without observations")]
    NoObservations { name: String },
    #[error("Invalid configuration for {name}: {reason}")]
    Config { name: String, reason: String },
    #[error("The pattern batch holds no groups")]
    EmptyBatch,
    #[error("Pattern groups disagree on the number of features: {0:?}")]
    RaggedBatch(Vec<usize>),
    #[error("Extra information supplied for {found} groups, the batch has {expected}")]
    ExtraMismatch { expected: usize, found: usize },
    #[error("A pre-processing collection cannot mix chains and nested collections")]
    MixedCollection,
    #[error("Unknown pre-processing class '{0}'")]
    UnknownClass(String),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Eigendecomposition failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("Raw conversion failed: {0}")]
    Raw(#[from] RawError),
}

pub(crate) fn not_fitted(name: String) -> PreProcError {
    log::error!("Attempted to apply {name} before taking its parameters.");
    PreProcError::NotFitted { name }
}

/// The fit/apply/revert protocol shared by every pre-processing step.
pub trait Transform {
    /// Descriptive name, also used to label tuned discriminators.
    fn name(&self) -> String;

    fn short_name(&self) -> String;

    fn is_revertible(&self) -> bool {
        false
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError>;

    fn revert(&self, _: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let name = self.name();
        log::error!("It is impossible to revert {name}");
        Err(PreProcError::Unsupported { name })
    }

    fn run(&self, batch: &PatternBatch, revert: bool) -> Result<PatternBatch, PreProcError> {
        if revert {
            log::debug!("Reverting {}...", self.name());
            self.revert(batch)
        } else {
            log::debug!("Applying {}...", self.name());
            self.apply(batch)
        }
    }

    /// Learns the parameters from `batch` and returns the transformed batch.
    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        log::debug!("No need to retrieve any parameters from data.");
        self.apply(batch)
    }

    fn release(&mut self) {}

    /// Appends auxiliary per-event information to the patterns of each group.
    fn concatenate(
        &self,
        batch: &PatternBatch,
        _: &[BaseInfo],
    ) -> Result<PatternBatch, PreProcError> {
        Ok(batch.clone())
    }
}

/// Hand-written conversion of a transform's parameters to raw form.
pub trait RawParams: Sized {
    fn to_raw_params(&self) -> RawDict;
    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreProc {
    NoPreProc(NoPreProc),
    RemoveMean(RemoveMean),
    UnitaryRms(UnitaryRms),
    MapStd(MapStd),
    Norm1(Norm1),
    FirstNthPatterns(FirstNthPatterns),
    Projection(Projection),
    TrackSimpleNorm(TrackSimpleNorm),
    RingerRp(RingerRp),
    RingerEtaMu(RingerEtaMu),
    Pca(Pca),
    KernelPca(KernelPca),
}

const CLASS_KEY: &str = "class";

impl PreProc {
    fn inner(&self) -> &dyn Transform {
        match self {
            PreProc::NoPreProc(pp) => pp,
            PreProc::RemoveMean(pp) => pp,
            PreProc::UnitaryRms(pp) => pp,
            PreProc::MapStd(pp) => pp,
            PreProc::Norm1(pp) => pp,
            PreProc::FirstNthPatterns(pp) => pp,
            PreProc::Projection(pp) => pp,
            PreProc::TrackSimpleNorm(pp) => pp,
            PreProc::RingerRp(pp) => pp,
            PreProc::RingerEtaMu(pp) => pp,
            PreProc::Pca(pp) => pp,
            PreProc::KernelPca(pp) => pp,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Transform {
        match self {
            PreProc::NoPreProc(pp) => pp,
            PreProc::RemoveMean(pp) => pp,
            PreProc::UnitaryRms(pp) => pp,
            PreProc::MapStd(pp) => pp,
            PreProc::Norm1(pp) => pp,
            PreProc::FirstNthPatterns(pp) => pp,
            PreProc::Projection(pp) => pp,
            PreProc::TrackSimpleNorm(pp) => pp,
            PreProc::RingerRp(pp) => pp,
            PreProc::RingerEtaMu(pp) => pp,
            PreProc::Pca(pp) => pp,
            PreProc::KernelPca(pp) => pp,
        }
    }

    /// Class tag written to the raw dictionary.
    pub fn class_name(&self) -> &'static str {
        match self {
            PreProc::NoPreProc(_) => "NoPreProc",
            PreProc::RemoveMean(_) => "RemoveMean",
            PreProc::UnitaryRms(_) => "UnitaryRMS",
            PreProc::MapStd(_) => "MapStd",
            PreProc::Norm1(_) => "Norm1",
            PreProc::FirstNthPatterns(_) => "FirstNthPatterns",
            PreProc::Projection(_) => "Projection",
            PreProc::TrackSimpleNorm(_) => "TrackSimpleNorm",
            PreProc::RingerRp(_) => "RingerRp",
            PreProc::RingerEtaMu(_) => "RingerEtaMu",
            PreProc::Pca(_) => "PCA",
            PreProc::KernelPca(_) => "KernelPCA",
        }
    }

    pub fn to_raw(&self) -> RawDict {
        let mut raw = match self {
            PreProc::NoPreProc(pp) => pp.to_raw_params(),
            PreProc::RemoveMean(pp) => pp.to_raw_params(),
            PreProc::UnitaryRms(pp) => pp.to_raw_params(),
            PreProc::MapStd(pp) => pp.to_raw_params(),
            PreProc::Norm1(pp) => pp.to_raw_params(),
            PreProc::FirstNthPatterns(pp) => pp.to_raw_params(),
            PreProc::Projection(pp) => pp.to_raw_params(),
            PreProc::TrackSimpleNorm(pp) => pp.to_raw_params(),
            PreProc::RingerRp(pp) => pp.to_raw_params(),
            PreProc::RingerEtaMu(pp) => pp.to_raw_params(),
            PreProc::Pca(pp) => pp.to_raw_params(),
            PreProc::KernelPca(pp) => pp.to_raw_params(),
        };
        raw.insert(CLASS_KEY.to_string(), RawValue::text(self.class_name()));
        raw
    }

    pub fn from_raw(raw: &RawDict) -> Result<Self, PreProcError> {
        let class = raw.require_str(CLASS_KEY)?;
        let pp = match class {
            "NoPreProc" => PreProc::NoPreProc(NoPreProc::from_raw_params(raw)?),
            "RemoveMean" => PreProc::RemoveMean(RemoveMean::from_raw_params(raw)?),
            "UnitaryRMS" => PreProc::UnitaryRms(UnitaryRms::from_raw_params(raw)?),
            "MapStd" => PreProc::MapStd(MapStd::from_raw_params(raw)?),
            "Norm1" => PreProc::Norm1(Norm1::from_raw_params(raw)?),
            "FirstNthPatterns" => {
                PreProc::FirstNthPatterns(FirstNthPatterns::from_raw_params(raw)?)
            }
            "Projection" => PreProc::Projection(Projection::from_raw_params(raw)?),
            "TrackSimpleNorm" => PreProc::TrackSimpleNorm(TrackSimpleNorm::from_raw_params(raw)?),
            "RingerRp" => PreProc::RingerRp(RingerRp::from_raw_params(raw)?),
            "RingerEtaMu" => PreProc::RingerEtaMu(RingerEtaMu::from_raw_params(raw)?),
            "PCA" => PreProc::Pca(Pca::from_raw_params(raw)?),
            "KernelPCA" => PreProc::KernelPca(KernelPca::from_raw_params(raw)?),
            other => return Err(PreProcError::UnknownClass(other.to_string())),
        };
        Ok(pp)
    }
}

impl Transform for PreProc {
    fn name(&self) -> String {
        self.inner().name()
    }

    fn short_name(&self) -> String {
        self.inner().short_name()
    }

    fn is_revertible(&self) -> bool {
        self.inner().is_revertible()
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        self.inner().apply(batch)
    }

    fn revert(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        self.inner().revert(batch)
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        self.inner_mut().take_params(batch)
    }

    fn release(&mut self) {
        self.inner_mut().release()
    }

    fn concatenate(
        &self,
        batch: &PatternBatch,
        extra: &[BaseInfo],
    ) -> Result<PatternBatch, PreProcError> {
        self.inner().concatenate(batch, extra)
    }
}

impl fmt::Display for PreProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

macro_rules! preproc_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for PreProc {
                fn from(pp: $variant) -> Self {
                    PreProc::$variant(pp)
                }
            }
        )*
    };
}

preproc_from!(
    NoPreProc,
    RemoveMean,
    UnitaryRms,
    MapStd,
    Norm1,
    FirstNthPatterns,
    Projection,
    TrackSimpleNorm,
    RingerRp,
    RingerEtaMu,
    Pca,
    KernelPca,
);
