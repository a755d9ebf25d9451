//! Auxiliary per-event quantities stored next to the patterns.

use ndarray::{Array1, ArrayView1};
use std::fmt;
use thiserror::Error;

use crate::layout::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseInfoKind {
    Et,
    Eta,
    Nvtx,
    PileUp,
}

impl BaseInfoKind {
    pub const ALL: [BaseInfoKind; 4] = [
        BaseInfoKind::Et,
        BaseInfoKind::Eta,
        BaseInfoKind::Nvtx,
        BaseInfoKind::PileUp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BaseInfoKind::Et => "Et",
            BaseInfoKind::Eta => "Eta",
            BaseInfoKind::Nvtx => "Nvtx",
            BaseInfoKind::PileUp => "PileUp",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BaseInfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("base info columns disagree on the number of events: {0:?}")]
pub struct BaseInfoLengthError(pub Vec<usize>);

/// Et, eta, vertex count and pile-up of every event in one bin.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseInfo {
    columns: [Array1<Float>; 4],
}

impl BaseInfo {
    pub fn new(
        et: Array1<Float>,
        eta: Array1<Float>,
        nvtx: Array1<Float>,
        pileup: Array1<Float>,
    ) -> Result<Self, BaseInfoLengthError> {
        Self::from_columns([et, eta, nvtx, pileup])
    }

    /// Columns ordered as [`BaseInfoKind::ALL`].
    pub fn from_columns(columns: [Array1<Float>; 4]) -> Result<Self, BaseInfoLengthError> {
        let lengths: Vec<usize> = columns.iter().map(Array1::len).collect();
        if lengths.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(BaseInfoLengthError(lengths));
        }
        Ok(Self { columns })
    }

    pub fn get(&self, kind: BaseInfoKind) -> ArrayView1<'_, Float> {
        self.columns[kind.index()].view()
    }

    pub fn n_events(&self) -> usize {
        self.columns[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_events() == 0
    }
}
