//! Array axis conventions.
//!
//! Pattern arrays are two dimensional. One axis enumerates observations
//! (events), the other enumerates pattern features. Which one is which is a
//! process-wide storage choice, so every numeric routine in the crate goes
//! through [`Layout`] to obtain a canonical view with observations as rows,
//! computes there, and hands the result back in the caller's layout.

use ndarray::{Array2, ArrayView2, Axis, ShapeError, concatenate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Floating-point type used for every pattern, parameter and efficiency.
pub type Float = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Each row is one observation (C order storage).
    #[default]
    ObservationsAsRows,
    /// Each column is one observation (Fortran order storage).
    ObservationsAsColumns,
}

impl Layout {
    pub fn observation_axis(self) -> Axis {
        match self {
            Layout::ObservationsAsRows => Axis(0),
            Layout::ObservationsAsColumns => Axis(1),
        }
    }

    pub fn pattern_axis(self) -> Axis {
        match self {
            Layout::ObservationsAsRows => Axis(1),
            Layout::ObservationsAsColumns => Axis(0),
        }
    }

    pub fn n_observations(self, data: &ArrayView2<'_, Float>) -> usize {
        data.len_of(self.observation_axis())
    }

    pub fn n_features(self, data: &ArrayView2<'_, Float>) -> usize {
        data.len_of(self.pattern_axis())
    }

    /// View `data` with observations along rows. No data is copied.
    pub fn canonical<'a>(self, data: ArrayView2<'a, Float>) -> ArrayView2<'a, Float> {
        match self {
            Layout::ObservationsAsRows => data,
            Layout::ObservationsAsColumns => data.reversed_axes(),
        }
    }

    /// Inverse of [`Layout::canonical`] for an owned result.
    pub fn restore(self, canonical: Array2<Float>) -> Array2<Float> {
        match self {
            Layout::ObservationsAsRows => canonical,
            Layout::ObservationsAsColumns => canonical.reversed_axes(),
        }
    }

    /// Stacks every part along the observation axis. The result is canonical.
    pub fn stack_observations(
        self,
        parts: &[ArrayView2<'_, Float>],
    ) -> Result<Array2<Float>, ShapeError> {
        let views: Vec<ArrayView2<'_, Float>> =
            parts.iter().map(|part| self.canonical(part.view())).collect();
        concatenate(Axis(0), &views)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Layout::ObservationsAsRows => "rows",
            Layout::ObservationsAsColumns => "columns",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rows" | "c" | "C" => Ok(Layout::ObservationsAsRows),
            "columns" | "fortran" | "F" => Ok(Layout::ObservationsAsColumns),
            other => Err(format!("unknown array layout '{other}'")),
        }
    }
}
