//! E_T x eta bin edges, per-bin grids and selective bin requests.

use itertools::iproduct;
use ndarray::Array1;

use super::ArchiveError;
use crate::layout::Float;
use crate::raw::{RawError, RawValue};

/// Bins requested along one axis when loading an archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BinRequest {
    #[default]
    All,
    One(usize),
    Many(Vec<usize>),
}

impl BinRequest {
    pub fn is_single(&self) -> bool {
        matches!(self, BinRequest::One(_))
    }

    /// Explicitly requested indices; empty for [`BinRequest::All`].
    pub fn requested(&self) -> &[usize] {
        match self {
            BinRequest::All => &[],
            BinRequest::One(idx) => std::slice::from_ref(idx),
            BinRequest::Many(idxs) => idxs,
        }
    }

    /// Cell indices selected out of `n_cells`.
    pub fn indices(&self, n_cells: usize) -> Vec<usize> {
        match self {
            BinRequest::All => (0..n_cells).collect(),
            other => other.requested().to_vec(),
        }
    }
}

impl From<Option<usize>> for BinRequest {
    fn from(idx: Option<usize>) -> Self {
        idx.map_or(BinRequest::All, BinRequest::One)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinAxis {
    Et,
    Eta,
}

impl BinAxis {
    fn key(self) -> &'static str {
        match self {
            BinAxis::Et => "etBin",
            BinAxis::Eta => "etaBin",
        }
    }

    fn label(self) -> &'static str {
        match self {
            BinAxis::Et => "E_T",
            BinAxis::Eta => "Eta",
        }
    }

    fn plural(self) -> &'static str {
        match self {
            BinAxis::Et => "E_T bins",
            BinAxis::Eta => "eta bins",
        }
    }
}

/// Bin edges of both axes. An empty edge array means the axis is not binned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Binning {
    et_edges: Array1<Float>,
    eta_edges: Array1<Float>,
}

impl Binning {
    pub fn new(et_edges: Array1<Float>, eta_edges: Array1<Float>) -> Self {
        Self {
            et_edges,
            eta_edges,
        }
    }

    pub fn et_edges(&self) -> &Array1<Float> {
        &self.et_edges
    }

    pub fn eta_edges(&self) -> &Array1<Float> {
        &self.eta_edges
    }

    pub fn n_et_bins(&self) -> usize {
        self.et_edges.len().saturating_sub(1)
    }

    pub fn n_eta_bins(&self) -> usize {
        self.eta_edges.len().saturating_sub(1)
    }

    pub fn is_et_dependent(&self) -> bool {
        !self.et_edges.is_empty()
    }

    pub fn is_eta_dependent(&self) -> bool {
        !self.eta_edges.is_empty()
    }

    /// Shape of every per-bin grid; an unbinned axis keeps one implicit cell.
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.n_et_bins().max(1), self.n_eta_bins().max(1))
    }

    fn axis(&self, axis: BinAxis) -> (bool, usize) {
        match axis {
            BinAxis::Et => (self.is_et_dependent(), self.n_et_bins()),
            BinAxis::Eta => (self.is_eta_dependent(), self.n_eta_bins()),
        }
    }

    fn axis_problem(&self, axis: BinAxis, request: &BinRequest) -> Option<String> {
        let (dependent, n_bins) = self.axis(axis);
        let idxs = request.requested();
        if let Some(bad) = idxs.iter().find(|&&idx| idx >= n_bins) {
            let reason = if dependent {
                format!("{} bin size: {n_bins}.", axis.label())
            } else {
                format!("Cannot use {}.", axis.plural())
            };
            return Some(format!("Cannot retrieve {}({bad}). {reason}", axis.key()));
        }
        // Trimmed edges only describe a run of adjacent bins.
        if idxs.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            return Some(format!(
                "Requested {} {idxs:?} are not contiguous and ascending.",
                axis.plural()
            ));
        }
        None
    }

    /// Checks every requested index against the available bins.
    pub fn validate(&self, et: &BinRequest, eta: &BinRequest) -> Result<(), ArchiveError> {
        let problems: Vec<String> = [
            self.axis_problem(BinAxis::Eta, eta),
            self.axis_problem(BinAxis::Et, et),
        ]
        .into_iter()
        .flatten()
        .collect();
        if problems.is_empty() {
            return Ok(());
        }
        let message = problems.join(" ");
        log::error!("{message}");
        Err(ArchiveError::BinIndex(message))
    }

    /// Edges covering the requested bins: each selected lower edge plus the
    /// edge after the last selected bin.
    pub fn select(&self, et: &BinRequest, eta: &BinRequest) -> Binning {
        Binning {
            et_edges: trim_edges(&self.et_edges, et),
            eta_edges: trim_edges(&self.eta_edges, eta),
        }
    }

    /// Indices of the grid cells selected by a request on each axis.
    pub fn cell_indices(&self, et: &BinRequest, eta: &BinRequest) -> (Vec<usize>, Vec<usize>) {
        let (n_et, n_eta) = self.grid_shape();
        (et.indices(n_et), eta.indices(n_eta))
    }
}

fn trim_edges(edges: &Array1<Float>, request: &BinRequest) -> Array1<Float> {
    let idxs = request.requested();
    match idxs.last() {
        Some(&last) if !edges.is_empty() => idxs
            .iter()
            .chain(std::iter::once(&(last + 1)))
            .map(|&idx| edges[idx])
            .collect(),
        _ => edges.clone(),
    }
}

/// Name suffix of a bin cell, as used by the archive keys.
pub fn bin_str(et: usize, eta: usize) -> String {
    format!("etBin_{et}_etaBin_{eta}")
}

/// Values laid out on the E_T x eta grid, E_T major.
#[derive(Debug, Clone, PartialEq)]
pub struct BinGrid<T> {
    n_et: usize,
    n_eta: usize,
    cells: Vec<T>,
}

impl<T> BinGrid<T> {
    pub fn new(shape: (usize, usize), cells: Vec<T>) -> Result<Self, ArchiveError> {
        if shape.0 * shape.1 != cells.len() {
            return Err(ArchiveError::GridShape {
                what: "Bin".to_string(),
                expected: shape,
                found: (cells.len(), 1),
            });
        }
        Ok(Self {
            n_et: shape.0,
            n_eta: shape.1,
            cells,
        })
    }

    pub fn single(value: T) -> Self {
        Self {
            n_et: 1,
            n_eta: 1,
            cells: vec![value],
        }
    }

    pub fn from_fn(shape: (usize, usize), mut f: impl FnMut(usize, usize) -> T) -> Self {
        let cells = iproduct!(0..shape.0, 0..shape.1)
            .map(|(et, eta)| f(et, eta))
            .collect();
        Self {
            n_et: shape.0,
            n_eta: shape.1,
            cells,
        }
    }

    pub fn try_from_fn<E>(
        shape: (usize, usize),
        mut f: impl FnMut(usize, usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        let cells = iproduct!(0..shape.0, 0..shape.1)
            .map(|(et, eta)| f(et, eta))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self {
            n_et: shape.0,
            n_eta: shape.1,
            cells,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_et, self.n_eta)
    }

    pub fn get(&self, et: usize, eta: usize) -> Option<&T> {
        (et < self.n_et && eta < self.n_eta).then(|| &self.cells[et * self.n_eta + eta])
    }

    pub fn get_mut(&mut self, et: usize, eta: usize) -> Option<&mut T> {
        if et < self.n_et && eta < self.n_eta {
            self.cells.get_mut(et * self.n_eta + eta)
        } else {
            None
        }
    }

    /// The only cell of a 1 x 1 grid.
    pub fn as_single(&self) -> Option<&T> {
        match self.cells.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &T)> {
        let n_eta = self.n_eta.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(idx, cell)| ((idx / n_eta, idx % n_eta), cell))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = ((usize, usize), &mut T)> {
        let n_eta = self.n_eta.max(1);
        self.cells
            .iter_mut()
            .enumerate()
            .map(move |(idx, cell)| ((idx / n_eta, idx % n_eta), cell))
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> BinGrid<U> {
        BinGrid {
            n_et: self.n_et,
            n_eta: self.n_eta,
            cells: self.cells.iter().map(&mut f).collect(),
        }
    }

    pub fn check_shape(&self, what: &str, expected: (usize, usize)) -> Result<(), ArchiveError> {
        if self.shape() != expected {
            log::error!(
                "{what} grid has shape {:?} but the binning requires {expected:?}",
                self.shape()
            );
            return Err(ArchiveError::GridShape {
                what: what.to_string(),
                expected,
                found: self.shape(),
            });
        }
        Ok(())
    }

    /// Nested list, one inner list of eta cells per E_T bin.
    pub fn to_raw(&self, mut f: impl FnMut(&T) -> RawValue) -> RawValue {
        RawValue::List(
            self.cells
                .chunks(self.n_eta.max(1))
                .map(|row| RawValue::List(row.iter().map(&mut f).collect()))
                .collect(),
        )
    }

    /// Reads a nested list written by [`BinGrid::to_raw`]. A bare value is
    /// taken as the single cell of an unbinned archive.
    pub fn from_raw(
        key: &str,
        value: &RawValue,
        mut f: impl FnMut(&RawValue) -> Result<T, ArchiveError>,
    ) -> Result<Self, ArchiveError> {
        let rows = match value {
            RawValue::List(rows) => rows,
            single => return Ok(Self::single(f(single)?)),
        };
        let mut cells = Vec::new();
        let mut n_eta = None;
        for row in rows {
            let row = row.require_list(key)?;
            if *n_eta.get_or_insert(row.len()) != row.len() {
                return Err(RawError::Shape {
                    key: key.to_string(),
                    shape: vec![rows.len(), n_eta.unwrap_or(0)],
                    len: row.len(),
                }
                .into());
            }
            for cell in row {
                cells.push(f(cell)?);
            }
        }
        Ok(Self {
            n_et: rows.len(),
            n_eta: n_eta.unwrap_or(0),
            cells,
        })
    }
}

impl<T: Clone> BinGrid<T> {
    pub fn filled(shape: (usize, usize), value: T) -> Self {
        Self::from_fn(shape, |_, _| value.clone())
    }

    /// Sub-grid made of the given E_T and eta cell indices.
    pub fn select(&self, et: &[usize], eta: &[usize]) -> BinGrid<T> {
        let cells = iproduct!(et, eta)
            .map(|(&i, &j)| self.cells[i * self.n_eta + j].clone())
            .collect();
        BinGrid {
            n_et: et.len(),
            n_eta: eta.len(),
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn binning() -> Binning {
        Binning::new(array![15.0, 20.0, 30.0, 40.0], array![0.0, 0.8, 1.37, 2.5])
    }

    #[test]
    fn counts_follow_edges() {
        let b = binning();
        assert_eq!((b.n_et_bins(), b.n_eta_bins()), (3, 3));
        assert_eq!(Binning::default().grid_shape(), (1, 1));
        assert!(!Binning::default().is_et_dependent());
        let one_edge = Binning::new(array![10.0], Array1::zeros(0));
        assert_eq!(one_edge.n_et_bins(), 0);
        assert!(one_edge.is_et_dependent());
    }

    #[test]
    fn single_bin_selection_trims_edges() {
        let selected = binning().select(&BinRequest::One(1), &BinRequest::All);
        assert_eq!(selected.et_edges(), &array![20.0, 30.0]);
        assert_eq!(selected.n_et_bins(), 1);
        assert_eq!(selected.n_eta_bins(), 3);
    }

    #[test]
    fn run_selection_keeps_trailing_edge() {
        let selected = binning().select(&BinRequest::Many(vec![1, 2]), &BinRequest::One(2));
        assert_eq!(selected.et_edges(), &array![20.0, 30.0, 40.0]);
        assert_eq!(selected.eta_edges(), &array![1.37, 2.5]);
    }

    #[test]
    fn gapped_or_reversed_requests_are_rejected() {
        let b = binning();
        assert!(b.validate(&BinRequest::Many(vec![0, 1, 2]), &BinRequest::All).is_ok());
        let err = b
            .validate(&BinRequest::Many(vec![0, 2]), &BinRequest::All)
            .unwrap_err();
        assert_eq!(err.to_string(), "Requested E_T bins [0, 2] are not contiguous and ascending.");
        assert!(b.validate(&BinRequest::All, &BinRequest::Many(vec![2, 0])).is_err());
        assert!(b.validate(&BinRequest::Many(vec![1, 1]), &BinRequest::All).is_err());
    }

    #[test]
    fn every_requested_index_is_validated() {
        let b = binning();
        assert!(b.validate(&BinRequest::One(2), &BinRequest::All).is_ok());
        let err = b
            .validate(&BinRequest::Many(vec![3, 0]), &BinRequest::All)
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot retrieve etBin(3). E_T bin size: 3.");
        let err = Binning::default()
            .validate(&BinRequest::All, &BinRequest::One(0))
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot retrieve etaBin(0). Cannot use eta bins.");
    }

    #[test]
    fn grid_selection_and_raw_round_trip() {
        let grid = BinGrid::from_fn((2, 3), |et, eta| (et * 10 + eta) as i64);
        assert_eq!(grid.get(1, 2), Some(&12));
        assert_eq!(grid.get(2, 0), None);
        let sub = grid.select(&[1], &[0, 2]);
        assert_eq!(sub.shape(), (1, 2));
        assert_eq!(sub.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![10, 12]);

        let raw = grid.to_raw(|v| RawValue::Int(*v));
        let back = BinGrid::from_raw("grid", &raw, |v| Ok(v.require_i64("grid")?)).unwrap();
        assert_eq!(back, grid);

        let bare = BinGrid::from_raw("grid", &RawValue::Int(4), |v| Ok(v.require_i64("grid")?))
            .unwrap();
        assert_eq!(bare.as_single(), Some(&4));
    }
}
