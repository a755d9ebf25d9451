//! Labeled groups of patterns sharing one array layout.
//!
//! A transform never inspects whether it received one array or several; it
//! always receives a [`PatternBatch`]. Parameters are fit on [`PatternBatch::joint`]
//! and applied group by group through [`PatternBatch::map_canonical`], which
//! keeps group order and labels intact.

use ndarray::{Array2, ArrayView2};

use super::PreProcError;
use crate::layout::{Float, Layout};

pub const SIGNAL_LABEL: &str = "signal";
pub const BACKGROUND_LABEL: &str = "background";

#[derive(Debug, Clone, PartialEq)]
pub struct PatternGroup {
    pub label: String,
    pub data: Array2<Float>,
}

impl PatternGroup {
    pub fn new(label: impl Into<String>, data: Array2<Float>) -> Self {
        Self {
            label: label.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternBatch {
    layout: Layout,
    groups: Vec<PatternGroup>,
}

impl PatternBatch {
    pub fn new(layout: Layout, groups: Vec<PatternGroup>) -> Self {
        Self { layout, groups }
    }

    /// A batch holding a single unlabeled array.
    pub fn single(layout: Layout, data: Array2<Float>) -> Self {
        Self::new(layout, vec![PatternGroup::new("patterns", data)])
    }

    pub fn signal_background(
        layout: Layout,
        signal: Array2<Float>,
        background: Array2<Float>,
    ) -> Self {
        Self::new(
            layout,
            vec![
                PatternGroup::new(SIGNAL_LABEL, signal),
                PatternGroup::new(BACKGROUND_LABEL, background),
            ],
        )
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn groups(&self) -> &[PatternGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<PatternGroup> {
        self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn data(&self, index: usize) -> Option<&Array2<Float>> {
        self.groups.get(index).map(|group| &group.data)
    }

    pub fn n_observations(&self) -> usize {
        self.groups
            .iter()
            .map(|group| self.layout.n_observations(&group.data.view()))
            .sum()
    }

    /// Feature count shared by every group.
    pub fn n_features(&self) -> Result<usize, PreProcError> {
        let counts: Vec<usize> = self
            .groups
            .iter()
            .map(|group| self.layout.n_features(&group.data.view()))
            .collect();
        match counts.first() {
            None => Err(PreProcError::EmptyBatch),
            Some(first) if counts.iter().all(|count| count == first) => Ok(*first),
            Some(_) => Err(PreProcError::RaggedBatch(counts)),
        }
    }

    /// Every group stacked along the observation axis, observations as rows.
    pub fn joint(&self) -> Result<Array2<Float>, PreProcError> {
        self.n_features()?;
        let views: Vec<ArrayView2<'_, Float>> =
            self.groups.iter().map(|group| group.data.view()).collect();
        Ok(self.layout.stack_observations(&views)?)
    }

    /// Runs `f` on the canonical view of each group and restores the layout.
    pub fn map_canonical<F>(&self, mut f: F) -> Result<PatternBatch, PreProcError>
    where
        F: FnMut(ArrayView2<'_, Float>) -> Result<Array2<Float>, PreProcError>,
    {
        self.map_canonical_indexed(|_, data| f(data))
    }

    /// Like [`PatternBatch::map_canonical`], also passing the group index.
    pub fn map_canonical_indexed<F>(&self, mut f: F) -> Result<PatternBatch, PreProcError>
    where
        F: FnMut(usize, ArrayView2<'_, Float>) -> Result<Array2<Float>, PreProcError>,
    {
        let groups = self
            .groups
            .iter()
            .enumerate()
            .map(|(index, group)| {
                let canonical = self.layout.canonical(group.data.view());
                let mapped = f(index, canonical)?;
                Ok(PatternGroup::new(group.label.clone(), self.layout.restore(mapped)))
            })
            .collect::<Result<Vec<_>, PreProcError>>()?;
        Ok(PatternBatch::new(self.layout, groups))
    }
}
