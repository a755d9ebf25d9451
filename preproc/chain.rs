//! Ordered pipelines of transforms and the collections that enumerate them.

use std::fmt;

use super::batch::PatternBatch;
use super::{PreProc, PreProcError, Transform};
use crate::base_info::BaseInfo;
use crate::raw::{RawDict, RawDictExt, RawValue};

const CHAIN_CLASS: &str = "PreProcChain";
const COLLECTION_CLASS: &str = "PreProcCollection";
const EMPTY_CHAIN_NAME: &str = "NoPreProc";

/// Append-only sequence of transforms.
///
/// Forward application folds first to last. Reverting runs the inverses from
/// last to first, so `revert(apply(x)) == x` holds for any revertible chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreProcChain {
    members: Vec<PreProc>,
}

impl PreProcChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pp: impl Into<PreProc>) {
        self.members.push(pp.into());
    }

    pub fn with(mut self, pp: impl Into<PreProc>) -> Self {
        self.push(pp);
        self
    }

    pub fn members(&self) -> &[PreProc] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn joined(&self, separator: &str, label: impl Fn(&PreProc) -> String) -> String {
        if self.members.is_empty() {
            return EMPTY_CHAIN_NAME.to_string();
        }
        self.members
            .iter()
            .map(label)
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn warn_empty(&self) {
        log::warn!("No pre-processing available in this chain.");
    }

    pub fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("class".into(), RawValue::text(CHAIN_CLASS));
        raw.insert(
            "members".into(),
            RawValue::List(
                self.members
                    .iter()
                    .map(|pp| RawValue::Dict(pp.to_raw()))
                    .collect(),
            ),
        );
        raw
    }

    pub fn from_raw(raw: &RawDict) -> Result<Self, PreProcError> {
        let class = raw.require_str("class")?;
        if class != CHAIN_CLASS {
            return Err(PreProcError::UnknownClass(class.to_string()));
        }
        let members = raw
            .require_list("members")?
            .iter()
            .map(|value| PreProc::from_raw(value.require_dict("members")?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { members })
    }
}

impl Transform for PreProcChain {
    fn name(&self) -> String {
        self.joined("->", |pp| pp.name())
    }

    fn short_name(&self) -> String {
        self.joined("-", |pp| pp.short_name())
    }

    fn is_revertible(&self) -> bool {
        self.members.iter().all(|pp| pp.is_revertible())
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        if self.members.is_empty() {
            self.warn_empty();
            return Ok(batch.clone());
        }
        self.members
            .iter()
            .try_fold(batch.clone(), |data, pp| pp.apply(&data))
    }

    fn revert(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        if self.members.is_empty() {
            self.warn_empty();
            return Ok(batch.clone());
        }
        self.members
            .iter()
            .rev()
            .try_fold(batch.clone(), |data, pp| pp.revert(&data))
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        if self.members.is_empty() {
            self.warn_empty();
            return Ok(batch.clone());
        }
        let mut data = batch.clone();
        for pp in &mut self.members {
            log::debug!("Taking parameters for {pp}...");
            data = pp.take_params(&data)?;
        }
        Ok(data)
    }

    fn release(&mut self) {
        for pp in &mut self.members {
            pp.release();
        }
    }

    fn concatenate(
        &self,
        batch: &PatternBatch,
        extra: &[BaseInfo],
    ) -> Result<PatternBatch, PreProcError> {
        if self.members.is_empty() {
            self.warn_empty();
            return Ok(batch.clone());
        }
        self.members
            .iter()
            .try_fold(batch.clone(), |data, pp| pp.concatenate(&data, extra))
    }
}

impl fmt::Display for PreProcChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromIterator<PreProc> for PreProcChain {
    fn from_iter<I: IntoIterator<Item = PreProc>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Members {
    Chains(Vec<PreProcChain>),
    Collections(Vec<PreProcCollection>),
}

/// Homogeneous set of chains, or of nested collections, evaluated
/// independently of each other.
#[derive(Debug, Clone, PartialEq)]
pub struct PreProcCollection {
    members: Members,
}

impl Default for PreProcCollection {
    fn default() -> Self {
        Self {
            members: Members::Chains(Vec::new()),
        }
    }
}

impl PreProcCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chains(chains: Vec<PreProcChain>) -> Self {
        Self {
            members: Members::Chains(chains),
        }
    }

    pub fn push_chain(&mut self, chain: PreProcChain) -> Result<(), PreProcError> {
        if self.is_empty() {
            self.members = Members::Chains(Vec::new());
        }
        match &mut self.members {
            Members::Chains(chains) => {
                chains.push(chain);
                Ok(())
            }
            Members::Collections(_) => Err(mixed()),
        }
    }

    pub fn push_collection(&mut self, collection: PreProcCollection) -> Result<(), PreProcError> {
        if self.is_empty() {
            self.members = Members::Collections(Vec::new());
        }
        match &mut self.members {
            Members::Collections(collections) => {
                collections.push(collection);
                Ok(())
            }
            Members::Chains(_) => Err(mixed()),
        }
    }

    /// Number of direct members.
    pub fn len(&self) -> usize {
        match &self.members {
            Members::Chains(chains) => chains.len(),
            Members::Collections(collections) => collections.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every chain, depth first.
    pub fn chains(&self) -> Box<dyn Iterator<Item = &PreProcChain> + '_> {
        match &self.members {
            Members::Chains(chains) => Box::new(chains.iter()),
            Members::Collections(collections) => {
                Box::new(collections.iter().flat_map(|collection| collection.chains()))
            }
        }
    }

    /// Fits a private copy of every chain on `batch`.
    ///
    /// The members of `self` stay untouched, so fitting one candidate never
    /// leaks state into another.
    pub fn fit_each(
        &self,
        batch: &PatternBatch,
    ) -> Result<Vec<(PreProcChain, PatternBatch)>, PreProcError> {
        self.chains()
            .map(|chain| {
                let mut fitted = chain.clone();
                let output = fitted.take_params(batch)?;
                log::info!("Fitted pre-processing chain {fitted}");
                Ok((fitted, output))
            })
            .collect()
    }

    pub fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("class".into(), RawValue::text(COLLECTION_CLASS));
        let (key, members) = match &self.members {
            Members::Chains(chains) => (
                "chains",
                chains.iter().map(|c| RawValue::Dict(c.to_raw())).collect(),
            ),
            Members::Collections(collections) => (
                "collections",
                collections
                    .iter()
                    .map(|c| RawValue::Dict(c.to_raw()))
                    .collect(),
            ),
        };
        raw.insert(key.into(), RawValue::List(members));
        raw
    }

    pub fn from_raw(raw: &RawDict) -> Result<Self, PreProcError> {
        let class = raw.require_str("class")?;
        if class != COLLECTION_CLASS {
            return Err(PreProcError::UnknownClass(class.to_string()));
        }
        match (raw.get("chains"), raw.get("collections")) {
            (Some(_), Some(_)) => Err(mixed()),
            (Some(_), None) => {
                let chains = raw
                    .require_list("chains")?
                    .iter()
                    .map(|value| PreProcChain::from_raw(value.require_dict("chains")?))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::from_chains(chains))
            }
            (None, Some(_)) => {
                let collections = raw
                    .require_list("collections")?
                    .iter()
                    .map(|value| PreProcCollection::from_raw(value.require_dict("collections")?))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self {
                    members: Members::Collections(collections),
                })
            }
            (None, None) => Ok(Self::new()),
        }
    }
}

fn mixed() -> PreProcError {
    log::error!("A pre-processing collection cannot mix chains and nested collections");
    PreProcError::MixedCollection
}

impl From<PreProcChain> for PreProcCollection {
    fn from(chain: PreProcChain) -> Self {
        Self::from_chains(vec![chain])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::preproc::{MapStd, Norm1, Pca, PcaTarget, RemoveMean, UnitaryRms};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn batch() -> PatternBatch {
        PatternBatch::signal_background(
            Layout::ObservationsAsRows,
            array![[1.0, 2.0, 0.0], [3.0, 5.0, 0.0]],
            array![[-1.0, 4.0, 0.0], [2.0, 1.0, 0.0], [0.0, 0.0, 0.0]],
        )
    }

    #[test]
    fn empty_chain_is_identity() {
        let mut chain = PreProcChain::new();
        assert_eq!(chain.to_string(), "NoPreProc");
        assert_eq!(chain.short_name(), "NoPreProc");
        assert_eq!(chain.apply(&batch()).unwrap(), batch());
        assert_eq!(chain.take_params(&batch()).unwrap(), batch());
        assert_eq!(chain.revert(&batch()).unwrap(), batch());
    }

    #[test]
    fn names_join_members() {
        let chain = PreProcChain::new().with(RemoveMean::new()).with(UnitaryRms::new());
        assert_eq!(chain.name(), "rm_mean->UnitRMS");
        assert_eq!(chain.short_name(), "no_mu-1rms");
    }

    #[test]
    fn revert_undoes_a_composed_chain() {
        let mut chain = PreProcChain::new().with(RemoveMean::new()).with(UnitaryRms::new());
        let forward = chain.take_params(&batch()).unwrap();
        assert_eq!(chain.apply(&batch()).unwrap(), forward);
        let back = chain.revert(&forward).unwrap();
        for (restored, original) in back.groups().iter().zip(batch().groups()) {
            assert_abs_diff_eq!(restored.data, original.data, epsilon = 1e-12);
        }
    }

    #[test]
    fn revertibility_requires_every_member() {
        let revertible = PreProcChain::new().with(MapStd::new()).with(RemoveMean::new());
        assert!(revertible.is_revertible());
        let mixed = revertible.clone().with(Norm1);
        assert!(!mixed.is_revertible());
        assert!(matches!(
            mixed.revert(&batch()),
            Err(PreProcError::Unsupported { .. })
        ));
    }

    #[test]
    fn steps_without_extra_information_pass_batches_through() {
        let chain = PreProcChain::new().with(Norm1);
        let info = crate::base_info::BaseInfo::default();
        assert_eq!(chain.concatenate(&batch(), &[info.clone(), info]).unwrap(), batch());
        assert!(matches!(
            chain.revert(&batch()),
            Err(PreProcError::Unsupported { .. })
        ));
    }

    #[test]
    fn raw_round_trip_preserves_behaviour() {
        let mut chain = PreProcChain::new()
            .with(Norm1)
            .with(MapStd::new())
            .with(Pca::new(PcaTarget::Components(2)));
        let fitted = chain.take_params(&batch()).unwrap();
        let restored = PreProcChain::from_raw(&chain.to_raw()).unwrap();
        assert_eq!(restored, chain);
        assert_eq!(restored.apply(&batch()).unwrap(), fitted);
    }

    #[test]
    fn collections_reject_mixed_members() {
        let mut collection = PreProcCollection::new();
        collection.push_chain(PreProcChain::new()).unwrap();
        assert!(matches!(
            collection.push_collection(PreProcCollection::new()),
            Err(PreProcError::MixedCollection)
        ));

        let mut nested = PreProcCollection::new();
        nested.push_collection(collection.clone()).unwrap();
        nested.push_collection(collection).unwrap();
        assert!(nested.push_chain(PreProcChain::new()).is_err());
        assert_eq!(nested.chains().count(), 2);
    }

    #[test]
    fn fit_each_leaves_members_unfitted() {
        let chain = PreProcChain::new().with(RemoveMean::new());
        let mut collection = PreProcCollection::from(chain.clone());
        collection
            .push_chain(PreProcChain::new().with(MapStd::new()))
            .unwrap();

        let fitted = collection.fit_each(&batch()).unwrap();
        assert_eq!(fitted.len(), 2);
        assert!(fitted[0].0.apply(&batch()).is_ok());
        let untouched = collection.chains().next().unwrap();
        assert_eq!(untouched, &chain);
        assert!(matches!(
            untouched.apply(&batch()),
            Err(PreProcError::NotFitted { .. })
        ));
    }

    #[test]
    fn nested_collection_round_trips() {
        let mut inner = PreProcCollection::new();
        inner
            .push_chain(PreProcChain::new().with(Norm1).with(RemoveMean::new()))
            .unwrap();
        let mut outer = PreProcCollection::new();
        outer.push_collection(inner).unwrap();
        let restored = PreProcCollection::from_raw(&outer.to_raw()).unwrap();
        assert_eq!(restored, outer);
    }
}
