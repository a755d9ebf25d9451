//! On-disk archive of a pre-processing collection.

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::chain::{PreProcChain, PreProcCollection};
use super::PreProcError;
use crate::raw::{
    Container, RawDict, RawDictExt, RawError, RawValue, read_container, write_container,
};

pub const PREPROC_FILE_TYPE: &str = "PreProcFile";
pub const PREPROC_FILE_VERSION: i64 = 3;

#[derive(Debug, Error)]
pub enum PreProcFileError {
    #[error("'{path}' is not a PreProcFile (type '{found}')")]
    WrongType { path: PathBuf, found: String },
    #[error("Unknown PreProcFile version {0}")]
    UnknownVersion(i64),
    #[error("Attempted to save an empty pre-processing collection")]
    Empty,
    #[error(transparent)]
    Raw(#[from] RawError),
    #[error(transparent)]
    PreProc(#[from] PreProcError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreProcFile {
    collection: PreProcCollection,
}

impl PreProcFile {
    pub fn new(collection: impl Into<PreProcCollection>) -> Self {
        Self {
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &PreProcCollection {
        &self.collection
    }

    pub fn into_collection(self) -> PreProcCollection {
        self.collection
    }

    pub fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("type".into(), RawValue::text(PREPROC_FILE_TYPE));
        raw.insert("version".into(), RawValue::Int(PREPROC_FILE_VERSION));
        raw.insert("ppCol".into(), RawValue::Dict(self.collection.to_raw()));
        raw
    }

    /// Decodes any known file version. Version 1 files held a single chain.
    pub fn from_raw(path: &Path, raw: &RawDict) -> Result<Self, PreProcFileError> {
        let kind = raw.require_str("type")?;
        if kind != PREPROC_FILE_TYPE {
            log::error!("Input file is not from PreProcFile type.");
            return Err(PreProcFileError::WrongType {
                path: path.to_path_buf(),
                found: kind.to_string(),
            });
        }
        let payload = raw.require_dict("ppCol")?;
        let collection = match raw.require("version")?.require_i64("version")? {
            2 | 3 => PreProcCollection::from_raw(payload)?,
            1 => PreProcChain::from_raw(payload)?.into(),
            other => {
                log::error!("Unknown PreProcFile version {other}.");
                return Err(PreProcFileError::UnknownVersion(other));
            }
        };
        Ok(Self { collection })
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf, PreProcFileError> {
        if self.collection.is_empty() {
            log::error!("Attempted to save empty data to a PreProcFile.");
            return Err(PreProcFileError::Empty);
        }
        write_container(path, &self.to_raw(), Container::Gzip)?;
        log::info!("Saved pre-processing collection to {}", path.display());
        Ok(path.to_path_buf())
    }

    pub fn load(path: &Path) -> Result<Self, PreProcFileError> {
        let (raw, _) = read_container(path)?;
        Self::from_raw(path, &raw)
    }
}
