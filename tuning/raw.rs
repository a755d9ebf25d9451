//! Raw dictionary model and the on-disk container.
//!
//! Every persisted entity converts itself into a [`RawDict`], a flat mapping
//! from string keys to tagged [`RawValue`]s, through a hand-written
//! `to_raw`/`from_raw` pair. Containers are JSON objects of raw values,
//! normally gzip compressed. Plain containers are still read because the very
//! first archive format was never compressed.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::layout::Float;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub type RawDict = BTreeMap<String, RawValue>;

#[derive(Debug, Error)]
pub enum RawError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed container: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing key '{0}'")]
    MissingKey(String),
    #[error("Entry '{key}' holds {found}, expected {expected}")]
    WrongKind {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Entry '{key}' declares shape {shape:?} but stores {len} values")]
    Shape {
        key: String,
        shape: Vec<usize>,
        len: usize,
    },
}

/// A dense numeric array stored in logical row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArray {
    pub shape: Vec<usize>,
    #[serde(with = "cells")]
    pub data: Vec<Float>,
}

impl RawArray {
    pub fn from_vector(values: ArrayView1<'_, Float>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values.to_vec(),
        }
    }

    pub fn from_matrix(values: ArrayView2<'_, Float>) -> Self {
        let (rows, cols) = values.dim();
        Self {
            shape: vec![rows, cols],
            data: values.iter().copied().collect(),
        }
    }

    /// Reads the array as a vector. A matrix with a single column or row is
    /// flattened.
    pub fn to_vector(&self, key: &str) -> Result<Array1<Float>, RawError> {
        let expected: usize = self.shape.iter().product();
        let flat = self.shape.len() == 1
            || (self.shape.len() == 2 && (self.shape[0] == 1 || self.shape[1] == 1));
        if !flat || expected != self.data.len() {
            return Err(self.shape_error(key));
        }
        Ok(Array1::from(self.data.clone()))
    }

    pub fn to_matrix(&self, key: &str) -> Result<Array2<Float>, RawError> {
        let (rows, cols) = match self.shape.as_slice() {
            [rows, cols] => (*rows, *cols),
            [len] => (*len, 1),
            _ => return Err(self.shape_error(key)),
        };
        Array2::from_shape_vec((rows, cols), self.data.clone()).map_err(|_| self.shape_error(key))
    }

    fn shape_error(&self, key: &str) -> RawError {
        RawError::Shape {
            key: key.to_string(),
            shape: self.shape.clone(),
            len: self.data.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "cell")] Float),
    Text(String),
    List(Vec<RawValue>),
    Dict(RawDict),
    Array(RawArray),
}

impl RawValue {
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::Text(_) => "text",
            RawValue::List(_) => "list",
            RawValue::Dict(_) => "dict",
            RawValue::Array(_) => "array",
        }
    }

    pub fn vector(values: ArrayView1<'_, Float>) -> Self {
        RawValue::Array(RawArray::from_vector(values))
    }

    pub fn matrix(values: ArrayView2<'_, Float>) -> Self {
        RawValue::Array(RawArray::from_matrix(values))
    }

    pub fn text(value: impl Into<String>) -> Self {
        RawValue::Text(value.into())
    }

    pub fn count(value: usize) -> Self {
        RawValue::Int(value as i64)
    }

    fn wrong_kind(&self, key: &str, expected: &'static str) -> RawError {
        RawError::WrongKind {
            key: key.to_string(),
            expected,
            found: self.kind(),
        }
    }

    pub fn require_bool(&self, key: &str) -> Result<bool, RawError> {
        match self {
            RawValue::Bool(value) => Ok(*value),
            RawValue::Int(value) => Ok(*value != 0),
            other => Err(other.wrong_kind(key, "bool")),
        }
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, RawError> {
        match self {
            RawValue::Int(value) => Ok(*value),
            other => Err(other.wrong_kind(key, "int")),
        }
    }

    pub fn require_usize(&self, key: &str) -> Result<usize, RawError> {
        match self {
            RawValue::Int(value) if *value >= 0 => Ok(*value as usize),
            other => Err(other.wrong_kind(key, "non-negative int")),
        }
    }

    pub fn require_f64(&self, key: &str) -> Result<Float, RawError> {
        match self {
            RawValue::Float(value) => Ok(*value),
            RawValue::Int(value) => Ok(*value as Float),
            other => Err(other.wrong_kind(key, "float")),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, RawError> {
        match self {
            RawValue::Text(value) => Ok(value),
            other => Err(other.wrong_kind(key, "text")),
        }
    }

    pub fn require_list(&self, key: &str) -> Result<&[RawValue], RawError> {
        match self {
            RawValue::List(values) => Ok(values),
            other => Err(other.wrong_kind(key, "list")),
        }
    }

    pub fn require_dict(&self, key: &str) -> Result<&RawDict, RawError> {
        match self {
            RawValue::Dict(values) => Ok(values),
            other => Err(other.wrong_kind(key, "dict")),
        }
    }

    pub fn require_array(&self, key: &str) -> Result<&RawArray, RawError> {
        match self {
            RawValue::Array(values) => Ok(values),
            other => Err(other.wrong_kind(key, "array")),
        }
    }

    pub fn require_vector(&self, key: &str) -> Result<Array1<Float>, RawError> {
        self.require_array(key)?.to_vector(key)
    }

    pub fn require_matrix(&self, key: &str) -> Result<Array2<Float>, RawError> {
        self.require_array(key)?.to_matrix(key)
    }
}

/// Keyed access with errors naming the offending key.
pub trait RawDictExt {
    fn require(&self, key: &str) -> Result<&RawValue, RawError>;
    fn require_bool(&self, key: &str) -> Result<bool, RawError>;
    fn require_usize(&self, key: &str) -> Result<usize, RawError>;
    fn require_f64(&self, key: &str) -> Result<Float, RawError>;
    fn require_str(&self, key: &str) -> Result<&str, RawError>;
    fn require_list(&self, key: &str) -> Result<&[RawValue], RawError>;
    fn require_dict(&self, key: &str) -> Result<&RawDict, RawError>;
    fn require_vector(&self, key: &str) -> Result<Array1<Float>, RawError>;
    fn require_matrix(&self, key: &str) -> Result<Array2<Float>, RawError>;
}

impl RawDictExt for RawDict {
    fn require(&self, key: &str) -> Result<&RawValue, RawError> {
        self.get(key)
            .ok_or_else(|| RawError::MissingKey(key.to_string()))
    }

    fn require_bool(&self, key: &str) -> Result<bool, RawError> {
        self.require(key)?.require_bool(key)
    }

    fn require_usize(&self, key: &str) -> Result<usize, RawError> {
        self.require(key)?.require_usize(key)
    }

    fn require_f64(&self, key: &str) -> Result<Float, RawError> {
        self.require(key)?.require_f64(key)
    }

    fn require_str(&self, key: &str) -> Result<&str, RawError> {
        self.require(key)?.require_str(key)
    }

    fn require_list(&self, key: &str) -> Result<&[RawValue], RawError> {
        self.require(key)?.require_list(key)
    }

    fn require_dict(&self, key: &str) -> Result<&RawDict, RawError> {
        self.require(key)?.require_dict(key)
    }

    fn require_vector(&self, key: &str) -> Result<Array1<Float>, RawError> {
        self.require(key)?.require_vector(key)
    }

    fn require_matrix(&self, key: &str) -> Result<Array2<Float>, RawError> {
        self.require(key)?.require_matrix(key)
    }
}

/// Storage flavour of a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Gzip,
    Plain,
}

pub fn write_container(path: &Path, dict: &RawDict, container: Container) -> Result<(), RawError> {
    let writer = BufWriter::new(File::create(path)?);
    match container {
        Container::Gzip => {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            serde_json::to_writer(&mut encoder, dict)?;
            encoder.finish()?.flush()?;
        }
        Container::Plain => {
            let mut writer = writer;
            serde_json::to_writer(&mut writer, dict)?;
            writer.flush()?;
        }
    }
    Ok(())
}

/// Reads a container, detecting compression from the gzip magic bytes.
pub fn read_container(path: &Path) -> Result<(RawDict, Container), RawError> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::new();
        GzDecoder::new(bytes.as_slice()).read_to_end(&mut json)?;
        Ok((serde_json::from_slice(&json)?, Container::Gzip))
    } else {
        Ok((serde_json::from_slice(&bytes)?, Container::Plain))
    }
}

// JSON has no spelling for non-finite numbers, so those travel as text.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Cell {
    Number(Float),
    Text(String),
}

impl From<Float> for Cell {
    fn from(value: Float) -> Self {
        if value.is_finite() {
            Cell::Number(value)
        } else if value.is_nan() {
            Cell::Text("nan".to_string())
        } else if value > 0.0 {
            Cell::Text("inf".to_string())
        } else {
            Cell::Text("-inf".to_string())
        }
    }
}

impl Cell {
    fn into_float<E: serde::de::Error>(self) -> Result<Float, E> {
        match self {
            Cell::Number(value) => Ok(value),
            Cell::Text(text) => match text.as_str() {
                "nan" => Ok(Float::NAN),
                "inf" => Ok(Float::INFINITY),
                "-inf" => Ok(Float::NEG_INFINITY),
                other => Err(E::custom(format!("invalid numeric cell '{other}'"))),
            },
        }
    }
}

mod cell {
    use super::{Cell, Float};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Float, serializer: S) -> Result<S::Ok, S::Error> {
        Cell::from(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Float, D::Error> {
        Cell::deserialize(deserializer)?.into_float()
    }
}

mod cells {
    use super::{Cell, Float};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Float], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&Cell::from(*value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Float>, D::Error> {
        Vec::<Cell>::deserialize(deserializer)?
            .into_iter()
            .map(Cell::into_float)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn sample_dict() -> RawDict {
        let mut dict = RawDict::new();
        dict.insert("type".into(), RawValue::text("Sample"));
        dict.insert("version".into(), RawValue::count(2));
        dict.insert(
            "matrix".into(),
            RawValue::matrix(array![[0.1, 1.0 / 3.0], [f64::NAN, -0.0]].view()),
        );
        dict.insert("limit".into(), RawValue::Float(f64::INFINITY));
        dict
    }

    #[test]
    fn gzip_container_preserves_bits() {
        let file = NamedTempFile::new().unwrap();
        write_container(file.path(), &sample_dict(), Container::Gzip).unwrap();
        let (dict, container) = read_container(file.path()).unwrap();
        assert_eq!(container, Container::Gzip);
        let matrix = dict.require_matrix("matrix").unwrap();
        assert_eq!(matrix[[0, 1]].to_bits(), (1.0f64 / 3.0).to_bits());
        assert!(matrix[[1, 0]].is_nan());
        assert_eq!(dict.require_f64("limit").unwrap(), f64::INFINITY);
    }

    #[test]
    fn plain_container_is_detected() {
        let file = NamedTempFile::new().unwrap();
        write_container(file.path(), &sample_dict(), Container::Plain).unwrap();
        let (dict, container) = read_container(file.path()).unwrap();
        assert_eq!(container, Container::Plain);
        assert_eq!(dict.require_str("type").unwrap(), "Sample");
    }

    #[test]
    fn errors_name_the_key() {
        let dict = sample_dict();
        match dict.require_str("version") {
            Err(RawError::WrongKind { key, found, .. }) => {
                assert_eq!(key, "version");
                assert_eq!(found, "int");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            dict.require("absent"),
            Err(RawError::MissingKey(key)) if key == "absent"
        ));
    }

    #[test]
    fn column_matrix_reads_as_vector() {
        let raw = RawArray::from_matrix(array![[1.0], [2.0], [3.0]].view());
        assert_eq!(raw.to_vector("col").unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
        let wide = RawArray::from_matrix(array![[1.0, 2.0], [3.0, 4.0]].view());
        assert!(wide.to_vector("wide").is_err());
    }
}
