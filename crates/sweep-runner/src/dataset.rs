use crate::error::DatasetError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Reference to a dataset as written in the experiment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetRef(PathBuf);

impl DatasetRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for DatasetRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A loaded table: named attributes, rows of cells and an optional class
/// (prediction target) attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    relation: String,
    source: Option<PathBuf>,
    attributes: Vec<String>,
    instances: Vec<Vec<Value>>,
    class_index: Option<usize>,
}

impl Dataset {
    pub fn new(relation: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            relation: relation.into(),
            source: None,
            attributes,
            instances: Vec::new(),
            class_index: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn push_instance(&mut self, row: Vec<Value>) {
        self.instances.push(row);
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn instances(&self) -> &[Vec<Value>] {
        &self.instances
    }

    pub fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn class_index(&self) -> Option<usize> {
        self.class_index
    }

    pub fn set_class_index(&mut self, index: usize) -> Result<(), DatasetError> {
        if index >= self.attributes.len() {
            return Err(DatasetError::ClassIndexOutOfRange {
                index,
                attributes: self.attributes.len(),
            });
        }
        self.class_index = Some(index);
        Ok(())
    }

    /// Designates the last attribute as the class unless one is already set.
    pub fn ensure_class_index(&mut self) -> Result<usize, DatasetError> {
        if let Some(index) = self.class_index {
            return Ok(index);
        }
        let last = self
            .attributes
            .len()
            .checked_sub(1)
            .ok_or(DatasetError::NoAttributes)?;
        self.class_index = Some(last);
        Ok(last)
    }
}

pub trait DatasetLoader {
    fn load(&mut self, reference: &DatasetRef) -> Result<Dataset, DatasetError>;
}

#[derive(Debug, Deserialize)]
struct TableHeader {
    #[serde(default)]
    relation: Option<String>,
    attributes: Vec<String>,
    #[serde(default)]
    class_index: Option<usize>,
}

/// Reads tabular JSONL: a header object
/// `{"relation": .., "attributes": [..], "class_index": n}` on the first
/// non-empty line, then one JSON array of cells per instance.
#[derive(Debug, Clone, Default)]
pub struct TabularJsonlLoader {
    base_dir: Option<PathBuf>,
}

impl TabularJsonlLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative references resolve against `dir` (usually the directory
    /// holding the experiment file).
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    fn resolve(&self, reference: &DatasetRef) -> PathBuf {
        match &self.base_dir {
            Some(base) if reference.path().is_relative() => base.join(reference.path()),
            _ => reference.path().to_path_buf(),
        }
    }
}

impl DatasetLoader for TabularJsonlLoader {
    fn load(&mut self, reference: &DatasetRef) -> Result<Dataset, DatasetError> {
        let path = self.resolve(reference);
        let data = fs::read_to_string(&path).map_err(|source| DatasetError::Io {
            path: path.clone(),
            source,
        })?;
        parse_tabular_jsonl(&path, &data)
    }
}

fn parse_tabular_jsonl(path: &Path, data: &str) -> Result<Dataset, DatasetError> {
    let parse_err = |line: usize, message: String| DatasetError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };
    let mut lines = data
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (header_line, header_text) = lines
        .next()
        .ok_or_else(|| DatasetError::MissingHeader(path.to_path_buf()))?;
    let header: TableHeader =
        serde_json::from_str(header_text).map_err(|e| parse_err(header_line, e.to_string()))?;
    if header.attributes.is_empty() {
        return Err(DatasetError::NoAttributes);
    }
    let relation = header.relation.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string()
    });
    let width = header.attributes.len();
    let mut dataset = Dataset::new(relation, header.attributes).with_source(path);
    if let Some(index) = header.class_index {
        dataset.set_class_index(index)?;
    }

    for (line_no, line) in lines {
        let row: Vec<Value> =
            serde_json::from_str(line).map_err(|e| parse_err(line_no, e.to_string()))?;
        if row.len() != width {
            return Err(parse_err(
                line_no,
                format!("expected {} cells, found {}", width, row.len()),
            ));
        }
        dataset.push_instance(row);
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_dataset_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn loader_reads_header_and_rows_relative_to_base_dir() {
        let dir = temp_dir("read");
        fs::write(
            dir.join("iris.jsonl"),
            "{\"relation\":\"iris\",\"attributes\":[\"petal\",\"sepal\",\"class\"]}\n\n[1.4,5.1,\"setosa\"]\n[4.7,7.0,\"versicolor\"]\n",
        )
        .expect("write");

        let mut loader = TabularJsonlLoader::with_base_dir(&dir);
        let dataset = loader.load(&DatasetRef::from("iris.jsonl")).expect("load");
        assert_eq!(dataset.relation(), "iris");
        assert_eq!(dataset.num_attributes(), 3);
        assert_eq!(dataset.num_instances(), 2);
        assert_eq!(dataset.class_index(), None);
        assert_eq!(dataset.source(), Some(dir.join("iris.jsonl").as_path()));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn loader_keeps_declared_class_index_and_rejects_ragged_rows() {
        let dir = temp_dir("class");
        fs::write(
            dir.join("a.jsonl"),
            "{\"attributes\":[\"y\",\"x\"],\"class_index\":0}\n[1,2]\n",
        )
        .expect("write");
        fs::write(dir.join("b.jsonl"), "{\"attributes\":[\"y\",\"x\"]}\n[1]\n").expect("write");

        let mut loader = TabularJsonlLoader::with_base_dir(&dir);
        let a = loader.load(&DatasetRef::from("a.jsonl")).expect("load a");
        assert_eq!(a.relation(), "a");
        assert_eq!(a.class_index(), Some(0));

        let err = loader.load(&DatasetRef::from("b.jsonl")).expect_err("ragged");
        match err {
            DatasetError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {}", other),
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ensure_class_index_defaults_to_last_attribute() {
        let mut dataset = Dataset::new("t", vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(dataset.ensure_class_index().expect("class"), 2);

        let mut designated = Dataset::new("t", vec!["a".into(), "b".into()]);
        designated.set_class_index(0).expect("set");
        assert_eq!(designated.ensure_class_index().expect("class"), 0);

        let mut empty = Dataset::new("t", Vec::new());
        assert!(matches!(
            empty.ensure_class_index(),
            Err(DatasetError::NoAttributes)
        ));
        assert!(matches!(
            dataset.set_class_index(3),
            Err(DatasetError::ClassIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut loader = TabularJsonlLoader::new();
        let err = loader
            .load(&DatasetRef::from("/nonexistent/sweep/data.jsonl"))
            .expect_err("missing");
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
