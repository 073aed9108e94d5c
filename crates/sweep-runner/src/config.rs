use crate::dataset::DatasetRef;
use crate::error::ConfigError;
use crate::property::PropertyPath;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Opaque configuration of a producer or listener: a registered `kind` and
/// the settings its factory understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub kind: String,
    #[serde(default = "empty_settings")]
    pub settings: Value,
}

fn empty_settings() -> Value {
    Value::Object(Default::default())
}

impl ComponentSpec {
    pub fn new(kind: impl Into<String>, settings: Value) -> Self {
        Self {
            kind: kind.into(),
            settings,
        }
    }

    pub fn kind_only(kind: impl Into<String>) -> Self {
        Self::new(kind, empty_settings())
    }
}

impl fmt::Display for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.settings {
            Value::Object(map) if map.is_empty() => f.write_str(&self.kind),
            settings => write!(f, "{} {}", self.kind, settings),
        }
    }
}

/// Durable description of a sweep. Iteration progress is never part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub run_lower: u32,
    pub run_upper: u32,
    pub datasets: Vec<DatasetRef>,
    #[serde(default)]
    pub use_property_iterator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_path: Option<PropertyPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_values: Option<Vec<FieldValue>>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub producer: Option<ComponentSpec>,
    #[serde(default)]
    pub listener: Option<ComponentSpec>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            run_lower: 1,
            run_upper: 10,
            datasets: Vec::new(),
            use_property_iterator: false,
            property_path: None,
            property_values: None,
            notes: String::new(),
            producer: None,
            listener: None,
        }
    }
}

impl ExperimentConfig {
    /// Checks the parts of the experiment that do not depend on live
    /// components: run bounds, datasets and the property iterator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_property_iterator {
            match &self.property_values {
                Some(values) if !values.is_empty() => {}
                _ => return Err(ConfigError::MissingPropertyValues),
            }
            match &self.property_path {
                Some(path) if !path.is_empty() => {}
                _ => return Err(ConfigError::MissingPropertyPath),
            }
        }
        if self.run_lower > self.run_upper {
            return Err(ConfigError::RunBounds {
                lower: self.run_lower,
                upper: self.run_upper,
            });
        }
        if self.datasets.is_empty() {
            return Err(ConfigError::NoDatasets);
        }
        Ok(())
    }

    /// Values swept by the custom property iterator, empty when it is off.
    pub fn active_property_values(&self) -> &[FieldValue] {
        match (&self.property_values, self.use_property_iterator) {
            (Some(values), true) => values,
            _ => &[],
        }
    }

    pub fn runs_per_dataset(&self) -> usize {
        if self.run_upper < self.run_lower {
            return 0;
        }
        (self.run_upper - self.run_lower) as usize + 1
    }

    pub fn custom_count(&self) -> usize {
        self.active_property_values().len().max(1)
    }

    pub fn total_iterations(&self) -> usize {
        self.runs_per_dataset() * self.datasets.len() * self.custom_count()
    }

    /// `sha256:<hex>` of the canonical JSON form.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Appends each dataset argument; directories expand to the `*.jsonl`
    /// files they contain, in path order.
    pub fn add_datasets_from(&mut self, path: &Path) -> Result<usize, ConfigError> {
        if !path.is_dir() {
            self.datasets.push(DatasetRef::new(path));
            return Ok(1);
        }
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| ConfigError::InvalidValue {
                field: "datasets".to_string(),
                message: e.to_string(),
            })?;
            let is_jsonl = entry.path().extension().and_then(|s| s.to_str()) == Some("jsonl");
            if entry.file_type().is_file() && is_jsonl {
                found.push(DatasetRef::new(entry.path()));
            }
        }
        let count = found.len();
        self.datasets.extend(found);
        Ok(count)
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runs from: {} to: {}", self.run_lower, self.run_upper)?;
        write!(f, "Datasets:")?;
        for dataset in &self.datasets {
            write!(f, " {}", dataset)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Custom property iterator: {}",
            if self.use_property_iterator { "on" } else { "off" }
        )?;
        if self.use_property_iterator {
            if let Some(path) = &self.property_path {
                let nodes = path.nodes();
                if nodes.len() > 1 {
                    writeln!(f, "Custom property path:")?;
                    for (i, node) in nodes[..nodes.len() - 1].iter().enumerate() {
                        writeln!(f, "{}  {}", i + 1, node)?;
                    }
                }
                if let Some(leaf) = path.leaf() {
                    writeln!(f, "Custom property name: {}", leaf)?;
                }
            }
            writeln!(f, "Custom property values:")?;
            for (i, value) in self.active_property_values().iter().enumerate() {
                writeln!(f, " {} {} {}", i + 1, value.kind(), value)?;
            }
        }
        match &self.producer {
            Some(spec) => writeln!(f, "ResultProducer: {}", spec)?,
            None => writeln!(f, "ResultProducer: none")?,
        }
        match &self.listener {
            Some(spec) => writeln!(f, "ResultListener: {}", spec)?,
            None => writeln!(f, "ResultListener: none")?,
        }
        if !self.notes.is_empty() {
            writeln!(f, "Notes: {}", self.notes)?;
        }
        Ok(())
    }
}
