use crate::config::ExperimentConfig;
use crate::error::PersistError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "sweep_experiment_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// `.yaml`/`.yml` select YAML; everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

#[derive(Serialize)]
struct DocumentOut<'a> {
    schema_version: &'static str,
    experiment: &'a ExperimentConfig,
}

#[derive(Deserialize)]
struct DocumentIn {
    schema_version: String,
    experiment: ExperimentConfig,
}

pub fn to_string(cfg: &ExperimentConfig, format: Format) -> Result<String, PersistError> {
    let doc = DocumentOut {
        schema_version: SCHEMA_VERSION,
        experiment: cfg,
    };
    Ok(match format {
        Format::Json => serde_json::to_string_pretty(&doc)?,
        Format::Yaml => serde_yaml::to_string(&doc)?,
    })
}

pub fn from_str(text: &str, format: Format) -> Result<ExperimentConfig, PersistError> {
    let doc: DocumentIn = match format {
        Format::Json => serde_json::from_str(text)?,
        Format::Yaml => serde_yaml::from_str(text)?,
    };
    if doc.schema_version != SCHEMA_VERSION {
        return Err(PersistError::UnsupportedSchema(doc.schema_version));
    }
    Ok(doc.experiment)
}

pub fn save(path: &Path, cfg: &ExperimentConfig) -> Result<(), PersistError> {
    let text = to_string(cfg, Format::from_path(path))?;
    atomic_write_bytes(path, text.as_bytes()).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Restores a saved experiment. The caller must `initialize()` before any
/// iteration runs; there is no mid-sweep resume.
pub fn load(path: &Path) -> Result<ExperimentConfig, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_str(&text, Format::from_path(path))
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
