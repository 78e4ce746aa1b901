//! Stage errors and YAML artifact persistence shared by every pipeline stage.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::prompts::PromptError;
use econbrief_core::calendar::CalendarError;
use econbrief_core::ledger::LedgerError;

/// Any failure that aborts a pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("artifact I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact YAML error at {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn io_error(path: &Path, source: std::io::Error) -> StageError {
    StageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize `value` as YAML to `path`, creating parent directories.
///
/// Writes `path.tmp` first and renames it into place.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf, StageError> {
    let text = serde_yaml::to_string(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, text).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_error(path, e)
    })?;
    Ok(path.to_path_buf())
}

/// Read a YAML artifact. `Ok(None)` if the file does not exist.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StageError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| StageError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.yaml");
        let value: BTreeMap<String, u32> = [("a".to_string(), 1)].into_iter().collect();

        let written = write_yaml(&path, &value).unwrap();
        assert_eq!(written, path);
        assert!(!path.with_extension("yaml.tmp").exists());

        let back: Option<BTreeMap<String, u32>> = read_yaml(&path).unwrap();
        assert_eq!(back, Some(value));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let back: Option<BTreeMap<String, u32>> = read_yaml(&dir.path().join("none.yaml")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn corrupt_file_is_yaml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "a: [1, 2").unwrap();
        let err = read_yaml::<BTreeMap<String, u32>>(&path).unwrap_err();
        assert!(matches!(err, StageError::Yaml { .. }));
    }
}
