//! Prompt files for the LLM steps.
//!
//! Layout under the prompts directory:
//! - `system/role.yaml` — `system_prompt: ...` (required)
//! - `system/constraints.yaml` — extra forbidden keywords (optional)
//! - `steps/<step>.yaml` — `prompt: ...` per step (optional)

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("system prompt not found at {}", .0.display())]
    MissingSystemPrompt(PathBuf),

    #[error("failed to read prompt {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid prompt YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Template for one reasoning step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StepPrompt {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleFile {
    #[serde(default)]
    system_prompt: String,
}

/// Additional keywords from `system/constraints.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConstraintFile {
    #[serde(default)]
    pub price_prediction: Vec<String>,
    #[serde(default)]
    pub trading_advice: Vec<String>,
}

/// Read-only view over a prompts directory.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
}

fn read_yaml_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, PromptError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PromptError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| PromptError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn step_path(&self, step: &str) -> PathBuf {
        self.dir.join("steps").join(format!("{step}.yaml"))
    }

    /// The role definition. A missing file is a hard error.
    pub fn load_system_prompt(&self) -> Result<String, PromptError> {
        let path = self.dir.join("system").join("role.yaml");
        let role: RoleFile =
            read_yaml_file(&path)?.ok_or(PromptError::MissingSystemPrompt(path))?;
        Ok(role.system_prompt)
    }

    /// Template for `step`. A missing file is logged and yields an empty prompt.
    pub fn load_prompt(&self, step: &str) -> Result<StepPrompt, PromptError> {
        let path = self.step_path(step);
        match read_yaml_file::<StepPrompt>(&path)? {
            Some(prompt) => {
                debug!(step, "loaded step prompt");
                Ok(prompt)
            }
            None => {
                error!(path = %path.display(), "prompt file not found");
                Ok(StepPrompt::default())
            }
        }
    }

    /// Extra constraint keywords; empty when the file is absent.
    pub fn load_constraints(&self) -> Result<ConstraintFile, PromptError> {
        let path = self.dir.join("system").join("constraints.yaml");
        Ok(read_yaml_file(&path)?.unwrap_or_default())
    }
}
