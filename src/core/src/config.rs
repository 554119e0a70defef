//! Build configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name of the tar written for each persisted intermediate stage.
pub const STAGE_TAR: &str = "stage.tar";

/// Configuration for one build.
///
/// The working root is mutated in place by the build; the builder assumes
/// exclusive ownership of it for the duration of the build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Root filesystem the build instructions operate on
    pub root_dir: PathBuf,

    /// Directory where intermediate stage tars are written
    #[serde(default = "default_intermediate_dir")]
    pub intermediate_dir: PathBuf,

    /// Build arguments supplied by the user (override ARG defaults)
    #[serde(default)]
    pub build_args: HashMap<String, String>,
}

fn default_intermediate_dir() -> PathBuf {
    PathBuf::from("/lamina/stages")
}

impl BuildConfig {
    /// Create a config rooted at `root_dir` with defaults for the rest.
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            intermediate_dir: default_intermediate_dir(),
            build_args: HashMap::new(),
        }
    }

    /// Path of the intermediate tar for a stage, by name or index string.
    ///
    /// Layout: `<intermediate_dir>/<stage>/stage.tar`.
    pub fn stage_tar_path(&self, stage: &str) -> PathBuf {
        self.intermediate_dir.join(stage).join(STAGE_TAR)
    }
}
