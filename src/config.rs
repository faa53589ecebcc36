use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AtlasError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Source scanning configuration
    pub scanning: ScanningConfig,

    /// Bounded-context grouping settings
    #[serde(default)]
    pub grouping: GroupingConfig,

    /// Diagram rendering settings
    pub rendering: RenderingConfig,

    /// Pipeline execution limits
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, used as the label of the synthetic system node
    pub name: String,

    /// Source root to analyze
    pub source_dir: PathBuf,

    /// Gitignore-style globs of paths to skip, relative to the source root
    pub ignore_patterns: Vec<String>,

    /// Output directory for graph.json and diagrams
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanningConfig {
    /// File extensions considered source units (without the dot)
    pub file_extensions: Vec<String>,

    /// Maximum file size to load (in bytes)
    pub max_file_size: usize,

    /// Honour .gitignore files while walking
    pub respect_gitignore: bool,

    /// Worker threads for scanning; 0 means available parallelism
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Explicit group name -> relative path prefixes
    #[serde(default)]
    pub overrides: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingConfig {
    /// Mermaid flowchart direction (TB, TD, LR, RL, BT)
    pub direction: String,

    /// Emit classDef styling per node kind
    pub include_styles: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Abort scanning after this many seconds
    pub deadline_secs: Option<u64>,
}

/// Standalone group override file: `[groups] Billing = ["billing/"]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupOverrideFile {
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                name: "System".to_string(),
                source_dir: PathBuf::from("src"),
                ignore_patterns: vec![
                    "**/target/**".to_string(),
                    "**/build/**".to_string(),
                    "**/node_modules/**".to_string(),
                    "**/.git/**".to_string(),
                    "*.tmp".to_string(),
                ],
                output_dir: PathBuf::from("docs/dfd"),
            },
            scanning: ScanningConfig {
                file_extensions: vec![
                    "java".to_string(),
                    "kt".to_string(),
                    "cs".to_string(),
                ],
                max_file_size: 1024 * 1024, // 1MB
                respect_gitignore: true,
                workers: 0,
            },
            grouping: GroupingConfig::default(),
            rendering: RenderingConfig {
                direction: "TB".to_string(),
                include_styles: true,
            },
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| AtlasError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AtlasError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = [
                    "DfdAtlas.toml",
                    "dfd-atlas.toml",
                    ".dfd-atlas.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Merge a group override file over the configured overrides
    pub fn merge_group_overrides<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let file: GroupOverrideFile = toml::from_str(&content)
            .map_err(|e| AtlasError::Config(format!("{}: {}", path.as_ref().display(), e)))?;

        for (group, prefixes) in file.groups {
            self.grouping.overrides.insert(group, prefixes);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.scanning.file_extensions.is_empty() {
            return Err(AtlasError::Config(
                "scanning.file_extensions must list at least one extension".to_string(),
            ));
        }
        match self.rendering.direction.as_str() {
            "TB" | "TD" | "LR" | "RL" | "BT" => Ok(()),
            other => Err(AtlasError::Config(format!(
                "rendering.direction must be one of TB/TD/LR/RL/BT, got {}",
                other
            ))),
        }
    }
}
