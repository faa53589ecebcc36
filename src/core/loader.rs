// src/core/loader.rs
use std::path::{Component, Path, PathBuf};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ScanningConfig;
use crate::error::{AtlasError, Result};
use super::model::{Diagnostic, DiagnosticKind, SourceUnit};

/// Walks a source tree and yields source units, one file at a time
#[derive(Debug, Clone)]
pub struct SourceLoader {
    config: ScanningConfig,
    ignore_patterns: Vec<String>,
}

impl SourceLoader {
    pub fn new(config: &ScanningConfig, ignore_patterns: &[String]) -> Self {
        Self {
            config: config.clone(),
            ignore_patterns: ignore_patterns.to_vec(),
        }
    }

    /// Same loader restricted to a different extension list
    pub fn with_extensions(&self, extensions: &[&str]) -> Self {
        let mut config = self.config.clone();
        config.file_extensions = extensions.iter()
            .map(|e| e.trim_start_matches('.').to_string())
            .collect();
        Self {
            config,
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }

    /// All candidate files under `root`, sorted by relative path.
    ///
    /// This order is the fixed enumeration order used to break node id collisions,
    /// so it is computed once here and never depends on walk or worker timing.
    pub fn enumerate(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(AtlasError::RootNotFound(root.display().to_string()));
        }
        let overrides = self.overrides(root)?;

        let mut paths = Vec::new();
        if self.config.respect_gitignore {
            let walker = WalkBuilder::new(root)
                .hidden(false)
                .git_ignore(true)
                .require_git(false)
                .overrides(overrides)
                .build();

            for entry in walker {
                match entry {
                    Ok(entry) => self.accept(entry.path(), &mut paths),
                    Err(e) => warn!("Skipping unwalkable entry: {}", e),
                }
            }
        } else {
            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| !overrides.matched(entry.path(), entry.file_type().is_dir()).is_ignore());

            for entry in walker {
                match entry {
                    Ok(entry) => self.accept(entry.path(), &mut paths),
                    Err(e) => warn!("Skipping unwalkable entry: {}", e),
                }
            }
        }

        paths.sort_by_cached_key(|path| relative_path(root, path));
        debug!("Enumerated {} candidate source files under {}", paths.len(), root.display());
        Ok(paths)
    }

    /// Every candidate file under `root`, loaded only when driven.
    ///
    /// Can be called any number of times; each call walks the tree afresh.
    pub fn units(&self, root: &Path) -> Result<SourceUnits<'_>> {
        let paths = self.enumerate(root)?;
        Ok(SourceUnits {
            loader: self,
            root: root.to_path_buf(),
            paths,
        })
    }

    /// Read one file; failures come back as a diagnostic instead of an error
    pub fn load(&self, root: &Path, path: &Path) -> std::result::Result<SourceUnit, Diagnostic> {
        let relative = relative_path(root, path);

        let size = std::fs::metadata(path)
            .map_err(|e| Diagnostic::new(DiagnosticKind::UnreadableFile, &relative, e.to_string()))?
            .len();
        if size > self.config.max_file_size as u64 {
            return Err(Diagnostic::new(
                DiagnosticKind::UnreadableFile,
                &relative,
                format!("{} bytes exceeds the {} byte limit", size, self.config.max_file_size),
            ));
        }

        let raw_text = std::fs::read_to_string(path)
            .map_err(|e| Diagnostic::new(DiagnosticKind::UnreadableFile, &relative, e.to_string()))?;

        Ok(SourceUnit::new(relative, raw_text))
    }

    /// Ignore patterns as exclusions rooted at `root`
    fn overrides(&self, root: &Path) -> Result<Override> {
        let mut builder = OverrideBuilder::new(root);
        for pattern in &self.ignore_patterns {
            // Bare override globs whitelist; `!` makes them exclude
            builder.add(&format!("!{}", pattern.trim_start_matches('!')))?;
        }
        Ok(builder.build()?)
    }

    fn accept(&self, path: &Path, paths: &mut Vec<PathBuf>) {
        if path.is_file() && self.has_source_extension(path) {
            paths.push(path.to_path_buf());
        }
    }

    fn has_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.config.file_extensions.iter().any(|allowed| allowed.trim_start_matches('.') == ext)
            })
            .unwrap_or(false)
    }
}

/// Frozen enumeration of one walk; files are read only when the units are driven
pub struct SourceUnits<'a> {
    loader: &'a SourceLoader,
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl<'a> SourceUnits<'a> {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Load across the current rayon pool, in enumeration order.
    ///
    /// Unreadable files come back as `Err(diagnostic)` in their slot.
    pub fn par_load(self) -> impl IndexedParallelIterator<Item = std::result::Result<SourceUnit, Diagnostic>> + 'a {
        let SourceUnits { loader, root, paths } = self;
        paths.into_par_iter().map(move |path| {
            loader.load(&root, &path).inspect_err(|diagnostic| {
                warn!("⚠️ Skipping {}: {}", diagnostic.subject, diagnostic.message);
            })
        })
    }
}

/// `/`-separated path of `path` relative to `root`
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
