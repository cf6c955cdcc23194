use std::collections::HashSet;
use std::fs;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use walkdir::WalkDir;

use super::ledger::{file_id, FileId};
use crate::error::PkgsizerError;
use crate::interrupt::Interrupt;

/// Extra patterns applied to editable source trees, which usually hold much more than the
/// importable package.
pub const EDITABLE_EXCLUDES: [&str; 11] = [
    "*.pyc",
    "__pycache__",
    "*.egg-info",
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    ".tox",
    ".nox",
    "build",
    "dist",
];

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeTotals {
    pub bytes: u64,
    pub files: u64,
}

impl SizeTotals {
    pub fn new(bytes: u64, files: u64) -> Self {
        Self { bytes, files }
    }
}

impl Add for SizeTotals {
    type Output = SizeTotals;

    fn add(self, other: SizeTotals) -> SizeTotals {
        SizeTotals {
            bytes: self.bytes + other.bytes,
            files: self.files + other.files,
        }
    }
}

impl AddAssign for SizeTotals {
    fn add_assign(&mut self, other: SizeTotals) {
        *self = *self + other;
    }
}

impl std::iter::Sum for SizeTotals {
    fn sum<I: Iterator<Item = SizeTotals>>(iter: I) -> SizeTotals {
        iter.fold(SizeTotals::default(), Add::add)
    }
}

/// Glob patterns excluding files and whole directories from sizing.
///
/// A path under the walk base is excluded when a pattern matches the full path, the path
/// relative to the base, or any single component of that relative path. Matching a directory
/// component therefore prunes everything below it. A path outside the base is matched on its
/// full path and its file name only, so the directories it happens to live in never exclude it.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern.as_ref())
                    .with_context(|| format!("Invalid exclude pattern `{}`", pattern.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn editable_defaults() -> Self {
        // the defaults are all valid glob patterns
        Self {
            patterns: EDITABLE_EXCLUDES
                .iter()
                .filter_map(|pattern| glob::Pattern::new(pattern).ok())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns of both sets.
    pub fn union(&self, other: &ExcludeSet) -> ExcludeSet {
        let mut patterns = self.patterns.clone();
        patterns.extend(other.patterns.iter().cloned());
        ExcludeSet { patterns }
    }

    pub fn is_excluded(&self, path: &Path, base: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let Ok(relative) = path.strip_prefix(base) else {
            // outside the base only the path itself and its own name are matched
            let name = path.file_name().and_then(|name| name.to_str());
            return self.patterns.iter().any(|pattern| {
                pattern.matches_path(path) || name.map_or(false, |name| pattern.matches(name))
            });
        };
        self.patterns.iter().any(|pattern| {
            pattern.matches_path(path)
                || (!relative.as_os_str().is_empty() && pattern.matches_path(relative))
                || relative
                    .components()
                    .filter_map(|component| component.as_os_str().to_str())
                    .any(|name| pattern.matches(name))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SizeOptions {
    pub excludes: ExcludeSet,
    pub follow_symlinks: bool,
}

/// One file seen during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    pub id: Option<FileId>,
    pub bytes: u64,
}

/// What to size: explicit paths (files or directories) and the base exclusion patterns are
/// matched relative to.
#[derive(Debug, Clone)]
pub struct SizeTarget {
    pub paths: Vec<PathBuf>,
    pub base: PathBuf,
    /// Apply [`EDITABLE_EXCLUDES`] on top of the configured patterns.
    pub editable: bool,
}

/// Walks files, honoring exclusions and the symlink policy, and counts soft failures.
pub struct Sizer<'a> {
    options: &'a SizeOptions,
    editable_excludes: ExcludeSet,
    interrupt: &'a Interrupt,
    warnings: AtomicUsize,
}

impl<'a> Sizer<'a> {
    pub fn new(options: &'a SizeOptions, interrupt: &'a Interrupt) -> Self {
        Self {
            options,
            editable_excludes: options.excludes.union(&ExcludeSet::editable_defaults()),
            interrupt,
            warnings: AtomicUsize::new(0),
        }
    }

    /// Number of files that could not be read so far.
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    fn warn(&self, path: &Path, err: impl std::fmt::Display) {
        debug!("Skipping {}: {}", path.display(), err);
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    fn stat(&self, path: &Path) -> std::io::Result<fs::Metadata> {
        if self.options.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
    }

    /// Every distinct file under `target`, each identity listed once.
    pub fn collect(&self, target: &SizeTarget) -> Result<Vec<FileEntry>, PkgsizerError> {
        let excludes = if target.editable {
            &self.editable_excludes
        } else {
            &self.options.excludes
        };

        let mut seen: HashSet<FileId> = HashSet::new();
        let mut entries = Vec::new();
        let mut push = |entry: FileEntry| {
            if entry.id.map_or(true, |id| seen.insert(id)) {
                entries.push(entry);
            }
        };

        for path in &target.paths {
            self.interrupt.check()?;
            if excludes.is_excluded(path, &target.base) {
                continue;
            }

            let metadata = match self.stat(path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    self.warn(path, err);
                    continue;
                }
            };

            if !metadata.is_dir() {
                push(FileEntry {
                    id: file_id(&metadata),
                    bytes: metadata.len(),
                });
                continue;
            }

            let walker = WalkDir::new(path)
                .follow_links(self.options.follow_symlinks)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0 || !excludes.is_excluded(entry.path(), &target.base)
                });

            for entry in walker {
                self.interrupt.check()?;
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let failed = err.path().map(Path::to_path_buf).unwrap_or_default();
                        self.warn(&failed, err);
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }
                match entry.metadata() {
                    Ok(metadata) => push(FileEntry {
                        id: file_id(&metadata),
                        bytes: metadata.len(),
                    }),
                    Err(err) => self.warn(entry.path(), err),
                }
            }
        }

        Ok(entries)
    }

    /// Size of `target` on its own, deduplicating only within it.
    pub fn measure(&self, target: &SizeTarget) -> Result<SizeTotals, PkgsizerError> {
        Ok(self
            .collect(target)?
            .iter()
            .map(|entry| SizeTotals::new(entry.bytes, 1))
            .sum())
    }
}
