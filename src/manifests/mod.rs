//! Dependency manifests whose entries become explicit scan roots.

pub mod conda;
pub mod lockfile;
pub mod pyproject;
pub mod requirements;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::environment::{canonicalize_name, Requirement};
use crate::error::PkgsizerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Requirements,
    Pyproject,
    PoetryLock,
    UvLock,
    Conda,
}

impl ManifestKind {
    /// Recognize a manifest by its file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_ascii_lowercase();
        match file_name.as_str() {
            "pyproject.toml" => Some(Self::Pyproject),
            "poetry.lock" => Some(Self::PoetryLock),
            "uv.lock" => Some(Self::UvLock),
            "environment.yml" | "environment.yaml" | "conda.yml" | "conda.yaml" => {
                Some(Self::Conda)
            }
            name if name.contains("requirements")
                || name.ends_with(".txt")
                || name.ends_with(".in") =>
            {
                Some(Self::Requirements)
            }
            _ => None,
        }
    }
}

/// The distribution name a PEP 508 line refers to. Lines that do not fully parse still
/// yield their leading name when it looks like one, e.g. `pkg===weird-version`.
pub(crate) fn requirement_name(line: &str) -> Option<String> {
    if let Ok(requirement) = line.parse::<Requirement>() {
        return Some(requirement.name().to_string());
    }
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(line.len());
    let name = line[..end].trim_matches(|c| matches!(c, '-' | '_' | '.'));
    (!name.is_empty()).then(|| name.to_string())
}

/// Canonical names, first occurrence wins.
fn dedup_canonical(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| canonicalize_name(name))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Read a manifest and return the canonical names it declares, in first-seen order.
pub fn parse_manifest(path: &Path) -> Result<Vec<String>> {
    let kind = ManifestKind::detect(path).ok_or_else(|| PkgsizerError::UnsupportedManifest {
        path: path.to_path_buf(),
    })?;
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let names = match kind {
        ManifestKind::Requirements => requirements::parse(&content),
        ManifestKind::Pyproject => pyproject::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        ManifestKind::PoetryLock | ManifestKind::UvLock => lockfile::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        ManifestKind::Conda => conda::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
    };

    let names = dedup_canonical(names);
    info!("{} declares {} packages", path.display(), names.len());
    Ok(names)
}
