use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use glob::glob;
use log::{debug, warn};
use serde::Serialize;

use super::editable::find_editable_source;
use super::requirement::{canonicalize_name, Requirement};

const EXTENSION_SUFFIXES: [&str; 3] = ["so", "pyd", "dylib"];

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataKind {
    DistInfo,
    EggInfo,
}

/// One installed distribution, as read from its metadata directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    name: String,
    canonical_name: String,
    version: String,
    requirements: Vec<Requirement>,
    files: Vec<PathBuf>,
    top_level: Vec<String>,
    location: PathBuf,
    site_packages: PathBuf,
    editable: Option<PathBuf>,
    kind: MetadataKind,
}

impl Distribution {
    /// The project name as written in the metadata.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Installed paths. Entries may be directories when no file manifest was available.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Top-level importable names provided by this distribution.
    pub fn top_level(&self) -> &[String] {
        &self.top_level
    }

    /// The metadata directory (`*.dist-info` or `*.egg-info`).
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn site_packages(&self) -> &Path {
        &self.site_packages
    }

    pub fn is_editable(&self) -> bool {
        self.editable.is_some()
    }

    /// Source directory of an editable install.
    pub fn editable_location(&self) -> Option<&Path> {
        self.editable.as_deref()
    }

    pub fn kind(&self) -> MetadataKind {
        self.kind
    }

    /// Module names that importing code would use for this distribution.
    pub fn import_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.top_level.iter().cloned().collect();
        if names.is_empty() {
            names.insert(self.canonical_name.replace('-', "_"));
        }
        names
    }
}

pub struct DistributionBuilder {
    name: String,
    version: String,
    requirements: Vec<Requirement>,
    files: Vec<PathBuf>,
    top_level: Vec<String>,
    location: PathBuf,
    site_packages: PathBuf,
    editable: Option<PathBuf>,
    kind: MetadataKind,
}

impl DistributionBuilder {
    pub fn new(name: String, version: String, location: PathBuf) -> Self {
        let site_packages = location
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            name,
            version,
            requirements: Vec::new(),
            files: Vec::new(),
            top_level: Vec::new(),
            location,
            site_packages,
            editable: None,
            kind: MetadataKind::DistInfo,
        }
    }

    pub fn requirements(mut self, requirements: Vec<Requirement>) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    pub fn top_level(mut self, top_level: Vec<String>) -> Self {
        self.top_level = top_level;
        self
    }

    pub fn editable(mut self, source: Option<PathBuf>) -> Self {
        self.editable = source;
        self
    }

    pub fn kind(mut self, kind: MetadataKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Distribution {
        Distribution {
            canonical_name: canonicalize_name(&self.name),
            name: self.name,
            version: self.version,
            requirements: self.requirements,
            files: self.files,
            top_level: self.top_level,
            location: self.location,
            site_packages: self.site_packages,
            editable: self.editable,
            kind: self.kind,
        }
    }
}

/// Core metadata headers we care about from METADATA or PKG-INFO.
struct CoreMetadata {
    name: String,
    version: String,
    requires_dist: Vec<String>,
}

fn parse_core_metadata(content: &str, source: &Path) -> Result<CoreMetadata> {
    let mut name = None;
    let mut version = None;
    let mut requires_dist = Vec::new();

    // headers end at the first blank line, the description follows
    for line in content.lines().take_while(|line| !line.trim().is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => name = Some(value.to_string()),
            "Version" => version = Some(value.to_string()),
            "Requires-Dist" => requires_dist.push(value.to_string()),
            _ => {}
        }
    }

    Ok(CoreMetadata {
        name: name.with_context(|| format!("Package name not found in {}", source.display()))?,
        version: version.unwrap_or_else(|| "unknown".to_string()),
        requires_dist,
    })
}

fn parse_requirements(name: &str, lines: &[String]) -> Vec<Requirement> {
    lines
        .iter()
        .filter_map(|line| match line.parse::<Requirement>() {
            Ok(requirement) => Some(requirement),
            Err(err) => {
                warn!("{}: ignoring requirement: {:#}", name, err);
                None
            }
        })
        .collect()
}

/// First column of a RECORD line, honoring CSV quoting.
fn record_path(line: &str) -> Option<String> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix('"') {
        let mut path = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    path.push('"');
                    continue;
                }
                return Some(path);
            }
            path.push(c);
        }
        return None;
    }
    line.split(',').next().map(ToString::to_string)
}

/// Derive top-level importable names from installed paths relative to site-packages.
/// e.g. `requests/api.py` -> `requests`, `six.py` -> `six`
fn derive_top_level<'a>(relative_paths: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut names = BTreeSet::new();
    for relative in relative_paths {
        let path = Path::new(relative);
        let mut components = path.components();
        let Some(Component::Normal(first)) = components.next() else {
            continue;
        };
        let Some(first) = first.to_str() else {
            continue;
        };
        if first.ends_with(".dist-info")
            || first.ends_with(".egg-info")
            || first.ends_with(".data")
            || first == "__pycache__"
        {
            continue;
        }

        let is_nested = components.next().is_some();
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let is_source = extension == "py" || EXTENSION_SUFFIXES.contains(&extension);

        if is_nested && is_source {
            names.insert(first.to_string());
        } else if !is_nested && is_source {
            // `_cffi_backend.cpython-311-x86_64-linux-gnu.so` -> `_cffi_backend`
            if let Some(stem) = first.split('.').next() {
                if !stem.is_empty() {
                    names.insert(stem.to_string());
                }
            }
        }
    }
    names.into_iter().collect()
}

fn read_top_level(info_dir: &Path) -> Vec<String> {
    fs::read_to_string(info_dir.join("top_level.txt"))
        .map(|content| {
            content
                .lines()
                .map(|line| line.trim().replace('/', "."))
                .filter(|line| !line.is_empty())
                .filter_map(|line| line.split('.').next().map(ToString::to_string))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default()
}

/// Directories and module files for `names` that exist under `site_dir`.
fn top_level_paths(site_dir: &Path, names: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for name in names {
        let dir = site_dir.join(name);
        if dir.is_dir() {
            paths.push(dir);
        }
        let module = site_dir.join(format!("{}.py", name));
        if module.is_file() {
            paths.push(module);
        }
    }
    paths
}

/// Process the METADATA and RECORD files in the dist-info directory to extract package information.
pub fn process_dist_info(entry: &Path) -> Result<Distribution> {
    let metadata_path = entry.join("METADATA");
    let metadata_content = fs::read_to_string(&metadata_path)
        .with_context(|| format!("Failed to read {}", metadata_path.display()))?;
    let metadata = parse_core_metadata(&metadata_content, &metadata_path)?;

    // root dir without the "dist-info" suffix
    let site_dir = entry
        .parent()
        .with_context(|| format!("{} has no parent directory", entry.display()))?;

    let record: Vec<String> = fs::read_to_string(entry.join("RECORD"))
        .map(|content| content.lines().filter_map(record_path).collect())
        .unwrap_or_default();

    let mut top_level = read_top_level(entry);
    if top_level.is_empty() {
        top_level = derive_top_level(record.iter().map(String::as_str));
    }

    let files = if record.is_empty() {
        debug!("{}: no RECORD, sizing top-level directories", metadata.name);
        let mut paths = top_level_paths(site_dir, &top_level);
        paths.push(entry.to_path_buf());
        paths
    } else {
        record.iter().map(|relative| site_dir.join(relative)).collect()
    };

    let editable = find_editable_source(entry, site_dir, &metadata.name);
    let requirements = parse_requirements(&metadata.name, &metadata.requires_dist);

    Ok(
        DistributionBuilder::new(metadata.name, metadata.version, entry.to_path_buf())
            .requirements(requirements)
            .files(files)
            .top_level(top_level)
            .editable(editable)
            .kind(MetadataKind::DistInfo)
            .build(),
    )
}

/// Translate an egg-info `requires.txt` into PEP 508 requirement lines.
///
/// Unconditional requirements come first; `[extra]` sections are dropped and
/// `[:marker]` sections attach their marker to every line.
fn egg_requires(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut section_marker: Option<Option<String>> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            section_marker = Some(match section.split_once(':') {
                Some((extra, marker)) if extra.trim().is_empty() => Some(marker.trim().to_string()),
                _ => None,
            });
            continue;
        }
        match &section_marker {
            None => lines.push(line.to_string()),
            Some(Some(marker)) => lines.push(format!("{} ; {}", line, marker)),
            Some(None) => {}
        }
    }
    lines
}

/// Process the PKG-INFO, requires.txt and top_level.txt files in the egg-info directory.
pub fn process_egg_info(entry: &Path) -> Result<Distribution> {
    if !entry.is_dir() {
        bail!("{} is not a directory", entry.display());
    }
    let metadata_path = entry.join("PKG-INFO");
    let metadata_content = fs::read_to_string(&metadata_path)
        .with_context(|| format!("Failed to read {}", metadata_path.display()))?;
    let metadata = parse_core_metadata(&metadata_content, &metadata_path)?;

    let site_dir = entry
        .parent()
        .with_context(|| format!("{} has no parent directory", entry.display()))?;

    let requires = fs::read_to_string(entry.join("requires.txt"))
        .map(|content| egg_requires(&content))
        .unwrap_or_default();

    let installed: Vec<PathBuf> = fs::read_to_string(entry.join("installed-files.txt"))
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| entry.join(line))
                .collect()
        })
        .unwrap_or_default();

    let mut top_level = read_top_level(entry);
    if top_level.is_empty() {
        let relative: Vec<String> = fs::read_to_string(entry.join("SOURCES.txt"))
            .map(|content| content.lines().map(ToString::to_string).collect())
            .unwrap_or_default();
        top_level = derive_top_level(relative.iter().map(String::as_str));
    }

    let files = if installed.is_empty() {
        let mut paths = top_level_paths(site_dir, &top_level);
        paths.push(entry.to_path_buf());
        paths
    } else {
        installed
    };

    let editable = find_editable_source(entry, site_dir, &metadata.name);
    let requirements = parse_requirements(&metadata.name, &requires);

    Ok(
        DistributionBuilder::new(metadata.name, metadata.version, entry.to_path_buf())
            .requirements(requirements)
            .files(files)
            .top_level(top_level)
            .editable(editable)
            .kind(MetadataKind::EggInfo)
            .build(),
    )
}

/// This function determines the distributions installed in the site-packages directories.
///
/// The result is sorted by canonical name. When the same distribution appears in several
/// directories the first directory wins.
pub fn get_distributions(site_packages: &[PathBuf]) -> Result<Vec<Distribution>> {
    let mut distributions: HashMap<String, Distribution> = HashMap::new();

    for path in site_packages {
        let mut entries = Vec::new();
        for suffix in ["dist-info", "egg-info"] {
            let pattern = format!("{}/*.{}", glob::Pattern::escape(&path.to_string_lossy()), suffix);
            entries.extend(glob(&pattern)?.filter_map(Result::ok));
        }
        entries.sort();

        for entry in entries {
            let processed = if entry.extension().map_or(false, |ext| ext == "dist-info") {
                process_dist_info(&entry)
            } else {
                process_egg_info(&entry)
            };

            let distribution = match processed {
                Ok(distribution) => distribution,
                Err(err) => {
                    warn!("Skipping {}: {:#}", entry.display(), err);
                    continue;
                }
            };

            let key = distribution.canonical_name().to_string();
            if let Some(existing) = distributions.get(&key) {
                debug!(
                    "{} already found at {}, ignoring {}",
                    key,
                    existing.location().display(),
                    entry.display()
                );
                continue;
            }
            distributions.insert(key, distribution);
        }
    }

    let mut distributions: Vec<Distribution> = distributions.into_values().collect();
    distributions.sort_by(|a, b| a.canonical_name().cmp(b.canonical_name()));
    Ok(distributions)
}
