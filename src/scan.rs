use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::environment::{get_distributions, Distribution, PythonEnvironment};
use crate::graph::{DependencyGraph, DependencyNode, Resolution, Roots};
use crate::interrupt::Interrupt;
use crate::size::{
    enumerate_subpackages, size_distributions, SizeOptions, SizeTotals, Sizer, SubpackageNode,
};

/// How editable installs take part in a scan.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditableMode {
    /// Size editable installs from their source directory and flag them in the report. (default)
    #[default]
    Mark,
    /// Size editable installs from their source directory without flagging them.
    Include,
    /// Leave editable installs out of the scan entirely.
    Exclude,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub roots: Roots,
    /// Maximum dependency depth, `None` for unlimited.
    pub max_depth: Option<usize>,
    /// Subpackage tree depth; `None` or `0` skips subpackage enumeration.
    pub module_depth: Option<usize>,
    pub editable: EditableMode,
    pub size: SizeOptions,
    pub jobs: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            roots: Roots::TopLevel,
            max_depth: None,
            module_depth: None,
            editable: EditableMode::Mark,
            size: SizeOptions::default(),
            jobs: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageResult {
    pub distribution: Distribution,
    pub node: DependencyNode,
    pub size: SizeTotals,
    pub subpackages: Vec<SubpackageNode>,
}

impl PackageResult {
    pub fn name(&self) -> &str {
        self.distribution.canonical_name()
    }
}

/// Everything one scan produced. Packages are in name order.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub site_packages: Vec<PathBuf>,
    pub packages: Vec<PackageResult>,
    pub total: SizeTotals,
    pub warnings: usize,
    pub truncated: bool,
    pub editable_mode: EditableMode,
    pub resolution: Resolution,
}

impl ScanResult {
    pub fn package(&self, name: &str) -> Option<&PackageResult> {
        self.packages.iter().find(|package| package.name() == name)
    }
}

/// Enumerate, resolve and size an environment.
pub fn scan_environment(
    environment: &PythonEnvironment,
    options: &ScanOptions,
    interrupt: &Interrupt,
) -> Result<ScanResult> {
    let distributions = get_distributions(environment.site_packages())
        .context("Failed to read the installed distributions.")?;
    info!("Found {} installed distributions", distributions.len());
    scan_distributions(distributions, environment, options, interrupt)
}

/// Resolve and size an already enumerated set of distributions.
pub fn scan_distributions(
    mut distributions: Vec<Distribution>,
    environment: &PythonEnvironment,
    options: &ScanOptions,
    interrupt: &Interrupt,
) -> Result<ScanResult> {
    if options.editable == EditableMode::Exclude {
        distributions.retain(|dist| !dist.is_editable());
    }

    let graph = DependencyGraph::build(&distributions, environment.markers());
    let resolution = graph.resolve(&options.roots, options.max_depth);

    let selected: Vec<&Distribution> = distributions
        .iter()
        .filter(|dist| resolution.contains(dist.canonical_name()))
        .collect();

    let report = size_distributions(&selected, &options.size, options.jobs, interrupt)?;

    let module_depth = options.module_depth.unwrap_or(0);
    let sizer = Sizer::new(&options.size, interrupt);

    let mut packages = Vec::with_capacity(selected.len());
    for (dist, size) in selected.into_iter().zip(report.totals.iter().copied()) {
        let subpackages = if module_depth > 0 {
            enumerate_subpackages(dist, environment.site_packages(), module_depth, &sizer)?
        } else {
            Vec::new()
        };
        let node = resolution
            .get(dist.canonical_name())
            .cloned()
            .with_context(|| format!("{} missing from the resolution", dist.canonical_name()))?;
        packages.push(PackageResult {
            distribution: dist.clone(),
            node,
            size,
            subpackages,
        });
    }

    Ok(ScanResult {
        site_packages: environment.site_packages().to_vec(),
        total: report.total(),
        warnings: report.warnings,
        truncated: resolution.truncated,
        editable_mode: options.editable,
        packages,
        resolution,
    })
}
