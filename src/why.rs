//! Tracing why a distribution is installed.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::environment::{canonicalize_name, get_distributions, Distribution, PythonEnvironment};
use crate::error::PkgsizerError;
use crate::graph::{DependencyGraph, NodeId, Roots};
use crate::interrupt::Interrupt;
use crate::report::format_size;
use crate::size::{size_distributions, SizeOptions, SizeTotals};

pub const DEFAULT_MAX_PATHS: usize = 20;
/// Longest path, in packages, the tracer follows.
pub const MAX_PATH_LENGTH: usize = 10;

#[derive(Debug, Clone)]
pub struct WhyOptions {
    pub max_paths: usize,
    pub size: SizeOptions,
    pub jobs: usize,
}

impl Default for WhyOptions {
    fn default() -> Self {
        Self {
            max_paths: DEFAULT_MAX_PATHS,
            size: SizeOptions::default(),
            jobs: 1,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub name: String,
    pub size_bytes: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DependencyPath {
    pub packages: Vec<PathStep>,
    pub total_size_bytes: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WhyReport {
    pub package: String,
    pub version: String,
    pub size_bytes: u64,
    pub file_count: u64,
    pub is_direct: bool,
    pub depth: usize,
    pub editable: bool,
    pub location: PathBuf,
    /// Distributions declaring an active requirement on the package.
    pub dependents: Vec<String>,
    pub paths: Vec<DependencyPath>,
}

struct PathFinder<'a> {
    graph: &'a DependencyGraph,
    target: NodeId,
    max_paths: usize,
    on_path: Vec<bool>,
    current: Vec<NodeId>,
    found: Vec<Vec<NodeId>>,
}

impl<'a> PathFinder<'a> {
    fn visit(&mut self, id: NodeId) {
        if self.found.len() >= self.max_paths || self.on_path[id] {
            return;
        }
        self.current.push(id);
        if id == self.target {
            self.found.push(self.current.clone());
        } else if self.current.len() < MAX_PATH_LENGTH {
            self.on_path[id] = true;
            for &next in self.graph.requires(id) {
                self.visit(next);
            }
            self.on_path[id] = false;
        }
        self.current.pop();
    }
}

/// Simple paths from any of `roots` to `target`, in root order then edge order, at most
/// `max_paths` of them and none longer than [`MAX_PATH_LENGTH`] packages.
pub fn find_paths(
    graph: &DependencyGraph,
    roots: &[NodeId],
    target: NodeId,
    max_paths: usize,
) -> Vec<Vec<NodeId>> {
    let mut finder = PathFinder {
        graph,
        target,
        max_paths,
        on_path: vec![false; graph.len()],
        current: Vec::new(),
        found: Vec::new(),
    };
    for &root in roots {
        finder.visit(root);
    }
    finder.found
}

/// Explain why `package` is present in the environment.
pub fn analyze_why(
    environment: &PythonEnvironment,
    package: &str,
    options: &WhyOptions,
    interrupt: &Interrupt,
) -> Result<WhyReport> {
    let distributions = get_distributions(environment.site_packages())?;
    why_in(&distributions, environment, package, options, interrupt)
}

fn why_in(
    distributions: &[Distribution],
    environment: &PythonEnvironment,
    package: &str,
    options: &WhyOptions,
    interrupt: &Interrupt,
) -> Result<WhyReport> {
    let graph = DependencyGraph::build(distributions, environment.markers());
    let target = graph
        .id(package)
        .ok_or_else(|| PkgsizerError::PackageNotInstalled {
            name: canonicalize_name(package),
        })?;
    let dist = &distributions[target];

    let resolution = graph.resolve(&Roots::TopLevel, None);
    let node = resolution.get(graph.name(target));
    let roots = graph.top_level_roots();
    let paths = find_paths(&graph, &roots, target, options.max_paths);

    // size the target and everything on a path, each once
    let mut involved: BTreeSet<NodeId> = paths.iter().flatten().copied().collect();
    involved.insert(target);
    let involved: Vec<NodeId> = involved.into_iter().collect();
    let selected: Vec<&Distribution> = involved.iter().map(|id| &distributions[*id]).collect();
    let report = size_distributions(&selected, &options.size, options.jobs, interrupt)?;
    let sizes: HashMap<NodeId, SizeTotals> = involved
        .iter()
        .copied()
        .zip(report.totals.iter().copied())
        .collect();
    let size_of = |id: NodeId| sizes.get(&id).copied().unwrap_or_default();

    let paths = paths
        .into_iter()
        .map(|path| {
            let packages: Vec<PathStep> = path
                .iter()
                .map(|id| PathStep {
                    name: graph.name(*id).to_string(),
                    size_bytes: size_of(*id).bytes,
                })
                .collect();
            DependencyPath {
                total_size_bytes: packages.iter().map(|step| step.size_bytes).sum(),
                packages,
            }
        })
        .collect();

    let own = size_of(target);
    Ok(WhyReport {
        package: dist.name().to_string(),
        version: dist.version().to_string(),
        size_bytes: own.bytes,
        file_count: own.files,
        is_direct: node.map_or(true, |node| node.is_direct),
        depth: node.map_or(0, |node| node.depth),
        editable: dist.is_editable(),
        location: dist.location().to_path_buf(),
        dependents: graph
            .dependents(target)
            .iter()
            .map(|id| graph.name(*id).to_string())
            .collect(),
        paths,
    })
}

pub fn print_why(report: &WhyReport, mut stdout: impl Write) -> Result<()> {
    writeln!(
        stdout,
        "{} {} ({}, {} files)",
        report.package,
        report.version,
        format_size(report.size_bytes),
        report.file_count
    )?;
    let kind = if report.is_direct {
        "direct (nothing installed requires it)".to_string()
    } else {
        format!("transitive, depth {}", report.depth)
    };
    writeln!(stdout, "Type: {}", kind)?;
    if report.editable {
        writeln!(stdout, "Editable install")?;
    }
    writeln!(stdout, "Location: {}", report.location.display())?;

    if !report.dependents.is_empty() {
        writeln!(stdout, "\nRequired by:")?;
        for dependent in &report.dependents {
            writeln!(stdout, "  {}", dependent)?;
        }
    }

    if report.is_direct && report.paths.len() <= 1 {
        stdout.flush()?;
        return Ok(());
    }

    writeln!(stdout, "\nDependency paths ({}):", report.paths.len())?;
    for (i, path) in report.paths.iter().enumerate() {
        let chain: Vec<String> = path
            .packages
            .iter()
            .map(|step| format!("{} ({})", step.name, format_size(step.size_bytes)))
            .collect();
        writeln!(stdout, "  {}. {}", i + 1, chain.join(" → "))?;
    }
    stdout.flush()?;
    Ok(())
}
