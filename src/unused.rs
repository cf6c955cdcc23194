//! Finding installed distributions that no source file imports.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{anyhow, Result};
use ignore::{DirEntry, WalkBuilder, WalkState};
use log::{debug, info, warn};
use rustpython_ast::Visitor;
use rustpython_parser::{ast, parse, Mode};
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};

use crate::environment::{get_distributions, Distribution, PythonEnvironment};
use crate::graph::DependencyGraph;
use crate::interrupt::Interrupt;
use crate::report::format_size;
use crate::size::{size_distributions, SizeOptions};

/// Directory names never searched for sources.
pub const SKIPPED_DIRECTORIES: &[&str] = &[
    "__pycache__",
    ".git",
    ".tox",
    ".nox",
    "venv",
    "env",
    ".venv",
    "node_modules",
    "build",
    "dist",
];

/// Extract the first part of an import statement
///  e.g. `os.path` -> `os`
#[inline]
fn stem_import(import: &str) -> String {
    import.split('.').next().unwrap_or_default().into()
}

/// Collects the top-level modules a module imports, at any nesting level.
#[derive(Default)]
struct ImportCollector {
    imports: HashSet<String>,
}

impl Visitor for ImportCollector {
    fn visit_stmt(&mut self, node: ast::Stmt<ast::text_size::TextRange>) {
        self.generic_visit_stmt(node);
    }

    fn visit_stmt_import(&mut self, node: ast::StmtImport) {
        node.names.iter().for_each(|alias| {
            self.imports.insert(stem_import(&alias.name));
        })
    }

    /// Relative imports (`from . import x`) refer to the project itself.
    fn visit_stmt_import_from(&mut self, node: ast::StmtImportFrom) {
        if node.level.map_or(0, |level| level.to_u32()) > 0 {
            return;
        }
        if let Some(module) = &node.module {
            self.imports.insert(stem_import(module));
        }
    }
}

/// Imported top-level module names of one source file.
pub fn parse_imports(source: &str, path: &Path) -> Result<HashSet<String>> {
    let parsed = parse(source, Mode::Module, &path.to_string_lossy())
        .map_err(|e| anyhow!("Error parsing file {}: {}", path.display(), e))?;

    let mut collector = ImportCollector::default();
    if let ast::Mod::Module(module) = parsed {
        module
            .body
            .into_iter()
            .for_each(|node| collector.visit_stmt(node));
    }
    Ok(collector.imports)
}

fn is_skipped_directory(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().map_or(false, |kind| kind.is_dir()) {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    SKIPPED_DIRECTORIES.contains(&name.as_ref()) || name.ends_with(".egg-info")
}

enum FileImports {
    Parsed(HashSet<String>),
    Failed(PathBuf),
}

fn process_file(path: &Path) -> FileImports {
    let parsed = fs::read(path)
        .map_err(|e| anyhow!("Error reading file {}: {}", path.display(), e))
        .and_then(|bytes| parse_imports(&String::from_utf8_lossy(&bytes), path));
    match parsed {
        Ok(imports) => FileImports::Parsed(imports),
        Err(e) => {
            debug!("{:#}", e);
            FileImports::Failed(path.to_path_buf())
        }
    }
}

/// Imports found under a code path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceImports {
    pub modules: BTreeSet<String>,
    pub files: usize,
    /// Files that could not be read or parsed.
    pub unparseable: Vec<PathBuf>,
}

/// Parse every `.py` file under `code_path` in parallel and gather what they import.
/// Hidden and build/tooling directories are not descended into.
pub fn collect_imports(code_path: &Path, jobs: usize, interrupt: &Interrupt) -> Result<SourceImports> {
    let walker = WalkBuilder::new(code_path)
        .standard_filters(false)
        .hidden(true)
        .threads(jobs.max(1))
        .filter_entry(|entry| !is_skipped_directory(entry))
        .build_parallel();

    let (tx, rx) = mpsc::channel();
    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |result| {
            if interrupt.is_triggered() {
                return WalkState::Quit;
            }
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping an entry: {}", e);
                    return WalkState::Continue;
                }
            };
            let is_source = entry.file_type().map_or(false, |kind| kind.is_file())
                && entry.path().extension().map_or(false, |ext| ext == "py");
            if is_source && tx.send(process_file(entry.path())).is_err() {
                return WalkState::Quit;
            }
            WalkState::Continue
        })
    });
    drop(tx);
    interrupt.check()?;

    let mut imports = SourceImports::default();
    for received in rx.iter() {
        imports.files += 1;
        match received {
            FileImports::Parsed(modules) => imports.modules.extend(modules),
            FileImports::Failed(path) => imports.unparseable.push(path),
        }
    }
    imports.unparseable.sort();

    if !imports.unparseable.is_empty() {
        warn!(
            "{} source file(s) could not be parsed and were skipped",
            imports.unparseable.len()
        );
    }
    info!(
        "Parsed {} source files under {}",
        imports.files,
        code_path.display()
    );
    Ok(imports)
}

#[derive(Debug, Clone)]
pub struct UnusedOptions {
    pub size: SizeOptions,
    pub jobs: usize,
}

impl Default for UnusedOptions {
    fn default() -> Self {
        Self {
            size: SizeOptions::default(),
            jobs: 1,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageUsage {
    pub name: String,
    pub version: String,
    pub size_bytes: u64,
    pub file_count: u64,
    pub import_names: Vec<String>,
    /// Installed distributions that declare a requirement on this one.
    pub required_by: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UnusedReport {
    pub code_scanned: bool,
    pub total_packages: usize,
    pub files_scanned: usize,
    pub unparseable_files: Vec<PathBuf>,
    pub imported_modules: Vec<String>,
    pub used: Vec<PackageUsage>,
    pub unused: Vec<PackageUsage>,
    /// Every distribution, when no code path was given.
    pub uncertain: Vec<PackageUsage>,
    pub unused_size_bytes: u64,
}

/// Whether any name `dist` is imported under appears in `modules`.
fn is_imported(dist: &Distribution, modules: &BTreeSet<String>) -> bool {
    let alias = dist.canonical_name().replace('-', "_");
    modules.contains(&alias)
        || dist
            .import_names()
            .iter()
            .any(|name| modules.contains(name))
}

/// Classify every installed distribution by whether the code under `code_path` imports it.
pub fn analyze_unused(
    environment: &PythonEnvironment,
    code_path: Option<&Path>,
    options: &UnusedOptions,
    interrupt: &Interrupt,
) -> Result<UnusedReport> {
    let distributions = get_distributions(environment.site_packages())?;
    let imports = match code_path {
        Some(path) => Some(collect_imports(path, options.jobs, interrupt)?),
        None => None,
    };
    classify(&distributions, environment, imports, options, interrupt)
}

fn classify(
    distributions: &[Distribution],
    environment: &PythonEnvironment,
    imports: Option<SourceImports>,
    options: &UnusedOptions,
    interrupt: &Interrupt,
) -> Result<UnusedReport> {
    let graph = DependencyGraph::build(distributions, environment.markers());
    let all: Vec<&Distribution> = distributions.iter().collect();
    let sizes = size_distributions(&all, &options.size, options.jobs, interrupt)?;

    let mut report = UnusedReport {
        code_scanned: imports.is_some(),
        total_packages: distributions.len(),
        files_scanned: 0,
        unparseable_files: Vec::new(),
        imported_modules: Vec::new(),
        used: Vec::new(),
        unused: Vec::new(),
        uncertain: Vec::new(),
        unused_size_bytes: 0,
    };

    for (id, (dist, size)) in distributions.iter().zip(&sizes.totals).enumerate() {
        let usage = PackageUsage {
            name: dist.canonical_name().to_string(),
            version: dist.version().to_string(),
            size_bytes: size.bytes,
            file_count: size.files,
            import_names: dist.import_names().into_iter().collect(),
            required_by: graph
                .dependents(id)
                .iter()
                .map(|dependent| graph.name(*dependent).to_string())
                .collect(),
        };
        match &imports {
            None => report.uncertain.push(usage),
            Some(imports) if is_imported(dist, &imports.modules) => report.used.push(usage),
            Some(_) => {
                report.unused_size_bytes += usage.size_bytes;
                report.unused.push(usage);
            }
        }
    }

    if let Some(imports) = imports {
        report.files_scanned = imports.files;
        report.unparseable_files = imports.unparseable;
        report.imported_modules = imports.modules.into_iter().collect();
    }
    Ok(report)
}

pub fn print_unused(report: &UnusedReport, mut stdout: impl Write) -> Result<()> {
    if !report.code_scanned {
        writeln!(
            stdout,
            "No code path given; usage of the {} installed packages is unknown.",
            report.total_packages
        )?;
        writeln!(stdout, "Pass the directory of your sources, e.g. `pkgsizer unused ./src`.")?;
        return Ok(());
    }

    writeln!(
        stdout,
        "Scanned {} source files, {} modules imported",
        report.files_scanned,
        report.imported_modules.len()
    )?;
    if !report.unparseable_files.is_empty() {
        writeln!(
            stdout,
            "{} file(s) could not be parsed and were skipped",
            report.unparseable_files.len()
        )?;
    }

    if report.unused.is_empty() {
        writeln!(stdout, "\nNo unused packages found.")?;
    } else {
        let mut builder = Builder::default();
        builder.push_record(["Package", "Version", "Size", "Modules", "Required by"]);
        for usage in &report.unused {
            builder.push_record([
                usage.name.clone(),
                usage.version.clone(),
                format_size(usage.size_bytes),
                usage.import_names.join(", "),
                usage.required_by.join(", "),
            ]);
        }
        let mut table = builder.build();
        table
            .with(Style::ascii())
            .with(Modify::new(Columns::single(2)).with(Alignment::right()));

        writeln!(stdout, "\nUnused packages ({}):", report.unused.len())?;
        writeln!(stdout, "{}", table)?;
        writeln!(
            stdout,
            "Potential savings: {}",
            format_size(report.unused_size_bytes)
        )?;
    }

    writeln!(
        stdout,
        "\n{} of {} packages are imported",
        report.used.len(),
        report.total_packages
    )?;
    stdout.flush()?;
    Ok(())
}
