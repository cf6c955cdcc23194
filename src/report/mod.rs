//! Rendering a [`ScanResult`] as a terminal table, JSON or HTML.

pub mod html;
pub mod json;
pub mod table;

use std::io::{self, Write};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use regex::Regex;
use tempfile::NamedTempFile;

use crate::error::PkgsizerError;
use crate::graph::DependencyGraph;
use crate::scan::{PackageResult, ScanResult};
use crate::size::SizeTotals;

pub use html::render_html;
pub use json::{render_json, JsonReport};
pub use table::{print_table, print_tree};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Largest packages first. (default)
    #[default]
    Size,
    /// Packages with the most files first.
    Files,
    /// Alphabetical.
    Name,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    pub sort: SortKey,
    /// Show only the first N packages after sorting.
    pub top: Option<usize>,
    pub tree: bool,
    /// Compute each package's size including everything it pulls in.
    pub include_deps: bool,
}

/// One line of a report.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub package: &'a PackageResult,
    pub with_deps: Option<SizeTotals>,
}

/// Size of `name` plus every package reachable from it through `requires` within the
/// result, each counted once.
pub fn size_with_deps(result: &ScanResult, name: &str) -> SizeTotals {
    DependencyGraph::closure(&result.resolution, name)
        .into_iter()
        .filter_map(|member| result.package(member))
        .map(|package| package.size)
        .sum()
}

/// Packages in report order: sorted by `options.sort` (ties broken by name) and cut to
/// `options.top`.
pub fn rows<'a>(result: &'a ScanResult, options: &ReportOptions) -> Vec<Row<'a>> {
    let mut packages: Vec<&PackageResult> = result.packages.iter().collect();
    match options.sort {
        SortKey::Size => packages.sort_by(|a, b| {
            b.size.bytes.cmp(&a.size.bytes).then_with(|| a.name().cmp(b.name()))
        }),
        SortKey::Files => packages.sort_by(|a, b| {
            b.size.files.cmp(&a.size.files).then_with(|| a.name().cmp(b.name()))
        }),
        SortKey::Name => packages.sort_by(|a, b| a.name().cmp(b.name())),
    }
    if let Some(top) = options.top {
        packages.truncate(top);
    }

    packages
        .into_iter()
        .map(|package| Row {
            package,
            with_deps: options
                .include_deps
                .then(|| size_with_deps(result, package.name())),
        })
        .collect()
}

pub fn format_size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string_as(true)
}

fn threshold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i)\s*(\d+(?:\.\d*)?|\.\d+)\s*([a-z]*)\s*$")
            .expect("threshold pattern is valid")
    })
}

/// Parse `500MB`, `1.5gb`, `2 GiB` or a bare byte count into bytes. Units are powers of 1024.
pub fn parse_threshold(value: &str) -> Result<u64, PkgsizerError> {
    let invalid = || PkgsizerError::InvalidThreshold {
        value: value.to_string(),
    };
    let caps = threshold_pattern().captures(value).ok_or_else(invalid)?;
    let number: f64 = caps[1].parse().map_err(|_| invalid())?;
    let exponent = match caps[2].to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 1,
        "m" | "mb" | "mib" => 2,
        "g" | "gb" | "gib" => 3,
        "t" | "tb" | "tib" => 4,
        _ => return Err(invalid()),
    };
    let bytes = number * 1024f64.powi(exponent);
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Write a report to `destination`, or to stdout when it is `-`.
///
/// Files are written to a temporary file next to the destination and moved into place, so
/// an aborted run never leaves a partial report behind.
pub fn write_output(destination: &Path, contents: &str) -> Result<()> {
    if destination == Path::new("-") {
        let mut stdout = io::stdout().lock();
        stdout.write_all(contents.as_bytes())?;
        if !contents.ends_with('\n') {
            writeln!(stdout)?;
        }
        stdout.flush()?;
        return Ok(());
    }

    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dir.display()))?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    file.persist(destination)
        .with_context(|| format!("Failed to write {}", destination.display()))?;
    Ok(())
}

pub fn is_stdout(destination: &Path) -> bool {
    destination == Path::new("-")
}
