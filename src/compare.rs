//! Comparing the distributions installed in two environments.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};

use crate::environment::{environment_name, get_distributions, resolve_env_path, Distribution};
use crate::interrupt::Interrupt;
use crate::report::format_size;
use crate::size::{size_distributions, SizeOptions};

#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub names: (Option<String>, Option<String>),
    pub size: SizeOptions,
    pub jobs: usize,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            names: (None, None),
            size: SizeOptions::default(),
            jobs: 1,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSummary {
    pub name: String,
    pub path: PathBuf,
    pub package_count: usize,
    pub total_size_bytes: u64,
    /// Size of the packages only this environment has.
    pub unique_size_bytes: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub package: String,
    pub version: String,
    pub size_bytes: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionDifference {
    pub package: String,
    pub left_version: String,
    pub right_version: String,
    pub left_size_bytes: u64,
    pub right_size_bytes: u64,
    /// Right size minus left size.
    pub size_difference_bytes: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub left: EnvironmentSummary,
    pub right: EnvironmentSummary,
    pub common_count: usize,
    pub same_version_count: usize,
    /// Largest size change first.
    pub version_differences: Vec<VersionDifference>,
    /// Largest first.
    pub only_in_left: Vec<InstalledPackage>,
    pub only_in_right: Vec<InstalledPackage>,
    pub total_size_difference_bytes: i64,
}

/// Every distribution of an environment with its size, keyed by canonical name.
fn inventory(
    distributions: &[Distribution],
    options: &CompareOptions,
    interrupt: &Interrupt,
) -> Result<BTreeMap<String, InstalledPackage>> {
    let all: Vec<&Distribution> = distributions.iter().collect();
    let sizes = size_distributions(&all, &options.size, options.jobs, interrupt)?;
    Ok(distributions
        .iter()
        .zip(sizes.totals)
        .map(|(dist, size)| {
            (
                dist.canonical_name().to_string(),
                InstalledPackage {
                    package: dist.canonical_name().to_string(),
                    version: dist.version().to_string(),
                    size_bytes: size.bytes,
                },
            )
        })
        .collect())
}

fn by_size_desc(packages: &mut [InstalledPackage]) {
    packages.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.package.cmp(&b.package))
    });
}

fn summary(
    name: String,
    path: &Path,
    packages: &BTreeMap<String, InstalledPackage>,
    unique: &[InstalledPackage],
) -> EnvironmentSummary {
    EnvironmentSummary {
        name,
        path: path.to_path_buf(),
        package_count: packages.len(),
        total_size_bytes: packages.values().map(|p| p.size_bytes).sum(),
        unique_size_bytes: unique.iter().map(|p| p.size_bytes).sum(),
    }
}

/// Compare two environments, each given as a virtual environment or a site-packages
/// directory. Names default to the environments' directory names.
pub fn compare_environments(
    left_path: &Path,
    right_path: &Path,
    options: &CompareOptions,
    interrupt: &Interrupt,
) -> Result<Comparison> {
    let left_env = resolve_env_path(left_path)?;
    let right_env = resolve_env_path(right_path)?;
    let left = inventory(&get_distributions(left_env.site_packages())?, options, interrupt)?;
    let right = inventory(&get_distributions(right_env.site_packages())?, options, interrupt)?;

    let mut only_in_left: Vec<InstalledPackage> = left
        .iter()
        .filter(|(name, _)| !right.contains_key(*name))
        .map(|(_, package)| package.clone())
        .collect();
    let mut only_in_right: Vec<InstalledPackage> = right
        .iter()
        .filter(|(name, _)| !left.contains_key(*name))
        .map(|(_, package)| package.clone())
        .collect();
    by_size_desc(&mut only_in_left);
    by_size_desc(&mut only_in_right);

    let mut common_count = 0;
    let mut same_version_count = 0;
    let mut version_differences = Vec::new();
    for (name, ours) in &left {
        let Some(theirs) = right.get(name) else {
            continue;
        };
        common_count += 1;
        if ours.version == theirs.version {
            same_version_count += 1;
        } else {
            version_differences.push(VersionDifference {
                package: name.clone(),
                left_version: ours.version.clone(),
                right_version: theirs.version.clone(),
                left_size_bytes: ours.size_bytes,
                right_size_bytes: theirs.size_bytes,
                size_difference_bytes: theirs.size_bytes as i64 - ours.size_bytes as i64,
            });
        }
    }
    version_differences.sort_by(|a, b| {
        b.size_difference_bytes
            .unsigned_abs()
            .cmp(&a.size_difference_bytes.unsigned_abs())
            .then_with(|| a.package.cmp(&b.package))
    });

    let (left_name, right_name) = options.names.clone();
    let left_summary = summary(
        left_name.unwrap_or_else(|| environment_name(left_path)),
        left_env.primary(),
        &left,
        &only_in_left,
    );
    let right_summary = summary(
        right_name.unwrap_or_else(|| environment_name(right_path)),
        right_env.primary(),
        &right,
        &only_in_right,
    );

    Ok(Comparison {
        total_size_difference_bytes: right_summary.total_size_bytes as i64
            - left_summary.total_size_bytes as i64,
        left: left_summary,
        right: right_summary,
        common_count,
        same_version_count,
        version_differences,
        only_in_left,
        only_in_right,
    })
}

fn signed_size(bytes: i64) -> String {
    let sign = if bytes < 0 { "-" } else { "+" };
    format!("{}{}", sign, format_size(bytes.unsigned_abs()))
}

fn packages_table(packages: &[InstalledPackage]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Package", "Version", "Size"]);
    for package in packages {
        builder.push_record([
            package.package.clone(),
            package.version.clone(),
            format_size(package.size_bytes),
        ]);
    }
    let mut table = builder.build();
    table
        .with(Style::ascii())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()));
    table.to_string()
}

pub fn print_comparison(comparison: &Comparison, mut stdout: impl Write) -> Result<()> {
    let Comparison { left, right, .. } = comparison;
    for env in [left, right] {
        writeln!(
            stdout,
            "{}: {} packages, {} ({})",
            env.name,
            env.package_count,
            format_size(env.total_size_bytes),
            env.path.display()
        )?;
    }
    writeln!(
        stdout,
        "{} packages in common, {} with the same version",
        comparison.common_count, comparison.same_version_count
    )?;

    if !comparison.version_differences.is_empty() {
        let mut builder = Builder::default();
        builder.push_record([
            "Package".to_string(),
            left.name.clone(),
            right.name.clone(),
            "Size change".to_string(),
        ]);
        for difference in &comparison.version_differences {
            builder.push_record([
                difference.package.clone(),
                difference.left_version.clone(),
                difference.right_version.clone(),
                signed_size(difference.size_difference_bytes),
            ]);
        }
        let mut table = builder.build();
        table
            .with(Style::ascii())
            .with(Modify::new(Columns::single(3)).with(Alignment::right()));
        writeln!(
            stdout,
            "\nVersion differences ({}):",
            comparison.version_differences.len()
        )?;
        writeln!(stdout, "{}", table)?;
    }

    for (env, packages) in [(left, &comparison.only_in_left), (right, &comparison.only_in_right)] {
        if packages.is_empty() {
            continue;
        }
        writeln!(
            stdout,
            "\nOnly in {} ({}, {}):",
            env.name,
            packages.len(),
            format_size(env.unique_size_bytes)
        )?;
        writeln!(stdout, "{}", packages_table(packages))?;
    }

    writeln!(
        stdout,
        "\nSize difference ({} vs {}): {}",
        right.name,
        left.name,
        signed_size(comparison.total_size_difference_bytes)
    )?;
    stdout.flush()?;
    Ok(())
}
