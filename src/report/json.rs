use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::{rows, ReportOptions, Row};
use crate::scan::ScanResult;
use crate::size::SubpackageNode;

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JsonReport {
    pub schema_version: &'static str,
    pub generated_at: String,
    pub site_packages: Vec<PathBuf>,
    pub total_size_bytes: u64,
    pub total_files: u64,
    pub package_count: usize,
    pub truncated: bool,
    pub warnings: usize,
    pub packages: Vec<JsonPackage>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JsonPackage {
    pub name: String,
    pub version: String,
    pub size_bytes: u64,
    pub file_count: u64,
    pub depth: usize,
    pub direct: bool,
    pub editable: bool,
    pub location: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable_location: Option<PathBuf>,
    pub parents: Vec<String>,
    pub requires: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_with_deps_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<JsonSubpackage>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JsonSubpackage {
    pub name: String,
    pub qualified_name: String,
    pub is_package: bool,
    pub depth: usize,
    pub size_bytes: u64,
    pub file_count: u64,
    pub cumulative_size_bytes: u64,
    pub cumulative_file_count: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<JsonSubpackage>,
}

impl From<&SubpackageNode> for JsonSubpackage {
    fn from(node: &SubpackageNode) -> Self {
        Self {
            name: node.name.clone(),
            qualified_name: node.qualified_name.clone(),
            is_package: node.is_package,
            depth: node.depth,
            size_bytes: node.own.bytes,
            file_count: node.own.files,
            cumulative_size_bytes: node.cumulative.bytes,
            cumulative_file_count: node.cumulative.files,
            children: node.children.iter().map(JsonSubpackage::from).collect(),
        }
    }
}

impl From<&Row<'_>> for JsonPackage {
    fn from(row: &Row<'_>) -> Self {
        let package = row.package;
        let dist = &package.distribution;
        Self {
            name: dist.name().to_string(),
            version: dist.version().to_string(),
            size_bytes: package.size.bytes,
            file_count: package.size.files,
            depth: package.node.depth,
            direct: package.node.is_direct,
            editable: dist.is_editable(),
            location: dist.location().to_path_buf(),
            editable_location: dist.editable_location().map(|path| path.to_path_buf()),
            parents: package.node.parents.clone(),
            requires: package.node.requires.clone(),
            size_with_deps_bytes: row.with_deps.map(|totals| totals.bytes),
            subpackages: package.subpackages.iter().map(JsonSubpackage::from).collect(),
        }
    }
}

impl JsonReport {
    pub fn new(result: &ScanResult, options: &ReportOptions, generated_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            site_packages: result.site_packages.clone(),
            total_size_bytes: result.total.bytes,
            total_files: result.total.files,
            package_count: result.packages.len(),
            truncated: result.truncated,
            warnings: result.warnings,
            packages: rows(result, options).iter().map(JsonPackage::from).collect(),
        }
    }
}

/// The versioned JSON document for a scan, pretty-printed.
pub fn render_json(
    result: &ScanResult,
    options: &ReportOptions,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    serde_json::to_string_pretty(&JsonReport::new(result, options, generated_at))
        .context("Failed to serialize the JSON report")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{MarkerEnvironment, PythonEnvironment};
    use crate::interrupt::Interrupt;
    use crate::scan::tests::{chain_environment, MB};
    use crate::scan::{scan_environment, ScanOptions};
    use chrono::TimeZone;
    use serde_json::Value;

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_json_schema() {
        let site = chain_environment();
        let env = PythonEnvironment::new(vec![site.path().to_path_buf()], MarkerEnvironment::host());
        let options = ScanOptions {
            max_depth: Some(2),
            module_depth: Some(1),
            ..ScanOptions::default()
        };
        let result = scan_environment(&env, &options, &Interrupt::new()).unwrap();
        let report_options = ReportOptions {
            include_deps: true,
            ..ReportOptions::default()
        };
        let json = render_json(&result, &report_options, generated_at()).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["generated_at"], "2024-05-01T12:00:00Z");
        assert_eq!(value["total_size_bytes"], 60 * MB);
        assert_eq!(value["total_files"], 10);
        assert_eq!(value["package_count"], 3);
        assert_eq!(value["truncated"], false);

        let packages = value["packages"].as_array().unwrap();
        let names: Vec<&str> = packages.iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["c", "b", "a"]);

        let b = &packages[1];
        assert_eq!(b["depth"], 1);
        assert_eq!(b["direct"], false);
        assert_eq!(b["parents"], serde_json::json!(["a"]));
        assert_eq!(b["requires"], serde_json::json!(["c"]));
        assert_eq!(b["size_with_deps_bytes"], 50 * MB);
        assert!(b.get("editable_location").is_none());
        assert_eq!(b["subpackages"][0]["qualified_name"], "b");
        assert_eq!(b["subpackages"][0]["cumulative_file_count"], 3);
    }

    #[test]
    fn test_json_is_stable_across_scans() {
        let site = chain_environment();
        let env = PythonEnvironment::new(vec![site.path().to_path_buf()], MarkerEnvironment::host());
        let options = ScanOptions {
            jobs: 4,
            ..ScanOptions::default()
        };
        let render = || {
            let result = scan_environment(&env, &options, &Interrupt::new()).unwrap();
            render_json(&result, &ReportOptions::default(), generated_at()).unwrap()
        };
        assert_eq!(render(), render());
    }
}
