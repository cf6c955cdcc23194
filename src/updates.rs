//! Checking installed distributions against the latest releases on PyPI.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};
use tempfile::NamedTempFile;

use crate::environment::{canonicalize_name, get_distributions, Distribution, PythonEnvironment, Version};
use crate::graph::DependencyGraph;
use crate::interrupt::Interrupt;
use crate::report::format_size;
use crate::size::{size_distributions, SizeOptions};

/// Packages checked when none are named and `--all` is not given.
pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// What PyPI knows about the newest release of a project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub upload_time: Option<String>,
    pub home_page: Option<String>,
    pub summary: Option<String>,
}

#[derive(Deserialize)]
struct PyPiResponse {
    info: PyPiInfo,
    #[serde(default)]
    releases: HashMap<String, Vec<PyPiFile>>,
}

#[derive(Deserialize)]
struct PyPiInfo {
    version: String,
    #[serde(default)]
    home_page: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
struct PyPiFile {
    #[serde(default)]
    upload_time: Option<String>,
}

impl ReleaseInfo {
    /// Parse the body of `GET /pypi/{name}/json`.
    pub fn from_response(body: &str) -> Result<Self> {
        let response: PyPiResponse =
            serde_json::from_str(body).context("Failed to parse the PyPI response")?;
        let upload_time = response
            .releases
            .get(&response.info.version)
            .and_then(|files| files.first())
            .and_then(|file| file.upload_time.clone());
        Ok(Self {
            version: response.info.version,
            upload_time,
            home_page: response.info.home_page.filter(|url| !url.is_empty()),
            summary: response.info.summary.filter(|summary| !summary.is_empty()),
        })
    }
}

/// Where the latest release of a project is looked up.
pub trait ReleaseSource: Send + Sync {
    fn latest(&self, name: &str) -> Result<ReleaseInfo>;
}

/// On-disk cache of release lookups, one JSON file per project, valid for `ttl`.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", canonicalize_name(name)))
    }

    /// A cached entry younger than the TTL.
    pub fn get(&self, name: &str) -> Option<ReleaseInfo> {
        let path = self.path(name);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age >= self.ttl {
            return None;
        }
        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn put(&self, name: &str, info: &ReleaseInfo) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, info)?;
        file.persist(self.path(name))?;
        Ok(())
    }
}

/// Looks releases up on the PyPI JSON API.
pub struct PyPiClient {
    client: reqwest::blocking::Client,
    index_url: String,
    cache: Option<ResponseCache>,
}

impl PyPiClient {
    pub fn new(timeout: Duration, cache: Option<ResponseCache>) -> Result<Self> {
        let user_agent = format!("pkgsizer/{}", env!("CARGO_PKG_VERSION"));
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to build the HTTP client")?;
        Ok(Self {
            client,
            index_url: "https://pypi.org/pypi".to_string(),
            cache,
        })
    }

    fn fetch(&self, name: &str) -> Result<ReleaseInfo> {
        let url = format!("{}/{}/json", self.index_url, urlencoding::encode(name));
        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            bail!("PyPI returned status {} for {}", response.status(), name);
        }
        ReleaseInfo::from_response(&response.text()?)
    }
}

impl ReleaseSource for PyPiClient {
    fn latest(&self, name: &str) -> Result<ReleaseInfo> {
        if let Some(info) = self.cache.as_ref().and_then(|cache| cache.get(name)) {
            debug!("Using the cached release of {}", name);
            return Ok(info);
        }
        let info = self.fetch(name)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(name, &info) {
                debug!("Failed to cache the release of {}: {:#}", name, e);
            }
        }
        Ok(info)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Outdated,
    UpToDate,
    /// The installed version is newer than the latest release, e.g. a pre-release.
    Ahead,
    /// One of the versions is not PEP 440.
    Unknown,
    /// The lookup failed.
    Unavailable,
}

impl UpdateStatus {
    fn label(self) -> &'static str {
        match self {
            UpdateStatus::Outdated => "outdated",
            UpdateStatus::UpToDate => "up to date",
            UpdateStatus::Ahead => "ahead",
            UpdateStatus::Unknown => "unknown",
            UpdateStatus::Unavailable => "unavailable",
        }
    }
}

pub fn compare_versions(installed: &str, latest: &str) -> UpdateStatus {
    match (installed.parse::<Version>(), latest.parse::<Version>()) {
        (Ok(installed), Ok(latest)) if installed < latest => UpdateStatus::Outdated,
        (Ok(installed), Ok(latest)) if installed == latest => UpdateStatus::UpToDate,
        (Ok(_), Ok(_)) => UpdateStatus::Ahead,
        _ => UpdateStatus::Unknown,
    }
}

/// Which installed distributions to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSelection {
    /// Distributions nothing else requires, at most [`DEFAULT_LIMIT`].
    Direct,
    All,
    Named(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub selection: UpdateSelection,
    pub size: SizeOptions,
    pub jobs: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            selection: UpdateSelection::Direct,
            size: SizeOptions::default(),
            jobs: 1,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub package: String,
    pub installed_version: String,
    pub latest_version: Option<String>,
    pub status: UpdateStatus,
    pub size_bytes: u64,
    pub upload_time: Option<String>,
    pub home_page: Option<String>,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub total_checked: usize,
    pub outdated_count: usize,
    pub up_to_date_count: usize,
    pub unavailable_count: usize,
    /// In package name order.
    pub results: Vec<UpdateResult>,
}

fn select<'a>(
    distributions: &'a [Distribution],
    environment: &PythonEnvironment,
    selection: &UpdateSelection,
) -> Vec<&'a Distribution> {
    match selection {
        UpdateSelection::All => distributions.iter().collect(),
        UpdateSelection::Direct => {
            let graph = DependencyGraph::build(distributions, environment.markers());
            let mut roots = graph.top_level_roots();
            roots.sort_unstable();
            roots
                .into_iter()
                .take(DEFAULT_LIMIT)
                .map(|id| &distributions[id])
                .collect()
        }
        UpdateSelection::Named(names) => {
            let mut selected = Vec::new();
            for name in names {
                let canonical = canonicalize_name(name);
                let already = selected
                    .iter()
                    .any(|dist: &&Distribution| dist.canonical_name() == canonical);
                match distributions
                    .iter()
                    .find(|dist| dist.canonical_name() == canonical)
                {
                    Some(_) if already => {}
                    Some(dist) => selected.push(dist),
                    None => warn!("{} is not installed, skipping", name),
                }
            }
            selected.sort_by(|a, b| a.canonical_name().cmp(b.canonical_name()));
            selected
        }
    }
}

fn check_one(dist: &Distribution, size_bytes: u64, source: &dyn ReleaseSource) -> UpdateResult {
    let mut result = UpdateResult {
        package: dist.canonical_name().to_string(),
        installed_version: dist.version().to_string(),
        latest_version: None,
        status: UpdateStatus::Unavailable,
        size_bytes,
        upload_time: None,
        home_page: None,
        summary: None,
        error: None,
    };
    match source.latest(dist.canonical_name()) {
        Ok(info) => {
            result.status = compare_versions(dist.version(), &info.version);
            result.latest_version = Some(info.version);
            result.upload_time = info.upload_time;
            result.home_page = info.home_page;
            result.summary = info.summary;
        }
        Err(e) => {
            debug!("Release lookup for {} failed: {:#}", dist.canonical_name(), e);
            result.error = Some(format!("{:#}", e));
        }
    }
    result
}

/// Look up the latest release of the selected distributions on a pool of `jobs` threads.
/// A failed lookup marks that package unavailable and does not stop the others.
pub fn check_updates(
    environment: &PythonEnvironment,
    source: &dyn ReleaseSource,
    options: &UpdateOptions,
    interrupt: &Interrupt,
) -> Result<UpdateReport> {
    let distributions = get_distributions(environment.site_packages())?;
    let selected = select(&distributions, environment, &options.selection);
    info!("Checking {} packages for updates", selected.len());

    let sizes = size_distributions(&selected, &options.size, options.jobs, interrupt)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .thread_name(|i| format!("pkgsizer-pypi-{}", i))
        .build()
        .context("Failed to start the update check pool")?;

    let results: Vec<Option<UpdateResult>> = pool.install(|| {
        selected
            .par_iter()
            .zip(sizes.totals.par_iter())
            .map(|(dist, size)| {
                if interrupt.is_triggered() {
                    return None;
                }
                Some(check_one(dist, size.bytes, source))
            })
            .collect()
    });
    interrupt.check()?;

    let results: Vec<UpdateResult> = results.into_iter().flatten().collect();
    let count = |status: UpdateStatus| results.iter().filter(|r| r.status == status).count();
    Ok(UpdateReport {
        total_checked: results.len(),
        outdated_count: count(UpdateStatus::Outdated),
        up_to_date_count: count(UpdateStatus::UpToDate),
        unavailable_count: count(UpdateStatus::Unavailable),
        results,
    })
}

pub fn print_updates(report: &UpdateReport, mut stdout: impl Write) -> Result<()> {
    if report.results.is_empty() {
        writeln!(stdout, "No packages to check.")?;
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(["Package", "Installed", "Latest", "Status", "Size", "Released"]);
    for result in &report.results {
        builder.push_record([
            result.package.clone(),
            result.installed_version.clone(),
            result.latest_version.clone().unwrap_or_else(|| "-".to_string()),
            result.status.label().to_string(),
            format_size(result.size_bytes),
            result
                .upload_time
                .as_deref()
                .and_then(|time| time.get(..10))
                .unwrap_or("-")
                .to_string(),
        ]);
    }
    let mut table = builder.build();
    table
        .with(Style::ascii())
        .with(Modify::new(Columns::single(4)).with(Alignment::right()));
    writeln!(stdout, "{}", table)?;
    writeln!(
        stdout,
        "Checked {}: {} outdated, {} up to date, {} unavailable",
        report.total_checked, report.outdated_count, report.up_to_date_count, report.unavailable_count
    )?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MarkerEnvironment;
    use crate::scan::tests::{chain_environment, install};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Release source backed by a fixed table; unknown projects fail.
    #[derive(Default)]
    struct FakeSource {
        releases: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with(releases: &[(&str, &str)]) -> Self {
            Self {
                releases: releases
                    .iter()
                    .map(|(name, version)| (name.to_string(), version.to_string()))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl ReleaseSource for FakeSource {
        fn latest(&self, name: &str) -> Result<ReleaseInfo> {
            self.requested.lock().unwrap().push(name.to_string());
            match self.releases.get(name) {
                Some(version) => Ok(ReleaseInfo {
                    version: version.clone(),
                    upload_time: Some("2024-03-01T12:00:00".to_string()),
                    home_page: None,
                    summary: None,
                }),
                None => bail!("connection refused"),
            }
        }
    }

    fn environment(site: &std::path::Path) -> PythonEnvironment {
        PythonEnvironment::new(vec![site.to_path_buf()], MarkerEnvironment::host())
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0", "1.1"), UpdateStatus::Outdated);
        assert_eq!(compare_versions("1.0", "1.0.0"), UpdateStatus::UpToDate);
        assert_eq!(compare_versions("2.0.dev1", "1.9"), UpdateStatus::Ahead);
        assert_eq!(compare_versions("1.0rc1", "1.0"), UpdateStatus::Outdated);
        assert_eq!(compare_versions("1!0.5", "2.0"), UpdateStatus::Ahead);
        assert_eq!(compare_versions("not a version", "1.0"), UpdateStatus::Unknown);
    }

    #[test]
    fn test_parse_pypi_response() {
        let body = r#"{
            "info": {"version": "2.31.0", "home_page": "", "summary": "HTTP for Humans."},
            "releases": {
                "2.30.0": [{"upload_time": "2023-05-22T15:12:44"}],
                "2.31.0": [{"upload_time": "2023-05-22T15:12:42"}, {"upload_time": "2023-05-22T15:12:44"}]
            }
        }"#;
        let info = ReleaseInfo::from_response(body).unwrap();
        assert_eq!(info.version, "2.31.0");
        assert_eq!(info.upload_time.as_deref(), Some("2023-05-22T15:12:42"));
        assert_eq!(info.home_page, None);
        assert_eq!(info.summary.as_deref(), Some("HTTP for Humans."));

        assert!(ReleaseInfo::from_response("{\"message\": \"Not Found\"}").is_err());
    }

    #[test]
    fn test_direct_selection_and_statuses() {
        let site = chain_environment();
        let source = FakeSource::with(&[("a", "1.0")]);
        let report = check_updates(
            &environment(site.path()),
            &source,
            &UpdateOptions::default(),
            &Interrupt::new(),
        )
        .unwrap();

        assert_eq!(*source.requested.lock().unwrap(), ["a"]);
        assert_eq!(report.total_checked, 1);
        assert_eq!(report.results[0].status, UpdateStatus::UpToDate);
        assert_eq!(report.results[0].size_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_failures_are_per_package() {
        let site = tempdir().unwrap();
        install(site.path(), "fresh", &[], &[("m.py", 1)]);
        install(site.path(), "stale", &[], &[("m.py", 1)]);
        install(site.path(), "offline", &[], &[("m.py", 1)]);
        let source = FakeSource::with(&[("fresh", "1.0"), ("stale", "1.2")]);
        let options = UpdateOptions {
            selection: UpdateSelection::All,
            jobs: 3,
            ..UpdateOptions::default()
        };
        let report = check_updates(&environment(site.path()), &source, &options, &Interrupt::new())
            .unwrap();

        let statuses: Vec<(&str, UpdateStatus)> = report
            .results
            .iter()
            .map(|r| (r.package.as_str(), r.status))
            .collect();
        assert_eq!(
            statuses,
            [
                ("fresh", UpdateStatus::UpToDate),
                ("offline", UpdateStatus::Unavailable),
                ("stale", UpdateStatus::Outdated),
            ]
        );
        assert_eq!(report.outdated_count, 1);
        assert_eq!(report.unavailable_count, 1);
        assert!(report.results[1].error.is_some());

        let mut out = Vec::new();
        print_updates(&report, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("2024-03-01"));
        assert!(out.contains("1 outdated, 1 up to date, 1 unavailable"));
    }

    #[test]
    fn test_named_selection_skips_missing() {
        let site = chain_environment();
        let source = FakeSource::with(&[("b", "3.0"), ("c", "0.9")]);
        let options = UpdateOptions {
            selection: UpdateSelection::Named(vec!["C".to_string(), "b".to_string(), "zzz".to_string()]),
            ..UpdateOptions::default()
        };
        let report = check_updates(&environment(site.path()), &source, &options, &Interrupt::new())
            .unwrap();
        let names: Vec<&str> = report.results.iter().map(|r| r.package.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
        assert_eq!(report.results[1].status, UpdateStatus::Ahead);
    }

    #[test]
    fn test_response_cache() {
        let dir = tempdir().unwrap();
        let info = ReleaseInfo {
            version: "1.0".to_string(),
            upload_time: None,
            home_page: None,
            summary: Some("demo".to_string()),
        };

        let cache = ResponseCache::new(dir.path().join("cache"), Duration::from_secs(3600));
        assert_eq!(cache.get("Demo_Pkg"), None);
        cache.put("Demo_Pkg", &info).unwrap();
        assert_eq!(cache.get("demo-pkg"), Some(info.clone()));

        let expired = ResponseCache::new(dir.path().join("cache"), Duration::ZERO);
        assert_eq!(expired.get("demo-pkg"), None);
    }

    #[test]
    fn test_interrupt_stops_checks() {
        let site = chain_environment();
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let source = FakeSource::default();
        let err = check_updates(
            &environment(site.path()),
            &source,
            &UpdateOptions::default(),
            &interrupt,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Aborted"));
    }
}
