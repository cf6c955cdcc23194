//! Suggesting lighter or more modern replacements for installed packages.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::environment::{canonicalize_name, get_distributions, Distribution, PythonEnvironment};
use crate::error::PkgsizerError;
use crate::interrupt::Interrupt;
use crate::report::format_size;
use crate::size::{size_distributions, SizeOptions};

/// Expected size of an alternative relative to the package it replaces.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizeHint {
    MuchSmaller,
    Smaller,
    #[default]
    Similar,
    Larger,
}

impl SizeHint {
    fn label(self) -> &'static str {
        match self {
            SizeHint::MuchSmaller => "much smaller",
            SizeHint::Smaller => "smaller",
            SizeHint::Similar => "similar",
            SizeHint::Larger => "larger",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub name: String,
    pub reason: String,
    pub size: SizeHint,
}

/// One alternative as written in a config file, keyed by its name:
///
/// ```toml
/// [alternatives.flask]
/// quart = { reason = "Flask API on asyncio", size = "similar" }
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AlternativeEntry {
    pub reason: String,
    #[serde(default)]
    pub size: SizeHint,
}

const BUILTIN: &[(&str, &[(&str, &str, SizeHint)])] = {
    use SizeHint::*;
    &[
        ("arrow", &[
            ("pendulum", "Better timezone handling", Similar),
            ("python-dateutil", "Fewer dependencies", Smaller),
        ]),
        ("beautifulsoup4", &[
            ("selectolax", "Much faster, C-based", Smaller),
            ("pyquery", "jQuery-like API", Similar),
        ]),
        ("boto3", &[("aioboto3", "Async support", Similar)]),
        ("celery", &[
            ("rq", "Simpler, Redis-based", MuchSmaller),
            ("dramatiq", "Better reliability", Smaller),
        ]),
        ("cerberus", &[
            ("pydantic", "Type hints, better performance", Similar),
            ("marshmallow", "More flexible", Similar),
        ]),
        ("click", &[
            ("typer", "Type hints, better completion", Similar),
            ("argparse", "Standard library, no dependencies", MuchSmaller),
        ]),
        ("configparser", &[("dynaconf", "Multiple formats and environments", Larger)]),
        ("django", &[
            ("fastapi", "Modern, lighter, API-focused", MuchSmaller),
            ("flask", "Simpler, more flexible", MuchSmaller),
        ]),
        ("flask", &[
            ("fastapi", "Modern, faster, async support", Similar),
            ("bottle", "Minimal, single-file framework", Smaller),
        ]),
        ("loguru", &[("logging", "Standard library", MuchSmaller)]),
        ("matplotlib", &[
            ("plotly", "Interactive, modern", Similar),
            ("seaborn", "Simpler API for statistics", Smaller),
        ]),
        ("nose", &[
            ("pytest", "Actively maintained", Similar),
            ("unittest", "Standard library", Smaller),
        ]),
        ("numpy", &[("jax", "GPU support and autodiff", Similar)]),
        ("pandas", &[
            ("polars", "Much faster, better memory usage", Smaller),
            ("dask", "Distributed computing", Larger),
        ]),
        ("pickle", &[
            ("dill", "Supports more types", Similar),
            ("cloudpickle", "Better for distributed computing", Similar),
        ]),
        ("pillow", &[
            ("opencv-python", "More features, faster", Larger),
            ("imageio", "Simpler, fewer dependencies", Smaller),
        ]),
        ("pytest", &[("unittest", "Standard library, no dependencies", MuchSmaller)]),
        ("python-dotenv", &[("environs", "Type casting and validation", Similar)]),
        ("pyyaml", &[("ruamel-yaml", "YAML 1.2 support", Similar)]),
        ("redis", &[
            ("redis-py-cluster", "Cluster support", Similar),
            ("aioredis", "Async support", Similar),
        ]),
        ("requests", &[
            ("httpx", "Async support and HTTP/2", Similar),
            ("urllib3", "Lower level, fewer dependencies", Smaller),
        ]),
        ("simplejson", &[
            ("json", "Standard library", MuchSmaller),
            ("ujson", "Ultra fast", Smaller),
            ("orjson", "Fastest, written in Rust", Smaller),
        ]),
        ("sqlalchemy", &[
            ("peewee", "Simpler, lighter ORM", MuchSmaller),
            ("sqlite3", "Standard library", MuchSmaller),
        ]),
    ]
};

/// Known alternatives, keyed by canonical package name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlternativesDb {
    entries: BTreeMap<String, Vec<Alternative>>,
}

impl AlternativesDb {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(package, alternatives)| {
                let alternatives = alternatives
                    .iter()
                    .map(|(name, reason, size)| Alternative {
                        name: name.to_string(),
                        reason: reason.to_string(),
                        size: *size,
                    })
                    .collect();
                (package.to_string(), alternatives)
            })
            .collect();
        Self { entries }
    }

    /// Add entries from a config file. An alternative already known for the same package
    /// is replaced.
    pub fn extend(&mut self, extra: &BTreeMap<String, BTreeMap<String, AlternativeEntry>>) {
        for (package, alternatives) in extra {
            let known = self.entries.entry(canonicalize_name(package)).or_default();
            for (name, entry) in alternatives {
                let alternative = Alternative {
                    name: name.clone(),
                    reason: entry.reason.clone(),
                    size: entry.size,
                };
                match known
                    .iter_mut()
                    .find(|existing| canonicalize_name(&existing.name) == canonicalize_name(name))
                {
                    Some(existing) => *existing = alternative,
                    None => known.push(alternative),
                }
            }
        }
    }

    pub fn get(&self, package: &str) -> &[Alternative] {
        self.entries
            .get(&canonicalize_name(package))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Alternative])> {
        self.entries
            .iter()
            .map(|(package, alternatives)| (package.as_str(), alternatives.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AlternativeStatus {
    pub name: String,
    pub reason: String,
    pub size: SizeHint,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_size_bytes: Option<u64>,
    /// Installed size of the alternative minus that of the package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_difference_bytes: Option<i64>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageAlternatives {
    pub package: String,
    pub version: String,
    pub size_bytes: u64,
    pub alternatives: Vec<AlternativeStatus>,
}

#[derive(Debug, Clone)]
pub struct AlternativesOptions {
    pub size: SizeOptions,
    pub jobs: usize,
}

impl Default for AlternativesOptions {
    fn default() -> Self {
        Self {
            size: SizeOptions::default(),
            jobs: 1,
        }
    }
}

/// Looks up alternatives against what an environment has installed.
pub struct AlternativesFinder<'a> {
    db: &'a AlternativesDb,
    distributions: Vec<Distribution>,
    options: &'a AlternativesOptions,
}

impl<'a> AlternativesFinder<'a> {
    pub fn new(
        environment: &PythonEnvironment,
        db: &'a AlternativesDb,
        options: &'a AlternativesOptions,
    ) -> Result<Self> {
        Ok(Self {
            db,
            distributions: get_distributions(environment.site_packages())?,
            options,
        })
    }

    fn find(&self, name: &str) -> Option<&Distribution> {
        let name = canonicalize_name(name);
        self.distributions
            .iter()
            .find(|dist| dist.canonical_name() == name)
    }

    /// Alternatives for one installed package, empty when none are known.
    pub fn package(&self, package: &str, interrupt: &Interrupt) -> Result<PackageAlternatives> {
        let dist = self
            .find(package)
            .ok_or_else(|| PkgsizerError::PackageNotInstalled {
                name: canonicalize_name(package),
            })?;
        let alternatives = self.db.get(package);

        let installed: Vec<Option<&Distribution>> = alternatives
            .iter()
            .map(|alternative| self.find(&alternative.name))
            .collect();
        let mut measured = vec![dist];
        measured.extend(installed.iter().flatten().copied());
        let report = size_distributions(&measured, &self.options.size, self.options.jobs, interrupt)?;
        let own = report.totals[0].bytes;
        let mut sizes = report.totals[1..].iter();

        let alternatives = alternatives
            .iter()
            .zip(installed)
            .map(|(alternative, installed)| {
                let installed_size = installed.and_then(|_| sizes.next()).map(|size| size.bytes);
                AlternativeStatus {
                    name: alternative.name.clone(),
                    reason: alternative.reason.clone(),
                    size: alternative.size,
                    installed: installed.is_some(),
                    installed_size_bytes: installed_size,
                    size_difference_bytes: installed_size.map(|size| size as i64 - own as i64),
                }
            })
            .collect();

        Ok(PackageAlternatives {
            package: dist.canonical_name().to_string(),
            version: dist.version().to_string(),
            size_bytes: own,
            alternatives,
        })
    }

    /// Every installed package the database knows alternatives for, in name order.
    pub fn installed(&self, interrupt: &Interrupt) -> Result<Vec<PackageAlternatives>> {
        let known: Vec<&Distribution> = self
            .distributions
            .iter()
            .filter(|dist| !self.db.get(dist.canonical_name()).is_empty())
            .collect();
        let report = size_distributions(&known, &self.options.size, self.options.jobs, interrupt)?;

        Ok(known
            .into_iter()
            .zip(report.totals)
            .map(|(dist, size)| PackageAlternatives {
                package: dist.canonical_name().to_string(),
                version: dist.version().to_string(),
                size_bytes: size.bytes,
                alternatives: self
                    .db
                    .get(dist.canonical_name())
                    .iter()
                    .map(|alternative| AlternativeStatus {
                        name: alternative.name.clone(),
                        reason: alternative.reason.clone(),
                        size: alternative.size,
                        installed: self.find(&alternative.name).is_some(),
                        installed_size_bytes: None,
                        size_difference_bytes: None,
                    })
                    .collect(),
            })
            .collect())
    }
}

fn status(alternative: &AlternativeStatus) -> String {
    match (alternative.installed_size_bytes, alternative.size_difference_bytes) {
        (Some(size), Some(difference)) => {
            let sign = if difference < 0 { '-' } else { '+' };
            format!(
                "installed, {} ({}{})",
                format_size(size),
                sign,
                format_size(difference.unsigned_abs())
            )
        }
        _ if alternative.installed => "installed".to_string(),
        _ => "not installed".to_string(),
    }
}

fn alternatives_table(alternatives: &[AlternativeStatus]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Alternative", "Reason", "Expected size", "Status"]);
    for alternative in alternatives {
        builder.push_record([
            alternative.name.clone(),
            alternative.reason.clone(),
            alternative.size.label().to_string(),
            status(alternative),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::ascii());
    table.to_string()
}

pub fn print_package_alternatives(
    result: &PackageAlternatives,
    mut stdout: impl Write,
) -> Result<()> {
    writeln!(
        stdout,
        "{} {} ({})",
        result.package,
        result.version,
        format_size(result.size_bytes)
    )?;
    if result.alternatives.is_empty() {
        writeln!(stdout, "No known alternatives for `{}`.", result.package)?;
    } else {
        writeln!(stdout, "{}", alternatives_table(&result.alternatives))?;
    }
    stdout.flush()?;
    Ok(())
}

pub fn print_installed_alternatives(
    results: &[PackageAlternatives],
    mut stdout: impl Write,
) -> Result<()> {
    if results.is_empty() {
        writeln!(stdout, "No installed package has known alternatives.")?;
        return Ok(());
    }
    for result in results {
        writeln!(
            stdout,
            "\n{} {} ({})",
            result.package,
            result.version,
            format_size(result.size_bytes)
        )?;
        writeln!(stdout, "{}", alternatives_table(&result.alternatives))?;
    }
    writeln!(
        stdout,
        "\n{} installed package(s) have known alternatives",
        results.len()
    )?;
    stdout.flush()?;
    Ok(())
}

pub fn print_database(db: &AlternativesDb, mut stdout: impl Write) -> Result<()> {
    let mut builder = Builder::default();
    builder.push_record(["Package", "Alternatives", "Count"]);
    for (package, alternatives) in db.iter() {
        let names: Vec<&str> = alternatives
            .iter()
            .map(|alternative| alternative.name.as_str())
            .collect();
        builder.push_record([
            package.to_string(),
            names.join(", "),
            alternatives.len().to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::ascii());
    writeln!(stdout, "{}", table)?;
    writeln!(stdout, "{} packages with known alternatives", db.len())?;
    stdout.flush()?;
    Ok(())
}

/// The whole database in a serializable shape.
pub fn database_json(db: &AlternativesDb) -> BTreeMap<&str, &[Alternative]> {
    db.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MarkerEnvironment;
    use crate::scan::tests::install;
    use tempfile::tempdir;

    fn extra(toml: &str) -> BTreeMap<String, BTreeMap<String, AlternativeEntry>> {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_builtin_lookup_is_canonical() {
        let db = AlternativesDb::builtin();
        assert!(db.len() >= 20);
        assert_eq!(db.get("PyYAML")[0].name, "ruamel-yaml");
        assert_eq!(db.get("Python_Dotenv")[0].name, "environs");
        assert!(db.get("unknown-package").is_empty());
    }

    #[test]
    fn test_extend_adds_and_replaces() {
        let mut db = AlternativesDb::builtin();
        db.extend(&extra(
            r#"
[flask]
quart = { reason = "Flask API on asyncio" }
Bottle = { reason = "Tiny", size = "much_smaller" }

[My_Lib]
other-lib = { reason = "Maintained fork", size = "smaller" }
"#,
        ));

        let flask: Vec<(&str, SizeHint)> = db
            .get("flask")
            .iter()
            .map(|alternative| (alternative.name.as_str(), alternative.size))
            .collect();
        assert_eq!(
            flask,
            [
                ("fastapi", SizeHint::Similar),
                ("Bottle", SizeHint::MuchSmaller),
                ("quart", SizeHint::Similar),
            ]
        );
        assert_eq!(db.get("my-lib")[0].reason, "Maintained fork");
    }

    fn environment() -> (tempfile::TempDir, PythonEnvironment) {
        let site = tempdir().unwrap();
        install(site.path(), "requests", &[], &[("api.py", 3000)]);
        install(site.path(), "httpx", &[], &[("api.py", 1000)]);
        install(site.path(), "numpy", &[], &[("core.py", 10)]);
        install(site.path(), "tiny", &[], &[("x.py", 10)]);
        let env = PythonEnvironment::new(vec![site.path().to_path_buf()], MarkerEnvironment::host());
        (site, env)
    }

    #[test]
    fn test_single_package() {
        let (_site, env) = environment();
        let db = AlternativesDb::builtin();
        let options = AlternativesOptions::default();
        let finder = AlternativesFinder::new(&env, &db, &options).unwrap();

        let result = finder.package("Requests", &Interrupt::new()).unwrap();
        assert_eq!(result.package, "requests");
        assert_eq!(result.size_bytes, 3000);
        let httpx = &result.alternatives[0];
        assert!(httpx.installed);
        assert_eq!(httpx.installed_size_bytes, Some(1000));
        assert_eq!(httpx.size_difference_bytes, Some(-2000));
        let urllib3 = &result.alternatives[1];
        assert!(!urllib3.installed);
        assert_eq!(urllib3.installed_size_bytes, None);

        let mut out = Vec::new();
        print_package_alternatives(&result, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("not installed"));

        let none = finder.package("tiny", &Interrupt::new()).unwrap();
        assert!(none.alternatives.is_empty());
    }

    #[test]
    fn test_missing_package() {
        let (_site, env) = environment();
        let db = AlternativesDb::builtin();
        let options = AlternativesOptions::default();
        let finder = AlternativesFinder::new(&env, &db, &options).unwrap();
        let err = finder.package("flask", &Interrupt::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PkgsizerError>(),
            Some(PkgsizerError::PackageNotInstalled { .. })
        ));
    }

    #[test]
    fn test_all_installed() {
        let (_site, env) = environment();
        let db = AlternativesDb::builtin();
        let options = AlternativesOptions::default();
        let finder = AlternativesFinder::new(&env, &db, &options).unwrap();
        let results = finder.installed(&Interrupt::new()).unwrap();
        let packages: Vec<&str> = results.iter().map(|r| r.package.as_str()).collect();
        assert_eq!(packages, ["numpy", "requests"]);
    }

    #[test]
    fn test_print_database() {
        let mut out = Vec::new();
        print_database(&AlternativesDb::builtin(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("simplejson"));
        assert!(out.contains("json, ujson, orjson"));
    }
}
