use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;

use crate::alternatives::{AlternativeEntry, AlternativesDb, AlternativesOptions};
use crate::cli::{Command, EnvArgs, Opts, ScanArgs};
use crate::compare::CompareOptions;
use crate::environment::EnvSelector;
use crate::graph::Roots;
use crate::manifests::parse_manifest;
use crate::report::{parse_threshold, ReportOptions};
use crate::scan::ScanOptions;
use crate::size::{ExcludeSet, SizeOptions};
use crate::unused::UnusedOptions;
use crate::updates::{ResponseCache, UpdateOptions, UpdateSelection};
use crate::why::WhyOptions;

pub const CONFIG_FILE_NAME: &str = "pkgsizer.toml";

/// Defaults read from `pkgsizer.toml`. Command-line flags take precedence.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub exclude: Vec<String>,
    pub fail_over: Option<String>,
    pub jobs: Option<usize>,
    pub follow_symlinks: Option<bool>,
    pub module_depth: Option<usize>,
    pub depth: Option<usize>,
    pub top: Option<usize>,
    /// Extra entries for the alternatives database.
    pub alternatives: BTreeMap<String, BTreeMap<String, AlternativeEntry>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Find `pkgsizer.toml` in `start` or any parent directory.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|file_path| file_path.is_file())
}

/// A validated `scan-env` or `analyze-file` run.
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub env: EnvSelector,
    pub scan: ScanOptions,
    pub report: ReportOptions,
    pub json: Option<PathBuf>,
    pub html: Option<PathBuf>,
    /// Total size in bytes above which the run fails.
    pub fail_over: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlternativesMode {
    Package(String),
    Installed,
    ListAll,
}

#[derive(Debug, Clone)]
pub enum Task {
    Scan(ScanTask),
    Why {
        env: EnvSelector,
        package: String,
        options: WhyOptions,
        json: Option<PathBuf>,
    },
    Unused {
        env: EnvSelector,
        code_path: Option<PathBuf>,
        options: UnusedOptions,
        json: Option<PathBuf>,
    },
    Alternatives {
        env: EnvSelector,
        mode: AlternativesMode,
        db: AlternativesDb,
        options: AlternativesOptions,
        json: Option<PathBuf>,
    },
    Updates {
        env: EnvSelector,
        options: UpdateOptions,
        timeout: Duration,
        cache: Option<ResponseCache>,
        json: Option<PathBuf>,
    },
    Compare {
        env1: PathBuf,
        env2: PathBuf,
        options: CompareOptions,
        json: Option<PathBuf>,
    },
}

pub struct Config {
    pub verbose: u8,
    /// Worker threads for walks and network lookups.
    pub jobs: usize,
    pub task: Task,
}

impl EnvArgs {
    /// Explicit site-packages wins over a venv, which wins over an interpreter.
    pub fn selector(&self) -> EnvSelector {
        if let Some(path) = &self.site_packages {
            EnvSelector::SitePackages(path.clone())
        } else if let Some(venv) = &self.venv {
            EnvSelector::Venv(venv.clone())
        } else if let Some(python) = &self.python {
            EnvSelector::Python(python.clone())
        } else {
            EnvSelector::Auto
        }
    }
}

fn size_options(file: &FileConfig, cli_excludes: &[String], follow_symlinks: bool) -> Result<SizeOptions> {
    let patterns: Vec<&String> = file.exclude.iter().chain(cli_excludes).collect();
    Ok(SizeOptions {
        excludes: ExcludeSet::new(&patterns)?,
        follow_symlinks: follow_symlinks || file.follow_symlinks.unwrap_or(false),
    })
}

fn scan_task(
    env: &EnvArgs,
    args: ScanArgs,
    json: Option<PathBuf>,
    roots: Roots,
    file: &FileConfig,
    jobs: usize,
) -> Result<ScanTask> {
    let fail_over = match args.fail_over.as_deref().or(file.fail_over.as_deref()) {
        Some(value) => Some(parse_threshold(value)?),
        None => None,
    };
    Ok(ScanTask {
        env: env.selector(),
        scan: ScanOptions {
            roots,
            max_depth: args.depth.or(file.depth),
            module_depth: args.module_depth.or(file.module_depth),
            editable: args.include_editable.unwrap_or_default(),
            size: size_options(file, &args.exclude, args.follow_symlinks)?,
            jobs,
        },
        report: ReportOptions {
            sort: args.by,
            top: args.top.or(file.top),
            tree: args.tree,
            include_deps: args.include_deps,
        },
        json,
        html: args.html,
        fail_over,
    })
}

impl Config {
    pub fn build(opts: Opts) -> Result<Config> {
        let config_path = match opts.config {
            Some(path) => Some(path),
            None => env::current_dir()
                .ok()
                .and_then(|dir| find_config_file(&dir)),
        };
        let file = match &config_path {
            Some(path) => {
                debug!("Reading defaults from {}", path.display());
                FileConfig::load(path)?
            }
            None => FileConfig::default(),
        };

        let jobs = match opts.jobs.or(file.jobs) {
            Some(0) => bail!("--jobs must be at least 1"),
            Some(jobs) => jobs,
            None => thread::available_parallelism().map_or(1, |n| n.get()),
        };

        let task = match opts.command {
            Command::ScanEnv {
                packages,
                env,
                output,
                scan,
            } => {
                let roots = if packages.is_empty() {
                    Roots::TopLevel
                } else {
                    Roots::Named(packages)
                };
                Task::Scan(scan_task(&env, scan, output.json, roots, &file, jobs)?)
            }
            Command::AnalyzeFile {
                file: manifest,
                env,
                output,
                scan,
            } => {
                let names = parse_manifest(&manifest)?;
                if names.is_empty() {
                    warn!("{} declares no packages", manifest.display());
                }
                Task::Scan(scan_task(&env, scan, output.json, Roots::Named(names), &file, jobs)?)
            }
            Command::Why {
                package,
                max_paths,
                env,
                output,
            } => Task::Why {
                env: env.selector(),
                package,
                options: WhyOptions {
                    max_paths,
                    size: size_options(&file, &[], false)?,
                    jobs,
                },
                json: output.json,
            },
            Command::Unused {
                code_path,
                env,
                output,
            } => Task::Unused {
                env: env.selector(),
                code_path,
                options: UnusedOptions {
                    size: size_options(&file, &[], false)?,
                    jobs,
                },
                json: output.json,
            },
            Command::Alternatives {
                package,
                list_all,
                env,
                output,
            } => {
                let mut db = AlternativesDb::builtin();
                db.extend(&file.alternatives);
                let mode = match (package, list_all) {
                    (_, true) => AlternativesMode::ListAll,
                    (Some(package), false) => AlternativesMode::Package(package),
                    (None, false) => AlternativesMode::Installed,
                };
                Task::Alternatives {
                    env: env.selector(),
                    mode,
                    db,
                    options: AlternativesOptions {
                        size: size_options(&file, &[], false)?,
                        jobs,
                    },
                    json: output.json,
                }
            }
            Command::Updates {
                packages,
                all,
                timeout,
                cache_dir,
                cache_ttl,
                env,
                output,
            } => {
                if timeout == 0 {
                    bail!("--timeout must be at least 1 second");
                }
                let selection = if all {
                    UpdateSelection::All
                } else if packages.is_empty() {
                    UpdateSelection::Direct
                } else {
                    UpdateSelection::Named(packages)
                };
                Task::Updates {
                    env: env.selector(),
                    options: UpdateOptions {
                        selection,
                        size: size_options(&file, &[], false)?,
                        jobs,
                    },
                    timeout: Duration::from_secs(timeout),
                    cache: cache_dir
                        .map(|dir| ResponseCache::new(dir, Duration::from_secs(cache_ttl))),
                    json: output.json,
                }
            }
            Command::Compare {
                env1,
                env2,
                name1,
                name2,
                output,
            } => Task::Compare {
                env1,
                env2,
                options: CompareOptions {
                    names: (name1, name2),
                    size: size_options(&file, &[], false)?,
                    jobs,
                },
                json: output.json,
            },
        };

        Ok(Config {
            verbose: opts.verbose,
            jobs,
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PkgsizerError;
    use clap::Parser;
    use tempfile::tempdir;

    fn build(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["pkgsizer"];
        argv.extend_from_slice(args);
        Config::build(Opts::try_parse_from(argv).unwrap())
    }

    fn scan_task_of(config: Config) -> ScanTask {
        match config.task {
            Task::Scan(task) => task,
            other => panic!("expected a scan, got {:?}", other),
        }
    }

    #[test]
    fn test_file_defaults_and_cli_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
exclude = ["*.pyc"]
fail_over = "1GB"
jobs = 3
depth = 4
top = 10

[alternatives.flask]
quart = { reason = "Flask API on asyncio" }
"#,
        )
        .unwrap();
        let path = path.to_string_lossy().to_string();

        let task = scan_task_of(
            build(&["scan-env", "--config", &path, "--depth", "1", "--exclude", "tests"]).unwrap(),
        );
        assert_eq!(task.scan.max_depth, Some(1));
        assert_eq!(task.scan.jobs, 3);
        assert_eq!(task.report.top, Some(10));
        assert_eq!(task.fail_over, Some(1024 * 1024 * 1024));
        assert!(task.scan.size.excludes.is_excluded(Path::new("a/b.pyc"), Path::new("")));
        assert!(task.scan.size.excludes.is_excluded(Path::new("pkg/tests/x.py"), Path::new("")));

        let config = build(&["alternatives", "flask", "--config", &path]).unwrap();
        match config.task {
            Task::Alternatives { db, mode, .. } => {
                assert_eq!(mode, AlternativesMode::Package("flask".to_string()));
                assert!(db.get("flask").iter().any(|a| a.name == "quart"));
            }
            other => panic!("expected alternatives, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_threshold() {
        let err = build(&["scan-env", "--fail-over", "lots"]).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PkgsizerError>(),
            Some(PkgsizerError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_unknown_config_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "colour = true\n").unwrap();
        let path = path.to_string_lossy().to_string();
        assert!(build(&["scan-env", "--config", &path]).is_err());
    }

    #[test]
    fn test_analyze_file_uses_manifest_roots() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        fs::write(&manifest, "Flask>=3\n# comment\nrequests\n").unwrap();
        let manifest = manifest.to_string_lossy().to_string();

        let task = scan_task_of(build(&["analyze-file", &manifest]).unwrap());
        assert_eq!(
            task.scan.roots,
            Roots::Named(vec!["flask".to_string(), "requests".to_string()])
        );
    }

    #[test]
    fn test_environment_priority() {
        let env = EnvArgs {
            python: Some(PathBuf::from("/usr/bin/python3")),
            venv: Some(PathBuf::from("/venv")),
            site_packages: None,
        };
        assert_eq!(env.selector(), EnvSelector::Venv(PathBuf::from("/venv")));
        assert_eq!(EnvArgs::default().selector(), EnvSelector::Auto);
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(
            find_config_file(&nested),
            Some(dir.path().join(CONFIG_FILE_NAME))
        );
    }

    #[test]
    fn test_zero_jobs_rejected() {
        assert!(build(&["why", "requests", "--jobs", "0"]).is_err());
    }
}
