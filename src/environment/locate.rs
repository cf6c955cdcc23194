use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str;

use anyhow::{Context, Result};
use log::{debug, info};

use super::marker::MarkerEnvironment;
use crate::error::PkgsizerError;

const INTERPRETER_PROBE: &str = "import site, sys\n\
print('.'.join(map(str, sys.version_info[:3])))\n\
for path in (site.getsitepackages() if hasattr(site, 'getsitepackages') else []):\n    print(path)\n";

/// How the user asked us to find the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSelector {
    SitePackages(PathBuf),
    Venv(PathBuf),
    Python(PathBuf),
    /// `$VIRTUAL_ENV`, then `python -m site` of the interpreter on PATH.
    Auto,
}

/// A resolved environment: the directories holding installed distributions and the
/// values their requirement markers are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonEnvironment {
    site_packages: Vec<PathBuf>,
    markers: MarkerEnvironment,
}

impl PythonEnvironment {
    pub fn new(site_packages: Vec<PathBuf>, markers: MarkerEnvironment) -> Self {
        Self {
            site_packages,
            markers,
        }
    }

    /// An environment made of one site-packages directory, with the Python version taken
    /// from the path when it carries one.
    pub fn from_site_packages(path: PathBuf) -> Self {
        let mut markers = MarkerEnvironment::host();
        if let Some(version) = infer_python_version(&path) {
            markers = markers.with_python_version(&version);
        }
        Self::new(vec![path], markers)
    }

    pub fn site_packages(&self) -> &[PathBuf] {
        &self.site_packages
    }

    pub fn markers(&self) -> &MarkerEnvironment {
        &self.markers
    }

    /// The primary directory, used for display.
    pub fn primary(&self) -> &Path {
        self.site_packages
            .first()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(""))
    }
}

/// Pull `X.Y` out of a `pythonX.Y` path component.
///  e.g. `/venv/lib/python3.11/site-packages` -> `3.11`
pub fn infer_python_version(path: &Path) -> Option<String> {
    path.components().rev().find_map(|component| {
        let name = component.as_os_str().to_str()?;
        let version = name.strip_prefix("python")?;
        let mut parts = version.split('.');
        let major = parts.next()?;
        let minor = parts.next()?;
        let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        (numeric(major) && numeric(minor)).then(|| format!("{}.{}", major, minor))
    })
}

/// Find the site-packages directory inside a virtual environment.
pub fn find_venv_site_packages(venv: &Path) -> Option<PathBuf> {
    let lib = venv.join("lib");
    if let Ok(entries) = fs::read_dir(&lib) {
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("python"))
            .map(|entry| entry.path().join("site-packages"))
            .filter(|path| path.is_dir())
            .collect();
        candidates.sort();
        if let Some(found) = candidates.into_iter().next() {
            return Some(found);
        }
    }

    // Windows layout
    let windows = venv.join("Lib").join("site-packages");
    windows.is_dir().then_some(windows)
}

fn locate_venv(venv: &Path) -> Result<PythonEnvironment> {
    let site_packages = find_venv_site_packages(venv).ok_or_else(|| {
        PkgsizerError::EnvironmentNotFound {
            reason: format!("no site-packages directory inside {}", venv.display()),
            hint: "check that the path points at the root of a virtual environment \
                   (the directory containing `bin/` or `Scripts/`)"
                .to_string(),
        }
    })?;
    Ok(PythonEnvironment::from_site_packages(site_packages))
}

fn locate_with_interpreter(python: &Path) -> Result<PythonEnvironment> {
    let output = Command::new(python)
        .arg("-c")
        .arg(INTERPRETER_PROBE)
        .output()
        .map_err(|err| PkgsizerError::EnvironmentNotFound {
            reason: format!("failed to run {}: {}", python.display(), err),
            hint: "pass the path of a working Python interpreter to --python".to_string(),
        })?;

    if !output.status.success() {
        return Err(PkgsizerError::EnvironmentNotFound {
            reason: format!(
                "{} exited with {}: {}",
                python.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            hint: "pass the path of a working Python interpreter to --python".to_string(),
        }
        .into());
    }

    let stdout = str::from_utf8(&output.stdout).context("Output was not valid UTF-8.")?;
    let mut lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty());
    let version = lines.next().unwrap_or_default().to_string();
    let site_packages: Vec<PathBuf> = lines
        .map(PathBuf::from)
        .filter(|path| path.is_dir())
        .collect();

    if site_packages.is_empty() {
        return Err(PkgsizerError::EnvironmentNotFound {
            reason: format!("{} reported no existing site-packages", python.display()),
            hint: "use --site-packages to point at the directory directly".to_string(),
        }
        .into());
    }

    let mut markers = MarkerEnvironment::host();
    if !version.is_empty() {
        markers = markers.with_python_version(&version);
    }
    Ok(PythonEnvironment::new(site_packages, markers))
}

/// This method executes the command `python -m site` to get the site package directories
fn locate_from_path() -> Result<PythonEnvironment> {
    let output = Command::new("python")
        .arg("-m")
        .arg("site")
        .output()
        .or_else(|_| Command::new("python3").arg("-m").arg("site").output())
        .map_err(|err| PkgsizerError::EnvironmentNotFound {
            reason: format!("failed to execute `python -m site`: {}", err),
            hint: "activate a virtual environment, or pass --venv, --python or --site-packages"
                .to_string(),
        })?;

    let output_str = str::from_utf8(&output.stdout)
        .context("Output was not valid UTF-8.")?
        .trim();

    // Extract the site package paths from the output
    let mut pkg_paths: Vec<PathBuf> = output_str
        .lines()
        .filter(|line| line.contains("site-packages"))
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == ','))
        .map(|s| s.split_once(": ").map_or(s, |(_, path)| path))
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"'))
        .map(PathBuf::from)
        .filter(|path| path.is_dir())
        .collect();
    pkg_paths.dedup();

    if pkg_paths.is_empty() {
        return Err(PkgsizerError::EnvironmentNotFound {
            reason: "`python -m site` reported no existing site-packages".to_string(),
            hint: "activate a virtual environment, or pass --venv, --python or --site-packages"
                .to_string(),
        }
        .into());
    }

    let markers = pkg_paths
        .iter()
        .find_map(|path| infer_python_version(path))
        .map_or_else(MarkerEnvironment::host, |version| {
            MarkerEnvironment::host().with_python_version(&version)
        });
    Ok(PythonEnvironment::new(pkg_paths, markers))
}

/// Resolve the environment to analyze.
///
/// Priority: explicit site-packages, virtual environment, interpreter, then the active
/// virtual environment or the interpreter on PATH.
pub fn locate(selector: &EnvSelector) -> Result<PythonEnvironment> {
    let environment = match selector {
        EnvSelector::SitePackages(path) => {
            if !path.is_dir() {
                return Err(PkgsizerError::SitePackagesMissing { path: path.clone() }.into());
            }
            PythonEnvironment::from_site_packages(path.clone())
        }
        EnvSelector::Venv(venv) => locate_venv(venv)?,
        EnvSelector::Python(python) => locate_with_interpreter(python)?,
        EnvSelector::Auto => match env::var_os("VIRTUAL_ENV") {
            Some(venv) if !venv.is_empty() => {
                debug!("Using the active virtual environment {:?}", venv);
                locate_venv(Path::new(&venv))?
            }
            _ => locate_from_path()?,
        },
    };
    info!(
        "Using site-packages: {}",
        environment
            .site_packages()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(environment)
}

/// Resolve a path given to `compare`: either a site-packages directory or a virtual environment.
pub fn resolve_env_path(path: &Path) -> Result<PythonEnvironment> {
    if !path.exists() {
        return Err(PkgsizerError::EnvironmentNotFound {
            reason: format!("{} does not exist", path.display()),
            hint: "pass a virtual environment root or a site-packages directory".to_string(),
        }
        .into());
    }

    let looks_like_site_packages = path.file_name().map_or(false, |name| {
        name == "site-packages" || name == "dist-packages"
    }) || fs::read_dir(path)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".dist-info")
            })
        })
        .unwrap_or(false);

    if looks_like_site_packages {
        return Ok(PythonEnvironment::from_site_packages(path.to_path_buf()));
    }
    locate_venv(path)
}

/// A readable name for an environment path: the venv directory name, skipping the
/// `lib/pythonX.Y/site-packages` tail.
pub fn environment_name(path: &Path) -> String {
    let skip = |name: &str| {
        name == "site-packages"
            || name == "dist-packages"
            || name == "lib"
            || name == "Lib"
            || name.starts_with("python")
    };
    path.components()
        .rev()
        .filter_map(|component| component.as_os_str().to_str())
        .find(|name| !skip(name) && !name.is_empty() && *name != "/")
        .map(ToString::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_infer_python_version() {
        assert_eq!(
            infer_python_version(Path::new("/v/lib/python3.11/site-packages")),
            Some("3.11".to_string())
        );
        assert_eq!(
            infer_python_version(Path::new("/usr/lib/python3.9t/site-packages")),
            None
        );
        assert_eq!(infer_python_version(Path::new("/v/Lib/site-packages")), None);
    }

    #[test]
    fn test_find_venv_site_packages_posix() {
        let venv = tempdir().unwrap();
        let site = venv.path().join("lib/python3.12/site-packages");
        fs::create_dir_all(&site).unwrap();

        assert_eq!(find_venv_site_packages(venv.path()), Some(site.clone()));
        let env = locate(&EnvSelector::Venv(venv.path().to_path_buf())).unwrap();
        assert_eq!(env.site_packages(), [site]);
        assert_eq!(env.markers().python_version.as_deref(), Some("3.12"));
    }

    #[test]
    fn test_find_venv_site_packages_windows_layout() {
        let venv = tempdir().unwrap();
        let site = venv.path().join("Lib/site-packages");
        fs::create_dir_all(&site).unwrap();

        assert_eq!(find_venv_site_packages(venv.path()), Some(site));
    }

    #[test]
    fn test_missing_venv_is_an_environment_error() {
        let venv = tempdir().unwrap();
        let err = locate(&EnvSelector::Venv(venv.path().to_path_buf())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PkgsizerError>(),
            Some(PkgsizerError::EnvironmentNotFound { .. })
        ));
        assert!(err.to_string().contains("Hint:"));
    }

    #[test]
    fn test_missing_site_packages() {
        let err = locate(&EnvSelector::SitePackages(PathBuf::from(
            "/definitely/not/a/site-packages",
        )))
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PkgsizerError>(),
            Some(PkgsizerError::SitePackagesMissing { .. })
        ));
    }

    #[test]
    fn test_resolve_env_path() {
        let venv = tempdir().unwrap();
        let site = venv.path().join("lib/python3.10/site-packages");
        fs::create_dir_all(site.join("six-1.16.0.dist-info")).unwrap();

        assert_eq!(resolve_env_path(venv.path()).unwrap().site_packages(), [site.clone()]);
        assert_eq!(resolve_env_path(&site).unwrap().site_packages(), [site]);
        assert!(resolve_env_path(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_environment_name() {
        assert_eq!(
            environment_name(Path::new("/work/prod-venv/lib/python3.11/site-packages")),
            "prod-venv"
        );
        assert_eq!(environment_name(Path::new("/work/dev")), "dev");
    }
}
