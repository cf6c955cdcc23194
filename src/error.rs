use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a run. Everything scoped to a single file or package is recovered
/// where it happens and never becomes one of these.
#[derive(Debug, Error)]
pub enum PkgsizerError {
    #[error("No Python environment found: {reason}\n\nHint: {hint}")]
    EnvironmentNotFound { reason: String, hint: String },

    #[error("site-packages directory does not exist: {path}\n\nHint: pass an existing directory to --site-packages, or use --venv / --python instead")]
    SitePackagesMissing { path: PathBuf },

    #[error("Invalid size threshold `{value}`\n\nHint: use a number with an optional unit, e.g. `500MB`, `1.5GB` or `1048576`")]
    InvalidThreshold { value: String },

    #[error("Unsupported dependency file: {path}\n\nHint: supported files are requirements*.txt, pyproject.toml, poetry.lock, uv.lock and environment.yml")]
    UnsupportedManifest { path: PathBuf },

    #[error("Package `{name}` is not installed in this environment")]
    PackageNotInstalled { name: String },

    #[error("Aborted by user")]
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_not_found_display() {
        let error = PkgsizerError::EnvironmentNotFound {
            reason: "no lib/python*/site-packages under /tmp/venv".to_string(),
            hint: "create the virtual environment first".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/tmp/venv"));
        assert!(message.contains("Hint: create the virtual environment first"));
    }

    #[test]
    fn test_interrupted_display() {
        assert_eq!(PkgsizerError::Interrupted.to_string(), "Aborted by user");
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let error = anyhow::Error::from(PkgsizerError::Interrupted).context("while sizing");
        assert!(matches!(
            error.downcast_ref::<PkgsizerError>(),
            Some(PkgsizerError::Interrupted)
        ));
    }
}
