use anyhow::{Context, Result};
use serde::Deserialize;
use toml::value::Table;

#[derive(Deserialize, Debug)]
struct LockFile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Deserialize, Debug)]
struct LockedPackage {
    name: String,
    #[serde(default)]
    source: Option<Table>,
}

impl LockedPackage {
    /// uv records the project itself as a `virtual` source; it is never installed.
    fn is_virtual(&self) -> bool {
        self.source
            .as_ref()
            .map_or(false, |source| source.contains_key("virtual"))
    }
}

/// Names of every `[[package]]` in a `poetry.lock` or `uv.lock`.
pub fn parse(content: &str) -> Result<Vec<String>> {
    let lock: LockFile = toml::from_str(content).context("Failed to parse lock file")?;
    Ok(lock
        .package
        .into_iter()
        .filter(|package| !package.is_virtual())
        .map(|package| package.name)
        .collect())
}
