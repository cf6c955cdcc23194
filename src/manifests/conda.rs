use anyhow::{Context, Result};
use serde::Deserialize;

use super::requirement_name;

#[derive(Deserialize, Debug, Default)]
struct CondaEnvironment {
    #[serde(default)]
    dependencies: Vec<CondaDependency>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CondaDependency {
    Spec(String),
    Pip { pip: Vec<String> },
    Other(serde_yaml_ng::Value),
}

/// `conda-forge::numpy=1.26.*=py311h*` -> `numpy`
fn conda_name(spec: &str) -> Option<&str> {
    let spec = spec.rsplit("::").next().unwrap_or(spec).trim();
    let end = spec
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ' ' | '['))
        .unwrap_or(spec.len());
    let name = spec[..end].trim();
    (!name.is_empty()).then_some(name)
}

/// Names from a conda `environment.yml`: conda specs plus the nested `pip:` list.
/// The interpreter and pip itself are not packages of the environment.
pub fn parse(content: &str) -> Result<Vec<String>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let environment: Option<CondaEnvironment> =
        serde_yaml_ng::from_str(content).context("Failed to parse YAML content")?;
    let mut names = Vec::new();

    for dependency in environment.unwrap_or_default().dependencies {
        match dependency {
            CondaDependency::Spec(spec) => {
                if let Some(name) = conda_name(&spec) {
                    if !name.eq_ignore_ascii_case("python") && !name.eq_ignore_ascii_case("pip") {
                        names.push(name.to_string());
                    }
                }
            }
            CondaDependency::Pip { pip } => {
                names.extend(pip.iter().filter_map(|line| requirement_name(line.trim())));
            }
            CondaDependency::Other(_) => {}
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conda_environment() {
        let content = "
name: analysis
channels:
  - conda-forge
dependencies:
  - python=3.11
  - pip
  - numpy>=1.26
  - conda-forge::pandas=2.2.*=py311h*
  - scikit-learn 1.4
  - pip:
      - requests==2.31.0
      - rich[jupyter]
";
        assert_eq!(
            parse(content).unwrap(),
            ["numpy", "pandas", "scikit-learn", "requests", "rich"]
        );
    }

    #[test]
    fn test_empty_document() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("name: empty\n").unwrap().is_empty());
    }

    #[test]
    fn test_conda_name() {
        assert_eq!(conda_name("bioconda::samtools"), Some("samtools"));
        assert_eq!(conda_name("zlib"), Some("zlib"));
        assert_eq!(conda_name("=1.0"), None);
    }
}
