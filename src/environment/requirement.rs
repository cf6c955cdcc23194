use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{bail, Context, Error, Result};
use regex::Regex;

use super::marker::{Marker, MarkerEnvironment};

/// Normalize a distribution name: lowercase, with runs of `-`, `_` and `.` collapsed to `-`.
///  e.g. `Typing_Extensions` -> `typing-extensions`
pub fn canonicalize_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                canonical.push('-');
            }
            in_separator = true;
        } else {
            canonical.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    canonical
}

fn requirement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*?)\s*$",
        )
        .expect("requirement pattern is valid")
    })
}

fn specifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\s*(?:===|==|!=|~=|<=|>=|<|>)\s*[A-Za-z0-9.*+!_-]+\s*,?)*$")
            .expect("specifier pattern is valid")
    })
}

/// A PEP 508 dependency declaration, e.g. `requests[socks] >=2.8 ; python_version >= "3.8"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    name: String,
    extras: Vec<String>,
    specifier: String,
    url: Option<String>,
    marker: Option<Marker>,
}

impl Requirement {
    /// The name as declared.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canonical_name(&self) -> String {
        canonicalize_name(&self.name)
    }

    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    pub fn specifier(&self) -> &str {
        &self.specifier
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn marker(&self) -> Option<&Marker> {
        self.marker.as_ref()
    }

    /// Whether this requirement applies to `env`. Requirements without a marker always apply.
    pub fn is_active(&self, env: &MarkerEnvironment) -> bool {
        self.marker.as_ref().map_or(true, |marker| marker.evaluate(env))
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let (body, marker) = match line.split_once(';') {
            Some((body, marker)) => (body, Some(marker.trim())),
            None => (line, None),
        };

        let caps = requirement_pattern()
            .captures(body)
            .with_context(|| format!("invalid requirement `{}`", line.trim()))?;

        let extras = caps
            .name("extras")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|extra| !extra.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let rest = caps.name("rest").map_or("", |m| m.as_str());
        let (specifier, url) = if let Some(url) = rest.strip_prefix('@') {
            let url = url.trim();
            if url.is_empty() {
                bail!("missing URL in requirement `{}`", line.trim());
            }
            (String::new(), Some(url.to_string()))
        } else {
            let specifier = rest
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .unwrap_or(rest)
                .trim();
            if !specifier_pattern().is_match(specifier) {
                bail!("invalid version specifier in requirement `{}`", line.trim());
            }
            (specifier.to_string(), None)
        };

        let marker = match marker {
            Some(marker) if !marker.is_empty() => Some(
                Marker::parse(marker)
                    .with_context(|| format!("invalid marker in requirement `{}`", line.trim()))?,
            ),
            _ => None,
        };

        Ok(Requirement {
            name: caps["name"].to_string(),
            extras,
            specifier,
            url,
            marker,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {}", url)?;
        } else if !self.specifier.is_empty() {
            write!(f, "{}", self.specifier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_name() {
        assert_eq!(canonicalize_name("Typing_Extensions"), "typing-extensions");
        assert_eq!(canonicalize_name("zope.interface"), "zope-interface");
        assert_eq!(canonicalize_name("a__-.b"), "a-b");
        assert_eq!(canonicalize_name("requests"), "requests");
    }

    #[test]
    fn test_parse_plain_and_versioned() {
        let req: Requirement = "requests".parse().unwrap();
        assert_eq!(req.name(), "requests");
        assert!(req.marker().is_none());

        let req: Requirement = "urllib3 (<3,>=1.21.1)".parse().unwrap();
        assert_eq!(req.name(), "urllib3");
        assert_eq!(req.specifier(), "<3,>=1.21.1");
    }

    #[test]
    fn test_parse_extras_and_marker() {
        let req: Requirement = r#"PySocks[socks, win] !=1.5.7,>=1.5.6 ; extra == "socks""#
            .parse()
            .unwrap();
        assert_eq!(req.canonical_name(), "pysocks");
        assert_eq!(req.extras(), ["socks".to_string(), "win".to_string()]);
        assert!(req.marker().unwrap().mentions_extra());
        assert!(!req.is_active(&MarkerEnvironment::host()));
    }

    #[test]
    fn test_parse_url_requirement() {
        let req: Requirement = "pip @ https://example.com/pip-24.0.whl".parse().unwrap();
        assert_eq!(req.url(), Some("https://example.com/pip-24.0.whl"));
        assert_eq!(req.specifier(), "");
    }

    #[test]
    fn test_parse_failures() {
        assert!("".parse::<Requirement>().is_err());
        assert!("-e .".parse::<Requirement>().is_err());
        assert!("foo >= 1.0 ; python_version <".parse::<Requirement>().is_err());
        assert!("foo bar baz".parse::<Requirement>().is_err());
    }
}
