use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use super::requirement::canonicalize_name;

/// The parts of PEP 610 `direct_url.json` needed to recognize an editable install.
#[derive(Deserialize, Debug)]
struct DirectUrl {
    url: String,
    #[serde(default)]
    dir_info: Option<DirInfo>,
}

#[derive(Deserialize, Debug)]
struct DirInfo {
    #[serde(default)]
    editable: bool,
}

/// Convert a `file://` URL into a local path.
fn file_url_to_path(url: &str) -> Option<PathBuf> {
    let raw = url.strip_prefix("file://")?;
    let decoded = urlencoding::decode(raw).ok()?;
    // `file:///C:/src` on Windows
    let decoded = if cfg!(windows) {
        decoded.trim_start_matches('/').to_string()
    } else {
        decoded.into_owned()
    };
    Some(PathBuf::from(decoded))
}

fn from_direct_url(info_dir: &Path) -> Option<PathBuf> {
    let content = fs::read_to_string(info_dir.join("direct_url.json")).ok()?;
    let direct_url: DirectUrl = match serde_json::from_str(&content) {
        Ok(direct_url) => direct_url,
        Err(err) => {
            debug!("Malformed direct_url.json in {}: {}", info_dir.display(), err);
            return None;
        }
    };
    if !direct_url.dir_info.map_or(false, |info| info.editable) {
        return None;
    }
    file_url_to_path(&direct_url.url)
}

/// Whether a `.pth` file stem belongs to `canonical`.
///  e.g. `__editable__.my_pkg-1.0`, `_my_pkg`, `my-pkg` all match `my-pkg`
fn pth_matches(stem: &str, canonical: &str) -> bool {
    let stem = stem.trim_start_matches("__editable__.").trim_start_matches('_');
    let base = stem.split_once('-').map_or(stem, |(name, _)| name);
    canonicalize_name(base) == canonical || canonicalize_name(stem) == canonical
}

fn from_pth(site_dir: &Path, canonical: &str) -> Option<PathBuf> {
    let mut pth_files: Vec<PathBuf> = fs::read_dir(site_dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "pth"))
        .filter(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map_or(false, |stem| pth_matches(stem, canonical))
        })
        .collect();
    pth_files.sort();

    for pth in pth_files {
        let Ok(content) = fs::read_to_string(&pth) else {
            continue;
        };
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with("import ") {
                continue;
            }
            let candidate = site_dir.join(line);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Locate the source directory of an editable install, if this distribution is one.
///
/// `direct_url.json` takes precedence; a `.pth` file naming the distribution and pointing to an
/// existing directory is the fallback.
pub fn find_editable_source(info_dir: &Path, site_dir: &Path, name: &str) -> Option<PathBuf> {
    let source = from_direct_url(info_dir).or_else(|| from_pth(site_dir, &canonicalize_name(name)));
    if let Some(source) = &source {
        debug!("{} is an editable install from {}", name, source.display());
    }
    source
}
