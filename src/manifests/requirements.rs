use log::debug;

use super::requirement_name;

/// A line that is only a URL or path, e.g. `https://host/pkg.tar.gz` or `git+ssh://...`.
fn is_url(line: &str) -> bool {
    let scheme_only = line.split_once("://").map_or(false, |(scheme, _)| {
        scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+')
    });
    scheme_only || line.starts_with("file:") || line.starts_with('.') || line.starts_with('/')
}

/// Names from a pip requirements file (`requirements.txt`, pip-tools `.in`).
///
/// Options (`-r`, `-e`, `--hash`, ...) and bare URLs are skipped; they do not name an
/// installed distribution on their own.
pub fn parse(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let line = line.trim().trim_end_matches('\\').trim();
        if line.is_empty() || line.starts_with('-') || is_url(line) {
            continue;
        }
        match requirement_name(line) {
            Some(name) => names.push(name),
            None => debug!("Ignoring requirements line `{}`", line),
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requirements() {
        let content = "\
# pinned by pip-compile
requests==2.31.0  # via -r requirements.in
Flask[async]>=2.0
-r base.txt
-e ./local/pkg
--index-url https://example.org/simple

numpy ; python_version >= \"3.9\"
https://example.org/pkg-1.0.tar.gz
urllib3==2.0.7 \\
    --hash=sha256:abc
pytz
";
        assert_eq!(
            parse(content),
            ["requests", "Flask", "numpy", "urllib3", "pytz"]
        );
    }

    #[test]
    fn test_named_url_requirement_is_kept() {
        assert_eq!(parse("mypkg @ git+https://example.org/mypkg.git"), ["mypkg"]);
        assert_eq!(parse("git+https://example.org/other.git"), Vec::<String>::new());
        assert_eq!(parse("./vendor/thing"), Vec::<String>::new());
    }
}
