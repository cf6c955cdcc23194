use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::ledger::FileId;
use super::walker::{SizeTarget, SizeTotals, Sizer};
use crate::environment::Distribution;
use crate::error::PkgsizerError;

const EXTENSION_SUFFIXES: [&str; 3] = ["so", "pyd", "dylib"];

/// One importable package or module inside a distribution.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SubpackageNode {
    pub name: String,
    /// Dotted import path, e.g. `requests.adapters`.
    pub qualified_name: String,
    pub is_package: bool,
    /// Top-level names have depth 1.
    pub depth: usize,
    /// Every directory or file this node was built from; namespace packages may have several.
    pub paths: Vec<PathBuf>,
    /// Files directly inside this node, excluding child packages and modules.
    pub own: SizeTotals,
    /// `own` plus all children.
    pub cumulative: SizeTotals,
    pub children: Vec<SubpackageNode>,
}

impl SubpackageNode {
    /// Number of nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SubpackageNode::count).sum::<usize>()
    }
}

fn is_extension_module(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| EXTENSION_SUFFIXES.contains(&ext))
}

/// `_speedups.cpython-311-x86_64-linux-gnu.so` -> `_speedups`
fn module_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    if file_name == "__init__.py" {
        return None;
    }
    if file_name.ends_with(".py") || is_extension_module(path) {
        return file_name.split('.').next().map(ToString::to_string);
    }
    None
}

fn contains_python(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|entry| {
                let path = entry.path();
                path.is_file()
                    && (path.extension().map_or(false, |ext| ext == "py")
                        || is_extension_module(&path))
            })
        })
        .unwrap_or(false)
}

/// Directory entries sorted by name; unreadable directories yield nothing.
fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

struct TreeBuilder<'a> {
    sizer: &'a Sizer<'a>,
    max_depth: usize,
    base: PathBuf,
    editable: bool,
    seen: HashSet<FileId>,
}

impl<'a> TreeBuilder<'a> {
    /// Size `paths` recursively, counting identities already seen in this tree as zero.
    fn measure(&mut self, paths: Vec<PathBuf>) -> Result<SizeTotals, PkgsizerError> {
        let target = SizeTarget {
            paths,
            base: self.base.clone(),
            editable: self.editable,
        };
        let mut totals = SizeTotals::default();
        for entry in self.sizer.collect(&target)? {
            if entry.id.map_or(true, |id| self.seen.insert(id)) {
                totals += SizeTotals::new(entry.bytes, 1);
            }
        }
        Ok(totals)
    }

    fn module(
        &mut self,
        name: &str,
        qualified: String,
        files: Vec<PathBuf>,
        depth: usize,
    ) -> Result<SubpackageNode, PkgsizerError> {
        let own = self.measure(files.clone())?;
        Ok(SubpackageNode {
            name: name.to_string(),
            qualified_name: qualified,
            is_package: false,
            depth,
            paths: files,
            own,
            cumulative: own,
            children: Vec::new(),
        })
    }

    fn package(
        &mut self,
        name: &str,
        qualified: String,
        dirs: Vec<PathBuf>,
        depth: usize,
    ) -> Result<SubpackageNode, PkgsizerError> {
        let is_package = dirs.iter().any(|dir| dir.join("__init__.py").is_file());

        if depth >= self.max_depth {
            let own = self.measure(dirs.clone())?;
            return Ok(SubpackageNode {
                name: name.to_string(),
                qualified_name: qualified,
                is_package,
                depth,
                paths: dirs,
                own,
                cumulative: own,
                children: Vec::new(),
            });
        }

        let mut own_paths = Vec::new();
        let mut child_packages: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let mut child_modules: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

        for dir in &dirs {
            for entry in sorted_entries(dir) {
                let Some(entry_name) = entry.file_name().and_then(|n| n.to_str()) else {
                    own_paths.push(entry);
                    continue;
                };
                if entry.is_dir() {
                    let importable = entry_name != "__pycache__"
                        && !entry_name.starts_with('.')
                        && (entry.join("__init__.py").is_file() || contains_python(&entry));
                    if importable {
                        child_packages
                            .entry(entry_name.to_string())
                            .or_default()
                            .push(entry);
                    } else {
                        own_paths.push(entry);
                    }
                } else if let Some(module) = module_name(&entry) {
                    child_modules.entry(module).or_default().push(entry);
                } else {
                    own_paths.push(entry);
                }
            }
        }

        let own = self.measure(own_paths)?;

        let mut children = Vec::new();
        let mut names: Vec<&String> = child_packages.keys().chain(child_modules.keys()).collect();
        names.sort();
        names.dedup();
        for child in names {
            let child_qualified = format!("{}.{}", qualified, child);
            let node = match child_packages.get(child) {
                Some(child_dirs) => {
                    self.package(child, child_qualified, child_dirs.clone(), depth + 1)?
                }
                None => {
                    let files = child_modules.get(child).cloned().unwrap_or_default();
                    self.module(child, child_qualified, files, depth + 1)?
                }
            };
            children.push(node);
        }

        let cumulative = own + children.iter().map(|child| child.cumulative).sum();
        Ok(SubpackageNode {
            name: name.to_string(),
            qualified_name: qualified,
            is_package,
            depth,
            paths: dirs,
            own,
            cumulative,
            children,
        })
    }
}

/// Directories importable names of `dist` are looked up in.
fn search_roots(dist: &Distribution, site_packages: &[PathBuf]) -> Vec<PathBuf> {
    match dist.editable_location() {
        Some(source) => vec![source.to_path_buf(), source.join("src")],
        None => site_packages.to_vec(),
    }
}

/// Build one tree per top-level importable name of `dist`, down to `max_depth`
/// (top-level names are depth 1; nodes at `max_depth` are leaves).
///
/// A top-level package present under several roots (a namespace package) becomes one node
/// covering all of its directories.
pub fn enumerate_subpackages(
    dist: &Distribution,
    site_packages: &[PathBuf],
    max_depth: usize,
    sizer: &Sizer<'_>,
) -> Result<Vec<SubpackageNode>, PkgsizerError> {
    if max_depth == 0 {
        return Ok(Vec::new());
    }
    let roots = search_roots(dist, site_packages);
    let mut builder = TreeBuilder {
        sizer,
        max_depth,
        base: roots.first().cloned().unwrap_or_default(),
        editable: dist.is_editable(),
        seen: HashSet::new(),
    };

    let mut trees = Vec::new();
    for name in dist.import_names() {
        let dirs: Vec<PathBuf> = roots
            .iter()
            .map(|root| root.join(&name))
            .filter(|dir| dir.is_dir())
            .collect();
        if !dirs.is_empty() {
            trees.push(builder.package(&name, name.clone(), dirs, 1)?);
            continue;
        }

        let modules: Vec<PathBuf> = roots
            .iter()
            .flat_map(|root| sorted_entries(root))
            .filter(|path| path.is_file() && module_name(path).as_deref() == Some(name.as_str()))
            .collect();
        if !modules.is_empty() {
            trees.push(builder.module(&name, name.clone(), modules, 1)?);
        }
    }
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DistributionBuilder;
    use crate::interrupt::Interrupt;
    use crate::size::SizeOptions;
    use tempfile::tempdir;

    fn write(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    fn distribution(site: &Path, top_level: &[&str]) -> Distribution {
        DistributionBuilder::new(
            "demo".to_string(),
            "1.0".to_string(),
            site.join("demo-1.0.dist-info"),
        )
        .top_level(top_level.iter().map(|s| s.to_string()).collect())
        .build()
    }

    fn build(dist: &Distribution, roots: &[PathBuf], depth: usize) -> Vec<SubpackageNode> {
        let options = SizeOptions::default();
        let interrupt = Interrupt::new();
        let sizer = Sizer::new(&options, &interrupt);
        enumerate_subpackages(dist, roots, depth, &sizer).unwrap()
    }

    fn fixture(site: &Path) {
        write(&site.join("demo/__init__.py"), 10);
        write(&site.join("demo/core.py"), 20);
        write(&site.join("demo/data/table.csv"), 5);
        write(&site.join("demo/sub/__init__.py"), 1);
        write(&site.join("demo/sub/deep/__init__.py"), 2);
        write(&site.join("demo/sub/deep/x.py"), 40);
        write(&site.join("demo/_ext.cpython-311-x86_64-linux-gnu.so"), 100);
    }

    #[test]
    fn test_tree_own_and_cumulative_sizes() {
        let site = tempdir().unwrap();
        fixture(site.path());
        let dist = distribution(site.path(), &["demo"]);

        let trees = build(&dist, &[site.path().to_path_buf()], 3);
        assert_eq!(trees.len(), 1);
        let demo = &trees[0];
        assert!(demo.is_package);
        assert_eq!(demo.depth, 1);
        // __init__.py and the data directory
        assert_eq!(demo.own, SizeTotals::new(15, 2));
        assert_eq!(demo.cumulative, SizeTotals::new(178, 7));

        let names: Vec<&str> = demo.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["_ext", "core", "sub"]);
        let sub = &demo.children[2];
        assert_eq!(sub.qualified_name, "demo.sub");
        assert_eq!(sub.own, SizeTotals::new(1, 1));
        let deep = &sub.children[0];
        assert_eq!(deep.depth, 3);
        assert!(deep.children.is_empty(), "nodes at the depth limit are leaves");
        assert_eq!(deep.own, SizeTotals::new(42, 2));
    }

    #[test]
    fn test_depth_one_gives_leaf_top_level_nodes() {
        let site = tempdir().unwrap();
        fixture(site.path());
        let dist = distribution(site.path(), &["demo"]);

        let trees = build(&dist, &[site.path().to_path_buf()], 1);
        assert!(trees[0].children.is_empty());
        assert_eq!(trees[0].own, SizeTotals::new(178, 7));
        assert!(build(&dist, &[site.path().to_path_buf()], 0).is_empty());
    }

    #[test]
    fn test_namespace_package_across_roots_is_one_node() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        write(&first.path().join("ns/alpha/__init__.py"), 10);
        write(&second.path().join("ns/beta/__init__.py"), 20);
        write(&second.path().join("ns/beta/impl.py"), 30);
        let dist = distribution(first.path(), &["ns"]);

        let trees = build(
            &dist,
            &[first.path().to_path_buf(), second.path().to_path_buf()],
            2,
        );
        assert_eq!(trees.len(), 1);
        let ns = &trees[0];
        assert!(!ns.is_package);
        assert_eq!(ns.paths.len(), 2);
        assert_eq!(ns.cumulative, SizeTotals::new(60, 3));
        let names: Vec<&str> = ns.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[test]
    fn test_single_module_distribution() {
        let site = tempdir().unwrap();
        write(&site.path().join("six.py"), 33);
        write(&site.path().join("sixteen.py"), 1);
        let dist = distribution(site.path(), &["six"]);

        let trees = build(&dist, &[site.path().to_path_buf()], 2);
        assert_eq!(trees.len(), 1);
        assert!(!trees[0].is_package);
        assert_eq!(trees[0].cumulative, SizeTotals::new(33, 1));
        assert_eq!(trees[0].count(), 1);
    }
}
