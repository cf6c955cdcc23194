//! Dependency graph over installed distributions.
//!
//! The structure (nodes and requirement edges) lives in an arena indexed by distribution id;
//! traversal state is kept in separate vectors so cycles need no special ownership handling.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, warn};
use serde::Serialize;

use crate::environment::{canonicalize_name, Distribution, MarkerEnvironment};

/// Index of a distribution in the graph arena.
pub type NodeId = usize;

/// Traversal-derived attributes of one reachable distribution.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    /// Shortest hop count from any root; roots have depth 0.
    pub depth: usize,
    pub is_direct: bool,
    /// Distributions whose requirement reaches this node at its recorded depth, in discovery order.
    pub parents: Vec<String>,
    /// Installed distributions this one requires through an active edge.
    pub requires: Vec<String>,
}

impl DependencyNode {
    /// `← first-parent (+N more)`, or an empty string for roots.
    pub fn chain(&self) -> String {
        match self.parents.split_first() {
            None => String::new(),
            Some((first, [])) => format!("← {}", first),
            Some((first, rest)) => format!("← {} (+{} more)", first, rest.len()),
        }
    }
}

/// Which distributions the traversal starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Roots {
    /// Every distribution nothing else requires.
    TopLevel,
    /// Explicitly requested names.
    Named(Vec<String>),
}

/// Result of a traversal, keyed by canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub nodes: BTreeMap<String, DependencyNode>,
    /// Roots in traversal order.
    pub roots: Vec<String>,
    /// A depth cutoff left requirement edges unexplored.
    pub truncated: bool,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, NodeId>,
    edges: Vec<Vec<NodeId>>,
    reverse: Vec<Vec<NodeId>>,
}

impl DependencyGraph {
    /// Build the edge set: A -> B when A declares an active requirement on installed B.
    ///
    /// Requirements naming nothing installed are dropped with a debug message; markers are
    /// evaluated against `markers`.
    pub fn build(distributions: &[Distribution], markers: &MarkerEnvironment) -> Self {
        let names: Vec<String> = distributions
            .iter()
            .map(|dist| dist.canonical_name().to_string())
            .collect();
        let index: HashMap<String, NodeId> = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();

        let mut edges = vec![Vec::new(); names.len()];
        let mut reverse = vec![Vec::new(); names.len()];

        for (id, dist) in distributions.iter().enumerate() {
            for requirement in dist.requirements() {
                if !requirement.is_active(markers) {
                    continue;
                }
                let target_name = requirement.canonical_name();
                let Some(&target) = index.get(&target_name) else {
                    debug!(
                        "{}: requirement `{}` is not installed",
                        dist.canonical_name(),
                        requirement
                    );
                    continue;
                };
                if target == id || edges[id].contains(&target) {
                    continue;
                }
                edges[id].push(target);
                reverse[target].push(id);
            }
        }

        DependencyGraph {
            names,
            index,
            edges,
            reverse,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.index.get(&canonicalize_name(name)).copied()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.names[id]
    }

    pub fn requires(&self, id: NodeId) -> &[NodeId] {
        &self.edges[id]
    }

    /// Distributions declaring an active requirement on `id`.
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.reverse[id]
    }

    /// Ids reachable from `starts` (including them), ignoring any depth limit.
    fn reachable(&self, starts: &[NodeId]) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        let mut stack: Vec<NodeId> = starts.to_vec();
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            stack.extend(self.edges[id].iter().copied().filter(|next| !seen[*next]));
        }
        seen
    }

    /// Every distribution no other distribution requires, plus one representative for each
    /// group only reachable through a cycle, so that every distribution is covered.
    pub fn top_level_roots(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = (0..self.len())
            .filter(|id| self.reverse[*id].is_empty())
            .collect();

        let mut covered = self.reachable(&roots);
        // ids are in name order, so the smallest unreached name is picked first
        while let Some(next) = covered.iter().position(|seen| !seen) {
            debug!("{} is only reachable through a cycle, using it as a root", self.names[next]);
            roots.push(next);
            covered = self.reachable(&roots);
        }
        roots
    }

    fn resolve_roots(&self, roots: &Roots) -> Vec<NodeId> {
        match roots {
            Roots::TopLevel => self.top_level_roots(),
            Roots::Named(names) => {
                let mut ids = Vec::new();
                for name in names {
                    match self.id(name) {
                        Some(id) if !ids.contains(&id) => ids.push(id),
                        Some(_) => {}
                        None => warn!("Package `{}` is not installed, skipping it", name),
                    }
                }
                ids
            }
        }
    }

    /// Multi-source breadth-first traversal from `roots`, optionally stopping at `max_depth`.
    pub fn resolve(&self, roots: &Roots, max_depth: Option<usize>) -> Resolution {
        let root_ids = self.resolve_roots(roots);

        let mut depth: Vec<Option<usize>> = vec![None; self.len()];
        let mut parents: Vec<Vec<NodeId>> = vec![Vec::new(); self.len()];
        let mut queue = VecDeque::new();

        for &root in &root_ids {
            depth[root] = Some(0);
            queue.push_back(root);
        }

        while let Some(current) = queue.pop_front() {
            let Some(current_depth) = depth[current] else {
                continue;
            };
            if max_depth.map_or(false, |max| current_depth >= max) {
                continue;
            }

            let next_depth = current_depth + 1;
            for &next in &self.edges[current] {
                match depth[next] {
                    None => {
                        depth[next] = Some(next_depth);
                        parents[next] = vec![current];
                        queue.push_back(next);
                    }
                    Some(known) if known == next_depth => {
                        if !parents[next].contains(&current) {
                            parents[next].push(current);
                        }
                    }
                    Some(known) if known > next_depth => {
                        depth[next] = Some(next_depth);
                        parents[next] = vec![current];
                        queue.push_back(next);
                    }
                    Some(_) => {}
                }
            }
        }

        // only edges to nodes that never made it into the result count as truncation
        let truncated = max_depth.is_some()
            && (0..self.len()).any(|id| {
                depth[id] == max_depth && self.edges[id].iter().any(|next| depth[*next].is_none())
            });

        let mut nodes = BTreeMap::new();
        for id in 0..self.len() {
            let Some(node_depth) = depth[id] else {
                continue;
            };
            let requires = self.edges[id]
                .iter()
                .filter(|next| depth[**next].is_some())
                .map(|next| self.names[*next].clone())
                .collect();
            nodes.insert(
                self.names[id].clone(),
                DependencyNode {
                    name: self.names[id].clone(),
                    depth: node_depth,
                    is_direct: node_depth == 0,
                    parents: parents[id].iter().map(|p| self.names[*p].clone()).collect(),
                    requires,
                },
            );
        }

        Resolution {
            nodes,
            roots: root_ids.iter().map(|id| self.names[*id].clone()).collect(),
            truncated,
        }
    }

    /// Every name reachable from `start` through `requires` edges within `resolution`,
    /// including `start` itself. Each name appears once, so diamonds and cycles are safe.
    pub fn closure<'a>(resolution: &'a Resolution, start: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(node) = resolution.get(name) {
                stack.extend(node.requires.iter().map(String::as_str));
            }
        }
        seen
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::environment::{DistributionBuilder, Requirement};
    use std::path::PathBuf;

    /// Helper function to create a Distribution with the given requirement lines.
    pub(crate) fn create_distribution(name: &str, requires: &[&str]) -> Distribution {
        let requirements: Vec<Requirement> = requires.iter().map(|r| r.parse().unwrap()).collect();
        DistributionBuilder::new(
            name.to_string(),
            "1.0".to_string(),
            PathBuf::from(format!("/site/{}-1.0.dist-info", name)),
        )
        .requirements(requirements)
        .build()
    }

    fn graph(dists: &[Distribution]) -> DependencyGraph {
        DependencyGraph::build(dists, &MarkerEnvironment::host().with_python_version("3.11"))
    }

    fn chain() -> Vec<Distribution> {
        vec![
            create_distribution("a", &["b"]),
            create_distribution("b", &["c"]),
            create_distribution("c", &[]),
        ]
    }

    #[test]
    fn test_chain_depths_and_parents() {
        let resolution = graph(&chain()).resolve(&Roots::TopLevel, Some(2));

        assert_eq!(resolution.roots, ["a"]);
        let a = resolution.get("a").unwrap();
        assert_eq!((a.depth, a.is_direct), (0, true));
        assert!(a.parents.is_empty());
        let b = resolution.get("b").unwrap();
        assert_eq!((b.depth, b.is_direct), (1, false));
        assert_eq!(b.parents, ["a"]);
        let c = resolution.get("c").unwrap();
        assert_eq!((c.depth, c.is_direct), (2, false));
        assert_eq!(c.parents, ["b"]);
        assert!(!resolution.truncated);
    }

    #[test]
    fn test_depth_limit_excludes_deeper_nodes() {
        let resolution = graph(&chain()).resolve(&Roots::TopLevel, Some(1));

        assert!(resolution.contains("a"));
        assert!(resolution.contains("b"));
        assert!(!resolution.contains("c"));
        assert!(resolution.truncated);
        assert!(resolution.get("b").unwrap().requires.is_empty());
    }

    #[test]
    fn test_depth_zero_keeps_only_roots() {
        let resolution = graph(&chain()).resolve(&Roots::Named(vec!["B".to_string()]), Some(0));
        assert_eq!(resolution.nodes.len(), 1);
        assert!(resolution.get("b").unwrap().is_direct);
    }

    #[test]
    fn test_unreachable_packages_are_excluded() {
        let mut dists = chain();
        dists.push(create_distribution("lonely", &[]));
        let resolution = graph(&dists).resolve(&Roots::Named(vec!["b".to_string()]), None);

        let names: Vec<&String> = resolution.nodes.keys().collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn test_shortest_depth_and_all_minimal_parents() {
        // a -> b -> d, a -> c -> d, a -> e -> f -> d
        let dists = vec![
            create_distribution("a", &["b", "c", "e"]),
            create_distribution("b", &["d"]),
            create_distribution("c", &["d"]),
            create_distribution("d", &[]),
            create_distribution("e", &["f"]),
            create_distribution("f", &["d"]),
        ];
        let resolution = graph(&dists).resolve(&Roots::TopLevel, None);

        let d = resolution.get("d").unwrap();
        assert_eq!(d.depth, 2);
        assert_eq!(d.parents, ["b", "c"]);
        assert_eq!(d.chain(), "← b (+1 more)");
    }

    #[test]
    fn test_multiple_roots_keep_smallest_depth() {
        let resolution =
            graph(&chain()).resolve(&Roots::Named(vec!["a".to_string(), "c".to_string()]), None);
        let c = resolution.get("c").unwrap();
        assert_eq!(c.depth, 0);
        assert!(c.is_direct);
        assert!(c.parents.is_empty());
    }

    #[test]
    fn test_cycle_terminates_and_gets_a_root() {
        let dists = vec![create_distribution("a", &["b"]), create_distribution("b", &["a"])];
        let g = graph(&dists);
        assert_eq!(g.top_level_roots(), [0]);

        let resolution = g.resolve(&Roots::TopLevel, None);
        assert_eq!(resolution.get("a").unwrap().depth, 0);
        assert_eq!(resolution.get("b").unwrap().depth, 1);
        assert_eq!(resolution.get("b").unwrap().parents, ["a"]);
    }

    #[test]
    fn test_inactive_and_missing_requirements_are_not_edges() {
        let dists = vec![
            create_distribution(
                "a",
                &[
                    "b ; python_version < \"3.0\"",
                    "c ; extra == \"speedups\"",
                    "not-installed>=1",
                    "a",
                ],
            ),
            create_distribution("b", &[]),
            create_distribution("c", &[]),
        ];
        let g = graph(&dists);
        assert!(g.requires(0).is_empty());
        assert_eq!(g.top_level_roots(), [0, 1, 2]);
    }

    #[test]
    fn test_unknown_named_roots_are_skipped() {
        let resolution =
            graph(&chain()).resolve(&Roots::Named(vec!["missing".to_string()]), None);
        assert!(resolution.nodes.is_empty());
    }

    #[test]
    fn test_closure_counts_each_node_once() {
        let dists = vec![
            create_distribution("a", &["b", "c"]),
            create_distribution("b", &["d"]),
            create_distribution("c", &["d"]),
            create_distribution("d", &["a"]),
        ];
        let resolution = graph(&dists).resolve(&Roots::Named(vec!["a".to_string()]), None);
        let closure = DependencyGraph::closure(&resolution, "b");
        let mut names: Vec<&str> = closure.into_iter().collect();
        names.sort();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }
}
