//! Dependency graph and topological scheduler (spec §4.C): a plain
//! `code -> dependencies` map rather than anything cell-addressed —
//! a template has tens to low hundreds of line items, so a
//! `HashMap<String, _>` is the right data structure (spec §9 design
//! note). The scheduler reports both a valid order and, on failure,
//! the full offending cycle rather than a bare yes/no.

use fiscaldag_common::{EngineError, EngineErrorKind};
use rustc_hash::{FxHashMap, FxHashSet};

/// Nodes are line-item codes of a single template; an edge `from -> to`
/// means "computing `from` requires the current-period value of `to`".
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// All node codes, including ones with no dependencies.
    nodes: Vec<String>,
    /// `from -> {to, ...}`.
    edges: FxHashMap<String, FxHashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node (a line item) even if it has no dependencies,
    /// so it is still covered by the topological order.
    pub fn add_node(&mut self, code: &str) {
        if !self.edges.contains_key(code) {
            self.nodes.push(code.to_string());
            self.edges.insert(code.to_string(), FxHashSet::default());
        }
    }

    /// Records that `from` depends on `to`. The caller is responsible
    /// for only passing edges to in-template codes — cross-statement,
    /// driver, and FX identifiers never reach this graph, per spec
    /// §4.B: "the scheduler treats them as externally supplied".
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);
        self.edges.get_mut(from).unwrap().insert(to.to_string());
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Kahn's algorithm over a copy of the in-degree map, with a
    /// deterministic tie-break: among nodes currently at in-degree zero,
    /// pick ascending `display_order`, then ascending `code` (spec
    /// §4.C). `display_order` is supplied by the caller as
    /// `(code) -> i64`.
    pub fn topological_order(
        &self,
        display_order: impl Fn(&str) -> i64,
    ) -> Result<Vec<String>, EngineError> {
        let mut in_degree: FxHashMap<String, usize> = FxHashMap::default();
        let mut dependents: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for node in &self.nodes {
            in_degree.insert(node.clone(), self.edges[node].len());
            dependents.entry(node.clone()).or_default();
        }
        for (from, deps) in &self.edges {
            for to in deps {
                dependents.entry(to.clone()).or_default().push(from.clone());
            }
        }

        let mut ready: Vec<String> =
            in_degree.iter().filter(|&(_, &d)| d == 0).map(|(c, _)| c.clone()).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while !ready.is_empty() {
            ready.sort_by(|a, b| display_order(a).cmp(&display_order(b)).then_with(|| a.cmp(b)));
            let next = ready.remove(0);
            in_degree.remove(&next);
            if let Some(deps) = dependents.get(&next) {
                for dependent in deps {
                    if let Some(count) = in_degree.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(dependent.clone());
                        }
                    }
                }
            }
            order.push(next);
        }

        if in_degree.is_empty() {
            Ok(order)
        } else {
            Err(EngineError::new(EngineErrorKind::CycleDetected(self.diagnose_cycle(&in_degree))))
        }
    }

    /// Depth-first walk from any still-unresolved node, following
    /// unprocessed edges until a previously visited node is re-
    /// encountered, producing the offending cycle as an ordered path
    /// (spec §4.C, Scenario 5: `A -> B -> A`).
    fn diagnose_cycle(&self, stuck: &FxHashMap<String, usize>) -> Vec<String> {
        let Some(start) = stuck.keys().min() else {
            return Vec::new();
        };
        let mut path = vec![start.clone()];
        let mut visited = FxHashSet::default();
        visited.insert(start.clone());
        let mut current = start.clone();
        loop {
            let Some(next) = self.edges[&current].iter().find(|d| stuck.contains_key(d.as_str()))
            else {
                break;
            };
            let reentered = visited.contains(next);
            path.push(next.clone());
            if reentered {
                break;
            }
            visited.insert(next.clone());
            current = next.clone();
        }
        path
    }
}
