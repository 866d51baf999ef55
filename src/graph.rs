//! Import graph: construction, cycle detection, tier-ordering policy.
//!
//! The graph is an adjacency structure over module ids (`petgraph::DiGraph`
//! with `String` weights), never live references between modules. Imports of
//! unknown ids are left out; the schema validator reports those.
//!
//! Cycle detection is a depth-first traversal with an explicit recursion
//! stack: every back-edge closes a cycle, and the stack slice from the target
//! of the back-edge to the top is the cycle path. O(V + E).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::Violation;
use crate::model::{ModuleType, Registry};

/// Directed import graph: an edge `a -> b` means "a imports b".
#[derive(Debug, Clone, Default)]
pub struct ImportGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    tiers: HashMap<String, ModuleType>,
}

impl ImportGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn tier(&self, id: &str) -> Option<ModuleType> {
        self.tiers.get(id).copied()
    }

    /// Direct imports of `id`, sorted.
    pub fn imports_of(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Modules that directly import `id`, sorted.
    pub fn importers_of(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// All edges as `(importer, imported)`, sorted.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].as_str(), self.graph[b].as_str()))
            .collect();
        edges.sort_unstable();
        edges
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn sorted_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.index.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Sorted successors by node index; petgraph yields them newest-first.
    fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
        out.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        out.dedup();
        out
    }
}

/// Build the import graph from a registry.
pub fn build_graph(registry: &Registry) -> ImportGraph {
    let mut g = ImportGraph::default();
    for module in registry.modules() {
        let idx = g.graph.add_node(module.id.clone());
        g.index.insert(module.id.clone(), idx);
        g.tiers.insert(module.id.clone(), module.module_type());
    }
    for module in registry.modules() {
        let from = g.index[&module.id];
        for import in &module.imports {
            if let Some(&to) = g.index.get(import) {
                g.graph.add_edge(from, to, ());
            }
        }
    }
    g
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Every cycle closed by a back-edge, exploring roots in the order given and
/// then the remaining nodes in id order.
///
/// Each cycle path starts and ends at the same module, e.g. `[a, b, a]`.
pub fn find_cycles_from(g: &ImportGraph, roots: &[&str]) -> Vec<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; g.graph.node_count()];
    let mut cycles = Vec::new();

    let order = roots
        .iter()
        .copied()
        .chain(g.sorted_ids())
        .filter_map(|id| g.index.get(id).copied());

    for root in order {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        // Iterative DFS: each frame is a node plus its pending successors.
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
        marks[root.index()] = Mark::OnStack;
        let mut pending = g.successors(root);
        pending.reverse();
        stack.push((root, pending));

        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop() {
                Some(next) => match marks[next.index()] {
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::OnStack;
                        let mut succ = g.successors(next);
                        succ.reverse();
                        stack.push((next, succ));
                    }
                    Mark::OnStack => {
                        let start = stack
                            .iter()
                            .position(|(n, _)| *n == next)
                            .unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|(n, _)| g.graph[*n].clone())
                            .collect();
                        path.push(g.graph[next].clone());
                        cycles.push(path);
                    }
                    Mark::Done => {}
                },
                None => {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                }
            }
        }
    }
    cycles
}

/// Every cycle in the graph, exploring from ids in sorted order.
pub fn find_cycles(g: &ImportGraph) -> Vec<Vec<String>> {
    find_cycles_from(g, &[])
}

/// First cycle found, as a violation.
pub fn check_acyclic(g: &ImportGraph) -> Result<(), Violation> {
    match find_cycles(g).into_iter().next() {
        Some(path) => Err(Violation::Cycle { path }),
        None => Ok(()),
    }
}

/// Which tiers each tier may import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    allow: BTreeMap<ModuleType, BTreeSet<ModuleType>>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        use ModuleType::*;
        let table: [(ModuleType, &[ModuleType]); 8] = [
            (Project, &[Program, Domain, Core]),
            (Program, &[Domain, Core]),
            (Domain, &[Core]),
            (Core, &[Core]),
            (Industry, &[Project, Program, Domain, Core]),
            (Vocab, &[]),
            (Shapes, &ModuleType::ALL),
            (Align, &ModuleType::ALL),
        ];
        Self {
            allow: table
                .into_iter()
                .map(|(importer, allowed)| (importer, allowed.iter().copied().collect()))
                .collect(),
        }
    }
}

impl TierPolicy {
    /// Replace the allowed set of individual importer tiers.
    pub fn with_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (ModuleType, Vec<ModuleType>)>,
    ) -> Self {
        for (importer, allowed) in overrides {
            self.allow.insert(importer, allowed.into_iter().collect());
        }
        self
    }

    /// Whether `importer` may import `imported`.
    ///
    /// Shapes and align modules can never be imported, whatever the table says.
    pub fn allows(&self, importer: ModuleType, imported: ModuleType) -> bool {
        if imported.is_cross_tier() {
            return false;
        }
        self.allow
            .get(&importer)
            .is_some_and(|allowed| allowed.contains(&imported))
    }

    /// Allowed tiers for `importer`, in declaration order of [`ModuleType`].
    pub fn allowed_for(&self, importer: ModuleType) -> Vec<ModuleType> {
        self.allow
            .get(&importer)
            .map(|s| s.iter().copied().filter(|t| !t.is_cross_tier()).collect())
            .unwrap_or_default()
    }

    fn rule(&self, importer: ModuleType, imported: ModuleType) -> String {
        if imported.is_cross_tier() {
            return format!("{imported} modules cannot be imported by any module");
        }
        let allowed = self.allowed_for(importer);
        if allowed.is_empty() {
            format!("{importer} modules may not import other modules")
        } else {
            let names: Vec<&str> = allowed.iter().map(|t| t.as_str()).collect();
            format!("{importer} modules may only import {}", names.join(", "))
        }
    }
}

/// Every edge whose tier pair the policy forbids. Self-imports are skipped;
/// they are cycles and reported as such.
pub fn hierarchy_violations(g: &ImportGraph, policy: &TierPolicy) -> Vec<Violation> {
    let mut found = Vec::new();
    for (importer, imported) in g.edges() {
        if importer == imported {
            continue;
        }
        let (Some(from), Some(to)) = (g.tier(importer), g.tier(imported)) else {
            continue;
        };
        if !policy.allows(from, to) {
            found.push(Violation::HierarchyViolation {
                importer: importer.to_string(),
                importer_type: from,
                imported: imported.to_string(),
                imported_type: to,
                rule: policy.rule(from, to),
            });
        }
    }
    found
}

/// First forbidden edge, as a violation.
pub fn check_hierarchy(g: &ImportGraph, policy: &TierPolicy) -> Result<(), Violation> {
    match hierarchy_violations(g, policy).into_iter().next() {
        Some(v) => Err(v),
        None => Ok(()),
    }
}

/// Cycles first, then hierarchy violations.
pub fn graph_violations(g: &ImportGraph, policy: &TierPolicy) -> Vec<Violation> {
    let mut found: Vec<Violation> = find_cycles(g)
        .into_iter()
        .map(|path| Violation::Cycle { path })
        .collect();
    found.extend(hierarchy_violations(g, policy));
    found
}

/// Graph violations involving `id`, with cycles explored from `id` first so
/// their paths start at it.
pub fn graph_violations_for(g: &ImportGraph, policy: &TierPolicy, id: &str) -> Vec<Violation> {
    let mut found: Vec<Violation> = find_cycles_from(g, &[id])
        .into_iter()
        .map(|path| Violation::Cycle { path })
        .filter(|v| v.involves(id))
        .collect();
    found.extend(
        hierarchy_violations(g, policy)
            .into_iter()
            .filter(|v| v.involves(id)),
    );
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Module, ModuleSpec, Status};

    fn module(id: &str, spec: ModuleSpec, imports: &[&str]) -> Module {
        Module {
            id: id.into(),
            spec,
            path: id.replace('-', "/"),
            prefix: id.replace('-', ""),
            owners: vec!["team@example.gov".into()],
            imports: imports.iter().map(|s| s.to_string()).collect(),
            status: Status::Draft,
            versions: vec![],
        }
    }

    fn registry(modules: Vec<Module>) -> Registry {
        Registry::from_modules_unchecked(modules)
    }

    #[test]
    fn single_edge_no_cycle() {
        let g = build_graph(&registry(vec![
            module("gov-core", ModuleSpec::Core, &[]),
            module("dod-core", ModuleSpec::Core, &["gov-core"]),
        ]));
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert!(check_acyclic(&g).is_ok());
        assert!(check_hierarchy(&g, &TierPolicy::default()).is_ok());
        assert_eq!(g.imports_of("dod-core"), vec!["gov-core"]);
        assert_eq!(g.importers_of("gov-core"), vec!["dod-core"]);
    }

    #[test]
    fn two_node_cycle_path() {
        let g = build_graph(&registry(vec![
            module("gov-core", ModuleSpec::Core, &["dod-core"]),
            module("dod-core", ModuleSpec::Core, &["gov-core"]),
        ]));
        let cycles = find_cycles_from(&g, &["gov-core"]);
        assert_eq!(cycles, vec![vec!["gov-core", "dod-core", "gov-core"]]);
        assert!(matches!(check_acyclic(&g), Err(Violation::Cycle { .. })));
    }

    #[test]
    fn self_import_is_a_cycle_not_a_hierarchy_violation() {
        let g = build_graph(&registry(vec![module("a", ModuleSpec::Core, &["a"])]));
        assert_eq!(find_cycles(&g), vec![vec!["a", "a"]]);
        assert!(hierarchy_violations(&g, &TierPolicy::default()).is_empty());
    }

    #[test]
    fn longer_cycle_through_diamond() {
        // a -> b -> d, a -> c -> d, d -> a
        let g = build_graph(&registry(vec![
            module("a", ModuleSpec::Core, &["b", "c"]),
            module("b", ModuleSpec::Core, &["d"]),
            module("c", ModuleSpec::Core, &["d"]),
            module("d", ModuleSpec::Core, &["a"]),
        ]));
        let cycles = find_cycles(&g);
        assert_eq!(cycles, vec![vec!["a", "b", "d", "a"]]);
        for cycle in &cycles {
            assert_eq!(cycle.first(), cycle.last());
        }
    }

    #[test]
    fn acyclic_diamond_has_no_cycles() {
        let g = build_graph(&registry(vec![
            module("a", ModuleSpec::Core, &["b", "c"]),
            module("b", ModuleSpec::Core, &["d"]),
            module("c", ModuleSpec::Core, &["d"]),
            module("d", ModuleSpec::Core, &[]),
        ]));
        assert!(find_cycles(&g).is_empty());
    }

    #[test]
    fn tier_table() {
        use ModuleType::*;
        let p = TierPolicy::default();
        assert!(p.allows(Project, Program));
        assert!(p.allows(Project, Domain));
        assert!(p.allows(Project, Core));
        assert!(!p.allows(Project, Project));
        assert!(p.allows(Program, Domain));
        assert!(!p.allows(Program, Project));
        assert!(p.allows(Domain, Core));
        assert!(!p.allows(Domain, Program));
        assert!(p.allows(Core, Core));
        assert!(!p.allows(Core, Program));
        assert!(!p.allows(Vocab, Core));
        assert!(p.allows(Shapes, Project));
        assert!(p.allows(Align, Vocab));
        for importer in ModuleType::ALL {
            assert!(!p.allows(importer, Shapes));
            assert!(!p.allows(importer, Align));
        }
    }

    #[test]
    fn overrides_cannot_unlock_cross_tier_imports() {
        use ModuleType::*;
        let p = TierPolicy::default().with_overrides([(Core, vec![Core, Vocab, Shapes])]);
        assert!(p.allows(Core, Vocab));
        assert!(!p.allows(Core, Shapes));
    }

    #[test]
    fn program_importing_core_and_domain_is_allowed() {
        let g = build_graph(&registry(vec![
            module("usn-core", ModuleSpec::Core, &[]),
            module("domain-mission", ModuleSpec::Domain, &["usn-core"]),
            module("pg-avp", ModuleSpec::Program, &["usn-core", "domain-mission"]),
        ]));
        assert!(graph_violations(&g, &TierPolicy::default()).is_empty());
    }

    #[test]
    fn core_importing_program_is_a_hierarchy_violation() {
        let g = build_graph(&registry(vec![
            module("nav-core", ModuleSpec::Core, &["pg-avp"]),
            module("pg-avp", ModuleSpec::Program, &[]),
        ]));
        let err = check_hierarchy(&g, &TierPolicy::default()).unwrap_err();
        match err {
            Violation::HierarchyViolation {
                importer,
                importer_type,
                imported,
                imported_type,
                ..
            } => {
                assert_eq!(importer, "nav-core");
                assert_eq!(importer_type, ModuleType::Core);
                assert_eq!(imported, "pg-avp");
                assert_eq!(imported_type, ModuleType::Program);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn importing_shapes_is_forbidden() {
        let g = build_graph(&registry(vec![
            module("a-core", ModuleSpec::Core, &["a-shapes"]),
            module(
                "a-shapes",
                ModuleSpec::Shapes {
                    targets: vec!["a-core".into()],
                },
                &[],
            ),
        ]));
        let violations = hierarchy_violations(&g, &TierPolicy::default());
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn cycle_reported_before_hierarchy_on_same_edge() {
        let g = build_graph(&registry(vec![
            module("usn-core", ModuleSpec::Core, &["pg-avp"]),
            module("pg-avp", ModuleSpec::Program, &["usn-core"]),
        ]));
        let found = graph_violations_for(&g, &TierPolicy::default(), "usn-core");
        let codes: Vec<&str> = found.iter().map(Violation::code).collect();
        assert_eq!(codes, vec!["cycle", "hierarchy_violation"]);
        assert_eq!(
            found[0],
            Violation::Cycle {
                path: vec!["usn-core".into(), "pg-avp".into(), "usn-core".into()]
            }
        );
    }

    #[test]
    fn unknown_imports_are_not_edges() {
        let g = build_graph(&registry(vec![module("a", ModuleSpec::Core, &["ghost"])]));
        assert_eq!(g.edge_count(), 0);
    }
}
