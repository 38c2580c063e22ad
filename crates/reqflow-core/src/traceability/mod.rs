//! Traceability graph between parent and child requirements
//!
//! The graph is always derived from the item lists; it is never edited by hand.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::RequirementItem;

/// One parent → child link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLink {
    pub parent_id: String,
    pub child_id: String,
}

/// Links, orphans and coverage derived from parent and child items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceabilityGraph {
    /// Links whose parent resolves
    pub links: Vec<TraceLink>,
    /// Children whose parent is missing or does not resolve
    pub orphans: Vec<String>,
    /// Child count for every parent, including parents with none
    pub child_counts: BTreeMap<String, usize>,
}

impl TraceabilityGraph {
    /// Build the graph for `children` against the `parents` they may reference
    pub fn build(parents: &[RequirementItem], children: &[RequirementItem]) -> Self {
        let parent_ids: HashSet<&str> = parents.iter().map(|p| p.id.as_str()).collect();
        let mut child_counts: BTreeMap<String, usize> =
            parents.iter().map(|p| (p.id.clone(), 0)).collect();
        let mut links = Vec::new();
        let mut orphans = Vec::new();

        for child in children {
            match child.parent_id.as_deref() {
                Some(parent) if parent_ids.contains(parent) => {
                    links.push(TraceLink {
                        parent_id: parent.to_string(),
                        child_id: child.id.clone(),
                    });
                    *child_counts.entry(parent.to_string()).or_insert(0) += 1;
                }
                _ => orphans.push(child.id.clone()),
            }
        }

        Self {
            links,
            orphans,
            child_counts,
        }
    }

    /// Parents with no children
    pub fn uncovered_parents(&self) -> Vec<&str> {
        self.child_counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Fraction of parents that have at least one child (1.0 when there are no parents)
    pub fn coverage(&self) -> f64 {
        if self.child_counts.is_empty() {
            return 1.0;
        }
        let covered = self.child_counts.values().filter(|c| **c > 0).count();
        covered as f64 / self.child_counts.len() as f64
    }

    /// Fraction of children whose parent resolves (1.0 when there are no children)
    pub fn resolution(&self) -> f64 {
        let total = self.links.len() + self.orphans.len();
        if total == 0 {
            return 1.0;
        }
        self.links.len() as f64 / total as f64
    }

    pub fn is_orphan(&self, child_id: &str) -> bool {
        self.orphans.iter().any(|o| o == child_id)
    }

    pub fn children_of(&self, parent_id: &str) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(move |l| l.parent_id == parent_id)
            .map(|l| l.child_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequirementType;

    fn parent(id: &str) -> RequirementItem {
        RequirementItem::new(id, "parent", RequirementType::Functional)
    }

    fn child(id: &str, parent: Option<&str>) -> RequirementItem {
        let item = RequirementItem::new(id, "child", RequirementType::Functional);
        match parent {
            Some(p) => item.with_parent(p),
            None => item,
        }
    }

    #[test]
    fn test_links_and_orphans() {
        let parents = vec![parent("P1"), parent("P2"), parent("P3")];
        let children = vec![
            child("C1", Some("P1")),
            child("C2", Some("P1")),
            child("C3", Some("P2")),
            child("C4", Some("P9")),
            child("C5", None),
        ];
        let graph = TraceabilityGraph::build(&parents, &children);

        assert_eq!(graph.links.len(), 3);
        assert_eq!(graph.orphans, vec!["C4".to_string(), "C5".to_string()]);
        assert_eq!(graph.child_counts["P1"], 2);
        assert_eq!(graph.child_counts["P3"], 0);
        assert_eq!(graph.uncovered_parents(), vec!["P3"]);
        assert!(graph.is_orphan("C5"));
        assert_eq!(graph.children_of("P1").collect::<Vec<_>>(), vec!["C1", "C2"]);
        assert!((graph.coverage() - 2.0 / 3.0).abs() < 1e-9);
        assert!((graph.resolution() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_empty_graph_is_complete() {
        let graph = TraceabilityGraph::build(&[], &[]);
        assert_eq!(graph.coverage(), 1.0);
        assert_eq!(graph.resolution(), 1.0);
        assert!(graph.orphans.is_empty());
    }

    #[test]
    fn test_resolvable_child_is_never_orphan() {
        let parents = vec![parent("P1")];
        let children = vec![child("C1", Some("P1"))];
        let graph = TraceabilityGraph::build(&parents, &children);
        assert!(!graph.is_orphan("C1"));
        assert!(graph.orphans.is_empty());
    }
}
