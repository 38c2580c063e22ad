//! Mechanical structural checks over decomposed items
//!
//! These run before semantic scoring and never call a model.

use std::collections::HashSet;

use super::{Dimension, Issue, Severity};
use crate::domain::{RequirementItem, Strategy, StrategyVersion};
use crate::traceability::TraceabilityGraph;

/// Run every structural check and return the issues found, in item order
///
/// Checks: duplicate ids, naming-pattern compliance, acceptance-criteria
/// presence when mandated, parent-reference resolvability, strategy version
/// tags, and allocated parents left without children.
pub fn structural_issues(
    children: &[RequirementItem],
    allocated_parents: &[RequirementItem],
    strategy: &Strategy,
    version: &StrategyVersion,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let graph = TraceabilityGraph::build(allocated_parents, children);

    for child in children {
        if !seen.insert(child.id.as_str()) {
            issues.push(
                Issue::critical(
                    Dimension::Traceability,
                    format!("duplicate item id '{}'", child.id),
                )
                .for_item(&child.id)
                .with_suggestion("give every decomposed item a unique id"),
            );
        }

        if !strategy
            .naming_pattern
            .matches(&child.id, child.parent_id.as_deref())
        {
            issues.push(
                Issue::critical(
                    Dimension::Traceability,
                    format!(
                        "id '{}' does not follow naming pattern '{}'",
                        child.id, strategy.naming_pattern
                    ),
                )
                .for_item(&child.id),
            );
        }

        if strategy.acceptance_criteria_required && !child.has_acceptance_criteria() {
            issues.push(
                Issue::critical(Dimension::Testability, "acceptance criteria missing")
                    .for_item(&child.id)
                    .with_suggestion("add at least one verifiable acceptance criterion"),
            );
        }

        if graph.is_orphan(&child.id) {
            let detail = match child.parent_id.as_deref() {
                Some(parent) => format!("parent '{}' does not resolve", parent),
                None => "no parent reference".to_string(),
            };
            issues.push(Issue::critical(Dimension::Traceability, detail).for_item(&child.id));
        }

        if child.strategy_version.as_ref() != Some(version) {
            issues.push(
                Issue::critical(
                    Dimension::Traceability,
                    format!("item was not generated under strategy {}", version),
                )
                .for_item(&child.id),
            );
        }
    }

    for parent in graph.uncovered_parents() {
        issues.push(
            Issue::new(
                Severity::Major,
                Dimension::Completeness,
                "allocated requirement has no decomposed children",
            )
            .for_item(parent),
        );
    }

    issues
}
