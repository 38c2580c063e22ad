//! Allocation strategy
//!
//! Produced once by the Analyze stage and binding for every later stage.
//! The strategy carries ordered allocation rules (first match wins), a
//! naming-pattern template for child ids, a maximum decomposition depth and
//! whether acceptance criteria are mandatory.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::requirement::{RequirementItem, RequirementType};

/// Content hash identifying one exact strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyVersion(String);

impl StrategyVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StrategyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a matching rule keeps or drops a parent item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationDecision {
    Allocate,
    Exclude,
}

/// Conditions a parent item must satisfy for a rule to match
///
/// Every non-empty condition must hold. An empty matcher matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMatcher {
    /// At least one keyword must appear in the item text (case-insensitive)
    #[serde(default)]
    pub keywords: Vec<String>,
    /// The item type must be one of these
    #[serde(default)]
    pub types: Vec<RequirementType>,
    /// The item id must start with one of these prefixes
    #[serde(default)]
    pub id_prefixes: Vec<String>,
}

impl RuleMatcher {
    pub fn matches(&self, item: &RequirementItem) -> bool {
        let keywords_ok = self.keywords.is_empty() || {
            let text = item.search_text();
            self.keywords
                .iter()
                .any(|k| !k.trim().is_empty() && text.contains(&k.trim().to_lowercase()))
        };
        let types_ok = self.types.is_empty() || self.types.contains(&item.requirement_type);
        let prefix_ok = self.id_prefixes.is_empty()
            || self.id_prefixes.iter().any(|p| item.id.starts_with(p.as_str()));

        keywords_ok && types_ok && prefix_ok
    }
}

/// One ordered allocation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub matcher: RuleMatcher,
    pub decision: AllocationDecision,
}

impl AllocationRule {
    pub fn allocate(id: impl Into<String>, matcher: RuleMatcher) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            matcher,
            decision: AllocationDecision::Allocate,
        }
    }

    pub fn exclude(id: impl Into<String>, matcher: RuleMatcher) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            matcher,
            decision: AllocationDecision::Exclude,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Result of running the rule list against one parent item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// Allocated to the target subsystem by the named rule
    Allocated { rule_id: String },
    /// Dropped, either by an exclude rule or because nothing matched
    Excluded { rule_id: Option<String> },
}

impl Allocation {
    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Allocated { .. })
    }
}

/// Errors in a naming-pattern template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("naming pattern is empty")]
    Empty,
    #[error("unbalanced brace in naming pattern '{0}'")]
    UnbalancedBrace(String),
    #[error("unknown placeholder '{{{0}}}' in naming pattern")]
    UnknownPlaceholder(String),
    #[error("naming pattern does not compile: {0}")]
    Regex(String),
}

enum Segment {
    Literal(String),
    Digits(usize),
    Parent,
}

/// Child-id template such as `NAV-{nnn}` or `{parent}.{nn}`
///
/// `{n}`, `{nn}`, `{nnn}`... stand for exactly that many digits and
/// `{parent}` stands for the parent item id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamingPattern(String);

impl NamingPattern {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn template(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Result<Vec<Segment>, PatternError> {
        let template = self.0.trim();
        if template.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut token = String::new();
                    let mut closed = false;
                    for t in chars.by_ref() {
                        if t == '}' {
                            closed = true;
                            break;
                        }
                        token.push(t);
                    }
                    if !closed {
                        return Err(PatternError::UnbalancedBrace(self.0.clone()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if token == "parent" {
                        segments.push(Segment::Parent);
                    } else if !token.is_empty() && token.chars().all(|t| t == 'n') {
                        segments.push(Segment::Digits(token.len()));
                    } else {
                        return Err(PatternError::UnknownPlaceholder(token));
                    }
                }
                '}' => return Err(PatternError::UnbalancedBrace(self.0.clone())),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(segments)
    }

    fn to_regex(&self, parent_id: &str) -> Result<Regex, PatternError> {
        let mut pattern = String::from("^");
        for segment in self.segments()? {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(&text)),
                Segment::Digits(count) => pattern.push_str(&format!("[0-9]{{{}}}", count)),
                Segment::Parent => pattern.push_str(&regex::escape(parent_id)),
            }
        }
        pattern.push('$');
        Regex::new(&pattern).map_err(|e| PatternError::Regex(e.to_string()))
    }

    /// Check the template is well formed
    pub fn validate(&self) -> Result<(), PatternError> {
        self.to_regex("PARENT").map(|_| ())
    }

    /// Whether `id` conforms to the template for the given parent
    pub fn matches(&self, id: &str, parent_id: Option<&str>) -> bool {
        let uses_parent = self.0.contains("{parent}");
        let parent = match (uses_parent, parent_id) {
            (true, None) => return false,
            (_, p) => p.unwrap_or_default(),
        };
        self.to_regex(parent)
            .map(|re| re.is_match(id))
            .unwrap_or(false)
    }
}

impl std::fmt::Display for NamingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural defects that make a strategy unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyDefect {
    #[error("strategy has no allocation rules")]
    NoRules,
    #[error("allocation rule #{0} has an empty id")]
    UnnamedRule(usize),
    #[error("invalid naming pattern: {0}")]
    NamingPattern(#[from] PatternError),
    #[error("maximum decomposition depth must be at least 1")]
    ZeroDepth,
}

/// Binding allocation contract produced by Analyze
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Ordered allocation rules, first match wins
    pub rules: Vec<AllocationRule>,
    /// Template every child id must follow
    pub naming_pattern: NamingPattern,
    /// Maximum decomposition depth
    pub max_depth: u8,
    /// Whether every child must carry acceptance criteria
    pub acceptance_criteria_required: bool,
}

impl Strategy {
    pub fn new(rules: Vec<AllocationRule>, naming_pattern: NamingPattern) -> Self {
        Self {
            rules,
            naming_pattern,
            max_depth: 1,
            acceptance_criteria_required: false,
        }
    }

    pub fn with_max_depth(mut self, depth: u8) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_acceptance_criteria_required(mut self, required: bool) -> Self {
        self.acceptance_criteria_required = required;
        self
    }

    /// Check the structural preconditions for using this strategy
    pub fn validate(&self) -> Result<(), StrategyDefect> {
        if self.rules.is_empty() {
            return Err(StrategyDefect::NoRules);
        }
        if let Some(index) = self.rules.iter().position(|r| r.id.trim().is_empty()) {
            return Err(StrategyDefect::UnnamedRule(index));
        }
        self.naming_pattern.validate()?;
        if self.max_depth == 0 {
            return Err(StrategyDefect::ZeroDepth);
        }
        Ok(())
    }

    /// Content hash of this exact strategy
    pub fn version(&self) -> StrategyVersion {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        StrategyVersion(hex::encode(&digest[..8]))
    }

    /// Run the ordered rules against one parent item
    pub fn allocate(&self, item: &RequirementItem) -> Allocation {
        match self.rules.iter().find(|rule| rule.matcher.matches(item)) {
            Some(rule) if rule.decision == AllocationDecision::Allocate => Allocation::Allocated {
                rule_id: rule.id.clone(),
            },
            Some(rule) => Allocation::Excluded {
                rule_id: Some(rule.id.clone()),
            },
            None => Allocation::Excluded { rule_id: None },
        }
    }

    /// Check a generated child item against the binding contract
    ///
    /// `parent_ids` holds the ids of the parents allocated in this run.
    pub fn check_adherence(
        &self,
        child: &RequirementItem,
        parent_ids: &HashSet<&str>,
        subsystem: &str,
    ) -> Vec<ContractViolation> {
        let mut violations = Vec::new();

        match child.parent_id.as_deref() {
            None | Some("") => violations.push(ContractViolation::new(
                child,
                ViolationKind::MissingParent,
                "child item has no parent reference",
            )),
            Some(parent) if !parent_ids.contains(parent) => violations.push(
                ContractViolation::new(
                    child,
                    ViolationKind::UnknownParent,
                    format!("parent '{}' is not an allocated item", parent),
                ),
            ),
            Some(_) => {}
        }

        if !self
            .naming_pattern
            .matches(&child.id, child.parent_id.as_deref())
        {
            violations.push(ContractViolation::new(
                child,
                ViolationKind::NamingPattern,
                format!("id does not follow pattern '{}'", self.naming_pattern),
            ));
        }

        let label_ok = child
            .subsystem
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case(subsystem.trim()));
        if !label_ok {
            violations.push(ContractViolation::new(
                child,
                ViolationKind::SubsystemLabel,
                format!(
                    "subsystem label {:?} does not match '{}'",
                    child.subsystem, subsystem
                ),
            ));
        }

        if self.acceptance_criteria_required && !child.has_acceptance_criteria() {
            violations.push(ContractViolation::new(
                child,
                ViolationKind::MissingAcceptanceCriteria,
                "acceptance criteria are mandatory under this strategy",
            ));
        }

        violations
    }
}

/// Category of a binding-contract violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NamingPattern,
    SubsystemLabel,
    MissingAcceptanceCriteria,
    MissingParent,
    UnknownParent,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NamingPattern => write!(f, "naming_pattern"),
            Self::SubsystemLabel => write!(f, "subsystem_label"),
            Self::MissingAcceptanceCriteria => write!(f, "missing_acceptance_criteria"),
            Self::MissingParent => write!(f, "missing_parent"),
            Self::UnknownParent => write!(f, "unknown_parent"),
        }
    }
}

/// A single strategy-adherence failure on one child item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractViolation {
    pub item_id: String,
    pub kind: ViolationKind,
    pub detail: String,
}

impl ContractViolation {
    fn new(item: &RequirementItem, kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            item_id: item.id.clone(),
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.item_id, self.kind, self.detail)
    }
}
