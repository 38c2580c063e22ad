//! Requirement items
//!
//! The same record plays two roles: parent items produced by Extract and
//! child items produced by Decompose. Child items must carry a parent
//! reference and the version of the strategy they were generated under.

use serde::{Deserialize, Serialize};

use super::strategy::StrategyVersion;

/// Closed set of requirement type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    Functional,
    Performance,
    Interface,
    Constraint,
    Safety,
    Security,
    Environmental,
    Other,
}

impl std::fmt::Display for RequirementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Functional => write!(f, "functional"),
            Self::Performance => write!(f, "performance"),
            Self::Interface => write!(f, "interface"),
            Self::Constraint => write!(f, "constraint"),
            Self::Safety => write!(f, "safety"),
            Self::Security => write!(f, "security"),
            Self::Environmental => write!(f, "environmental"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A single requirement, either extracted (parent) or decomposed (child)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementItem {
    /// Unique identifier
    pub id: String,
    /// Requirement statement
    pub text: String,
    /// Type tag
    #[serde(rename = "type")]
    pub requirement_type: RequirementType,
    /// Parent item id (required for child items)
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Why this requirement exists or was derived this way
    #[serde(default)]
    pub rationale: String,
    /// Acceptance criteria statements
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Owning subsystem label
    #[serde(default)]
    pub subsystem: Option<String>,
    /// Strategy version this item was generated under (child items only)
    #[serde(default)]
    pub strategy_version: Option<StrategyVersion>,
}

impl RequirementItem {
    /// Create a new item with no parent
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        requirement_type: RequirementType,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            requirement_type,
            parent_id: None,
            rationale: String::new(),
            acceptance_criteria: Vec::new(),
            subsystem: None,
            strategy_version: None,
        }
    }

    /// Create a child item referencing a parent
    pub fn child(
        id: impl Into<String>,
        text: impl Into<String>,
        requirement_type: RequirementType,
        parent_id: impl Into<String>,
    ) -> Self {
        Self::new(id, text, requirement_type).with_parent(parent_id)
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn with_strategy_version(mut self, version: StrategyVersion) -> Self {
        self.strategy_version = Some(version);
        self
    }

    /// Whether at least one non-blank acceptance criterion is present
    pub fn has_acceptance_criteria(&self) -> bool {
        self.acceptance_criteria.iter().any(|c| !c.trim().is_empty())
    }

    /// Lower-cased text used for keyword matching
    pub(crate) fn search_text(&self) -> String {
        format!("{} {}", self.text, self.rationale).to_lowercase()
    }
}
