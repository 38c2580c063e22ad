//! Built-in methodology texts used when no override file exists

pub const EXTRACTION: &str = "\
You extract requirements from a specification document.
Return a JSON object {\"requirements\": [...]} where each entry has
\"id\", \"text\", \"type\" (functional, performance, interface, constraint,
safety, security, environmental or other), \"rationale\" and
\"acceptance_criteria\" (list of strings).
Keep every \"shall\" statement, keep the document's own identifiers when it
has them, and never invent requirements. Return an empty list when the
document states none.";

pub const ANALYSIS: &str = "\
You analyse extracted system requirements for one target subsystem.
Return a JSON object with \"system_context\" (a short summary of the system
and the subsystem's role) and \"strategy\" containing:
- \"rules\": ordered allocation rules, each with \"id\", \"description\",
  \"matcher\" ({\"keywords\": [], \"types\": [], \"id_prefixes\": []}) and
  \"decision\" (allocate or exclude). The first matching rule wins; a parent
  no rule matches is excluded.
- \"naming_pattern\": the child id template, using {n}, {nn}, {nnn} for digits
  and {parent} for the parent id, e.g. \"NAV-{nnn}\".
- \"max_depth\": maximum decomposition depth (at least 1).
- \"acceptance_criteria_required\": whether every child needs criteria.";

pub const DECOMPOSITION: &str = "\
You decompose one allocated parent requirement into subsystem requirements.
Pick one pattern per parent: direct 1:1 restatement, numeric budget split,
functional breakdown into several children, or interface-aspect split.
Return a JSON object {\"items\": [...]} where each child has \"id\" (following
the naming pattern exactly), \"text\", \"type\", \"parent_id\" (the parent's
id), \"rationale\", \"acceptance_criteria\" and \"subsystem\" (the target
subsystem name). The strategy given to you is binding.";

pub const VALIDATION: &str = "\
You score decomposed requirements. Return a JSON object with \"scores\"
({\"completeness\", \"clarity\", \"testability\", \"traceability\" and, when asked,
\"domain_compliance\"}, each between 0 and 1) and \"issues\": a list of
{\"severity\" (critical, major or minor), \"dimension\", \"item_id\",
\"description\", \"suggestion\"}. Use critical only for defects that make an
item unusable.";

/// Built-in text for a skill name
pub fn lookup(name: &str) -> Option<&'static str> {
    match name {
        super::EXTRACTION => Some(EXTRACTION),
        super::ANALYSIS => Some(ANALYSIS),
        super::DECOMPOSITION => Some(DECOMPOSITION),
        super::VALIDATION => Some(VALIDATION),
        _ => None,
    }
}
