//! SQL Validator: screens model-generated SQL before execution.
//!
//! The UNION projection check splits naively on commas between SELECT and FROM. It does not
//! understand nested parentheses or function calls, so `SELECT COALESCE(a, b) ...` counts as
//! two expressions. That is a known heuristic limitation and is kept deliberately.

use super::patterns::{PatternLibrary, RuleKind, RuleScope};
use super::verdict::{Severity, ValidationVerdict};
use regex::{Regex, RegexBuilder};
use std::sync::{Arc, LazyLock};

static UNION_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\bUNION(?:\s+ALL)?\s+")
        .case_insensitive(true)
        .build()
        .unwrap()
});

static SELECT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\bSELECT\b([\s\S]*?)(?:\bFROM\b|$)")
        .case_insensitive(true)
        .build()
        .unwrap()
});

#[derive(Debug, Clone)]
pub struct SqlValidator {
    patterns: Arc<PatternLibrary>,
}

impl SqlValidator {
    pub fn new(patterns: Arc<PatternLibrary>) -> Self {
        Self { patterns }
    }

    pub fn validate(&self, sql: &str) -> ValidationVerdict {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return ValidationVerdict::block("empty SQL", Severity::High);
        }
        let upper = trimmed.to_uppercase();

        let mut warning = None;
        let dangerous = self
            .patterns
            .all_matches(RuleScope::Sql, RuleKind::DangerousOperation, &upper);
        if !dangerous.is_empty() {
            // Catalog listings override an otherwise-blocking INFORMATION_SCHEMA match, and only that.
            let only_catalog = dangerous.iter().all(|r| r.id == "sql.information_schema");
            let listing = self
                .patterns
                .first_match(RuleScope::Sql, RuleKind::SchemaException, &upper)
                .is_some();
            if only_catalog && listing {
                warning = Some("schema metadata query allowed (information_schema listing)".to_string());
            } else {
                let ids: Vec<&str> = dangerous.iter().map(|r| r.id).collect();
                return ValidationVerdict::block(
                    format!("dangerous SQL operation ({})", ids.join(", ")),
                    Severity::High,
                );
            }
        }

        if let Some(rule) = self
            .patterns
            .first_match(RuleScope::Sql, RuleKind::DataModification, &upper)
        {
            return ValidationVerdict::block(
                format!("data modification is not allowed ({})", rule.id),
                Severity::Medium,
            )
            .data_modification();
        }

        if let Some(pos) = trimmed.find(';') {
            if pos != trimmed.len() - 1 {
                return ValidationVerdict::block("multiple SQL statements", Severity::High);
            }
        }

        if let Some((left, right)) = union_field_mismatch(trimmed) {
            return ValidationVerdict::block(
                format!("UNION column count mismatch ({} vs {})", left, right),
                Severity::High,
            );
        }

        match warning {
            Some(w) => ValidationVerdict::pass_with_warning(w),
            None => ValidationVerdict::pass(),
        }
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new(Arc::new(PatternLibrary::default()))
    }
}

/// Number of comma-separated expressions between the first SELECT and FROM of `part`.
fn projected_field_count(part: &str) -> Option<usize> {
    let caps = SELECT_LIST.captures(part)?;
    let list = caps.get(1)?.as_str();
    Some(list.split(',').count())
}

/// Returns `(first, offending)` field counts when any UNION branch projects a different count.
fn union_field_mismatch(sql: &str) -> Option<(usize, usize)> {
    let mut parts = UNION_SPLIT.split(sql);
    let first = projected_field_count(parts.next()?)?;
    for part in parts {
        // A branch without SELECT is a UNION of something else; nothing to compare.
        if let Some(count) = projected_field_count(part) {
            if count != first {
                return Some((first, count));
            }
        }
    }
    None
}
