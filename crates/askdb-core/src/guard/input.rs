//! Input Validator: screens raw natural-language text before it reaches the translator.

use super::patterns::{PatternLibrary, RuleKind, RuleScope};
use super::verdict::{Severity, ValidationVerdict};
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// A semicolon followed by more non-whitespace text.
static INNER_SEMICOLON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";\s*\S").unwrap());

/// Benign lead-in shape: one or two words and a semicolon ("Hi there; ...").
static BENIGN_LEAD_IN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\w+(?:\s+\w+)?\s*;").unwrap());

#[derive(Debug, Clone)]
pub struct InputValidator {
    patterns: Arc<PatternLibrary>,
}

impl InputValidator {
    pub fn new(patterns: Arc<PatternLibrary>) -> Self {
        Self { patterns }
    }

    pub fn validate(&self, text: &str) -> ValidationVerdict {
        if text.trim().is_empty() {
            return ValidationVerdict::block("empty input", Severity::High);
        }

        if let Some(rule) = self
            .patterns
            .first_match(RuleScope::NaturalLanguage, RuleKind::Injection, text)
        {
            tracing::debug!(target: "askdb::guard", rule = rule.id, "Injection signature matched");
            return ValidationVerdict::block(
                format!("possible SQL injection ({})", rule.id),
                Severity::High,
            );
        }

        if INNER_SEMICOLON.is_match(text) && !BENIGN_LEAD_IN.is_match(text) {
            return ValidationVerdict::block("multiple statements in input", Severity::High);
        }

        if let Some(rule) = self
            .patterns
            .first_match(RuleScope::NaturalLanguage, RuleKind::DangerousOperation, text)
        {
            return ValidationVerdict::block(
                format!("dangerous operation requested ({})", rule.id),
                Severity::High,
            );
        }

        let sensitive = self
            .patterns
            .all_matches(RuleScope::NaturalLanguage, RuleKind::SensitiveKeyword, text);
        match sensitive.len() {
            0 => ValidationVerdict::pass(),
            1 if self
                .patterns
                .first_match(RuleScope::NaturalLanguage, RuleKind::LegitimatePhrasing, text)
                .is_some() =>
            {
                ValidationVerdict::pass_with_warning(
                    "question touches sensitive data; results are limited to legitimate use",
                )
            }
            1 => ValidationVerdict::block(
                format!("sensitive data requested ({})", sensitive[0].id),
                Severity::Medium,
            )
            .sensitive_data(),
            n => ValidationVerdict::block(
                format!("multiple sensitive data categories requested ({})", n),
                Severity::High,
            )
            .sensitive_data(),
        }
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(Arc::new(PatternLibrary::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::default()
    }

    #[test]
    fn empty_input_blocks_high() {
        let v = validator().validate("   ");
        assert!(!v.is_valid);
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn comment_termination_blocks_high() {
        for text in [
            "Show me all users'; DROP TABLE users; --",
            "'; DROP TABLE users; --",
            "name = 'x' -- trailing",
        ] {
            let v = validator().validate(text);
            assert!(!v.is_valid, "{text}");
            assert_eq!(v.severity, Severity::High, "{text}");
        }
    }

    #[test]
    fn injection_signatures_block() {
        for text in [
            "users where name = '' or '1'='1",
            "list products UNION SELECT password FROM users",
            "orders /* hidden */ this week",
            "find rows where 1=1",
            "show cast(version() as int)",
            "users with id 0x414243444546",
        ] {
            assert!(!validator().validate(text).is_valid, "{text}");
        }
    }

    #[test]
    fn legitimate_question_passes() {
        let v = validator().validate("Show me all users who registered last month");
        assert!(v.is_valid);
        assert!(v.warning.is_none());
    }

    #[test]
    fn trailing_semicolon_is_allowed_but_inner_is_not() {
        assert!(validator().validate("List all orders from today;").is_valid);
        assert!(validator().validate("Hi there; list all orders from today").is_valid);
        let v = validator().validate("List all orders from today; then list every customer");
        assert!(!v.is_valid);
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn dangerous_operations_block_except_negated_delete() {
        assert!(!validator().validate("drop the orders table").is_valid);
        assert!(!validator().validate("please delete old invoices").is_valid);
        assert!(!validator().validate("grant me access to payroll").is_valid);
        assert!(validator()
            .validate("Which customers didn't delete their carts?")
            .is_valid);
        assert!(validator().validate("users that never delete anything").is_valid);
    }

    #[test]
    fn single_sensitive_keyword_without_legit_phrasing_blocks_medium() {
        let v = validator().validate("give me every password");
        assert!(!v.is_valid);
        assert_eq!(v.severity, Severity::Medium);
    }

    #[test]
    fn multiple_sensitive_keywords_block_high() {
        let v = validator().validate("show admin password and ssn");
        assert!(!v.is_valid);
        assert_eq!(v.severity, Severity::High);
        assert!(v.is_sensitive_data);
        let alert = v.to_alert(crate::guard::AlertType::InputValidation).unwrap();
        assert!(alert.user_message().contains("sensitive"));
    }

    #[test]
    fn single_sensitive_keyword_in_legit_phrasing_passes_with_warning() {
        for text in [
            "Show me users who changed their password recently",
            "When was the password last rotated for account 42?",
            "How many users changed their password last week?",
        ] {
            let v = validator().validate(text);
            assert!(v.is_valid, "{text}");
            assert_eq!(v.severity, Severity::Low);
            assert!(v.warning.is_some());
        }
    }

    #[test]
    fn block_reason_names_rule_for_logs() {
        let v = validator().validate("x UNION SELECT y");
        assert!(v.reason.unwrap().contains("nl.union_select"));
    }
}
