//! Security gates: pattern library, Input Validator, SQL Validator, Sensitive-Access Assessor.
//!
//! | Gate                     | Screens                  | Alert type               |
//! |--------------------------|--------------------------|--------------------------|
//! | [`InputValidator`]       | natural-language input   | `input_validation`       |
//! | [`SqlValidator`]         | generated SQL            | `sql_validation`         |
//! | [`SensitiveAccessAssessor`] | question + SQL        | `sensitive_data_access`  |

mod input;
mod patterns;
mod sensitivity;
mod sql;
mod verdict;

pub use input::InputValidator;
pub use patterns::{CompiledRule, PatternLibrary, Rule, RuleKind, RuleScope, DEFAULT_RULES};
pub use sensitivity::SensitiveAccessAssessor;
pub use sql::SqlValidator;
pub use verdict::{
    AlertSummary, AlertType, SecurityAlert, SensitivityAssessment, Severity, ValidationVerdict,
};

use std::sync::Arc;

/// The three gates built over one shared [`PatternLibrary`].
#[derive(Debug, Clone)]
pub struct SecurityGate {
    pub input: InputValidator,
    pub sql: SqlValidator,
    pub sensitivity: SensitiveAccessAssessor,
}

impl SecurityGate {
    pub fn new(patterns: Arc<PatternLibrary>) -> Self {
        Self {
            input: InputValidator::new(Arc::clone(&patterns)),
            sql: SqlValidator::new(Arc::clone(&patterns)),
            sensitivity: SensitiveAccessAssessor::new(patterns),
        }
    }

    /// Input Validator as a gate: `Err(alert)` when the text must not proceed.
    pub fn check_input(&self, text: &str) -> Result<ValidationVerdict, SecurityAlert> {
        let verdict = self.input.validate(text);
        match verdict.to_alert(AlertType::InputValidation) {
            Some(alert) => Err(alert),
            None => Ok(verdict),
        }
    }

    /// SQL Validator as a gate. Any `is_valid == false`, data modification included, is a hard stop.
    pub fn check_sql(&self, sql: &str) -> Result<ValidationVerdict, SecurityAlert> {
        let verdict = self.sql.validate(sql);
        match verdict.to_alert(AlertType::SqlValidation) {
            Some(alert) => Err(alert),
            None => Ok(verdict),
        }
    }

    /// Sensitive-Access Assessor as a gate.
    pub fn check_sensitivity(
        &self,
        question: &str,
        sql: &str,
    ) -> Result<SensitivityAssessment, SecurityAlert> {
        let assessment = self.sensitivity.assess(question, sql);
        if assessment.permits() {
            Ok(assessment)
        } else {
            Err(SecurityAlert::new(
                AlertType::SensitiveDataAccess,
                Severity::High,
                assessment.reason.clone().unwrap_or_default(),
            ))
        }
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new(Arc::new(PatternLibrary::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_maps_failures_to_typed_alerts() {
        let gate = SecurityGate::default();
        let alert = gate.check_input("Show me all users'; DROP TABLE users; --").unwrap_err();
        assert_eq!(alert.alert_type, AlertType::InputValidation);
        assert_eq!(alert.severity, Severity::High);

        let alert = gate.check_sql("DROP TABLE users").unwrap_err();
        assert_eq!(alert.alert_type, AlertType::SqlValidation);

        let alert = gate
            .check_sensitivity("list every ssn", "SELECT ssn FROM people")
            .unwrap_err();
        assert_eq!(alert.alert_type, AlertType::SensitiveDataAccess);
    }

    #[test]
    fn gate_passes_clean_turn() {
        let gate = SecurityGate::default();
        assert!(gate.check_input("Show me all users who registered last month").is_ok());
        assert!(gate.check_sql("SELECT * FROM users WHERE created_at > NOW() - INTERVAL '1 month'").is_ok());
        assert!(gate
            .check_sensitivity("Show me all users who registered last month", "SELECT * FROM users")
            .is_ok());
    }
}
