//! Verdicts, assessments and security alerts produced by the gates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Informational severity attached to every verdict and alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Outcome of the Input or SQL Validator. `is_valid == false` halts the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default)]
    pub is_data_modification: bool,
    /// Blocked for asking after sensitive data rather than for an injection or destructive shape.
    #[serde(default)]
    pub is_sensitive_data: bool,
}

impl ValidationVerdict {
    pub fn pass() -> Self {
        Self {
            is_valid: true,
            reason: None,
            severity: Severity::Low,
            warning: None,
            is_data_modification: false,
            is_sensitive_data: false,
        }
    }

    pub fn pass_with_warning(warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::pass()
        }
    }

    pub fn block(reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
            severity,
            warning: None,
            is_data_modification: false,
            is_sensitive_data: false,
        }
    }

    pub fn data_modification(mut self) -> Self {
        self.is_data_modification = true;
        self
    }

    pub fn sensitive_data(mut self) -> Self {
        self.is_sensitive_data = true;
        self
    }

    /// Converts a failed verdict into an alert of the given type. None when the verdict passed.
    pub fn to_alert(&self, alert_type: AlertType) -> Option<SecurityAlert> {
        if self.is_valid {
            return None;
        }
        let alert = SecurityAlert::new(alert_type, self.severity, self.reason.clone().unwrap_or_default());
        Some(if self.is_sensitive_data {
            alert.sensitive_data()
        } else {
            alert
        })
    }
}

/// Outcome of the Sensitive-Access Assessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityAssessment {
    pub is_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_legitimate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SensitivityAssessment {
    pub fn not_sensitive() -> Self {
        Self {
            is_sensitive: false,
            is_legitimate: None,
            reason: None,
            warning: None,
        }
    }

    /// True when the request may proceed to execution.
    pub fn permits(&self) -> bool {
        !self.is_sensitive || self.is_legitimate == Some(true)
    }
}

/// Alert vocabulary every caller must be able to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    InputValidation,
    SqlValidation,
    SensitiveDataAccess,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InputValidation => "input_validation",
            Self::SqlValidation => "sql_validation",
            Self::SensitiveDataAccess => "sensitive_data_access",
        })
    }
}

/// Structured record of why a turn was blocked. `details` names the matched rule and goes to logs only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub details: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive_data: bool,
}

impl SecurityAlert {
    pub fn new(alert_type: AlertType, severity: Severity, details: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity,
            details: details.into(),
            sensitive_data: false,
        }
    }

    /// Marks an input block as caused by sensitive keywords; picks the user message.
    pub fn sensitive_data(mut self) -> Self {
        self.sensitive_data = true;
        self
    }

    /// Category-level view attached to responses.
    pub fn summary(&self) -> AlertSummary {
        AlertSummary {
            alert_type: self.alert_type,
            severity: self.severity,
        }
    }

    /// Message shown to the user; selected by type, then by block category and severity for input validation.
    pub fn user_message(&self) -> &'static str {
        match (self.alert_type, self.severity) {
            (AlertType::InputValidation, Severity::High) if self.sensitive_data => {
                "Your request references several kinds of sensitive information that cannot be queried. \
                 Please ask about non-sensitive data instead."
            }
            (AlertType::InputValidation, Severity::Medium) if self.sensitive_data => {
                "Your request references sensitive information that cannot be queried. \
                 Please ask about non-sensitive data instead."
            }
            (AlertType::InputValidation, Severity::High) => {
                "Your request was blocked because it contains patterns associated with SQL injection \
                 or destructive database operations. Please rephrase your question in plain language."
            }
            (AlertType::InputValidation, _) => {
                "Your request could not be processed as written. Please rephrase it and try again."
            }
            (AlertType::SqlValidation, _) => {
                "The query generated for your request was blocked by the SQL safety checks. \
                 Please rephrase your question so that it only reads data."
            }
            (AlertType::SensitiveDataAccess, _) => {
                "This request would expose sensitive data such as credentials or personal identifiers. \
                 Only aggregate or audit-style questions about that data are allowed."
            }
        }
    }
}

/// Alert as rendered in a response envelope or on the alert stream: type and severity, no matched details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_vocabulary_serializes_exactly() {
        let alert = SecurityAlert::new(AlertType::SensitiveDataAccess, Severity::Medium, "x");
        let json = serde_json::to_value(alert.summary()).unwrap();
        assert_eq!(json["type"], "sensitive_data_access");
        assert_eq!(json["severity"], "medium");
        assert_eq!(AlertType::InputValidation.to_string(), "input_validation");
        assert_eq!(AlertType::SqlValidation.to_string(), "sql_validation");
    }

    #[test]
    fn input_validation_messages_differ_by_severity() {
        let high = SecurityAlert::new(AlertType::InputValidation, Severity::High, "");
        let medium = SecurityAlert::new(AlertType::InputValidation, Severity::Medium, "");
        let sql = SecurityAlert::new(AlertType::SqlValidation, Severity::High, "");
        assert_ne!(high.user_message(), medium.user_message());
        assert_ne!(high.user_message(), sql.user_message());
    }

    #[test]
    fn sensitive_blocks_never_get_the_injection_message() {
        let injection = SecurityAlert::new(AlertType::InputValidation, Severity::High, "");
        let many_keywords =
            SecurityAlert::new(AlertType::InputValidation, Severity::High, "").sensitive_data();
        let one_keyword =
            SecurityAlert::new(AlertType::InputValidation, Severity::Medium, "").sensitive_data();
        assert_ne!(many_keywords.user_message(), injection.user_message());
        assert!(many_keywords.user_message().contains("sensitive"));
        assert!(one_keyword.user_message().contains("sensitive"));
        assert!(!many_keywords.user_message().contains("injection"));
    }

    #[test]
    fn sensitive_verdict_carries_into_alert() {
        let verdict = ValidationVerdict::block("several keywords", Severity::High).sensitive_data();
        let alert = verdict.to_alert(AlertType::InputValidation).unwrap();
        assert!(alert.sensitive_data);
        let plain = ValidationVerdict::block("comment", Severity::High)
            .to_alert(AlertType::InputValidation)
            .unwrap();
        assert!(!plain.sensitive_data);
    }

    #[test]
    fn passed_verdict_has_no_alert() {
        assert!(ValidationVerdict::pass().to_alert(AlertType::SqlValidation).is_none());
        let blocked = ValidationVerdict::block("stacked statements", Severity::High);
        let alert = blocked.to_alert(AlertType::SqlValidation).unwrap();
        assert_eq!(alert.details, "stacked statements");
    }
}
