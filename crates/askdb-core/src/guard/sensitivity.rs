//! Sensitive-Access Assessor: second, independent gate run after SQL validation passes.

use super::patterns::{PatternLibrary, RuleKind, RuleScope};
use super::verdict::SensitivityAssessment;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SensitiveAccessAssessor {
    patterns: Arc<PatternLibrary>,
}

impl SensitiveAccessAssessor {
    pub fn new(patterns: Arc<PatternLibrary>) -> Self {
        Self { patterns }
    }

    /// Sensitive when either text touches a sensitive topic; legitimacy is judged on the question only.
    pub fn assess(&self, natural_language_query: &str, generated_sql: &str) -> SensitivityAssessment {
        let topic = self
            .patterns
            .first_match(RuleScope::NaturalLanguage, RuleKind::SensitiveTopic, natural_language_query)
            .or_else(|| {
                self.patterns
                    .first_match(RuleScope::Sql, RuleKind::SensitiveTopic, generated_sql)
            });
        let Some(topic) = topic else {
            return SensitivityAssessment::not_sensitive();
        };

        match self.patterns.first_match(
            RuleScope::NaturalLanguage,
            RuleKind::LegitimateIntent,
            natural_language_query,
        ) {
            Some(intent) => {
                tracing::debug!(
                    target: "askdb::guard",
                    topic = topic.id,
                    intent = intent.id,
                    "Sensitive topic accepted for legitimate intent"
                );
                SensitivityAssessment {
                    is_sensitive: true,
                    is_legitimate: Some(true),
                    reason: None,
                    warning: Some(
                        "query touches sensitive data; only aggregate or audit information is returned"
                            .to_string(),
                    ),
                }
            }
            None => SensitivityAssessment {
                is_sensitive: true,
                is_legitimate: Some(false),
                reason: Some(format!("sensitive data access without legitimate intent ({})", topic.id)),
                warning: None,
            },
        }
    }
}

impl Default for SensitiveAccessAssessor {
    fn default() -> Self {
        Self::new(Arc::new(PatternLibrary::default()))
    }
}
