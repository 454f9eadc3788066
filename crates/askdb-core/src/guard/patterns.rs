//! Pattern Library: the declarative rule table every gate iterates.
//!
//! Each [`Rule`] is `{id, scope, kind, pattern, severity, exceptions}`. Matching is
//! case-insensitive. An exception is anchored at the end (`$`) and is tested against the
//! text *up to the end of each individual match*, so "didn't delete" excuses that one
//! occurrence of DELETE without excusing a later, un-negated one.
//!
//! A rule whose pattern fails to compile is skipped with a warning: tooling errors fail
//! open, content matches fail closed.

use super::verdict::Severity;
use regex::{Regex, RegexBuilder};

/// Which text a rule screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleScope {
    /// Raw natural-language question.
    NaturalLanguage,
    /// Model-generated SQL.
    Sql,
    /// Either text (sensitive-topic detection).
    Both,
}

impl RuleScope {
    fn covers(self, requested: RuleScope) -> bool {
        self == requested || self == RuleScope::Both || requested == RuleScope::Both
    }
}

/// What a rule detects; gates select rules by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Injection signature (comment termination, tautology, UNION SELECT, ...).
    Injection,
    /// Destructive or privileged operation keyword.
    DangerousOperation,
    /// UPDATE / INSERT / DELETE in generated SQL.
    DataModification,
    /// Late override allowing catalog listings otherwise blocked as dangerous.
    SchemaException,
    /// Sensitive keyword in a natural-language question.
    SensitiveKeyword,
    /// Phrasing under which a single sensitive keyword is acceptable.
    LegitimatePhrasing,
    /// Sensitive topic (credentials, PII, admin-role crossover) in NL or SQL.
    SensitiveTopic,
    /// Aggregate or audit intent that legitimises a sensitive topic.
    LegitimateIntent,
}

/// One entry of the rule table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub scope: RuleScope,
    pub kind: RuleKind,
    pub pattern: &'static str,
    pub severity: Severity,
    pub exceptions: &'static [&'static str],
}

const fn rule(
    id: &'static str,
    scope: RuleScope,
    kind: RuleKind,
    pattern: &'static str,
    severity: Severity,
) -> Rule {
    Rule {
        id,
        scope,
        kind,
        pattern,
        severity,
        exceptions: &[],
    }
}

use RuleKind::*;
use RuleScope::{Both, NaturalLanguage as Nl, Sql};
use Severity::{High, Low, Medium};

/// DELETE inside a negated phrase ("didn't delete", "never delete", "not delete").
const NEGATED_DELETE: &[&str] = &[
    r"\b(?:didn['’]?t|did\s+not|don['’]?t|do\s+not|doesn['’]?t|does\s+not|never|not|won['’]?t|haven['’]?t|have\s+not|hasn['’]?t|has\s+not)\s+(?:\w+\s+)?delete$",
];

/// Default rule table.
pub const DEFAULT_RULES: &[Rule] = &[
    // Injection signatures in natural language.
    rule("nl.comment_termination", Nl, Injection, r"(?:'|;)\s*(?:--|#)", High),
    rule("nl.quote_terminator", Nl, Injection, r"'\s*;", High),
    rule("nl.or_tautology", Nl, Injection, r"'\s*or\s+'?\w+'?\s*=\s*'?\w+", High),
    rule("nl.union_select", Nl, Injection, r"\bunion\s+(?:all\s+)?select\b", High),
    rule("nl.inline_comment", Nl, Injection, r"/\*[\s\S]*?\*/", High),
    rule("nl.always_true", Nl, Injection, r"\b(?:1\s*=\s*1|0\s*=\s*0|true\s*=\s*true)\b", High),
    rule("nl.quoted_equality", Nl, Injection, r"'[^']*'\s*=\s*'[^']*'", High),
    rule("nl.cast_convert", Nl, Injection, r"\b(?:cast|convert)\s*\(", High),
    rule(
        "nl.stacked_statement",
        Nl,
        Injection,
        r";\s*(?:drop|delete|insert|update|alter|create|truncate|exec(?:ute)?|shutdown|grant|revoke)\b",
        High,
    ),
    rule("nl.time_delay", Nl, Injection, r"\b(?:pg_sleep|sleep|benchmark)\s*\(|\bwaitfor\s+delay\b", High),
    rule("nl.hex_payload", Nl, Injection, r"\b0x[0-9a-f]{6,}\b", High),
    rule("nl.char_encoding", Nl, Injection, r"\b(?:char|chr|nchar)\s*\(\s*\d+", High),
    rule("nl.system_procedure", Nl, Injection, r"\b(?:xp_cmdshell|sp_executesql|sp_oacreate)\b", High),
    // Dangerous operations in natural language.
    rule("nl.drop", Nl, DangerousOperation, r"\bdrop\b", High),
    Rule {
        id: "nl.delete",
        scope: Nl,
        kind: DangerousOperation,
        pattern: r"\bdelete\b",
        severity: High,
        exceptions: NEGATED_DELETE,
    },
    rule("nl.truncate", Nl, DangerousOperation, r"\btruncate\b", High),
    rule("nl.alter", Nl, DangerousOperation, r"\balter\b", High),
    rule("nl.exec", Nl, DangerousOperation, r"\bexec(?:ute)?\b", High),
    rule("nl.grant", Nl, DangerousOperation, r"\bgrant\b", High),
    rule("nl.revoke", Nl, DangerousOperation, r"\brevoke\b", High),
    rule("nl.shutdown", Nl, DangerousOperation, r"\bshutdown\b", High),
    rule("nl.insert_into", Nl, DangerousOperation, r"\binsert\s+into\b", High),
    rule("nl.update_set", Nl, DangerousOperation, r"\bupdate\s+\w+\s+set\b", High),
    rule(
        "nl.create_object",
        Nl,
        DangerousOperation,
        r"\bcreate\s+(?:table|user|role|database|function|trigger|index|view)\b",
        High,
    ),
    // Sensitive keywords in natural language.
    rule("nl.kw.password", Nl, SensitiveKeyword, r"\bpass(?:word|wd)", Medium),
    rule("nl.kw.ssn", Nl, SensitiveKeyword, r"\bssns?\b|\bsocial[\s_]+security", Medium),
    rule("nl.kw.credit_card", Nl, SensitiveKeyword, r"\bcredit[\s_]*cards?\b|\bcard[\s_]+numbers?\b|\bcvv\b", Medium),
    rule("nl.kw.admin", Nl, SensitiveKeyword, r"\badmin(?:istrator)?s?\b", Medium),
    rule("nl.kw.secret", Nl, SensitiveKeyword, r"\bsecrets?\b", Medium),
    rule("nl.kw.api_key", Nl, SensitiveKeyword, r"\bapi[\s_-]*keys?\b", Medium),
    rule("nl.kw.token", Nl, SensitiveKeyword, r"\b(?:access|auth|refresh|session)[\s_]*tokens?\b", Medium),
    rule("nl.kw.private_key", Nl, SensitiveKeyword, r"\bprivate[\s_]*keys?\b", Medium),
    // Phrasings under which one sensitive keyword passes with a warning.
    rule(
        "nl.legit.users_who",
        Nl,
        LegitimatePhrasing,
        r"\b(?:show|list|find|get)\s+(?:me\s+)?(?:all\s+)?(?:the\s+)?users\s+who\b",
        Low,
    ),
    rule("nl.legit.when_was", Nl, LegitimatePhrasing, r"\bwhen\s+(?:was|were|did)\b", Low),
    rule("nl.legit.aggregate", Nl, LegitimatePhrasing, r"\b(?:how\s+many|count|number\s+of)\b", Low),
    rule(
        "nl.legit.last_change",
        Nl,
        LegitimatePhrasing,
        r"\blast\s+(?:password\s+)?(?:change|reset|update|login)\b",
        Low,
    ),
    // Dangerous operations in generated SQL (matched against the upper-cased statement).
    rule("sql.drop", Sql, DangerousOperation, r"\bDROP\b", High),
    rule("sql.alter", Sql, DangerousOperation, r"\bALTER\b", High),
    rule("sql.create", Sql, DangerousOperation, r"\bCREATE\b", High),
    rule("sql.truncate", Sql, DangerousOperation, r"\bTRUNCATE\b", High),
    rule("sql.grant", Sql, DangerousOperation, r"\bGRANT\b", High),
    rule("sql.revoke", Sql, DangerousOperation, r"\bREVOKE\b", High),
    rule("sql.exec", Sql, DangerousOperation, r"\bEXEC(?:UTE)?\b", High),
    rule("sql.system_procedure", Sql, DangerousOperation, r"\bXP_\w+|\bSP_EXECUTESQL\b", High),
    rule("sql.information_schema", Sql, DangerousOperation, r"\bINFORMATION_SCHEMA\b", High),
    rule("sql.system_catalog", Sql, DangerousOperation, r"\bPG_(?:CATALOG|SHADOW|AUTHID)\b|\bSYS(?:OBJECTS|COLUMNS)\b", High),
    rule("sql.copy", Sql, DangerousOperation, r"\bCOPY\b", High),
    rule("sql.file_access", Sql, DangerousOperation, r"\bINTO\s+(?:OUT|DUMP)FILE\b|\bLOAD_FILE\b", High),
    rule("sql.time_delay", Sql, DangerousOperation, r"\bPG_SLEEP\b|\bWAITFOR\s+DELAY\b|\bBENCHMARK\s*\(", High),
    // Data modification in generated SQL.
    rule("sql.update", Sql, DataModification, r"\bUPDATE\b", Medium),
    rule("sql.insert", Sql, DataModification, r"\bINSERT\b", Medium),
    rule("sql.delete", Sql, DataModification, r"\bDELETE\b", Medium),
    rule("sql.merge", Sql, DataModification, r"\bMERGE\s+INTO\b", Medium),
    // Catalog listings allowed despite the INFORMATION_SCHEMA keyword.
    rule(
        "sql.schema_listing",
        Sql,
        SchemaException,
        r"\bINFORMATION_SCHEMA\s*\.\s*(?:TABLES|COLUMNS)\b",
        Low,
    ),
    // Sensitive topics, screened in both the question and the SQL.
    rule("topic.password", Both, SensitiveTopic, r"pass(?:word|wd)|\bpwd_?hash\b", Medium),
    rule("topic.credit_card", Both, SensitiveTopic, r"credit[\s_]*card|card[\s_]*number|\bcc_num|\bcvv\b", Medium),
    rule("topic.ssn", Both, SensitiveTopic, r"(?:\b|_)ssn\b|social[\s_]*security", Medium),
    rule(
        "topic.admin_role",
        Both,
        SensitiveTopic,
        r"\b(?:role|is_admin|user_type|privileges?)\b[^;]*\badmin|\badmin\b[^;]*\b(?:roles?|privileges?|permissions?)\b|\bis_admin\s*=\s*(?:true|1)\b",
        Medium,
    ),
    // Intent that legitimises a sensitive topic (matched against the question only).
    rule("intent.aggregate", Nl, LegitimateIntent, r"\b(?:count|how\s+many|number\s+of|total\s+number)\b", Low),
    rule(
        "intent.temporal",
        Nl,
        LegitimateIntent,
        r"\bwhen\s+(?:was|were|did)\b[\s\S]*\b(?:changed?|updated?|reset|modified|rotated)\b",
        Low,
    ),
    rule(
        "intent.audit",
        Nl,
        LegitimateIntent,
        r"\blast\s+(?:password\s+)?(?:change|reset|update)\b|\bpassword\s+(?:change|reset)\s+(?:history|log|audit)\b",
        Low,
    ),
];

/// A rule with its matcher compiled.
#[derive(Debug)]
pub struct CompiledRule {
    pub id: &'static str,
    pub scope: RuleScope,
    pub kind: RuleKind,
    pub severity: Severity,
    matcher: Regex,
    exceptions: Vec<Regex>,
}

impl CompiledRule {
    /// True when at least one occurrence of the pattern is not excused by an exception.
    pub fn matches(&self, text: &str) -> bool {
        if self.exceptions.is_empty() {
            return self.matcher.is_match(text);
        }
        self.matcher
            .find_iter(text)
            .any(|m| !self.exceptions.iter().any(|ex| ex.is_match(&text[..m.end()])))
    }
}

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Compiled, immutable rule table shared by all gates.
#[derive(Debug)]
pub struct PatternLibrary {
    rules: Vec<CompiledRule>,
}

impl PatternLibrary {
    /// Compiles `rules`. Malformed patterns are skipped (and logged), never fatal.
    pub fn compile(rules: &[Rule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let matcher = match build_regex(rule.pattern) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(
                        target: "askdb::guard",
                        rule = rule.id,
                        error = %e,
                        "Skipping malformed pattern"
                    );
                    continue;
                }
            };
            let exceptions = rule
                .exceptions
                .iter()
                .filter_map(|ex| match build_regex(ex) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(
                            target: "askdb::guard",
                            rule = rule.id,
                            error = %e,
                            "Skipping malformed exception pattern"
                        );
                        None
                    }
                })
                .collect();
            compiled.push(CompiledRule {
                id: rule.id,
                scope: rule.scope,
                kind: rule.kind,
                severity: rule.severity,
                matcher,
                exceptions,
            });
        }
        Self { rules: compiled }
    }

    /// Rules of `kind` that apply to `scope`, in table order.
    pub fn rules(&self, scope: RuleScope, kind: RuleKind) -> impl Iterator<Item = &CompiledRule> {
        self.rules
            .iter()
            .filter(move |r| r.kind == kind && r.scope.covers(scope))
    }

    /// First rule of `kind` matching `text`.
    pub fn first_match(&self, scope: RuleScope, kind: RuleKind, text: &str) -> Option<&CompiledRule> {
        self.rules(scope, kind).find(|r| r.matches(text))
    }

    /// Every rule of `kind` matching `text`.
    pub fn all_matches(&self, scope: RuleScope, kind: RuleKind, text: &str) -> Vec<&CompiledRule> {
        self.rules(scope, kind).filter(|r| r.matches(text)).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::compile(DEFAULT_RULES)
    }
}
