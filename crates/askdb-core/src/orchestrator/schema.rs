//! Schema/meta questions ("what tables are there?") answered with server-built catalog queries.

use super::collaborators::QueryResult;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap()
}

// Each pattern must cover the whole question, so a data question that merely
// mentions "tables" or "field in X" never becomes a catalog query.

static ALL_COLUMNS: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"^\s*(?:(?:what|which)\s+(?:are\s+)?|(?:show|list)\s+(?:me\s+)?)?(?:all\s+)?(?:the\s+)?(?:columns|fields)\s+(?:are\s+there\s+)?(?:of|in|for|across)\s+(?:all|every|each)\s+(?:the\s+)?tables?(?:\s+in\s+(?:the\s+)?(?:database|db))?\s*[?.!]?\s*$|^\s*(?:show|list)\s+(?:me\s+)?all\s+(?:the\s+)?columns\s*[?.!]?\s*$")
});

static TABLE_COLUMNS: LazyLock<Regex> = LazyLock::new(|| {
    ci(concat!(
        r"^\s*(?:",
        r"(?:what|which)\s+(?:columns|fields)\s+(?:are\s+(?:there\s+)?in|exist\s+in|does|do)\s+(?:the\s+)?(?:table\s+)?([a-z_][a-z0-9_]*)(?:\s+table)?(?:\s+(?:have|contain))?",
        r"|(?:show|list|describe)\s+(?:me\s+)?(?:all\s+)?(?:the\s+)?(?:columns|fields|structure|schema)\s+(?:of|in|for)\s+(?:the\s+)?(?:table\s+)?([a-z_][a-z0-9_]*)(?:\s+table)?",
        r"|describe\s+(?:the\s+)?(?:table\s+)?([a-z_][a-z0-9_]*)(?:\s+table)?",
        r")\s*[?.!]?\s*$",
    ))
});

static TABLE_LISTING: LazyLock<Regex> = LazyLock::new(|| {
    ci(concat!(
        r"^\s*(?:(?:",
        r"(?:show|list)\s+(?:me\s+)?(?:all\s+)?(?:the\s+)?(?:database\s+)?tables",
        r"|(?:what|which)\s+tables\s+(?:are\s+there|are\s+in|are\s+available|exist|do\s+(?:we|i)\s+have|does\s+(?:the\s+|this\s+)?(?:database|db)\s+have)",
        r")(?:\s+(?:(?:in|of)\s+)?(?:(?:the|this|my|our)\s+)?(?:database|db|schema))?",
        r"|(?:describe|show)\s+(?:me\s+)?(?:the\s+)?database\s+(?:schema|structure)",
        r")\s*[?.!]?\s*$",
    ))
});

/// Words that may follow "columns in" without naming a table.
const NOT_A_TABLE: &[&str] = &["the", "this", "that", "my", "our", "database", "db", "all", "every", "each"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaQuery {
    Tables,
    TableColumns(String),
    AllColumns,
}

impl SchemaQuery {
    /// Classifies a schema/meta question. `None` for ordinary data questions.
    pub fn detect(text: &str) -> Option<Self> {
        if ALL_COLUMNS.is_match(text) {
            return Some(Self::AllColumns);
        }
        if let Some(caps) = TABLE_COLUMNS.captures(text) {
            let table = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_lowercase());
            if let Some(table) = table {
                if !NOT_A_TABLE.contains(&table.as_str()) {
                    return Some(Self::TableColumns(table));
                }
            }
        }
        if TABLE_LISTING.is_match(text) {
            return Some(Self::Tables);
        }
        None
    }

    /// Catalog SQL. Table names are restricted to `[a-z_][a-z0-9_]*` by detection.
    pub fn sql(&self) -> String {
        match self {
            Self::Tables => "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' ORDER BY table_name"
                .to_string(),
            Self::TableColumns(table) => format!(
                "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = '{}' ORDER BY ordinal_position",
                table
            ),
            Self::AllColumns => "SELECT table_name, column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = 'public' ORDER BY table_name, ordinal_position"
                .to_string(),
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Tables => &["table_name"],
            Self::TableColumns(_) => &["column_name", "data_type", "is_nullable"],
            Self::AllColumns => &["table_name", "column_name", "data_type"],
        }
    }

    pub fn intent(&self) -> &'static str {
        match self {
            Self::Tables => "list_tables",
            Self::TableColumns(_) => "describe_table",
            Self::AllColumns => "list_columns",
        }
    }

    /// Renders the catalog rows as a pipe table with a one-line heading.
    pub fn format(&self, result: &QueryResult) -> String {
        let heading = match self {
            Self::Tables => "Tables in the database:".to_string(),
            Self::TableColumns(t) => format!("Columns of table '{}':", t),
            Self::AllColumns => "Columns across all tables:".to_string(),
        };
        if result.rows.is_empty() {
            return match self {
                Self::TableColumns(t) => format!("No table named '{}' was found.", t),
                _ => "No tables were found in the database.".to_string(),
            };
        }

        let columns = self.columns();
        let mut out = format!("{}\n\n| {} |\n|{}|\n", heading, columns.join(" | "), vec!["---"; columns.len()].join("|"));
        for row in &result.rows {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| match row.get(*c) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out.push_str(&format!("\n{} row(s)", result.row_count));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_each_phrasing() {
        assert_eq!(SchemaQuery::detect("What tables are in the database?"), Some(SchemaQuery::Tables));
        assert_eq!(SchemaQuery::detect("show tables"), Some(SchemaQuery::Tables));
        assert_eq!(
            SchemaQuery::detect("What columns are in the orders table?"),
            Some(SchemaQuery::TableColumns("orders".into()))
        );
        assert_eq!(
            SchemaQuery::detect("Describe table Customers"),
            Some(SchemaQuery::TableColumns("customers".into()))
        );
        assert_eq!(
            SchemaQuery::detect("list the columns in all tables"),
            Some(SchemaQuery::AllColumns)
        );
    }

    #[test]
    fn ordinary_questions_are_not_schema_questions() {
        assert_eq!(SchemaQuery::detect("Show me all users who registered last month"), None);
        assert_eq!(SchemaQuery::detect("How many orders were placed today?"), None);
    }

    #[test]
    fn data_questions_mentioning_fields_or_tables_are_not_schema_questions() {
        for text in [
            "Which orders have a null value in the shipping field for the last week?",
            "Which customers booked tables at the restaurant last week?",
            "Show customers with an empty email field in Germany",
            "describe the trend of monthly sales",
            "show tables booked for friday",
        ] {
            assert_eq!(SchemaQuery::detect(text), None, "{text}");
        }
    }

    #[test]
    fn detects_other_meta_phrasings() {
        assert_eq!(SchemaQuery::detect("List all tables"), Some(SchemaQuery::Tables));
        assert_eq!(SchemaQuery::detect("Which tables exist in the database?"), Some(SchemaQuery::Tables));
        assert_eq!(SchemaQuery::detect("Show me the database schema"), Some(SchemaQuery::Tables));
        assert_eq!(
            SchemaQuery::detect("What fields does invoices have?"),
            Some(SchemaQuery::TableColumns("invoices".into()))
        );
        assert_eq!(
            SchemaQuery::detect("show the structure of table line_items"),
            Some(SchemaQuery::TableColumns("line_items".into()))
        );
    }

    #[test]
    fn catalog_sql_passes_sql_validator() {
        let validator = crate::guard::SqlValidator::default();
        for q in [
            SchemaQuery::Tables,
            SchemaQuery::TableColumns("orders".into()),
            SchemaQuery::AllColumns,
        ] {
            assert!(validator.validate(&q.sql()).is_valid, "{:?}", q);
        }
    }

    #[test]
    fn formats_pipe_table_in_declared_column_order() {
        let q = SchemaQuery::TableColumns("orders".into());
        let result = QueryResult::from_rows(vec![
            json!({"column_name": "id", "data_type": "integer", "is_nullable": "NO"}),
            json!({"column_name": "total", "data_type": "numeric", "is_nullable": "YES"}),
        ]);
        let text = q.format(&result);
        assert!(text.starts_with("Columns of table 'orders':"));
        assert!(text.contains("| column_name | data_type | is_nullable |"));
        assert!(text.contains("| id | integer | NO |"));
        assert!(text.ends_with("2 row(s)"));
    }

    #[test]
    fn empty_catalog_result_is_explained() {
        let q = SchemaQuery::TableColumns("ghost".into());
        assert_eq!(q.format(&QueryResult::default()), "No table named 'ghost' was found.");
    }
}
