//! Appends SQL to `.sql` script files for opening in an external editor.

use askdb_core::{ExportOutcome, FileAction, PipelineError, ScriptExporter};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

const DEFAULT_SCRIPT_NAME: &str = "askdb_queries";
const STAGE: &str = "export";

pub struct FileScriptExporter {
    dir: PathBuf,
}

impl FileScriptExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn script_path(&self, script_name: Option<&str>) -> PathBuf {
        let name = script_name
            .map(sanitize_script_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_SCRIPT_NAME.to_string());
        self.dir.join(format!("{}.sql", name))
    }
}

#[async_trait::async_trait]
impl ScriptExporter for FileScriptExporter {
    async fn export(
        &self,
        sql: &str,
        script_name: Option<&str>,
    ) -> Result<ExportOutcome, PipelineError> {
        let io_err = |e: std::io::Error| PipelineError::execution(STAGE, e.to_string());

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let path = self.script_path(script_name);
        let existed = tokio::fs::try_exists(&path).await.map_err(io_err)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        let mut statement = sql.trim().to_string();
        if !statement.ends_with(';') {
            statement.push(';');
        }
        let block = if existed {
            format!("\n{}\n", statement)
        } else {
            format!("-- askdb exported queries\n{}\n", statement)
        };
        file.write_all(block.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        let file_action = if existed {
            FileAction::Appended
        } else {
            FileAction::Created
        };
        tracing::info!(target: "askdb::export", path = %path.display(), action = ?file_action, "SQL exported");
        Ok(ExportOutcome {
            file_action,
            script_path: path.to_string_lossy().into_owned(),
        })
    }
}

/// Keeps `[A-Za-z0-9_-]`; anything else becomes `_`. Strips a trailing `.sql`.
pub fn sanitize_script_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_suffix(".sql").unwrap_or(name);
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_export_creates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileScriptExporter::new(dir.path().join("exports"));

        let first = exporter.export("SELECT 1", None).await.unwrap();
        assert_eq!(first.file_action, FileAction::Created);
        assert!(first.script_path.ends_with("askdb_queries.sql"));

        let second = exporter.export("SELECT 2;", None).await.unwrap();
        assert_eq!(second.file_action, FileAction::Appended);

        let contents = tokio::fs::read_to_string(&second.script_path).await.unwrap();
        assert!(contents.contains("SELECT 1;"));
        assert!(contents.contains("SELECT 2;"));
        assert!(!contents.contains(";;"));
    }

    #[tokio::test]
    async fn script_names_cannot_escape_the_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileScriptExporter::new(dir.path());
        let outcome = exporter
            .export("SELECT 1", Some("../../etc/passwd"))
            .await
            .unwrap();
        let path = PathBuf::from(&outcome.script_path);
        assert_eq!(path.parent().unwrap(), dir.path());
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_script_name("monthly-report_v2.sql"), "monthly-report_v2");
        assert_eq!(sanitize_script_name("a b/c"), "a_b_c");
    }
}
