//! Bulk staging for set-based writes
//!
//! The batch is written as CSV part files into a private temporary directory,
//! uploaded into the table stage of a session temporary table, and loaded with
//! `COPY INTO ... ON_ERROR = CONTINUE`. Rows the load refused are read back
//! through `VALIDATE(..., JOB_ID => '_last')` and mapped to their records by
//! (file, row number).
//!
//! A [`StagingArea`] owns every resource the load creates. [`StagingArea::cleanup`]
//! must run on every exit path; the local directory is also removed when the
//! guard is dropped, but stage files and the temporary table need a session.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::connection::{Connection, Executor};
use crate::converter::ValueConverter;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::record::{Record, SchemaEntry};
use crate::security::escape_string_literal;
use crate::types::{Row, Value};

/// Moves a local staging file into a named stage
#[async_trait]
pub trait StageUploader: Send + Sync {
    /// Upload `file` into `stage` (e.g. `@"DB"."PUBLIC".%"T"`)
    async fn upload(&self, connection: &dyn Connection, file: &Path, stage: &str) -> Result<()>;
}

/// Uploads with a `PUT file://...` statement on the session
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlPutUploader;

#[async_trait]
impl StageUploader for SqlPutUploader {
    async fn upload(&self, connection: &dyn Connection, file: &Path, stage: &str) -> Result<()> {
        let sql = put_statement(file, stage);
        connection.execute(&sql, &[]).await.map(|_| ()).map_err(|e| e.with_sql(&sql))
    }
}

/// `PUT 'file://<path>' <stage> AUTO_COMPRESS=TRUE OVERWRITE=TRUE`
pub fn put_statement(file: &Path, stage: &str) -> String {
    format!(
        "PUT 'file://{}' {} AUTO_COMPRESS=TRUE OVERWRITE=TRUE",
        escape_string_literal(&file.to_string_lossy()),
        stage
    )
}

/// Current database and schema of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Database name
    pub database: String,
    /// Schema name
    pub schema: String,
}

impl Namespace {
    /// Ask the session for its database and schema; `schema` overrides the latter.
    pub async fn resolve(connection: &dyn Connection, schema: Option<&str>) -> Result<Self> {
        let row = connection
            .query_one("SELECT CURRENT_DATABASE() AS db, CURRENT_SCHEMA() AS sch", &[])
            .await?
            .ok_or_else(|| Error::query("session reported no current database"))?;

        let database = row_text(&row, "db", 0)
            .ok_or_else(|| Error::query("session has no current database"))?;
        let schema = match schema {
            Some(s) => s.to_string(),
            None => row_text(&row, "sch", 1)
                .ok_or_else(|| Error::query("session has no current schema"))?,
        };
        Ok(Self { database, schema })
    }

    /// `@"db"."schema".%"table"`
    pub fn table_stage(&self, platform: &dyn Platform, table: &str) -> String {
        format!(
            "@{}.{}.%{}",
            platform.identifier(&self.database),
            platform.identifier(&self.schema),
            platform.identifier(table)
        )
    }
}

/// A record that failed to stage, by batch position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// Index of the record in the batch
    pub index: usize,
    /// Reason reported for the row
    pub reason: String,
}

#[derive(Debug)]
struct StagedFile {
    stem: String,
    path: PathBuf,
    rows: Vec<usize>,
}

/// Resources of one staged load
pub struct StagingArea {
    dir: Option<TempDir>,
    table: String,
    stage: String,
    files: Vec<StagedFile>,
    cleaned: bool,
}

impl StagingArea {
    /// Create the local directory for a load into `table` (quoted) via `stage`
    pub fn new(table: impl Into<String>, stage: impl Into<String>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("strata-stage-")
            .tempdir()
            .map_err(|e| Error::staging("cannot create staging directory", e))?;
        Ok(Self {
            dir: Some(dir),
            table: table.into(),
            stage: stage.into(),
            files: Vec::new(),
            cleaned: false,
        })
    }

    /// Quoted temporary table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stage holding the uploaded files
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Local staging directory, while it exists
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Number of part files written
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Write `records` as CSV part files of at most `rows_per_file` rows.
    /// Records whose values cannot be converted are returned instead of written.
    pub async fn write_files(
        &mut self,
        records: &[Record],
        entries: &[SchemaEntry],
        rows_per_file: usize,
    ) -> Result<Vec<RowFailure>> {
        let rows_per_file = rows_per_file.max(1);
        let mut failures = Vec::new();
        let mut chunk = String::new();
        let mut rows = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match csv_line(record, entries) {
                Ok(line) => {
                    chunk.push_str(&line);
                    chunk.push('\n');
                    rows.push(index);
                }
                Err(e) => {
                    failures.push(RowFailure {
                        index,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }
            if rows.len() == rows_per_file {
                self.flush(std::mem::take(&mut chunk), std::mem::take(&mut rows))
                    .await?;
            }
        }
        if !rows.is_empty() {
            self.flush(chunk, rows).await?;
        }

        debug!(files = self.files.len(), failed = failures.len(), "staging files written");
        Ok(failures)
    }

    async fn flush(&mut self, content: String, rows: Vec<usize>) -> Result<()> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| Error::query("staging area already cleaned up"))?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let stem = format!("part_{}_{}", self.files.len(), &suffix[..8]);
        let path = dir.path().join(format!("{stem}.csv"));

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::staging(format!("cannot write {}", path.display()), e))?;
        self.files.push(StagedFile { stem, path, rows });
        Ok(())
    }

    /// `CREATE OR REPLACE TEMPORARY TABLE tmp LIKE target`, or with `columns`
    /// (quoted) only those target columns and none of their constraints.
    pub(crate) async fn create_table(
        &self,
        executor: &Executor<'_>,
        target: &str,
        columns: Option<&[String]>,
    ) -> Result<()> {
        let sql = match columns {
            None => format!("CREATE OR REPLACE TEMPORARY TABLE {} LIKE {}", self.table, target),
            Some(columns) => format!(
                "CREATE OR REPLACE TEMPORARY TABLE {} AS SELECT {} FROM {} WHERE 1 = 0",
                self.table,
                columns.join(", "),
                target
            ),
        };
        executor.execute(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;
        Ok(())
    }

    /// Upload every part file into the stage
    pub async fn upload(&self, connection: &dyn Connection, uploader: &dyn StageUploader) -> Result<()> {
        for file in &self.files {
            uploader.upload(connection, &file.path, &self.stage).await?;
        }
        Ok(())
    }

    /// Load the stage into the temporary table, continuing past bad rows
    pub fn copy_statement(&self, platform: &dyn Platform, columns: &[String]) -> String {
        let columns: Vec<String> = columns.iter().map(|c| platform.identifier(c)).collect();
        format!(
            "COPY INTO {} ({}) FROM {} FILE_FORMAT = (TYPE = CSV FIELD_OPTIONALLY_ENCLOSED_BY = '\"' \
             EMPTY_FIELD_AS_NULL = TRUE) ON_ERROR = CONTINUE PURGE = TRUE",
            self.table,
            columns.join(", "),
            self.stage
        )
    }

    /// Rows the last COPY refused, mapped back to batch positions
    pub(crate) async fn load_failures(&self, executor: &Executor<'_>) -> Result<Vec<RowFailure>> {
        let sql = format!(
            "SELECT * FROM TABLE(VALIDATE({}, JOB_ID => '_last'))",
            self.table
        );
        let rows = executor.query(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;

        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        for row in &rows {
            let Some(index) = self.locate(row) else {
                warn!(table = %self.table, "load error could not be mapped to a record");
                continue;
            };
            if seen.insert(index) {
                let reason = row
                    .get_by_name("ERROR")
                    .and_then(Value::as_string)
                    .unwrap_or_else(|| "rejected by bulk load".to_string());
                failures.push(RowFailure { index, reason });
            }
        }
        Ok(failures)
    }

    fn locate(&self, row: &Row) -> Option<usize> {
        let file = row.get_by_name("FILE").and_then(Value::as_string)?;
        let line = row
            .get_by_name("ROW_NUMBER")
            .or_else(|| row.get_by_name("LINE"))
            .and_then(Value::as_i64)?;
        let staged = self.files.iter().find(|f| file.contains(&f.stem))?;
        let position = usize::try_from(line).ok()?.checked_sub(1)?;
        staged.rows.get(position).copied()
    }

    /// Remove stage files, the temporary table and the local directory.
    /// Failures are logged; cleanup never masks the load's own result.
    pub async fn cleanup(&mut self, connection: &dyn Connection) {
        let remove = format!("REMOVE {}", self.stage);
        if let Err(e) = connection.execute(&remove, &[]).await {
            warn!(stage = %self.stage, error = %e, "failed to remove staged files");
        }
        let drop = format!("DROP TABLE IF EXISTS {}", self.table);
        if let Err(e) = connection.execute(&drop, &[]).await {
            warn!(table = %self.table, error = %e, "failed to drop staging table");
        }
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(error = %e, "failed to remove staging directory");
            }
        }
        self.cleaned = true;
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if !self.cleaned {
            warn!(
                table = %self.table,
                stage = %self.stage,
                "staging area dropped without cleanup; remote stage files may remain"
            );
        }
    }
}

/// One CSV line: NULL is an empty unquoted field, text is always quoted.
fn csv_line(record: &Record, entries: &[SchemaEntry]) -> Result<String> {
    let fields = entries
        .iter()
        .map(|entry| {
            let value = ValueConverter::for_type(entry.field_type).convert(record, entry)?;
            Ok(csv_field(&value))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(fields.join(","))
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Int32(n) => n.to_string(),
        Value::Int64(n) => n.to_string(),
        Value::Float32(n) => n.to_string(),
        Value::Float64(n) => n.to_string(),
        Value::String(s) => quoted(s),
        Value::Bytes(bytes) => bytes.iter().map(|b| format!("{b:02X}")).collect(),
        Value::DateTimeTz(dt) => dt.to_rfc3339(),
        Value::Json(json) => quoted(&json.to_string()),
    }
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn row_text(row: &Row, name: &str, position: usize) -> Option<String> {
    row.get_by_name(name)
        .or_else(|| row.get(position))
        .and_then(Value::as_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldType;

    fn entries() -> Vec<SchemaEntry> {
        vec![
            SchemaEntry::new("id", FieldType::Long),
            SchemaEntry::new("name", FieldType::String),
            SchemaEntry::new("raw", FieldType::Bytes),
        ]
    }

    #[test]
    fn test_csv_line_encoding() {
        let record = Record::builder()
            .with_long("id", 7)
            .with_string("name", "say \"hi\", ok")
            .field(SchemaEntry::new("raw", FieldType::Bytes), vec![0xAB_u8, 0x01])
            .build();
        assert_eq!(
            csv_line(&record, &entries()).unwrap(),
            r#"7,"say ""hi"", ok",AB01"#
        );

        let sparse = Record::builder().with_long("id", 8).build();
        assert_eq!(csv_line(&sparse, &entries()).unwrap(), "8,,");

        let empty = Record::builder().with_long("id", 9).with_string("name", "").build();
        assert_eq!(csv_line(&empty, &entries()).unwrap(), r#"9,"","#);
    }

    #[test]
    fn test_put_statement() {
        let sql = put_statement(Path::new("/tmp/a/part_0.csv"), "@\"DB\".\"S\".%\"T\"");
        assert_eq!(
            sql,
            "PUT 'file:///tmp/a/part_0.csv' @\"DB\".\"S\".%\"T\" AUTO_COMPRESS=TRUE OVERWRITE=TRUE"
        );
    }

    #[tokio::test]
    async fn test_write_files_splits_and_reports_conversion_failures() {
        let mut area = StagingArea::new("\"tmp\"", "@%\"tmp\"").unwrap();
        let records = vec![
            Record::builder().with_long("id", 1).build(),
            Record::builder().with_string("id", "not a number").build(),
            Record::builder().with_long("id", 3).build(),
            Record::builder().with_long("id", 4).build(),
        ];
        let long_id = vec![SchemaEntry::new("id", FieldType::Long)];

        let failures = area.write_files(&records, &long_id, 2).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(area.file_count(), 2);

        let dir = area.path().unwrap().to_path_buf();
        assert!(dir.exists());

        let row = Row::new(
            vec!["ERROR".into(), "FILE".into(), "ROW_NUMBER".into()],
            vec![
                Value::String("bad".into()),
                Value::String(format!("{}.csv.gz", area.files[1].stem)),
                Value::Int64(1),
            ],
        );
        assert_eq!(area.locate(&row), Some(3));

        // no session: mark cleaned and drop the directory directly
        area.dir.take();
        area.cleaned = true;
        assert!(!dir.exists());
    }
}
