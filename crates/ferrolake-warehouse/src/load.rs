//! Bulk ingestion of staged parquet objects into raw tables.
//!
//! One load reads every staged file through a single `read_parquet` scan,
//! matches file columns to table columns by name ignoring case, and casts
//! each value with `TRY_CAST`. A row whose non-null value fails its cast (or
//! whose required column is null) is counted as rejected and skipped; the
//! rest of the load proceeds.

use std::collections::BTreeMap;

use ::duckdb::{Connection, ToSql};
use serde::Serialize;
use tracing::{debug, info};

use crate::{escape_sql_string, finalize_transaction, ObjectStoreAccess, WarehouseError};

/// Bookkeeping column holding the staged object each row came from.
pub const SOURCE_FILE_COLUMN: &str = "_source_file";
/// Bookkeeping column holding the load time of each row.
pub const LOADED_AT_COLUMN: &str = "_loaded_at";

const STAGE_TABLE: &str = "ferrolake_load_stage";

/// One bulk-ingest instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoadRequest {
    /// Target raw table; created from the staged files' schema when missing.
    pub table: String,
    /// Staged parquet locations (local paths or `s3://` URLs).
    pub files: Vec<String>,
    /// Columns that must be present and non-null for a row to load.
    pub required_columns: Vec<String>,
}

impl BulkLoadRequest {
    pub fn new(table: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            table: table.into(),
            files,
            required_columns: Vec::new(),
        }
    }

    pub fn require_column(mut self, column: impl Into<String>) -> Self {
        self.required_columns.push(column.into());
        self
    }
}

/// Per-file outcome of a bulk load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLoad {
    pub file: String,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
}

/// Outcome of a bulk load. Rejected rows never turn a load into an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub created_table: bool,
    pub rows_parsed: u64,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
    pub files: Vec<FileLoad>,
}

#[derive(Debug, Clone)]
struct ColumnSpec {
    name: String,
    data_type: String,
}

/// Runs one bulk load on `connection` inside a transaction.
pub(crate) fn bulk_load(
    connection: &Connection,
    request: &BulkLoadRequest,
    object_store: Option<&ObjectStoreAccess>,
) -> Result<LoadSummary, WarehouseError> {
    validate_table_name(&request.table)?;
    if request.files.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "bulk load requires at least one staged file",
        )));
    }

    if request.files.iter().any(|file| file.starts_with("s3://")) {
        let access = object_store.ok_or_else(|| {
            WarehouseError::QueryRejected(String::from(
                "s3 staged files require object store access to be configured",
            ))
        })?;
        configure_object_store(connection, access)?;
    }

    let file_list = file_list_sql(&request.files);
    let file_columns = describe_files(connection, &file_list)?;
    debug!(table = %request.table, columns = file_columns.len(), "described staged files");

    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<LoadSummary, WarehouseError> {
        let created_table = ensure_table(connection, &request.table, &file_list)?;
        let table_columns = table_columns(connection, &request.table)?;
        stage_rows(connection, request, &file_list, &table_columns, &file_columns)?;
        let files = count_staged(connection, &request.files)?;
        replace_rows(connection, &request.table, &request.files, &table_columns)?;
        record_history(connection, &request.table, &files)?;
        connection.execute_batch(&format!("DROP TABLE IF EXISTS {STAGE_TABLE}"))?;

        let rows_loaded = files.iter().map(|file| file.rows_loaded).sum::<u64>();
        let rows_rejected = files.iter().map(|file| file.rows_rejected).sum::<u64>();
        Ok(LoadSummary {
            table: request.table.clone(),
            created_table,
            rows_parsed: rows_loaded + rows_rejected,
            rows_loaded,
            rows_rejected,
            files,
        })
    })();

    let summary = finalize_transaction(connection, result)?;
    info!(
        table = %summary.table,
        loaded = summary.rows_loaded,
        rejected = summary.rows_rejected,
        files = summary.files.len(),
        "bulk load committed"
    );
    Ok(summary)
}

fn validate_table_name(table: &str) -> Result<(), WarehouseError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_lowercase() || ch == '_');
    if valid_start && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_') {
        Ok(())
    } else {
        Err(WarehouseError::InvalidTable(table.to_owned()))
    }
}

fn file_list_sql(files: &[String]) -> String {
    let quoted = files
        .iter()
        .map(|file| format!("'{}'", escape_sql_string(file)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{quoted}]")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn describe_files(
    connection: &Connection,
    file_list: &str,
) -> Result<Vec<ColumnSpec>, WarehouseError> {
    let sql = format!("DESCRIBE SELECT * FROM read_parquet({file_list}, union_by_name = true)");
    let mut statement = connection.prepare(&sql)?;
    let columns = statement
        .query_map([], |row| {
            Ok(ColumnSpec {
                name: row.get(0)?,
                data_type: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn ensure_table(
    connection: &Connection,
    table: &str,
    file_list: &str,
) -> Result<bool, WarehouseError> {
    let params: [&dyn ToSql; 1] = [&table];
    let existing: i64 = connection.query_row(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = 'main' AND table_name = ?",
        params.as_slice(),
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Ok(false);
    }

    let table = quote_ident(table);
    connection.execute_batch(&format!(
        "CREATE TABLE {table} AS \
         SELECT * FROM read_parquet({file_list}, union_by_name = true) LIMIT 0; \
         ALTER TABLE {table} ADD COLUMN {SOURCE_FILE_COLUMN} VARCHAR; \
         ALTER TABLE {table} ADD COLUMN {LOADED_AT_COLUMN} TIMESTAMP;"
    ))?;
    Ok(true)
}

fn table_columns(connection: &Connection, table: &str) -> Result<Vec<ColumnSpec>, WarehouseError> {
    let params: [&dyn ToSql; 1] = [&table];
    let mut statement = connection.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = 'main' AND table_name = ? ORDER BY ordinal_position",
    )?;
    let columns = statement
        .query_map(params.as_slice(), |row| {
            Ok(ColumnSpec {
                name: row.get(0)?,
                data_type: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns
        .into_iter()
        .filter(|column| column.name != SOURCE_FILE_COLUMN && column.name != LOADED_AT_COLUMN)
        .collect())
}

fn stage_rows(
    connection: &Connection,
    request: &BulkLoadRequest,
    file_list: &str,
    table_columns: &[ColumnSpec],
    file_columns: &[ColumnSpec],
) -> Result<(), WarehouseError> {
    let mut projections = Vec::with_capacity(table_columns.len());
    let mut rejections = Vec::new();

    for column in table_columns {
        let target = quote_ident(&column.name);
        let matched = file_columns
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(&column.name));
        let required = request
            .required_columns
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&column.name));

        match matched {
            Some(source) => {
                let source = quote_ident(&source.name);
                let cast = format!("TRY_CAST({source} AS {})", column.data_type);
                projections.push(format!("{cast} AS {target}"));
                if required {
                    rejections.push(format!("{cast} IS NULL"));
                } else {
                    rejections.push(format!("({source} IS NOT NULL AND {cast} IS NULL)"));
                }
            }
            None => {
                projections.push(format!("CAST(NULL AS {}) AS {target}", column.data_type));
                if required {
                    rejections.push(String::from("TRUE"));
                }
            }
        }
    }

    let rejected = if rejections.is_empty() {
        String::from("FALSE")
    } else {
        rejections.join(" OR ")
    };
    projections.push(format!("filename AS {SOURCE_FILE_COLUMN}"));
    projections.push(format!("({rejected}) AS _rejected"));

    connection.execute_batch(&format!(
        "CREATE OR REPLACE TEMP TABLE {STAGE_TABLE} AS SELECT {} \
         FROM read_parquet({file_list}, union_by_name = true, filename = true)",
        projections.join(", ")
    ))?;
    Ok(())
}

fn count_staged(connection: &Connection, files: &[String]) -> Result<Vec<FileLoad>, WarehouseError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {SOURCE_FILE_COLUMN}, \
                COUNT(*) FILTER (WHERE NOT _rejected), \
                COUNT(*) FILTER (WHERE _rejected) \
         FROM {STAGE_TABLE} GROUP BY {SOURCE_FILE_COLUMN}"
    ))?;
    let counted = statement
        .query_map([], |row| {
            let file: String = row.get(0)?;
            let loaded: i64 = row.get(1)?;
            let rejected: i64 = row.get(2)?;
            Ok((file, loaded, rejected))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_file = counted
        .into_iter()
        .map(|(file, loaded, rejected)| {
            (
                file,
                (
                    u64::try_from(loaded).unwrap_or_default(),
                    u64::try_from(rejected).unwrap_or_default(),
                ),
            )
        })
        .collect::<BTreeMap<_, _>>();

    // Files that produced no rows still show up in the summary.
    let mut loads = files
        .iter()
        .map(|file| {
            let (rows_loaded, rows_rejected) = by_file.remove(file).unwrap_or((0, 0));
            FileLoad {
                file: file.clone(),
                rows_loaded,
                rows_rejected,
            }
        })
        .collect::<Vec<_>>();
    loads.extend(by_file.into_iter().map(|(file, (rows_loaded, rows_rejected))| FileLoad {
        file,
        rows_loaded,
        rows_rejected,
    }));
    Ok(loads)
}

fn replace_rows(
    connection: &Connection,
    table: &str,
    files: &[String],
    table_columns: &[ColumnSpec],
) -> Result<(), WarehouseError> {
    let table = quote_ident(table);
    let requested = files
        .iter()
        .map(|file| format!("'{}'", escape_sql_string(file)))
        .collect::<Vec<_>>()
        .join(", ");
    connection.execute_batch(&format!(
        "DELETE FROM {table} WHERE {SOURCE_FILE_COLUMN} IN ({requested}) \
         OR {SOURCE_FILE_COLUMN} IN (SELECT DISTINCT {SOURCE_FILE_COLUMN} FROM {STAGE_TABLE})"
    ))?;

    let columns = table_columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>();
    let column_list = if columns.is_empty() {
        String::new()
    } else {
        format!("{}, ", columns.join(", "))
    };
    connection.execute_batch(&format!(
        "INSERT INTO {table} ({column_list}{SOURCE_FILE_COLUMN}, {LOADED_AT_COLUMN}) \
         SELECT {column_list}{SOURCE_FILE_COLUMN}, CURRENT_TIMESTAMP \
         FROM {STAGE_TABLE} WHERE NOT _rejected"
    ))?;
    Ok(())
}

fn record_history(
    connection: &Connection,
    table: &str,
    files: &[FileLoad],
) -> Result<(), WarehouseError> {
    for file in files {
        let loaded = i64::try_from(file.rows_loaded).unwrap_or(i64::MAX);
        let rejected = i64::try_from(file.rows_rejected).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 4] = [&table, &file.file, &loaded, &rejected];
        connection.execute(
            "INSERT INTO load_history (table_name, source_file, rows_loaded, rows_rejected) \
             VALUES (?, ?, ?, ?)",
            params.as_slice(),
        )?;
    }
    Ok(())
}

fn configure_object_store(
    connection: &Connection,
    access: &ObjectStoreAccess,
) -> Result<(), WarehouseError> {
    let mut options = vec![
        String::from("TYPE S3"),
        format!("REGION '{}'", escape_sql_string(&access.region)),
    ];
    if let (Some(key_id), Some(secret)) = (&access.access_key_id, &access.secret_access_key) {
        options.push(format!("KEY_ID '{}'", escape_sql_string(key_id)));
        options.push(format!("SECRET '{}'", escape_sql_string(secret)));
    } else {
        options.push(String::from("PROVIDER CREDENTIAL_CHAIN"));
    }
    if let Some(endpoint) = &access.endpoint {
        let (host, use_ssl) = match endpoint.split_once("://") {
            Some((scheme, host)) => (host, scheme.eq_ignore_ascii_case("https")),
            None => (endpoint.as_str(), true),
        };
        options.push(format!("ENDPOINT '{}'", escape_sql_string(host.trim_end_matches('/'))));
        options.push(format!("USE_SSL {use_ssl}"));
    }
    if access.path_style {
        options.push(String::from("URL_STYLE 'path'"));
    }

    connection.execute_batch(&format!(
        "INSTALL httpfs; LOAD httpfs; CREATE OR REPLACE SECRET ferrolake_s3 ({});",
        options.join(", ")
    ))?;
    Ok(())
}
