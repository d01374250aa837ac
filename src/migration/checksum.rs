// ABOUTME: Per-table row checksums for comparing data between source and target
// ABOUTME: Used by verify --data on tables present on both sides

use super::catalog::list_columns;
use crate::postgres::{qualify, quote_ident};
use crate::utils::object_label;
use anyhow::{Context, Result};
use serde::Serialize;
use tokio_postgres::Client;

/// Checksum comparison of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumResult {
    pub schema: String,
    pub table: String,
    pub source_checksum: String,
    pub target_checksum: String,
    pub source_row_count: i64,
    pub target_row_count: i64,
}

impl ChecksumResult {
    pub fn is_valid(&self) -> bool {
        self.source_checksum == self.target_checksum
            && self.source_row_count == self.target_row_count
    }
}

/// Build the checksum query for a table.
///
/// Rows are rendered as text with NULLs written as `\N`, ordered by every
/// column's text form in the "C" collation, and hashed with md5 over the
/// ordered concatenation. Types without an ordering operator (json, xml,
/// point) still sort this way.
fn checksum_query(schema: &str, table: &str, columns: &[String]) -> Result<String> {
    let quoted: Vec<String> = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Result<_, _>>()?;

    let row_expr = quoted
        .iter()
        .map(|column| format!("COALESCE({}::text, '\\N')", column))
        .collect::<Vec<_>>()
        .join(" || '|' || ");

    let order_by = quoted
        .iter()
        .map(|column| format!("{}::text COLLATE \"C\"", column))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "SELECT md5(string_agg(row_data, E'\\n' ORDER BY row_num)), COUNT(*)
         FROM (
             SELECT {} AS row_data, ROW_NUMBER() OVER (ORDER BY {}) AS row_num
             FROM {}
         ) t",
        row_expr,
        order_by,
        qualify(schema, table)?
    ))
}

/// md5 and row count of a table's content. Empty tables hash to `"empty"`.
pub async fn compute_table_checksum(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<(String, i64)> {
    let label = object_label(schema, table);
    let columns: Vec<String> = list_columns(client, schema, table)
        .await?
        .into_iter()
        .map(|column| column.name)
        .collect();

    if columns.is_empty() {
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", qualify(schema, table)?), &[])
            .await
            .with_context(|| format!("Failed to count rows in {}", label))?;
        return Ok(("empty".to_string(), row.get(0)));
    }

    let query = checksum_query(schema, table, &columns)?;
    let row = client
        .query_one(&query, &[])
        .await
        .with_context(|| format!("Failed to compute checksum for {}", label))?;

    let checksum: Option<String> = row.get(0);
    let row_count: i64 = row.get(1);
    let checksum = checksum.unwrap_or_else(|| "empty".to_string());

    tracing::debug!("Checksum for {}: {} ({} rows)", label, checksum, row_count);
    Ok((checksum, row_count))
}

/// Checksum a table on both sides
pub async fn compare_tables(
    source: &Client,
    target: &Client,
    schema: &str,
    table: &str,
) -> Result<ChecksumResult> {
    let (source_result, target_result) = tokio::try_join!(
        compute_table_checksum(source, schema, table),
        compute_table_checksum(target, schema, table)
    )?;

    let (source_checksum, source_row_count) = source_result;
    let (target_checksum, target_row_count) = target_result;

    Ok(ChecksumResult {
        schema: schema.to_string(),
        table: table.to_string(),
        source_checksum,
        target_checksum,
        source_row_count,
        target_row_count,
    })
}
