// ABOUTME: Target-side schema rebuild from exported DDL and data artifacts
// ABOUTME: Resets the schema once, then creates and loads each table in its own transaction

use super::export::SchemaExport;
use super::transfer::import_table;
use crate::config::ImportMode;
use crate::error::{describe_pg_error, MigrationError};
use crate::postgres::quote_ident;
use crate::utils::object_label;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_postgres::Client;

/// What happened to one table on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    /// DDL committed; `rows` is None when no data was loaded
    Imported { rows: Option<u64> },
    /// Merge mode found the table already present and left it untouched
    Skipped,
    /// Rolled back; nothing from this table is on the target
    Failed { error: MigrationError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub table: String,
    #[serde(flatten)]
    pub status: TableStatus,
}

impl TableOutcome {
    pub fn is_imported(&self) -> bool {
        matches!(self.status, TableStatus::Imported { .. })
    }
}

/// Rebuild `export.schema` on the target.
///
/// Replace mode drops the schema with CASCADE and recreates it. Merge mode
/// only creates it when missing. Each table then gets its own transaction:
/// DDL, then rows from its artifact when `copy_data` is set. A failure rolls
/// back that table only and the loop moves on.
///
/// # Errors
///
/// Only the schema reset is fatal. Per-table failures are in the outcomes.
pub async fn import_schema(
    client: &mut Client,
    export: &SchemaExport,
    mode: ImportMode,
    copy_data: bool,
) -> Result<Vec<TableOutcome>> {
    let schema = &export.schema;
    let quoted_schema = quote_ident(schema)?;

    match mode {
        ImportMode::Replace => {
            tracing::info!("Dropping and recreating schema '{}' on target...", schema);
            client
                .batch_execute(&format!(
                    "DROP SCHEMA IF EXISTS {quoted_schema} CASCADE; CREATE SCHEMA {quoted_schema}"
                ))
                .await
                .with_context(|| format!("Failed to reset schema '{}' on target", schema))?;
        }
        ImportMode::Merge => {
            tracing::info!("Ensuring schema '{}' exists on target...", schema);
            client
                .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {quoted_schema}"))
                .await
                .with_context(|| format!("Failed to create schema '{}' on target", schema))?;
        }
    }

    let progress = ProgressBar::new(export.ddls.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    let mut outcomes = Vec::with_capacity(export.ddls.len());
    for (table, ddl) in &export.ddls {
        let label = object_label(schema, table);
        progress.set_message(format!("Importing {}", label));

        let status = match import_one(client, export, table, ddl, mode, copy_data).await {
            Ok(status) => status,
            Err(error) => TableStatus::Failed { error },
        };

        match &status {
            TableStatus::Imported { rows: Some(rows) } => {
                tracing::info!("  ✓ {} imported ({} rows)", label, rows)
            }
            TableStatus::Imported { rows: None } => tracing::info!("  ✓ {} created", label),
            TableStatus::Skipped => {
                tracing::warn!("  ⚠ {} already exists on target, skipped (merge mode)", label)
            }
            TableStatus::Failed { error } => {
                tracing::error!("  ✗ Error importing {}: {}", label, error)
            }
        }

        outcomes.push(TableOutcome {
            table: table.clone(),
            status,
        });
        progress.inc(1);
    }

    progress.finish_with_message("Import complete");
    Ok(outcomes)
}

async fn import_one(
    client: &mut Client,
    export: &SchemaExport,
    table: &str,
    ddl: &str,
    mode: ImportMode,
    copy_data: bool,
) -> Result<TableStatus, MigrationError> {
    let schema = &export.schema;
    let label = object_label(schema, table);

    let transaction = client
        .transaction()
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    if mode == ImportMode::Merge {
        let row = transaction
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM information_schema.tables
                     WHERE table_schema = $1 AND table_name = $2
                 )",
                &[&schema, &table],
            )
            .await
            .map_err(|e| MigrationError::metadata(&label, describe_pg_error(&e)))?;
        if row.get::<_, bool>(0) {
            return Ok(TableStatus::Skipped);
        }
    }

    // Dropping `transaction` on any early return rolls the table back.
    transaction
        .batch_execute(ddl)
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    let rows = if copy_data {
        match export.artifacts.get(table) {
            Some(path) => {
                let columns = export
                    .copy_columns
                    .get(table)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                Some(import_table(&transaction, schema, table, columns, path).await?)
            }
            None => {
                tracing::warn!("  ⚠ No data file for {}, creating it empty", label);
                None
            }
        }
    } else {
        None
    };

    transaction
        .commit()
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    Ok(TableStatus::Imported { rows })
}
