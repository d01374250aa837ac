// ABOUTME: Source-side export of one schema: table DDL plus optional data artifacts
// ABOUTME: Per-table failures are recorded and skipped, never abort the export

use super::catalog::{describe_table, list_tables};
use super::ddl::synthesize_create_table;
use super::transfer::export_table;
use crate::error::MigrationError;
use crate::utils::object_label;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_postgres::Client;

/// Result of exporting a schema from the source
#[derive(Debug, Default)]
pub struct SchemaExport {
    pub schema: String,
    /// Table name to `CREATE TABLE` text, in table-name order
    pub ddls: BTreeMap<String, String>,
    /// Table name to artifact path; tables whose data export failed are absent
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Table name to the columns its artifact holds, generated columns excluded
    pub copy_columns: BTreeMap<String, Vec<String>>,
    pub failures: Vec<MigrationError>,
}

impl SchemaExport {
    pub fn table_count(&self) -> usize {
        self.ddls.len()
    }
}

/// Export DDL for every base table in `schema`, and its rows when `copy_data`.
///
/// A column lookup or DDL synthesis failure drops that table from the export.
/// A data failure keeps the DDL and leaves the table out of `artifacts`.
pub async fn export_schema(
    client: &Client,
    schema: &str,
    work_dir: &Path,
    copy_data: bool,
) -> Result<SchemaExport> {
    let tables = list_tables(client, schema)
        .await
        .context("Failed to list tables on source")?;
    tracing::info!("Found {} table(s) in schema '{}'", tables.len(), schema);

    if copy_data {
        std::fs::create_dir_all(work_dir)
            .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;
    }

    let mut export = SchemaExport {
        schema: schema.to_string(),
        ..SchemaExport::default()
    };

    let progress = ProgressBar::new(tables.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    for table in &tables {
        let label = object_label(schema, table);
        progress.set_message(format!("Exporting {}", label));

        let descriptor = match describe_table(client, schema, table).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::error!("  ✗ {}: {:#}", label, e);
                export
                    .failures
                    .push(MigrationError::metadata(&label, format!("{:#}", e)));
                progress.inc(1);
                continue;
            }
        };

        match synthesize_create_table(&descriptor) {
            Ok(ddl) => {
                tracing::debug!("{}", ddl);
                export.ddls.insert(table.clone(), ddl);
            }
            Err(e) => {
                tracing::error!("  ✗ {}: {}", label, e);
                export.failures.push(e);
                progress.inc(1);
                continue;
            }
        }

        if copy_data {
            let columns = descriptor.copy_columns();
            match export_table(client, schema, table, &columns, work_dir).await {
                Ok(path) => {
                    export.artifacts.insert(table.clone(), path);
                    export.copy_columns.insert(table.clone(), columns);
                }
                Err(e) => {
                    tracing::error!("  ✗ Error exporting data for {}: {}", label, e);
                    export.failures.push(e);
                }
            }
        }

        progress.inc(1);
    }

    progress.finish_with_message("Export complete");
    tracing::info!(
        "✓ Exported {} table definition(s), {} data file(s), {} failure(s)",
        export.ddls.len(),
        export.artifacts.len(),
        export.failures.len()
    );

    Ok(export)
}
