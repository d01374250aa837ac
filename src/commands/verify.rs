// ABOUTME: Verify command implementation - compares source and target schemas
// ABOUTME: Table and function sets always, per-table data checksums on request

use crate::config::MigrationConfig;
use crate::migration::{check_databases_equal, compare_tables, ChecksumResult, EquivalenceReport};
use crate::postgres::connect_with_config;
use crate::utils::object_label;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub equivalence: EquivalenceReport,
    /// Empty unless data checks were requested
    pub checksums: Vec<ChecksumResult>,
    /// Tables whose checksum could not be computed
    pub checksum_errors: Vec<String>,
}

impl VerifyReport {
    pub fn is_equal(&self) -> bool {
        self.equivalence.is_equal()
            && self.checksum_errors.is_empty()
            && self.checksums.iter().all(ChecksumResult::is_valid)
    }
}

/// Compare `config.schema` between source and target.
///
/// Tables and functions are compared as sets. When `repair_orphan_functions`
/// is set, functions that exist only on the target are dropped. With
/// `check_data`, every table present on both sides is checksummed too.
///
/// # Errors
///
/// Returns an error if either connection fails or a catalog query fails.
/// Differences are reported in the returned [`VerifyReport`], not as errors.
pub async fn verify(config: &MigrationConfig, check_data: bool) -> Result<VerifyReport> {
    config.validate()?;
    let schema = &config.schema;

    tracing::info!("Starting verification of schema '{}'...", schema);

    tracing::info!("Connecting to source database {}...", config.source.display());
    let source = connect_with_config(&config.source.to_pg_config("source")?)
        .await
        .context("Failed to connect to source database")?;

    tracing::info!("Connecting to target database {}...", config.target.display());
    let target = connect_with_config(&config.target.to_pg_config("target")?)
        .await
        .context("Failed to connect to target database")?;

    let equivalence = check_databases_equal(
        &source,
        &target,
        schema,
        &config.function_schemas(),
        config.repair_orphan_functions,
    )
    .await?;

    let mut report = VerifyReport {
        equivalence,
        ..VerifyReport::default()
    };

    if !check_data {
        return Ok(report);
    }

    let tables: Vec<String> = crate::migration::list_tables(&source, schema)
        .await
        .context("Failed to list tables from source database")?
        .into_iter()
        .filter(|table| {
            !report
                .equivalence
                .tables
                .missing_in_target
                .iter()
                .any(|missing| &missing.name == table)
        })
        .collect();

    if tables.is_empty() {
        tracing::warn!("⚠ No tables found on both sides to checksum");
        return Ok(report);
    }

    tracing::info!("Checksumming {} table(s)...", tables.len());
    let progress = ProgressBar::new(tables.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    for table in &tables {
        let label = object_label(schema, table);
        progress.set_message(format!("Verifying {}", label));

        match compare_tables(&source, &target, schema, table).await {
            Ok(result) if result.is_valid() => {
                tracing::info!("  ✓ {}: Match ({} rows)", label, result.source_row_count);
                report.checksums.push(result);
            }
            Ok(result) => {
                tracing::error!(
                    "  ✗ {}: MISMATCH (source: {} rows, target: {} rows)",
                    label,
                    result.source_row_count,
                    result.target_row_count
                );
                report.checksums.push(result);
            }
            Err(e) => {
                tracing::error!("  ✗ {}: ERROR - {:#}", label, e);
                report.checksum_errors.push(label);
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message("Verification complete");

    let mismatches = report.checksums.iter().filter(|c| !c.is_valid()).count();
    tracing::info!(
        "Data verification: {} matching, {} mismatched, {} errors",
        report.checksums.len() - mismatches,
        mismatches,
        report.checksum_errors.len()
    );

    Ok(report)
}
