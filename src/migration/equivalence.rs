// ABOUTME: Compares table and function sets between source and target
// ABOUTME: Reports symmetric differences and drops functions that exist only on the target

use super::catalog::MIGRATABLE_FUNCTION_FILTER;
use super::ddl::drop_function;
use crate::error::{describe_pg_error, MigrationError};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tokio_postgres::Client;

/// Identity of a catalog object as compared across instances.
///
/// Tables use `schema` and `name` only. Functions add their identity
/// arguments and full definition, so a changed body counts as a difference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectIdentity {
    pub schema: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip)]
    pub definition: Option<String>,
}

impl ObjectIdentity {
    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            arguments: None,
            definition: None,
        }
    }

    pub fn function(
        schema: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            arguments: Some(arguments.into()),
            definition: Some(definition.into()),
        }
    }

    /// Same schema, name and arguments, ignoring the definition
    fn same_signature(&self, other: &Self) -> bool {
        self.schema == other.schema && self.name == other.name && self.arguments == other.arguments
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arguments {
            Some(arguments) => write!(f, "{}.{}({})", self.schema, self.name, arguments),
            None => write!(f, "{}.{}", self.schema, self.name),
        }
    }
}

/// Symmetric difference of two identity sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectDiff {
    pub missing_in_target: BTreeSet<ObjectIdentity>,
    pub missing_in_source: BTreeSet<ObjectIdentity>,
}

impl ObjectDiff {
    pub fn is_equal(&self) -> bool {
        self.missing_in_target.is_empty() && self.missing_in_source.is_empty()
    }
}

pub fn diff_identities(
    source: &BTreeSet<ObjectIdentity>,
    target: &BTreeSet<ObjectIdentity>,
) -> ObjectDiff {
    ObjectDiff {
        missing_in_target: source.difference(target).cloned().collect(),
        missing_in_source: target.difference(source).cloned().collect(),
    }
}

/// Target-only functions whose signature does not exist on the source at all.
///
/// A function whose body differs from the source shows up on both sides of
/// the diff; it is reported but not dropped.
pub fn orphan_functions(diff: &ObjectDiff) -> Vec<&ObjectIdentity> {
    diff.missing_in_source
        .iter()
        .filter(|target_only| {
            !diff
                .missing_in_target
                .iter()
                .any(|source_only| source_only.same_signature(target_only))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EquivalenceReport {
    pub tables: ObjectDiff,
    /// Function differences as found, before any repair
    pub functions: ObjectDiff,
    pub dropped_functions: Vec<String>,
    pub failed_drops: Vec<MigrationError>,
}

impl EquivalenceReport {
    pub fn tables_equal(&self) -> bool {
        self.tables.is_equal()
    }

    /// True when the function sets matched as found. Orphans dropped by this
    /// check still count as a difference; a later check sees them gone.
    pub fn functions_equal(&self) -> bool {
        self.functions.is_equal()
    }

    pub fn is_equal(&self) -> bool {
        self.tables_equal() && self.functions_equal()
    }
}

async fn fetch_tables(client: &Client, schema: &str) -> Result<BTreeSet<ObjectIdentity>> {
    let rows = client
        .query(
            "SELECT table_schema, table_name
             FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to list tables in schema '{}'", schema))?;

    Ok(rows
        .iter()
        .map(|row| ObjectIdentity::table(row.get::<_, String>(0), row.get::<_, String>(1)))
        .collect())
}

async fn fetch_functions(client: &Client, schemas: &[String]) -> Result<BTreeSet<ObjectIdentity>> {
    let query = format!(
        "SELECT n.nspname,
                p.proname,
                pg_catalog.pg_get_function_identity_arguments(p.oid),
                pg_catalog.pg_get_functiondef(p.oid)
         FROM pg_catalog.pg_proc p
         JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
         WHERE n.nspname = ANY($1)
           AND {}",
        MIGRATABLE_FUNCTION_FILTER
    );

    let rows = client
        .query(&query, &[&schemas])
        .await
        .with_context(|| format!("Failed to list functions in {}", schemas.join(", ")))?;

    Ok(rows
        .iter()
        .map(|row| {
            ObjectIdentity::function(
                row.get::<_, String>(0),
                row.get::<_, String>(1),
                row.get::<_, String>(2),
                row.get::<_, String>(3),
            )
        })
        .collect())
}

/// Compare `schema`'s tables and `function_schemas`' functions between two
/// instances.
///
/// With `repair`, functions that exist only on the target are dropped there.
/// Tables are never touched, and the source is never modified.
///
/// # Errors
///
/// Fails only when a catalog query fails. Differences are in the report.
pub async fn check_databases_equal(
    source: &Client,
    target: &Client,
    schema: &str,
    function_schemas: &[String],
    repair: bool,
) -> Result<EquivalenceReport> {
    tracing::info!("Comparing schema '{}' between source and target...", schema);

    let tables = diff_identities(
        &fetch_tables(source, schema).await.context("source")?,
        &fetch_tables(target, schema).await.context("target")?,
    );
    let functions = diff_identities(
        &fetch_functions(source, function_schemas).await.context("source")?,
        &fetch_functions(target, function_schemas).await.context("target")?,
    );

    for table in &tables.missing_in_target {
        tracing::warn!("  ⚠ Table only on source: {}", table);
    }
    for table in &tables.missing_in_source {
        tracing::warn!("  ⚠ Table only on target: {}", table);
    }
    for function in &functions.missing_in_target {
        tracing::warn!("  ⚠ Function missing or different on target: {}", function);
    }

    let mut report = EquivalenceReport {
        tables,
        functions,
        ..EquivalenceReport::default()
    };

    let orphans: Vec<ObjectIdentity> = orphan_functions(&report.functions)
        .into_iter()
        .cloned()
        .collect();
    for function in &report.functions.missing_in_source {
        if !orphans.contains(function) {
            tracing::warn!("  ⚠ Function differs on target: {}", function);
        }
    }

    for orphan in &orphans {
        let label = orphan.to_string();
        if !repair {
            tracing::warn!("  ⚠ Function only on target: {}", label);
            continue;
        }

        let statement = match drop_function(
            &orphan.schema,
            &orphan.name,
            orphan.arguments.as_deref().unwrap_or_default(),
        ) {
            Ok(statement) => statement,
            Err(e) => {
                report.failed_drops.push(e);
                continue;
            }
        };
        tracing::debug!("{}", statement);

        match target.batch_execute(&statement).await {
            Ok(()) => {
                tracing::info!("  ✓ Dropped function only on target: {}", label);
                report.dropped_functions.push(label);
            }
            Err(e) => {
                tracing::error!("  ✗ Failed to drop {}: {}", label, describe_pg_error(&e));
                report
                    .failed_drops
                    .push(MigrationError::ddl(&label, describe_pg_error(&e)));
            }
        }
    }

    if report.is_equal() {
        tracing::info!("✓ Source and target are equivalent");
    } else {
        tracing::warn!(
            "⚠ Source and target differ (tables equal: {}, functions equal: {})",
            report.tables_equal(),
            report.functions_equal()
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::connect;

    fn tables(names: &[&str]) -> BTreeSet<ObjectIdentity> {
        names.iter().map(|n| ObjectIdentity::table("ad", *n)).collect()
    }

    #[test]
    fn test_missing_table_on_target() {
        let diff = diff_identities(&tables(&["a", "b", "c"]), &tables(&["a", "b"]));
        assert_eq!(diff.missing_in_target, tables(&["c"]));
        assert!(diff.missing_in_source.is_empty());
        assert!(!diff.is_equal());

        let report = EquivalenceReport {
            tables: diff,
            ..EquivalenceReport::default()
        };
        assert!(!report.tables_equal());
        assert!(report.functions_equal());
        assert!(!report.is_equal());
    }

    #[test]
    fn test_identical_sets_are_equal() {
        let mut functions = BTreeSet::new();
        functions.insert(ObjectIdentity::function("ad", "f", "x integer", "CREATE ..."));

        let report = EquivalenceReport {
            tables: diff_identities(&tables(&["a", "b"]), &tables(&["a", "b"])),
            functions: diff_identities(&functions, &functions),
            ..EquivalenceReport::default()
        };
        assert!(report.is_equal());
    }

    #[test]
    fn test_changed_body_is_not_an_orphan() {
        let source: BTreeSet<_> = [ObjectIdentity::function("ad", "f", "", "body one")].into();
        let target: BTreeSet<_> = [
            ObjectIdentity::function("ad", "f", "", "body two"),
            ObjectIdentity::function("ad", "stale", "", "old"),
        ]
        .into();

        let diff = diff_identities(&source, &target);
        let orphans = orphan_functions(&diff);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].name, "stale");
    }

    #[test]
    fn test_dropped_orphans_still_count_as_a_difference() {
        let target: BTreeSet<_> = [ObjectIdentity::function("ad", "stale", "", "old")].into();
        let functions = diff_identities(&BTreeSet::new(), &target);

        let mut report = EquivalenceReport {
            functions,
            ..EquivalenceReport::default()
        };
        assert!(!report.functions_equal());

        report.dropped_functions.push("ad.stale()".to_string());
        assert!(!report.functions_equal());
        assert!(!report.is_equal());

        // What the next check sees once the orphan is gone
        let after_repair = EquivalenceReport {
            functions: diff_identities(&BTreeSet::new(), &BTreeSet::new()),
            ..EquivalenceReport::default()
        };
        assert!(after_repair.functions_equal());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(ObjectIdentity::table("ad", "users").to_string(), "ad.users");
        assert_eq!(
            ObjectIdentity::function("ad", "f", "a integer", "").to_string(),
            "ad.f(a integer)"
        );
    }

    #[tokio::test]
    #[ignore]
    async fn test_orphan_function_is_dropped_from_target() {
        let source_url = std::env::var("TEST_SOURCE_URL").unwrap();
        let target_url = std::env::var("TEST_TARGET_URL").unwrap();
        let source = connect(&source_url).await.unwrap();
        let target = connect(&target_url).await.unwrap();

        let setup = "DROP SCHEMA IF EXISTS porter_equiv_test CASCADE;
                     CREATE SCHEMA porter_equiv_test;
                     CREATE TABLE porter_equiv_test.a (id integer);";
        source.batch_execute(setup).await.unwrap();
        target.batch_execute(setup).await.unwrap();
        target
            .batch_execute(
                "CREATE FUNCTION porter_equiv_test.f() RETURNS integer LANGUAGE sql AS $$ SELECT 1 $$",
            )
            .await
            .unwrap();

        let schemas = vec!["porter_equiv_test".to_string()];
        let report = check_databases_equal(&source, &target, "porter_equiv_test", &schemas, false)
            .await
            .unwrap();
        assert!(!report.is_equal());
        assert!(report.dropped_functions.is_empty());

        let report = check_databases_equal(&source, &target, "porter_equiv_test", &schemas, true)
            .await
            .unwrap();
        assert_eq!(report.dropped_functions, vec!["porter_equiv_test.f()".to_string()]);
        assert!(!report.functions_equal());
        assert!(!report.is_equal());

        let report = check_databases_equal(&source, &target, "porter_equiv_test", &schemas, true)
            .await
            .unwrap();
        assert!(report.dropped_functions.is_empty());
        assert!(report.functions_equal());
        assert!(report.is_equal());

        for client in [&source, &target] {
            client
                .batch_execute("DROP SCHEMA porter_equiv_test CASCADE")
                .await
                .unwrap();
        }
    }
}
