// ABOUTME: Catalog introspection for the schema being migrated
// ABOUTME: Lists tables, column definitions, and function definitions from pg_catalog

use super::dependencies::DependencyHeuristic;
use anyhow::{Context, Result};
use serde::Serialize;
use tokio_postgres::Client;

/// One column as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    /// `format_type` output, emitted verbatim into DDL
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, or the generation expression when `generated`
    pub default_expr: Option<String>,
    /// `GENERATED ALWAYS AS (...) STORED`; not written by COPY
    pub generated: bool,
}

/// A table and its columns in catalog order. Built once per export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDescriptor {
    /// Columns that COPY reads and writes, in `attnum` order
    pub fn copy_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.generated)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// A function exported from the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDescriptor {
    /// Full `pg_get_functiondef` text
    pub definition: String,
    pub name: String,
    pub schema: String,
    /// `pg_get_function_identity_arguments`, used for DROP FUNCTION
    pub identity_arguments: String,
    /// `pg_get_function_result` on the source
    pub result_type: Option<String>,
    /// Other exported functions this one appears to call. Approximate.
    pub dependency_names: Vec<String>,
}

impl FunctionDescriptor {
    pub fn label(&self) -> String {
        format!("{}.{}({})", self.schema, self.name, self.identity_arguments)
    }
}

/// Shared predicate for functions that take part in a migration: plain
/// functions only (no aggregates, window functions or procedures) and nothing
/// owned by an extension.
pub(crate) const MIGRATABLE_FUNCTION_FILTER: &str = "p.prokind = 'f'
      AND NOT EXISTS (
          SELECT 1 FROM pg_catalog.pg_depend dep
          WHERE dep.classid = 'pg_catalog.pg_proc'::regclass
            AND dep.objid = p.oid
            AND dep.deptype = 'e'
      )";

/// List base tables in a schema, sorted by name
pub async fn list_tables(client: &Client, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT table_name
             FROM information_schema.tables
             WHERE table_schema = $1
               AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            &[&schema],
        )
        .await
        .context(format!("Failed to list tables in schema '{}'", schema))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// List the columns of one table in `attnum` order
pub async fn list_columns(client: &Client, schema: &str, table: &str) -> Result<Vec<ColumnDef>> {
    let rows = client
        .query(
            "SELECT a.attname,
                    pg_catalog.format_type(a.atttypid, a.atttypmod),
                    NOT a.attnotnull,
                    pg_catalog.pg_get_expr(d.adbin, d.adrelid),
                    a.attgenerated = 's'
             FROM pg_catalog.pg_attribute a
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             LEFT JOIN pg_catalog.pg_attrdef d
                ON d.adrelid = a.attrelid AND d.adnum = a.attnum
             WHERE n.nspname = $1
               AND c.relname = $2
               AND a.attnum > 0
               AND NOT a.attisdropped
             ORDER BY a.attnum",
            &[&schema, &table],
        )
        .await
        .context(format!("Failed to list columns for {}.{}", schema, table))?;

    let columns = rows
        .iter()
        .map(|row| ColumnDef {
            name: row.get(0),
            data_type: row.get(1),
            nullable: row.get(2),
            default_expr: row.get(3),
            generated: row.get(4),
        })
        .collect();

    Ok(columns)
}

/// Build a full table descriptor
pub async fn describe_table(client: &Client, schema: &str, table: &str) -> Result<TableDescriptor> {
    let columns = list_columns(client, schema, table).await?;
    Ok(TableDescriptor {
        schema: schema.to_string(),
        name: table.to_string(),
        columns,
    })
}

/// List migratable functions in the given schemas with their definitions
///
/// `dependency_names` is filled in by `heuristic` against the set of exported
/// function names. Results are ordered by schema, name and identity arguments.
pub async fn list_functions(
    client: &Client,
    schemas: &[String],
    heuristic: &dyn DependencyHeuristic,
) -> Result<Vec<FunctionDescriptor>> {
    let query = format!(
        "SELECT pg_catalog.pg_get_functiondef(p.oid),
                p.proname,
                n.nspname,
                pg_catalog.pg_get_function_identity_arguments(p.oid),
                pg_catalog.pg_get_function_result(p.oid)
         FROM pg_catalog.pg_proc p
         JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
         WHERE n.nspname = ANY($1)
           AND {}
         ORDER BY n.nspname, p.proname, 4",
        MIGRATABLE_FUNCTION_FILTER
    );

    let rows = client
        .query(&query, &[&schemas])
        .await
        .context(format!("Failed to list functions in {}", schemas.join(", ")))?;

    let mut functions: Vec<FunctionDescriptor> = rows
        .iter()
        .map(|row| FunctionDescriptor {
            definition: row.get(0),
            name: row.get(1),
            schema: row.get(2),
            identity_arguments: row.get(3),
            result_type: row.get(4),
            dependency_names: Vec::new(),
        })
        .collect();

    let names: Vec<String> = functions.iter().map(|f| f.name.clone()).collect();
    for function in &mut functions {
        function.dependency_names =
            heuristic.dependencies(&function.name, &function.definition, &names);
    }

    tracing::debug!(
        "Exported {} function(s) from {}",
        functions.len(),
        schemas.join(", ")
    );

    Ok(functions)
}
