// ABOUTME: DDL synthesis from catalog metadata and function signature extraction
// ABOUTME: Produces CREATE TABLE text, function stubs, and DROP FUNCTION statements

use super::catalog::{ColumnDef, TableDescriptor};
use crate::error::MigrationError;
use crate::postgres::{qualify, quote_ident};
use regex::Regex;
use std::sync::OnceLock;

/// Argument list and return type pulled out of a function definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Name as written in the definition, possibly schema-qualified and quoted
    pub name: String,
    /// Text between the argument parentheses, defaults included
    pub arg_list: String,
    pub return_type: String,
}

/// Build a `CREATE TABLE` statement for a table descriptor.
///
/// Columns keep catalog order and each gets exactly one `NULL` / `NOT NULL`.
/// Types and default expressions are emitted as the catalog reported them.
/// Generated columns carry their expression as `GENERATED ALWAYS AS (...) STORED`.
///
/// ```
/// # use pg_schema_porter::migration::{ColumnDef, TableDescriptor, synthesize_create_table};
/// let table = TableDescriptor {
///     schema: "ad".to_string(),
///     name: "users".to_string(),
///     columns: vec![ColumnDef {
///         name: "id".to_string(),
///         data_type: "integer".to_string(),
///         nullable: false,
///         default_expr: None,
///         generated: false,
///     }],
/// };
/// assert_eq!(
///     synthesize_create_table(&table).unwrap(),
///     "CREATE TABLE \"ad\".\"users\" (\n    \"id\" integer NOT NULL\n)"
/// );
/// ```
pub fn synthesize_create_table(table: &TableDescriptor) -> Result<String, MigrationError> {
    let columns = table
        .columns
        .iter()
        .map(column_ddl)
        .collect::<Result<Vec<_>, _>>()?;

    let mut ddl = format!("CREATE TABLE {} (\n", qualify(&table.schema, &table.name)?);
    if !columns.is_empty() {
        ddl.push_str(&columns.join(",\n"));
        ddl.push('\n');
    }
    ddl.push(')');
    Ok(ddl)
}

fn column_ddl(column: &ColumnDef) -> Result<String, MigrationError> {
    let mut ddl = format!("    {} {}", quote_ident(&column.name)?, column.data_type);
    ddl.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(expr) = column.default_expr.as_deref().filter(|d| !d.is_empty()) {
        if column.generated {
            ddl.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr));
        } else {
            ddl.push_str(" DEFAULT ");
            ddl.push_str(expr);
        }
    }
    Ok(ddl)
}

fn header_pattern() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"(?is)\bCREATE\s+(?:OR\s+REPLACE\s+)?FUNCTION\s+(.+?)\s*\(")
            .expect("function header pattern is valid")
    })
}

fn returns_pattern() -> &'static Regex {
    static RETURNS: OnceLock<Regex> = OnceLock::new();
    RETURNS.get_or_init(|| {
        Regex::new(r"(?is)^\s*RETURNS\s+(.+?)\s+(?:AS|LANGUAGE)\b")
            .expect("function returns pattern is valid")
    })
}

/// Pull `name(args) RETURNS type` out of a `CREATE [OR REPLACE] FUNCTION` text.
///
/// Case-insensitive. The return type is matched non-greedily up to the next
/// `AS` or `LANGUAGE` keyword. Argument parentheses are matched with nesting
/// so `numeric(10,2)` and `DEFAULT '('` do not end the list early.
pub fn extract_signature(definition: &str) -> Option<FunctionSignature> {
    let header = header_pattern().captures(definition)?;
    let name = header.get(1)?.as_str().trim().to_string();
    let args_start = header.get(0)?.end();

    let args_len = closing_paren(&definition[args_start..])?;
    let arg_list = definition[args_start..args_start + args_len].trim().to_string();

    let rest = &definition[args_start + args_len + 1..];
    let returns = returns_pattern().captures(rest)?;
    let return_type = returns.get(1)?.as_str().trim().to_string();

    Some(FunctionSignature {
        name,
        arg_list,
        return_type,
    })
}

/// Byte offset of the `)` closing an already-opened parenthesis
fn closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') if depth == 0 => return Some(idx),
            (None, ')') => depth -= 1,
            _ => {}
        }
    }
    None
}

/// `extract_signature` as a per-function result
pub fn require_signature(
    definition: &str,
    function: &str,
) -> Result<FunctionSignature, MigrationError> {
    extract_signature(definition).ok_or_else(|| MigrationError::SignatureExtraction {
        function: function.to_string(),
    })
}

/// `DROP FUNCTION IF EXISTS ... CASCADE` for one overload
pub fn drop_function_cascade(
    schema: &str,
    name: &str,
    identity_arguments: &str,
) -> Result<String, MigrationError> {
    Ok(format!(
        "DROP FUNCTION IF EXISTS {}({}) CASCADE",
        qualify(schema, name)?,
        identity_arguments
    ))
}

/// Plain `DROP FUNCTION` for one overload; fails if anything depends on it
pub fn drop_function(
    schema: &str,
    name: &str,
    identity_arguments: &str,
) -> Result<String, MigrationError> {
    Ok(format!(
        "DROP FUNCTION {}({})",
        qualify(schema, name)?,
        identity_arguments
    ))
}

/// Placeholder function with the real signature and a trivial body.
///
/// Scalar returns get `SELECT NULL::<type>`. Set-returning and trigger
/// functions cannot be written that way in SQL, so they get a PL/pgSQL body.
pub fn stub_function(
    schema: &str,
    name: &str,
    arg_list: &str,
    return_type: &str,
) -> Result<String, MigrationError> {
    let normalized = return_type.trim().to_ascii_lowercase();
    let (language, body) = if normalized == "trigger" || normalized == "event_trigger" {
        ("plpgsql", "BEGIN RETURN NULL; END;".to_string())
    } else if normalized.starts_with("setof ") || normalized.starts_with("table") {
        ("plpgsql", "BEGIN RETURN; END;".to_string())
    } else {
        ("sql", format!("SELECT NULL::{};", return_type.trim()))
    };

    Ok(format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS {} LANGUAGE {} AS $porter_stub${}$porter_stub$",
        qualify(schema, name)?,
        arg_list,
        return_type.trim(),
        language,
        body
    ))
}
