// ABOUTME: Identifier validation and quoting for generated SQL
// ABOUTME: Every catalog name embedded in DDL or COPY statements goes through here

use crate::error::MigrationError;

/// PostgreSQL truncates identifiers at NAMEDATALEN - 1 bytes
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Reject identifiers that cannot be a real catalog name.
///
/// Identifiers cannot be bound as query parameters, so anything that ends up in
/// a generated statement is checked and quoted instead.
pub fn validate_identifier(name: &str) -> Result<(), MigrationError> {
    let reason = if name.is_empty() {
        "identifier cannot be empty"
    } else if name.contains('\0') {
        "identifier contains a null byte"
    } else if name.len() > MAX_IDENTIFIER_BYTES {
        "identifier exceeds 63 bytes"
    } else {
        return Ok(());
    };

    Err(MigrationError::InvalidIdentifier {
        identifier: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> Result<String, MigrationError> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// `"schema"."object"`
pub fn qualify(schema: &str, name: &str) -> Result<String, MigrationError> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(name)?))
}
