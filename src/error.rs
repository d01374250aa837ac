// ABOUTME: Per-object failure taxonomy for schema migration runs
// ABOUTME: Failures are contained to one table or function and reported as data

use serde::Serialize;
use thiserror::Error;

/// A failure scoped to a single migrated object.
///
/// Run-fatal problems (connections, configuration, schema reset) travel as
/// `anyhow::Error`. Everything in this enum is recorded on the outcome of the
/// table or function it belongs to and the batch keeps going.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationError {
    /// Catalog introspection failed for one object
    #[error("catalog query failed for {object}: {message}")]
    MetadataQuery { object: String, message: String },

    /// Function text did not match `CREATE [OR REPLACE] FUNCTION name(args) RETURNS type`
    #[error("could not extract signature from function {function}")]
    SignatureExtraction { function: String },

    /// COPY export or import failed (I/O, permissions, malformed rows)
    #[error("bulk transfer failed for table {table}: {message}")]
    BulkTransfer { table: String, message: String },

    /// CREATE TABLE, DROP FUNCTION or stub creation failed
    #[error("DDL failed for {object}: {message}")]
    DdlApplication { object: String, message: String },

    /// Function install kept hitting a return type incompatibility
    #[error("return type conflict installing {function}: {message}")]
    ReturnTypeConflict { function: String, message: String },

    /// Identifier rejected before being embedded into SQL
    #[error("invalid identifier {identifier:?}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },
}

impl MigrationError {
    pub fn metadata(object: impl Into<String>, message: impl ToString) -> Self {
        Self::MetadataQuery {
            object: object.into(),
            message: message.to_string(),
        }
    }

    pub fn transfer(table: impl Into<String>, message: impl ToString) -> Self {
        Self::BulkTransfer {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn ddl(object: impl Into<String>, message: impl ToString) -> Self {
        Self::DdlApplication {
            object: object.into(),
            message: message.to_string(),
        }
    }

    /// Schema-qualified name of the object this failure belongs to
    pub fn object(&self) -> &str {
        match self {
            Self::MetadataQuery { object, .. } | Self::DdlApplication { object, .. } => object,
            Self::SignatureExtraction { function } | Self::ReturnTypeConflict { function, .. } => {
                function
            }
            Self::BulkTransfer { table, .. } => table,
            Self::InvalidIdentifier { identifier, .. } => identifier,
        }
    }
}

/// Render a driver error with the server message when there is one.
///
/// `Display` on `tokio_postgres::Error` hides the server text behind "db error".
pub fn describe_pg_error(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_returns_scoped_name() {
        let err = MigrationError::transfer("ad.users", "disk full");
        assert_eq!(err.object(), "ad.users");
        assert_eq!(
            err.to_string(),
            "bulk transfer failed for table ad.users: disk full"
        );

        let err = MigrationError::SignatureExtraction {
            function: "ad.broken".to_string(),
        };
        assert_eq!(err.object(), "ad.broken");
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let err = MigrationError::ddl("ad.orders", "relation already exists");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "ddl_application");
        assert_eq!(json["object"], "ad.orders");
    }
}
