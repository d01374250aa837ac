// ABOUTME: Schema migration engine: catalog reading, DDL, bulk transfer, import and functions
// ABOUTME: Also compares source and target for equivalence after a run

pub mod catalog;
pub mod checksum;
pub mod ddl;
pub mod dependencies;
pub mod equivalence;
pub mod export;
pub mod functions;
pub mod importer;
pub mod transfer;

pub use catalog::{
    describe_table, list_columns, list_functions, list_tables, ColumnDef, FunctionDescriptor,
    TableDescriptor,
};
pub use checksum::{compare_tables, compute_table_checksum, ChecksumResult};
pub use ddl::{extract_signature, synthesize_create_table, FunctionSignature};
pub use dependencies::{install_order, DependencyHeuristic, TextContainment};
pub use equivalence::{check_databases_equal, EquivalenceReport, ObjectDiff, ObjectIdentity};
pub use export::{export_schema, SchemaExport};
pub use functions::{
    install_functions, install_stubs, FunctionOutcome, FunctionStatus, StubOutcome,
    MAX_CONFLICT_RETRIES,
};
pub use importer::{import_schema, TableOutcome, TableStatus};
pub use transfer::{delete_artifacts, export_table, import_table};
