// ABOUTME: PostgreSQL utilities module
// ABOUTME: Exports connection management, identifier quoting, and privilege checks

pub mod connection;
pub mod identifier;
pub mod privileges;

pub use connection::{connect, connect_with_config};
pub use identifier::{qualify, quote_ident, validate_identifier};
pub use privileges::{
    check_target_privileges, has_schema_usage, schema_exists, PrivilegeCheck,
};
