// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Exports migrate, validate, and verify commands

pub mod migrate;
pub mod validate;
pub mod verify;

pub use migrate::{migrate, MigrationReport};
pub use validate::validate;
pub use verify::{verify, VerifyReport};
