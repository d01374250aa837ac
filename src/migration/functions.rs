// ABOUTME: Two-phase function installation on the target
// ABOUTME: Stubs every signature first, then installs real bodies with a bounded conflict retry

use super::catalog::FunctionDescriptor;
use super::ddl::{drop_function_cascade, require_signature, stub_function, FunctionSignature};
use super::dependencies::install_order;
use crate::error::{describe_pg_error, MigrationError};
use anyhow::Result;
use serde::Serialize;
use tokio_postgres::{Client, Transaction};

/// Drop-and-retry rounds allowed per function after a return type conflict
pub const MAX_CONFLICT_RETRIES: u32 = 1;

const SAVEPOINT_NAME: &str = "savepoint_before_function";

/// Outcome of creating one placeholder function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubOutcome {
    pub function: String,
    /// Return type the stub was created with
    pub return_type: Option<String>,
    pub error: Option<MigrationError>,
}

impl StubOutcome {
    pub fn is_created(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FunctionStatus {
    /// `attempts` counts executions of the definition, retries included
    Installed { attempts: u32 },
    Unresolved { error: MigrationError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionOutcome {
    pub function: String,
    #[serde(flatten)]
    pub status: FunctionStatus,
}

impl FunctionOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self.status, FunctionStatus::Installed { .. })
    }
}

/// Server messages meaning the existing object has an incompatible return type
pub fn is_return_type_conflict(message: &str) -> bool {
    message.contains("return type mismatch")
        || message.contains("cannot change return type of existing function")
}

/// What to do after an install attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Roll back to the savepoint, drop the function by signature, run it again
    DropAndRetry,
    /// Leave the function unresolved
    GiveUp,
}

/// Per-function retry bookkeeping for the install phase.
///
/// Only return type conflicts are retried, and at most
/// `MAX_CONFLICT_RETRIES` times, so install always terminates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallAttempts {
    attempts: u32,
    conflict_retries: u32,
}

impl InstallAttempts {
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_failure(&mut self, message: &str) -> NextStep {
        if is_return_type_conflict(message) && self.conflict_retries < MAX_CONFLICT_RETRIES {
            self.conflict_retries += 1;
            NextStep::DropAndRetry
        } else {
            NextStep::GiveUp
        }
    }
}

/// Return type to give a stub, best source first
fn choose_stub_return_type(
    target_result: Option<String>,
    function: &FunctionDescriptor,
    signature: &FunctionSignature,
) -> String {
    target_result
        .or_else(|| function.result_type.clone())
        .unwrap_or_else(|| signature.return_type.clone())
}

/// Phase one: give every exported function a placeholder on the target.
///
/// For each function, in its own transaction: extract the signature, look up
/// the target's result type for that identity, drop any existing overload with
/// CASCADE, and create a stub with the same arguments and return type. After
/// this every signature resolves, so real bodies can reference each other in
/// any order.
pub async fn install_stubs(
    client: &mut Client,
    functions: &[FunctionDescriptor],
) -> Result<Vec<StubOutcome>> {
    tracing::info!("Creating {} function stub(s)...", functions.len());

    let mut outcomes = Vec::with_capacity(functions.len());
    for function in functions {
        let label = function.label();
        let outcome = match create_stub(client, function).await {
            Ok(return_type) => {
                tracing::info!("  ✓ Stub for {} created", label);
                StubOutcome {
                    function: label,
                    return_type: Some(return_type),
                    error: None,
                }
            }
            Err(error) => {
                tracing::error!("  ✗ Error creating stub for {}: {}", label, error);
                StubOutcome {
                    function: label,
                    return_type: None,
                    error: Some(error),
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

async fn create_stub(
    client: &mut Client,
    function: &FunctionDescriptor,
) -> Result<String, MigrationError> {
    let label = function.label();
    let signature = require_signature(&function.definition, &label)?;

    let transaction = client
        .transaction()
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    let existing = transaction
        .query_opt(
            "SELECT pg_catalog.pg_get_function_result(p.oid)
             FROM pg_catalog.pg_proc p
             JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
             WHERE n.nspname = $1
               AND p.proname = $2
               AND pg_catalog.pg_get_function_identity_arguments(p.oid) = $3",
            &[&function.schema, &function.name, &function.identity_arguments],
        )
        .await
        .map_err(|e| MigrationError::metadata(&label, describe_pg_error(&e)))?
        .and_then(|row| row.get::<_, Option<String>>(0));

    let return_type = choose_stub_return_type(existing, function, &signature);

    let drop = drop_function_cascade(&function.schema, &function.name, &function.identity_arguments)?;
    let stub = stub_function(
        &function.schema,
        &function.name,
        &signature.arg_list,
        &return_type,
    )?;
    tracing::debug!("{}", drop);
    tracing::debug!("{}", stub);

    transaction
        .batch_execute(&drop)
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;
    transaction
        .batch_execute(&stub)
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;
    transaction
        .commit()
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    Ok(return_type)
}

/// Phase two: run every original definition.
///
/// Functions go dependencies-first. Each one gets a transaction and a
/// savepoint before every attempt. A return type conflict rolls back to the
/// savepoint, drops the function by signature and tries again, bounded by
/// [`MAX_CONFLICT_RETRIES`]. Any other failure leaves that function
/// unresolved and moves on.
pub async fn install_functions(
    client: &mut Client,
    functions: &[FunctionDescriptor],
) -> Result<Vec<FunctionOutcome>> {
    tracing::info!("Installing {} function definition(s)...", functions.len());

    let mut outcomes = Vec::with_capacity(functions.len());
    for idx in install_order(functions) {
        let function = &functions[idx];
        let label = function.label();

        let status = match install_one(client, function).await {
            Ok(attempts) => {
                tracing::info!("  ✓ Function imported successfully: {}", label);
                FunctionStatus::Installed { attempts }
            }
            Err(error) => {
                tracing::error!("  ✗ Error importing function {}: {}", label, error);
                FunctionStatus::Unresolved { error }
            }
        };

        outcomes.push(FunctionOutcome {
            function: label,
            status,
        });
    }

    Ok(outcomes)
}

async fn install_one(client: &mut Client, function: &FunctionDescriptor) -> Result<u32, MigrationError> {
    let label = function.label();
    let mut transaction = client
        .transaction()
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    let mut attempts = InstallAttempts::default();
    loop {
        attempts.begin_attempt();
        let message = match attempt_install(&mut transaction, &function.definition).await {
            Ok(()) => break,
            Err(message) => message,
        };

        match attempts.on_failure(&message) {
            NextStep::DropAndRetry => {
                // The conflicting object is dropped by signature, so the text must still parse
                require_signature(&function.definition, &label)?;
                let drop = drop_function_cascade(
                    &function.schema,
                    &function.name,
                    &function.identity_arguments,
                )?;
                transaction
                    .batch_execute(&drop)
                    .await
                    .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;
                tracing::warn!(
                    "  ⚠ Deleted function with return type mismatch: {}, retrying",
                    label
                );
            }
            NextStep::GiveUp if is_return_type_conflict(&message) => {
                return Err(MigrationError::ReturnTypeConflict {
                    function: label,
                    message,
                });
            }
            NextStep::GiveUp => return Err(MigrationError::ddl(&label, message)),
        }
    }

    transaction
        .commit()
        .await
        .map_err(|e| MigrationError::ddl(&label, describe_pg_error(&e)))?;

    Ok(attempts.attempts())
}

/// Run a definition behind a savepoint; on failure the savepoint is rolled
/// back so the enclosing transaction stays usable.
async fn attempt_install(transaction: &mut Transaction<'_>, definition: &str) -> Result<(), String> {
    let savepoint = transaction
        .savepoint(SAVEPOINT_NAME)
        .await
        .map_err(|e| describe_pg_error(&e))?;

    match savepoint.batch_execute(definition).await {
        Ok(()) => savepoint.commit().await.map_err(|e| describe_pg_error(&e)),
        Err(e) => {
            let message = describe_pg_error(&e);
            savepoint
                .rollback()
                .await
                .map_err(|e| describe_pg_error(&e))?;
            Err(message)
        }
    }
}
