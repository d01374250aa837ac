// ABOUTME: Pre-flight validation command for migration readiness
// ABOUTME: Checks connectivity, the source schema, target privileges, and server versions

use crate::config::{ImportMode, MigrationConfig};
use crate::postgres;
use anyhow::{bail, Context, Result};

pub async fn validate(config: &MigrationConfig) -> Result<()> {
    config.validate_for_import()?;
    let schema = &config.schema;

    tracing::info!("Starting validation...");

    // Step 1: Connect to source
    tracing::info!("Connecting to source database {}...", config.source.display());
    let source_client = postgres::connect_with_config(&config.source.to_pg_config("source")?)
        .await
        .context("Failed to connect to source database")?;
    tracing::info!("✓ Connected to source");

    // Step 2: Connect to target
    tracing::info!("Connecting to target database {}...", config.target.display());
    let target_client = postgres::connect_with_config(&config.target.to_pg_config("target")?)
        .await
        .context("Failed to connect to target database")?;
    tracing::info!("✓ Connected to target");

    // Step 3: Source schema
    tracing::info!("Checking source schema '{}'...", schema);
    if !postgres::schema_exists(&source_client, schema).await? {
        bail!("Schema '{}' does not exist on the source database", schema);
    }
    if !postgres::has_schema_usage(&source_client, schema).await? {
        bail!(
            "Source user lacks USAGE on schema '{}'. Grant with: GRANT USAGE ON SCHEMA {} TO <user>;",
            schema,
            schema
        );
    }
    tracing::info!("✓ Source schema is readable");

    // Step 4: Target privileges
    tracing::info!("Checking target privileges...");
    let target_privs = postgres::check_target_privileges(&target_client).await?;
    if !target_privs.allows_schema_reset() {
        bail!("Target user cannot create schemas. Grant with: GRANT CREATE ON DATABASE <db> TO <user>;");
    }
    if config.mode == ImportMode::Replace && postgres::schema_exists(&target_client, schema).await? {
        tracing::warn!(
            "⚠ Schema '{}' exists on the target and will be dropped by a replace-mode migration",
            schema
        );
    }
    tracing::info!("✓ Target has sufficient privileges");

    // Step 5: Check PostgreSQL versions
    tracing::info!("Checking PostgreSQL versions...");
    let source_version = get_pg_version(&source_client).await?;
    let target_version = get_pg_version(&target_client).await?;

    if target_version.major < source_version.major {
        tracing::warn!(
            "⚠ Target ({}.{}) is older than source ({}.{}); some column types or function syntax may not apply",
            target_version.major,
            target_version.minor,
            source_version.major,
            source_version.minor
        );
    } else {
        tracing::info!(
            "✓ Version compatibility confirmed (source {}.{}, target {}.{})",
            source_version.major,
            source_version.minor,
            target_version.major,
            target_version.minor
        );
    }

    tracing::info!("✅ Validation complete - ready for migration");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct PgVersion {
    major: u32,
    minor: u32,
}

fn parse_pg_version(version_str: &str) -> PgVersion {
    // Parse version string like "16.2 (Debian 16.2-1.pgdg120+1)"
    let parts: Vec<&str> = version_str
        .split_whitespace()
        .next()
        .unwrap_or("0.0")
        .split('.')
        .collect();

    let major = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);

    PgVersion { major, minor }
}

async fn get_pg_version(client: &tokio_postgres::Client) -> Result<PgVersion> {
    let row = client
        .query_one("SHOW server_version", &[])
        .await
        .context("Failed to get PostgreSQL version")?;

    Ok(parse_pg_version(&row.get::<_, String>(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    #[test]
    fn test_parse_pg_version() {
        assert_eq!(
            parse_pg_version("16.2 (Debian 16.2-1.pgdg120+1)"),
            PgVersion { major: 16, minor: 2 }
        );
        assert_eq!(parse_pg_version("15beta1"), PgVersion { major: 0, minor: 0 });
    }

    #[tokio::test]
    #[ignore]
    async fn test_validate_with_valid_databases_succeeds() {
        let source = std::env::var("TEST_SOURCE_URL").unwrap();
        let target = std::env::var("TEST_TARGET_URL").unwrap();
        let config = MigrationConfig {
            source: EndpointConfig::from_url(source),
            target: EndpointConfig::from_url(target),
            schema: "public".to_string(),
            mode: ImportMode::Merge,
            ..MigrationConfig::default()
        };

        assert!(validate(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_with_invalid_source_fails() {
        let config = MigrationConfig {
            source: EndpointConfig::from_url("invalid-url"),
            target: EndpointConfig::from_url("postgresql://localhost/db"),
            schema: "ad".to_string(),
            ..MigrationConfig::default()
        };
        assert!(validate(&config).await.is_err());
    }
}
