// ABOUTME: Bulk row transfer through gzip-compressed COPY CSV artifacts
// ABOUTME: Streams COPY TO STDOUT into files and files back into COPY FROM STDIN

use crate::error::{describe_pg_error, MigrationError};
use crate::postgres::{qualify, quote_ident};
use crate::utils::object_label;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio_postgres::{Client, CopyInSink, Transaction};

/// Decompressed bytes sent to the server per COPY message
const CHUNK_SIZE: usize = 64 * 1024;

/// Artifact location for a table: `<work_dir>/<schema>.<table>.csv.gz`
pub fn artifact_path(work_dir: &Path, schema: &str, table: &str) -> PathBuf {
    work_dir.join(format!("{}.{}.csv.gz", schema, table))
}

/// `"schema"."table" ("a", "b")` for a COPY statement. An empty column list
/// leaves the list off so every column is copied.
fn copy_target(schema: &str, table: &str, columns: &[String]) -> Result<String, MigrationError> {
    let target = qualify(schema, table)?;
    if columns.is_empty() {
        return Ok(target);
    }
    let quoted = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{} ({})", target, quoted.join(", ")))
}

/// Gzip writer for COPY output chunks
pub struct ArtifactWriter {
    encoder: GzEncoder<BufWriter<File>>,
}

impl ArtifactWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            encoder: GzEncoder::new(BufWriter::new(file), Compression::default()),
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.encoder.write_all(chunk)
    }

    /// Write the gzip trailer and flush to disk
    pub fn finish(self) -> io::Result<()> {
        let mut inner = self.encoder.finish()?;
        inner.flush()
    }
}

/// Reads an artifact back as decompressed chunks
pub struct ArtifactReader {
    decoder: GzDecoder<BufReader<File>>,
    buffer: Vec<u8>,
}

impl ArtifactReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            decoder: GzDecoder::new(BufReader::new(file)),
            buffer: vec![0u8; CHUNK_SIZE],
        })
    }

    /// Next chunk of CSV bytes, `None` at end of file
    pub fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let read = self.decoder.read(&mut self.buffer)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buffer[..read])))
    }
}

/// Stream a table's rows from the source into its artifact file.
///
/// `columns` names the columns written, in order; generated columns must be
/// left out so the file loads back with the same list. On failure the partial
/// file is removed and the error is returned for the caller to record; the
/// table is then simply absent from the artifact map.
pub async fn export_table(
    client: &Client,
    schema: &str,
    table: &str,
    columns: &[String],
    work_dir: &Path,
) -> Result<PathBuf, MigrationError> {
    let label = object_label(schema, table);
    let path = artifact_path(work_dir, schema, table);
    let statement = format!(
        "COPY {} TO STDOUT WITH CSV",
        copy_target(schema, table, columns)?
    );
    tracing::debug!("{}", statement);

    match write_copy_out(client, &statement, &path).await {
        Ok(bytes) => {
            tracing::debug!("Exported {} ({} bytes of CSV) to {}", label, bytes, path.display());
            Ok(path)
        }
        Err(message) => {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to remove partial export {}: {}", path.display(), e);
                }
            }
            Err(MigrationError::transfer(label, message))
        }
    }
}

async fn write_copy_out(client: &Client, statement: &str, path: &Path) -> Result<u64, String> {
    let stream = client
        .copy_out(statement)
        .await
        .map_err(|e| format!("starting COPY: {}", describe_pg_error(&e)))?;
    let mut writer =
        ArtifactWriter::create(path).map_err(|e| format!("creating {}: {}", path.display(), e))?;

    tokio::pin!(stream);
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("reading COPY data: {}", describe_pg_error(&e)))?;
        writer
            .write_chunk(&chunk)
            .map_err(|e| format!("writing {}: {}", path.display(), e))?;
        total += chunk.len() as u64;
    }

    writer
        .finish()
        .map_err(|e| format!("finishing {}: {}", path.display(), e))?;
    Ok(total)
}

/// Stream an artifact into a table inside the caller's transaction.
///
/// The file must hold CSV rows for `columns`, in that order, as written by
/// [`export_table`]. Returns the row count reported by the server.
pub async fn import_table(
    transaction: &Transaction<'_>,
    schema: &str,
    table: &str,
    columns: &[String],
    path: &Path,
) -> Result<u64, MigrationError> {
    let label = object_label(schema, table);
    let statement = format!(
        "COPY {} FROM STDIN WITH CSV",
        copy_target(schema, table, columns)?
    );
    tracing::debug!("{}", statement);

    let mut reader = ArtifactReader::open(path)
        .map_err(|e| MigrationError::transfer(&label, format!("opening {}: {}", path.display(), e)))?;

    let sink: CopyInSink<Bytes> = transaction.copy_in(&statement).await.map_err(|e| {
        MigrationError::transfer(&label, format!("starting COPY: {}", describe_pg_error(&e)))
    })?;
    tokio::pin!(sink);

    loop {
        let chunk = reader.next_chunk().map_err(|e| {
            MigrationError::transfer(&label, format!("reading {}: {}", path.display(), e))
        })?;
        let Some(chunk) = chunk else { break };
        sink.send(chunk).await.map_err(|e| {
            MigrationError::transfer(&label, format!("sending COPY data: {}", describe_pg_error(&e)))
        })?;
    }

    sink.as_mut().finish().await.map_err(|e| {
        MigrationError::transfer(&label, format!("finishing COPY: {}", describe_pg_error(&e)))
    })
}

/// Remove exported artifacts. Failures are logged, never returned.
pub fn delete_artifacts(artifacts: &BTreeMap<String, PathBuf>) -> usize {
    let mut deleted = 0;
    for path in artifacts.values() {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!("Deleted {}", path.display());
                deleted += 1;
            }
            Err(e) => tracing::warn!("⚠ Failed to delete {}: {}", path.display(), e),
        }
    }
    deleted
}
