//! Scene files: the replication protocol written to disk.
//!
//! ```text
//! #scenelink
//! SEND_GEOM { name cube1 ... }
//! CREATE { name cube1 }
//! CHNG_IO { basename { } }
//! CHNG_CAM { ... }
//! DONE { }
//! ```
//!
//! A file is one context behind a header token; there is no length
//! framing. Saving a full scene writes the same records a joining peer
//! receives, saving incrementally writes the update records, and loading
//! runs the ordinary decode loop. Files whose first token is not the header
//! are offered to a chain of alternate-format loaders.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use scenelink_core::{DependencyOracle, SceneStore};
use thiserror::Error;

use crate::record::Record;
use crate::session::{ContextError, ContextReport, ReplicationSession, SnapshotTarget, Source};

/// First token of every scene file.
pub const FILE_HEADER: &str = "#scenelink";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot open {path}: {reason}")]
    StreamUnavailable { path: PathBuf, reason: String },

    #[error("{path}: unrecognized format (starts with '{header}') and no alternate loader accepted it")]
    UnrecognizedFormat { path: PathBuf, header: String },

    #[error("error reading {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Loads scene files in some other format.
pub trait SceneLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Load `path` into `store`. `Ok(false)` means the format is not this
    /// loader's.
    fn load(&self, path: &Path, bytes: &[u8], store: &mut SceneStore) -> Result<bool, LoadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Native(ContextReport),
    Fallback { loader: String },
}

/// Write the full scene to `path`. Returns the number of records written.
pub fn save_full(
    path: &Path,
    store: &SceneStore,
    session: &ReplicationSession,
    oracle: &dyn DependencyOracle,
) -> Result<usize, SaveError> {
    let records = session.full_snapshot(store, oracle, SnapshotTarget::File);
    write_file(path, &records)
}

/// Write the incremental update records to `path`.
pub fn save_incremental(
    path: &Path,
    store: &SceneStore,
    session: &ReplicationSession,
) -> Result<usize, SaveError> {
    let records = session.incremental(store);
    write_file(path, &records)
}

fn write_file(path: &Path, records: &[Record]) -> Result<usize, SaveError> {
    let io_err = |source| SaveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    write_context(&mut out, records).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    log::info!("saved {} records to {}", records.len(), path.display());
    Ok(records.len())
}

/// Write the header and `records` to `out`.
pub fn write_context(out: &mut impl Write, records: &[Record]) -> std::io::Result<()> {
    writeln!(out, "{FILE_HEADER}")?;
    for record in records {
        writeln!(out, "{}", record.encode())?;
    }
    Ok(())
}

/// Load a scene file into `store`.
pub fn load(
    path: &Path,
    store: &mut SceneStore,
    session: &mut ReplicationSession,
    loaders: &[Box<dyn SceneLoader>],
) -> Result<LoadOutcome, LoadError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => LoadError::StreamUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
        _ => LoadError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    if let Some(body) = native_body(&bytes) {
        let body = std::str::from_utf8(body).map_err(|e| LoadError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let report = session.apply_context(store, body, Source::File)?;
        log::info!("loaded {} records from {}", report.records, path.display());
        return Ok(LoadOutcome::Native(report));
    }

    for loader in loaders {
        if loader.load(path, &bytes, store)? {
            log::info!("loaded {} with {}", path.display(), loader.name());
            return Ok(LoadOutcome::Fallback {
                loader: loader.name().to_string(),
            });
        }
        log::debug!("{} declined {}", loader.name(), path.display());
    }

    let header: String = String::from_utf8_lossy(&bytes[..bytes.len().min(16)])
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    Err(LoadError::UnrecognizedFormat {
        path: path.to_path_buf(),
        header,
    })
}

/// The part after the header, if `bytes` starts with it.
fn native_body(bytes: &[u8]) -> Option<&[u8]> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = bytes[start..].strip_prefix(FILE_HEADER.as_bytes())?;
    match rest.first() {
        None => Some(rest),
        Some(b) if b.is_ascii_whitespace() => Some(rest),
        Some(_) => None,
    }
}
