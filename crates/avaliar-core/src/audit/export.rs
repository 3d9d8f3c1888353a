//! Compliance audit export with a SHA-256 sidecar digest.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use avaliar_state::AuditLogEntry;

use crate::domain::{EngineError, Result};

/// Receipt for a completed audit export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditExportReceipt {
    pub path: PathBuf,
    pub digest: String,
    pub entry_count: usize,
    pub exported_at: DateTime<Utc>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn io_error(path: &Path, err: std::io::Error) -> EngineError {
    EngineError::Storage(format!("audit export {}: {err}", path.display()))
}

/// Path of the digest written next to an export.
pub fn digest_path(export: &Path) -> PathBuf {
    let mut name: OsString = export.as_os_str().to_owned();
    name.push(".digest");
    PathBuf::from(name)
}

/// Serialize entries as a pretty JSON array.
pub fn export_json(entries: &[AuditLogEntry]) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(entries).map_err(|e| EngineError::Storage(e.to_string()))
}

/// A label names one directory directly under the export root.
fn check_label(label: &str) -> Result<()> {
    let mut components = Path::new(label).components();
    let single_dir = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_dir || label.contains(['/', '\\']) {
        return Err(EngineError::invalid(
            "label",
            "must be a single directory name without separators or parent references",
        ));
    }
    Ok(())
}

/// Write `entries` to `dir/<label>/audit-export-<timestamp>.json` plus its
/// `.digest` sidecar.
pub fn write_audit_export(
    label: &str,
    entries: &[AuditLogEntry],
    dir: &Path,
) -> Result<AuditExportReceipt> {
    check_label(label)?;
    let export_dir = dir.join(label);
    std::fs::create_dir_all(&export_dir).map_err(|e| io_error(&export_dir, e))?;

    let exported_at = Utc::now();
    let filename = format!(
        "audit-export-{}.json",
        exported_at.format("%Y%m%dT%H%M%S%.3fZ")
    );
    let path = export_dir.join(filename);

    let bytes = export_json(entries)?;
    let digest = sha256_hex(&bytes);
    std::fs::write(&path, &bytes).map_err(|e| io_error(&path, e))?;
    let sidecar = digest_path(&path);
    std::fs::write(&sidecar, digest.as_bytes()).map_err(|e| io_error(&sidecar, e))?;

    Ok(AuditExportReceipt {
        path,
        digest,
        entry_count: entries.len(),
        exported_at,
    })
}

/// Check an export against its sidecar. A missing sidecar fails verification.
pub fn verify_audit_export(path: &Path) -> Result<bool> {
    let sidecar = digest_path(path);
    if !sidecar.exists() {
        return Ok(false);
    }
    let data = std::fs::read(path).map_err(|e| io_error(path, e))?;
    let expected = std::fs::read_to_string(&sidecar).map_err(|e| io_error(&sidecar, e))?;
    Ok(expected.trim() == sha256_hex(&data))
}
