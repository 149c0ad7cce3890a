// crates/expunge-engine/src/artifacts.rs
// ============================================================================
// Module: Artifact Persistence
// Description: Per-run artifact files with containment and read caps.
// Purpose: Freeze task outputs on disk and guard every path-based read.
// Dependencies: expunge-core, serde_json, uuid
// ============================================================================

//! ## Overview
//! Artifacts live under `<artifacts_root>/<run_id>/<artifact_id>.{json,txt}`
//! with a tracking row in the store. Every read by path is resolved beneath
//! the artifacts root first — traversal is refused before the filesystem is
//! touched — and capped in size.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use expunge_core::ArtifactId;
use expunge_core::ArtifactRecord;
use expunge_core::RunId;
use expunge_core::Store;
use expunge_core::StoreError;
use expunge_core::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default cap on artifact content served to API callers.
pub const MAX_ARTIFACT_READ_BYTES: u64 = 1_000_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Artifact persistence and read errors.
///
/// # Invariants
/// - Variants are stable for mapping onto API status codes.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem failure.
    #[error("artifact io error: {0}")]
    Io(String),
    /// Path escapes the artifacts root.
    #[error("artifact path rejected: {0}")]
    PathRejected(String),
    /// Content exceeds the read cap.
    #[error("artifact too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: u64,
        /// Actual file size in bytes.
        actual_bytes: u64,
    },
    /// Artifact file is missing on disk.
    #[error("artifact file missing: {0}")]
    Missing(String),
    /// Stored content failed to decode.
    #[error("artifact decode failed: {0}")]
    Decode(String),
    /// Store failure while recording the artifact row.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Persistence
// ============================================================================

/// Persists a task output (or other payload) as a run artifact.
///
/// JSON content types are written pretty-printed as `.json`; anything else is
/// written as `.txt`. The row's `uri` is relative to the artifacts root.
///
/// # Errors
///
/// Returns [`ArtifactError`] when the file cannot be written or the row
/// cannot be inserted.
pub fn persist_artifact(
    store: &dyn Store,
    artifacts_root: &Path,
    run_id: &RunId,
    kind: &str,
    payload: &Value,
    content_type: &str,
    metadata: Option<Value>,
) -> Result<ArtifactRecord, ArtifactError> {
    let artifact_id = ArtifactId::new(Uuid::new_v4().to_string());
    let run_dir = artifacts_root.join(run_id.as_str());
    fs::create_dir_all(&run_dir).map_err(|err| ArtifactError::Io(err.to_string()))?;

    let (file_name, contents) = if content_type == "application/json" {
        let rendered = serde_json::to_string_pretty(payload)
            .map_err(|err| ArtifactError::Decode(err.to_string()))?;
        (format!("{artifact_id}.json"), rendered)
    } else {
        let rendered = match payload {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        (format!("{artifact_id}.txt"), rendered)
    };
    fs::write(run_dir.join(&file_name), contents)
        .map_err(|err| ArtifactError::Io(err.to_string()))?;

    let record = ArtifactRecord {
        artifact_id,
        run_id: run_id.clone(),
        kind: kind.to_string(),
        content_type: content_type.to_string(),
        uri: format!("{}/{file_name}", run_id.as_str()),
        metadata,
        created_at: Timestamp::now(),
    };
    store.insert_artifact(&record)?;
    Ok(record)
}

// ============================================================================
// SECTION: Path Containment
// ============================================================================

/// Resolves an artifact `uri` beneath the artifacts root.
///
/// The `uri` must be relative and free of parent or root components; the
/// check is lexical so missing files are still rejected correctly.
///
/// # Errors
///
/// Returns [`ArtifactError::PathRejected`] for traversal attempts.
pub fn safe_artifact_path(artifacts_root: &Path, uri: &str) -> Result<PathBuf, ArtifactError> {
    let relative = Path::new(uri);
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(ArtifactError::PathRejected(uri.to_string())),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(ArtifactError::PathRejected(uri.to_string()));
    }
    Ok(artifacts_root.join(relative))
}

// ============================================================================
// SECTION: Reads
// ============================================================================

/// Reads artifact content with the byte cap applied.
///
/// JSON content is parsed and returned in the first slot; other content is
/// returned as text in the second.
///
/// # Errors
///
/// Returns [`ArtifactError::Missing`] for absent files,
/// [`ArtifactError::TooLarge`] above the cap, and [`ArtifactError::Decode`]
/// for undecodable JSON.
pub fn read_artifact(
    path: &Path,
    content_type: &str,
    max_bytes: u64,
) -> Result<(Option<Value>, Option<String>), ArtifactError> {
    let size = fs::metadata(path)
        .map_err(|_| ArtifactError::Missing(path.display().to_string()))?
        .len();
    if size > max_bytes {
        return Err(ArtifactError::TooLarge {
            max_bytes,
            actual_bytes: size,
        });
    }
    let text = fs::read_to_string(path).map_err(|err| ArtifactError::Io(err.to_string()))?;
    if content_type == "application/json" {
        let parsed =
            serde_json::from_str(&text).map_err(|err| ArtifactError::Decode(err.to_string()))?;
        Ok((Some(parsed), None))
    } else {
        Ok((None, Some(text)))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use std::fs;
    use std::path::Path;

    use super::ArtifactError;
    use super::read_artifact;
    use super::safe_artifact_path;

    #[test]
    fn traversal_components_are_rejected() {
        let root = Path::new("/srv/artifacts");
        assert!(safe_artifact_path(root, "r-1/file.json").is_ok());
        for bad in ["../secrets", "r-1/../../etc/passwd", "/etc/passwd", ""] {
            let error = safe_artifact_path(root, bad).unwrap_err();
            assert!(matches!(error, ArtifactError::PathRejected(_)), "{bad} should be rejected");
        }
    }

    #[test]
    fn reads_enforce_the_byte_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("big.json");
        fs::write(&path, "[1,2,3,4,5,6,7,8,9,10]").unwrap();
        let error = read_artifact(&path, "application/json", 4).unwrap_err();
        assert!(matches!(error, ArtifactError::TooLarge { .. }));
        let (json, text) = read_artifact(&path, "application/json", 1_000).unwrap();
        assert!(json.is_some());
        assert!(text.is_none());
    }

    #[test]
    fn missing_files_are_distinguished() {
        let dir = tempfile::TempDir::new().unwrap();
        let error =
            read_artifact(&dir.path().join("ghost.json"), "application/json", 100).unwrap_err();
        assert!(matches!(error, ArtifactError::Missing(_)));
    }
}
