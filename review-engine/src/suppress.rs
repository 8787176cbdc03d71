//! Per-root suppression store (JSON on disk).
//!
//! Each workspace root owns its own store file, so suppressing a fingerprint
//! in root A never hides the same fingerprint in root B. The layout follows
//! the run-artifact convention:
//!
//! Key (stable across runs): SHA256(root path), first 12 hex chars.
//! Layout: $REVIEW_SUPPRESS_DIR/<hash12>.json
//! Default dir: "code_data/review_suppress".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::errors::EngineResult;
use crate::types::Finding;

/// Returns the root directory for suppression stores (env-overridable).
fn store_root() -> PathBuf {
    std::env::var("REVIEW_SUPPRESS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("code_data/review_suppress"))
}

/// Computes the deterministic store path for a workspace root.
fn store_path(root: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    store_root().join(format!("{}.json", &digest[..12]))
}

/// One suppressed fingerprint with its suppression time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SuppressedEntry {
    fingerprint: String,
    suppressed_at: DateTime<Utc>,
}

/// Suppression lookups for exactly one workspace root.
#[derive(Debug)]
pub struct SuppressionStore {
    root: PathBuf,
    path: PathBuf,
    entries: HashMap<String, SuppressedEntry>,
}

impl SuppressionStore {
    /// Loads the store for `root`; a missing file yields an empty store.
    pub async fn load(root: &Path) -> EngineResult<Self> {
        let path = store_path(root);
        let entries = if path.exists() {
            let data = fs::read(&path).await?;
            let list: Vec<SuppressedEntry> = serde_json::from_slice(&data)?;
            list.into_iter()
                .map(|e| (e.fingerprint.clone(), e))
                .collect()
        } else {
            HashMap::new()
        };
        debug!(
            "suppress: loaded {} entries for root {}",
            entries.len(),
            root.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            path,
            entries,
        })
    }

    /// The workspace root this store belongs to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_suppressed(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Marks a fingerprint as suppressed (idempotent until `save`).
    pub fn suppress(&mut self, fingerprint: impl Into<String>) {
        let fingerprint = fingerprint.into();
        self.entries
            .entry(fingerprint.clone())
            .or_insert_with(|| SuppressedEntry {
                fingerprint,
                suppressed_at: Utc::now(),
            });
    }

    /// Persists the store, creating the directory on first write.
    pub async fn save(&self) -> EngineResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut list: Vec<&SuppressedEntry> = self.entries.values().collect();
        list.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        let json = serde_json::to_vec_pretty(&list)?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Drops suppressed findings, returning how many were filtered.
    pub fn filter(&self, findings: &mut Vec<Finding>) -> usize {
        let before = findings.len();
        findings.retain(|f| {
            f.fingerprint
                .as_deref()
                .map(|fp| !self.is_suppressed(fp))
                .unwrap_or(true)
        });
        before - findings.len()
    }
}

/// Content-derived identity for a finding: file, rule and the
/// whitespace-collapsed message, hashed and truncated.
pub fn fingerprint(finding: &Finding) -> String {
    let collapsed = finding
        .message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", finding.file, finding.rule, collapsed));
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Fills in missing fingerprints in place.
pub fn ensure_fingerprints(findings: &mut [Finding]) {
    for f in findings {
        if f.fingerprint.is_none() {
            f.fingerprint = Some(fingerprint(f));
        }
    }
}

/// Serializes tests that mutate `REVIEW_SUPPRESS_DIR`.
#[cfg(test)]
pub(crate) static TEST_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
