//! Publish orchestration: registry lookup, validation, safe copy, manifest.
//!
//! [`PublishManager`] is the single entry point for moving a registered
//! asset out of the rendering engine's output tree into the web project's
//! publish root. The order of operations inside [`PublishManager::publish`]
//! is load-bearing:
//!
//! 1. registry lookup (the sole provenance gate — only ids this process
//!    minted can be published)
//! 2. naming-mode resolution and pattern validation, before any filesystem
//!    access
//! 3. source resolution + containment under the output root
//! 4. target resolution under the publish root
//! 5. optional re-encode through the compression ladder
//! 6. temp-file write + atomic rename (honoring `overwrite`)
//! 7. manifest update under the process-wide manifest lock — non-fatal
//!    relative to the copy, which is already atomically in place
//!
//! The manifest lock serializes only manifest read-modify-write sequences;
//! publishes that omit a manifest key never contend on it. Neither lock is
//! ever held across encoding or file I/O for the copy itself.

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::compress::{self, CompressError, CompressionInfo};
use crate::config::{DetectionMethod, PublishConfig, TriedCandidate};
use crate::error::PublishError;
use crate::naming;
use crate::paths;
use crate::registry::{AssetRecord, AssetRegistry};

/// Default compression budget for web-optimized publishes.
pub const DEFAULT_MAX_BYTES: usize = 600_000;

/// Manifest filename inside the publish root.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Publish log filename inside the publish root.
pub const PUBLISH_LOG_FILENAME: &str = "publish_log.jsonl";

/// One publish request. `new` gives the plain-copy defaults; set
/// `optimize_for_web` for the compression path.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub external_id: String,
    /// Exact target filename (demo mode). When absent, `manifest_key` is
    /// required and a filename is generated (library mode).
    pub target_filename: Option<String>,
    pub manifest_key: Option<String>,
    pub optimize_for_web: bool,
    pub max_bytes: usize,
    pub overwrite: bool,
}

impl PublishRequest {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            target_filename: None,
            manifest_key: None,
            optimize_for_web: false,
            max_bytes: DEFAULT_MAX_BYTES,
            overwrite: true,
        }
    }
}

/// Naming mode, resolved exactly once at the top of `publish`.
enum NamingMode {
    /// Caller-supplied exact filename; manifest updated only if a key was
    /// also given.
    Demo {
        filename: String,
        manifest_key: Option<String>,
    },
    /// Generated filename, recorded in the manifest under the key.
    Library { manifest_key: String },
}

/// Result of a successful publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub external_id: String,
    pub filename: String,
    pub dest_path: PathBuf,
    /// Site-relative URL under the conventional `/gen/` prefix.
    pub dest_url: String,
    pub byte_size: u64,
    pub mime_type: &'static str,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Present only on the web-optimized path.
    pub compression: Option<CompressionInfo>,
    pub manifest_key: Option<String>,
    /// Non-fatal problems (manifest or log write failures after the file
    /// itself landed).
    pub warnings: Vec<String>,
}

/// Readiness verdict from [`PublishManager::ensure_ready`]. Pure read.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadyStatus {
    Ready { warnings: Vec<String> },
    NeedsOutputRoot { tried: Vec<TriedCandidate> },
    PublishRootNotWritable { publish_root: PathBuf },
}

/// Full detection diagnostics for operator debugging.
#[derive(Debug, Clone, Serialize)]
pub struct PublishInfo {
    pub project_root: PathBuf,
    pub project_root_method: DetectionMethod,
    pub publish_root: PathBuf,
    pub publish_root_writable: bool,
    pub output_root: Option<PathBuf>,
    pub output_root_method: Option<DetectionMethod>,
    pub tried_candidates: Vec<TriedCandidate>,
    pub config_path: PathBuf,
}

/// Result of a successful [`PublishManager::set_output_root`].
#[derive(Debug, Clone, Serialize)]
pub struct SetOutputRootOutcome {
    pub output_root: PathBuf,
    pub config_path: PathBuf,
}

pub struct PublishManager {
    config: Mutex<PublishConfig>,
    registry: Arc<AssetRegistry>,
    /// Serializes manifest read-modify-write sequences, nothing else.
    manifest_lock: Mutex<()>,
}

impl PublishManager {
    pub fn new(config: PublishConfig, registry: Arc<AssetRegistry>) -> Self {
        Self {
            config: Mutex::new(config),
            registry,
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }

    /// Check whether publishing can work right now. Reads only; changes
    /// nothing on disk.
    pub fn ensure_ready(&self) -> ReadyStatus {
        let config = self.config.lock().expect("config lock poisoned");

        if !dir_is_writable(&config.publish_root) {
            return ReadyStatus::PublishRootNotWritable {
                publish_root: config.publish_root.clone(),
            };
        }
        if config.output_root.is_none() {
            return ReadyStatus::NeedsOutputRoot {
                tried: config.tried_candidates.clone(),
            };
        }

        let mut warnings = Vec::new();
        if config.project_root_fallback {
            warnings.push(
                "project root fell back to the working directory; no project markers found"
                    .to_string(),
            );
        }
        match config.output_root_method {
            Some(DetectionMethod::AutoDetected) => warnings.push(
                "output root was auto-detected; use set-output-root to pin it".to_string(),
            ),
            Some(DetectionMethod::Persisted) => {
                if config
                    .tried_candidates
                    .first()
                    .is_some_and(|c| c.exists && !c.is_valid)
                {
                    warnings.push(
                        "configured output root does not look like a render output directory"
                            .to_string(),
                    );
                }
            }
            _ => {}
        }
        ReadyStatus::Ready { warnings }
    }

    /// Detection diagnostics: every root, how it was found, and every
    /// output-root candidate tried.
    pub fn publish_info(&self) -> PublishInfo {
        let config = self.config.lock().expect("config lock poisoned");
        PublishInfo {
            project_root: config.project_root.clone(),
            project_root_method: config.project_root_method,
            publish_root: config.publish_root.clone(),
            publish_root_writable: dir_is_writable(&config.publish_root),
            output_root: config.output_root.clone(),
            output_root_method: config.output_root_method,
            tried_candidates: config.tried_candidates.clone(),
            config_path: config.store().path().to_path_buf(),
        }
    }

    /// Validate and persist an operator-supplied output root, and adopt it
    /// for the running process.
    pub fn set_output_root(&self, path: &Path) -> Result<SetOutputRootOutcome, PublishError> {
        let resolved = paths::canonicalize(path, true).map_err(|e| {
            PublishError::OutputRootNotFound {
                detail: Some(format!("{}: {e}", path.display())),
            }
        })?;
        if !resolved.is_dir() {
            return Err(PublishError::OutputRootNotDirectory(resolved));
        }
        if !crate::config::output_root_looks_valid(&resolved) {
            return Err(PublishError::OutputRootInvalid(resolved));
        }

        let mut config = self.config.lock().expect("config lock poisoned");
        let store = config.store().clone();
        store
            .save(&crate::config::PersistedConfig {
                output_root: Some(resolved.clone()),
                ..Default::default()
            })
            .map_err(|source| PublishError::ConfigSaveFailed {
                path: store.path().to_path_buf(),
                source,
            })?;

        config.output_root = Some(resolved.clone());
        config.output_root_method = Some(DetectionMethod::Persisted);
        info!(root = %resolved.display(), "output root set and persisted");

        Ok(SetOutputRootOutcome {
            output_root: resolved,
            config_path: store.path().to_path_buf(),
        })
    }

    /// Publish a registered asset into the publish root.
    ///
    /// All validation happens before any filesystem access; a rejected
    /// request leaves no trace on disk. On success exactly one file was
    /// written (via temp + atomic rename), plus at most one manifest
    /// read-modify-write and one log append.
    pub fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, PublishError> {
        let record = self
            .registry
            .get(&request.external_id)
            .ok_or_else(|| PublishError::AssetNotFoundOrExpired(request.external_id.clone()))?;

        let mode = resolve_mode(&request)?;
        let (mut filename, manifest_key) = match mode {
            NamingMode::Demo {
                filename,
                manifest_key,
            } => (filename, manifest_key),
            NamingMode::Library { manifest_key } => {
                let ext = if request.optimize_for_web {
                    "webp".to_string()
                } else {
                    naming::extension_of(&record.identity.name).unwrap_or_else(|| "webp".into())
                };
                (
                    naming::auto_generate_filename(&record.external_id, &ext),
                    Some(manifest_key),
                )
            }
        };
        if request.optimize_for_web {
            filename = force_webp_extension(&filename);
        }

        let (publish_root, output_root) = {
            let config = self.config.lock().expect("config lock poisoned");
            let output_root =
                config
                    .output_root
                    .clone()
                    .ok_or_else(|| PublishError::OutputRootNotFound {
                        detail: Some(format!(
                            "{} candidates tried; run set-output-root",
                            config.tried_candidates.len()
                        )),
                    })?;
            (config.publish_root.clone(), output_root)
        };

        let source = resolve_source(&record, &output_root)?;
        let target = publish_root.join(&filename);
        // The filename pattern already excludes separators; this is the
        // authoritative filesystem-level check behind it.
        if !paths::is_within(&target, &publish_root, false) {
            return Err(PublishError::PathTraversalDetected {
                path: target,
                root: publish_root,
            });
        }

        let raw = fs::read(&source)
            .map_err(|e| PublishError::PublishFailed(format!("read {}: {e}", source.display())))?;

        let (bytes, compression) = if request.optimize_for_web {
            let (bytes, info) = compress::compress(&raw, request.max_bytes).map_err(|e| match e {
                CompressError::SizeLimitUnreachable {
                    max_bytes,
                    smallest,
                    original,
                } => PublishError::SizeLimitUnreachable {
                    max_bytes,
                    smallest,
                    original,
                },
                CompressError::Decode(msg) => PublishError::PublishFailed(msg),
            })?;
            (bytes, Some(info))
        } else {
            (raw, None)
        };

        if !request.overwrite && target.exists() {
            return Err(PublishError::PublishFailed(format!(
                "target already exists and overwrite is disabled: {}",
                target.display()
            )));
        }
        atomic_write(&target, &bytes)
            .map_err(|e| PublishError::PublishFailed(format!("write {}: {e}", target.display())))?;
        info!(
            external_id = %record.external_id,
            dest = %target.display(),
            bytes = bytes.len(),
            optimized = request.optimize_for_web,
            "published asset"
        );

        let mut warnings = Vec::new();
        if let Some(key) = &manifest_key
            && let Err(e) = self.update_manifest(&publish_root, key, &filename)
        {
            // The published file is already atomically in place; a manifest
            // failure must not undo it.
            warn!(key = %key, error = %e, "manifest update failed after publish");
            warnings.push(format!("manifest update failed: {e}"));
        }
        if let Err(e) = append_publish_log(&publish_root, &record, &source, &target, bytes.len()) {
            warn!(error = %e, "publish log append failed");
            warnings.push(format!("publish log append failed: {e}"));
        }

        Ok(PublishOutcome {
            external_id: record.external_id,
            dest_url: format!("/gen/{filename}"),
            dest_path: target,
            byte_size: bytes.len() as u64,
            mime_type: naming::mime_type_for(&filename),
            width: record.width,
            height: record.height,
            compression,
            manifest_key,
            filename,
            warnings,
        })
    }

    /// Read-modify-write the manifest under the process-wide lock; readers
    /// only ever see a complete file thanks to the rename.
    fn update_manifest(&self, publish_root: &Path, key: &str, filename: &str) -> io::Result<()> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");
        let path = publish_root.join(MANIFEST_FILENAME);

        let mut manifest: serde_json::Map<String, serde_json::Value> =
            match fs::read_to_string(&path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => serde_json::Map::new(),
            };
        manifest.insert(key.to_string(), serde_json::Value::String(filename.into()));

        let json = serde_json::to_string_pretty(&serde_json::Value::Object(manifest))?;
        atomic_write(&path, json.as_bytes())?;
        debug!(key, filename, "manifest updated");
        Ok(())
    }
}

/// Resolve the naming mode and run every pattern check. No filesystem
/// access happens here.
fn resolve_mode(request: &PublishRequest) -> Result<NamingMode, PublishError> {
    if let Some(key) = &request.manifest_key
        && !naming::validate_manifest_key(key)
    {
        return Err(PublishError::InvalidManifestKey(key.clone()));
    }

    match &request.target_filename {
        Some(filename) => {
            if !naming::validate_target_filename(filename) {
                return Err(PublishError::InvalidTargetFilename(filename.clone()));
            }
            Ok(NamingMode::Demo {
                filename: filename.clone(),
                manifest_key: request.manifest_key.clone(),
            })
        }
        None => {
            let key = request
                .manifest_key
                .clone()
                .ok_or(PublishError::ManifestKeyRequired)?;
            Ok(NamingMode::Library { manifest_key: key })
        }
    }
}

/// Resolve the record's stable identity to a real file under the output
/// root, with canonicalize-then-contain as the authoritative check.
fn resolve_source(record: &AssetRecord, output_root: &Path) -> Result<PathBuf, PublishError> {
    let identity = &record.identity;
    let mut source = output_root.to_path_buf();
    // Engine layouts differ: some roots contain per-category directories
    // (`output/`, `temp/`), some are the category directory itself.
    if !identity.category.is_empty() && source.join(&identity.category).is_dir() {
        source.push(&identity.category);
    }
    if !identity.subfolder.is_empty() {
        source.push(&identity.subfolder);
    }
    source.push(&identity.name);

    let lexical_traversal = source
        .components()
        .any(|c| matches!(c, Component::ParentDir));

    let resolved = match paths::canonicalize(&source, true) {
        Ok(real) => real,
        Err(_) if lexical_traversal => {
            return Err(PublishError::PathTraversalDetected {
                path: source,
                root: output_root.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(PublishError::PublishFailed(format!(
                "source file not found: {} ({e})",
                source.display()
            )));
        }
    };

    if !paths::is_within(&resolved, output_root, true) {
        if lexical_traversal {
            return Err(PublishError::PathTraversalDetected {
                path: source,
                root: output_root.to_path_buf(),
            });
        }
        return Err(PublishError::SourcePathOutsideRoot {
            path: resolved,
            root: output_root.to_path_buf(),
        });
    }
    Ok(resolved)
}

/// Write via a sibling temp file and atomic rename. Partial content is
/// never observable at `target`.
fn atomic_write(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no filename"))?;
    let tmp = target.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Append one JSON line describing a successful publish. Best-effort.
fn append_publish_log(
    publish_root: &Path,
    record: &AssetRecord,
    source: &Path,
    target: &Path,
    byte_size: usize,
) -> io::Result<()> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let line = serde_json::json!({
        "ts": ts,
        "external_id": record.external_id,
        "source_tag": record.source_tag,
        "source": source,
        "dest": target,
        "bytes": byte_size,
    });

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(publish_root.join(PUBLISH_LOG_FILENAME))?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn force_webp_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.webp"),
        None => format!("{filename}.webp"),
    }
}

fn dir_is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}
