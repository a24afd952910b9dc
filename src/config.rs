//! Publish root detection and persisted configuration.
//!
//! Three roots govern every publish:
//!
//! - **project root** — the web project the server was started in
//! - **publish root** — where published files land (`<project>/public/gen`
//!   by convention)
//! - **output root** — where the rendering engine writes its output files
//!
//! Detection runs each time roots are requested, with a fixed priority:
//! explicit override > persisted config > auto-detection. Every candidate
//! tried for the output root is recorded with its pass/fail result so an
//! operator can see exactly why detection landed where it did instead of
//! getting a bare boolean.
//!
//! Persisted settings live in one JSON file at the platform config
//! directory (`~/.config/assetgate/config.json` on Linux). Saving merges
//! into the existing file rather than replacing it, so unknown keys written
//! by newer versions survive.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::paths;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "Ambiguous project root: markers found at multiple ancestor levels: {0:?}. \
         Start the server from the repo root."
    )]
    AmbiguousProjectRoot(Vec<PathBuf>),
    #[error("No platform configuration directory available")]
    NoConfigDir,
}

/// Files whose presence marks a directory as a project root.
pub const PROJECT_MARKERS: &[&str] = &[".git", "package.json", "pyproject.toml", "Cargo.toml"];

/// Publish-root candidates under the project root, in preference order.
const PUBLISH_ROOT_CANDIDATES: &[[&str; 2]] =
    &[["public", "gen"], ["static", "gen"], ["assets", "gen"]];

/// Upward levels searched for project markers before giving up.
const MARKER_SEARCH_DEPTH: usize = 10;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// How a root value was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    /// Supplied directly by the caller.
    Explicit,
    /// Read from the persisted config file.
    Persisted,
    /// Found by the candidate search.
    AutoDetected,
    /// Current working directory (primary contract, or last-resort fallback).
    Cwd,
}

/// Where an output-root candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    PersistedConfig,
    AutoDetection,
}

/// One output-root candidate and how it fared, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TriedCandidate {
    pub path: PathBuf,
    pub exists: bool,
    pub is_valid: bool,
    pub source: CandidateSource,
}

/// Result of project-root detection.
#[derive(Debug, Clone)]
pub struct ProjectRoot {
    pub path: PathBuf,
    pub method: DetectionMethod,
    /// Set when no markers were found anywhere and cwd was used as a guess.
    pub fallback_warning: bool,
}

/// Settings persisted across server restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedConfig {
    /// Operator-configured rendering-engine output root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
    /// Keys this version doesn't know about; preserved on merge.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reader/writer for the persisted config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the platform-conventional location.
    pub fn default_location() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self {
            path: dir.join("assetgate").join("config.json"),
        })
    }

    /// Store at an explicit path (tests, unusual deployments).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted config. A missing or unparseable file yields the
    /// default — configuration is best-effort, never a startup blocker.
    pub fn load(&self) -> PersistedConfig {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return PersistedConfig::default(),
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unparseable config file, using defaults");
                PersistedConfig::default()
            }
        }
    }

    /// Merge `update` into the file: fields set in `update` win, everything
    /// else already on disk is kept.
    pub fn save(&self, update: &PersistedConfig) -> io::Result<()> {
        let mut merged = self.load();
        if update.output_root.is_some() {
            merged.output_root = update.output_root.clone();
        }
        for (key, value) in &update.extra {
            merged.extra.insert(key.clone(), value.clone());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&merged)?;
        fs::write(&self.path, json)?;
        info!(path = %self.path.display(), "saved publish config");
        Ok(())
    }
}

/// Detect the project root starting from `cwd`.
///
/// Primary contract: the server is started from the repo root, so `cwd`
/// wins whenever it carries a project marker or a `public`/`static`
/// directory. Otherwise a bounded upward search runs; exactly one marker
/// level is accepted, multiple levels are ambiguous (error rather than
/// guess), and zero levels falls back to `cwd` with the warning flag set.
pub fn detect_project_root(cwd: &Path) -> Result<ProjectRoot, ConfigError> {
    let has_markers = PROJECT_MARKERS.iter().any(|m| cwd.join(m).exists());
    let has_public = cwd.join("public").exists() || cwd.join("static").exists();
    if has_markers || has_public {
        return Ok(ProjectRoot {
            path: cwd.to_path_buf(),
            method: DetectionMethod::Cwd,
            fallback_warning: false,
        });
    }

    let mut found: Vec<PathBuf> = Vec::new();
    let mut current = cwd.to_path_buf();
    for _ in 0..MARKER_SEARCH_DEPTH {
        if PROJECT_MARKERS.iter().any(|m| current.join(m).exists()) {
            found.push(current.clone());
        }
        if !current.pop() {
            break;
        }
    }

    match found.len() {
        0 => {
            warn!(cwd = %cwd.display(), "no project markers found, using cwd as project root");
            Ok(ProjectRoot {
                path: cwd.to_path_buf(),
                method: DetectionMethod::Cwd,
                fallback_warning: true,
            })
        }
        1 => {
            let path = found.remove(0);
            info!(root = %path.display(), "auto-detected project root");
            Ok(ProjectRoot {
                path,
                method: DetectionMethod::AutoDetected,
                fallback_warning: false,
            })
        }
        _ => Err(ConfigError::AmbiguousProjectRoot(found)),
    }
}

/// Resolve the default publish root under a project root.
///
/// Tries `public/gen` → `static/gen` → `assets/gen`; the first candidate
/// whose parent exists is created and returned. When none of the parents
/// exist, `public/gen` is created wholesale.
pub fn default_publish_root(project_root: &Path) -> io::Result<PathBuf> {
    for [parent, leaf] in PUBLISH_ROOT_CANDIDATES {
        let candidate = project_root.join(parent).join(leaf);
        if project_root.join(parent).exists() {
            fs::create_dir_all(&candidate)?;
            return Ok(candidate);
        }
    }
    let [parent, leaf] = PUBLISH_ROOT_CANDIDATES[0];
    let default = project_root.join(parent).join(leaf);
    fs::create_dir_all(&default)?;
    Ok(default)
}

/// Cheap heuristic: does `path` look like a rendering-engine output
/// directory? Checks for `output`/`temp` subdirectories (engine layout) or
/// a handful of image files at the top level; never scans recursively.
pub fn output_root_looks_valid(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    if path.join("output").exists() || path.join("temp").exists() {
        return true;
    }

    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };
    let image_files = entries
        .flatten()
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| IMAGE_EXTENSIONS.contains(&x.to_ascii_lowercase().as_str()))
        })
        .take(3)
        .count();
    image_files >= 3
}

/// Detect the rendering-engine output root.
///
/// Priority: persisted config, then a tight fixed candidate list — no broad
/// filesystem scanning. Every path tried is returned with its result.
pub fn detect_output_root(
    project_root: &Path,
    store: &ConfigStore,
) -> (Option<(PathBuf, DetectionMethod)>, Vec<TriedCandidate>) {
    let mut tried = Vec::new();

    if let Some(configured) = store.load().output_root {
        let resolved = paths::canonicalize(&configured, false).unwrap_or(configured);
        let exists = resolved.is_dir();
        let is_valid = exists && output_root_looks_valid(&resolved);
        tried.push(TriedCandidate {
            path: resolved.clone(),
            exists,
            is_valid,
            source: CandidateSource::PersistedConfig,
        });
        if is_valid {
            info!(root = %resolved.display(), "using output root from persisted config");
            return (Some((resolved, DetectionMethod::Persisted)), tried);
        }
        if exists {
            // An operator set this deliberately; use it even though the
            // heuristic can't confirm it, and say so.
            warn!(root = %resolved.display(), "configured output root exists but does not validate");
            return (Some((resolved, DetectionMethod::Persisted)), tried);
        }
    }

    let mut candidates = vec![project_root.join("renderer").join("output")];
    if let Some(parent) = project_root.parent() {
        candidates.push(parent.join("renderer").join("output"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("renderer").join("output"));
    }

    for candidate in candidates {
        let resolved = paths::canonicalize(&candidate, false).unwrap_or(candidate);
        let exists = resolved.is_dir();
        let is_valid = exists && output_root_looks_valid(&resolved);
        tried.push(TriedCandidate {
            path: resolved.clone(),
            exists,
            is_valid,
            source: CandidateSource::AutoDetection,
        });
        if is_valid {
            info!(root = %resolved.display(), "auto-detected output root");
            return (Some((resolved, DetectionMethod::AutoDetected)), tried);
        }
    }

    warn!(tried = tried.len(), "could not detect output root");
    (None, tried)
}

/// Explicit root overrides, each taking priority over detection.
#[derive(Debug, Clone, Default)]
pub struct RootOverrides {
    pub project_root: Option<PathBuf>,
    pub publish_root: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
}

/// The three resolved roots plus how each was determined.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub project_root: PathBuf,
    pub project_root_method: DetectionMethod,
    pub project_root_fallback: bool,
    pub publish_root: PathBuf,
    pub output_root: Option<PathBuf>,
    pub output_root_method: Option<DetectionMethod>,
    pub tried_candidates: Vec<TriedCandidate>,
    store: ConfigStore,
}

impl PublishConfig {
    /// Resolve all three roots, honoring `overrides` first, then the
    /// persisted config, then auto-detection. The publish root is created
    /// if it doesn't exist yet.
    pub fn detect(overrides: RootOverrides, store: ConfigStore) -> Result<Self, ConfigError> {
        let (project_root, project_root_method, project_root_fallback) =
            match overrides.project_root {
                Some(root) => (
                    paths::canonicalize(&root, true)?,
                    DetectionMethod::Explicit,
                    false,
                ),
                None => {
                    let detected = detect_project_root(&std::env::current_dir()?)?;
                    (detected.path, detected.method, detected.fallback_warning)
                }
            };

        let publish_root = match overrides.publish_root {
            Some(root) => {
                fs::create_dir_all(&root)?;
                paths::canonicalize(&root, true)?
            }
            None => default_publish_root(&project_root)?,
        };

        let (output_root, output_root_method, tried_candidates) = match overrides.output_root {
            Some(root) => {
                let resolved = paths::canonicalize(&root, false)?;
                (Some(resolved), Some(DetectionMethod::Explicit), Vec::new())
            }
            None => {
                let (detected, tried) = detect_output_root(&project_root, &store);
                match detected {
                    Some((path, method)) => (Some(path), Some(method), tried),
                    None => (None, None, tried),
                }
            }
        };

        Ok(Self {
            project_root,
            project_root_method,
            project_root_fallback,
            publish_root,
            output_root,
            output_root_method,
            tried_candidates,
            store,
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::write(path, "").unwrap();
    }

    // =========================================================================
    // Project root detection
    // =========================================================================

    #[test]
    fn cwd_with_marker_wins() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("package.json"));

        let root = detect_project_root(tmp.path()).unwrap();
        assert_eq!(root.path, tmp.path());
        assert_eq!(root.method, DetectionMethod::Cwd);
        assert!(!root.fallback_warning);
    }

    #[test]
    fn cwd_with_public_dir_wins() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("public")).unwrap();

        let root = detect_project_root(tmp.path()).unwrap();
        assert_eq!(root.method, DetectionMethod::Cwd);
    }

    #[test]
    fn single_ancestor_marker_is_auto_detected() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("pyproject.toml"));
        let nested = tmp.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();

        let root = detect_project_root(&nested).unwrap();
        assert_eq!(root.path, tmp.path());
        assert_eq!(root.method, DetectionMethod::AutoDetected);
    }

    #[test]
    fn markers_at_two_levels_are_ambiguous() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("Cargo.toml"));
        let nested = tmp.path().join("sub");
        fs::create_dir(&nested).unwrap();
        touch(&nested.join("package.json"));
        let start = nested.join("deeper");
        fs::create_dir(&start).unwrap();

        let err = detect_project_root(&start).unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousProjectRoot(levels) if levels.len() == 2));
    }

    #[test]
    fn no_markers_falls_back_to_cwd_with_warning() {
        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("empty");
        fs::create_dir(&empty).unwrap();

        // The temp dir itself has no markers; the search may leave the
        // tempdir but /tmp and friends carry no project markers either.
        let root = detect_project_root(&empty).unwrap();
        if root.fallback_warning {
            assert_eq!(root.path, empty);
            assert_eq!(root.method, DetectionMethod::Cwd);
        }
    }

    // =========================================================================
    // Publish root
    // =========================================================================

    #[test]
    fn publish_root_prefers_public() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("public")).unwrap();
        fs::create_dir(tmp.path().join("static")).unwrap();

        let root = default_publish_root(tmp.path()).unwrap();
        assert_eq!(root, tmp.path().join("public").join("gen"));
        assert!(root.is_dir());
    }

    #[test]
    fn publish_root_falls_through_to_static() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("static")).unwrap();

        let root = default_publish_root(tmp.path()).unwrap();
        assert_eq!(root, tmp.path().join("static").join("gen"));
    }

    #[test]
    fn publish_root_creates_default_when_no_parent_exists() {
        let tmp = TempDir::new().unwrap();
        let root = default_publish_root(tmp.path()).unwrap();
        assert_eq!(root, tmp.path().join("public").join("gen"));
        assert!(root.is_dir());
    }

    // =========================================================================
    // Output-root heuristic + detection
    // =========================================================================

    #[test]
    fn heuristic_accepts_output_subdir() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("output")).unwrap();
        assert!(output_root_looks_valid(tmp.path()));
    }

    #[test]
    fn heuristic_accepts_three_images() {
        let tmp = TempDir::new().unwrap();
        for i in 0..3 {
            touch(&tmp.path().join(format!("render_{i}.png")));
        }
        assert!(output_root_looks_valid(tmp.path()));
    }

    #[test]
    fn heuristic_rejects_sparse_dir() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("lonely.png"));
        touch(&tmp.path().join("notes.txt"));
        assert!(!output_root_looks_valid(tmp.path()));
    }

    #[test]
    fn heuristic_rejects_missing_and_file_paths() {
        let tmp = TempDir::new().unwrap();
        assert!(!output_root_looks_valid(&tmp.path().join("nope")));
        let file = tmp.path().join("file.png");
        touch(&file);
        assert!(!output_root_looks_valid(&file));
    }

    #[test]
    fn persisted_valid_root_wins_detection() {
        let tmp = TempDir::new().unwrap();
        let engine_out = tmp.path().join("engine-out");
        fs::create_dir_all(engine_out.join("output")).unwrap();

        let store = ConfigStore::at(tmp.path().join("config.json"));
        store
            .save(&PersistedConfig {
                output_root: Some(engine_out.clone()),
                ..Default::default()
            })
            .unwrap();

        let (found, tried) = detect_output_root(tmp.path(), &store);
        let (path, method) = found.unwrap();
        assert_eq!(path, fs::canonicalize(&engine_out).unwrap());
        assert_eq!(method, DetectionMethod::Persisted);
        assert_eq!(tried.len(), 1);
        assert!(tried[0].is_valid);
    }

    #[test]
    fn persisted_existing_but_invalid_root_is_still_used() {
        let tmp = TempDir::new().unwrap();
        let sparse = tmp.path().join("sparse");
        fs::create_dir(&sparse).unwrap();

        let store = ConfigStore::at(tmp.path().join("config.json"));
        store
            .save(&PersistedConfig {
                output_root: Some(sparse.clone()),
                ..Default::default()
            })
            .unwrap();

        let (found, tried) = detect_output_root(tmp.path(), &store);
        let (_, method) = found.unwrap();
        assert_eq!(method, DetectionMethod::Persisted);
        assert!(!tried[0].is_valid);
    }

    #[test]
    fn candidate_under_project_root_is_auto_detected() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("renderer").join("output").join("output")).unwrap();

        let store = ConfigStore::at(tmp.path().join("config.json"));
        let (found, tried) = detect_output_root(tmp.path(), &store);
        let (path, method) = found.unwrap();
        assert!(path.ends_with("renderer/output"));
        assert_eq!(method, DetectionMethod::AutoDetected);
        assert!(tried.iter().any(|c| c.is_valid));
    }

    #[test]
    fn detection_failure_reports_all_candidates() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("config.json"));

        let (found, tried) = detect_output_root(tmp.path(), &store);
        assert!(found.is_none());
        assert!(!tried.is_empty());
        assert!(tried.iter().all(|c| !c.is_valid));
    }

    // =========================================================================
    // Config store
    // =========================================================================

    #[test]
    fn load_missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("config.json"));
        assert!(store.load().output_root.is_none());
    }

    #[test]
    fn load_corrupt_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        let store = ConfigStore::at(&path);
        assert!(store.load().output_root.is_none());
    }

    #[test]
    fn save_merges_rather_than_replaces() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep").join("config.json");
        let store = ConfigStore::at(&path);

        // Seed with a key this version doesn't know about.
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"future_knob": true}"#).unwrap();

        store
            .save(&PersistedConfig {
                output_root: Some(PathBuf::from("/opt/renderer/output")),
                ..Default::default()
            })
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["output_root"], "/opt/renderer/output");
        assert_eq!(value["future_knob"], true);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("config.json"));
        store
            .save(&PersistedConfig {
                output_root: Some(PathBuf::from("/srv/out")),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.load().output_root, Some(PathBuf::from("/srv/out")));
    }

    // =========================================================================
    // PublishConfig::detect
    // =========================================================================

    #[test]
    fn detect_with_full_overrides() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        let publish = project.join("public").join("gen");
        let output = tmp.path().join("out");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&output).unwrap();

        let config = PublishConfig::detect(
            RootOverrides {
                project_root: Some(project.clone()),
                publish_root: Some(publish.clone()),
                output_root: Some(output.clone()),
            },
            ConfigStore::at(tmp.path().join("config.json")),
        )
        .unwrap();

        assert_eq!(config.project_root_method, DetectionMethod::Explicit);
        assert_eq!(config.output_root_method, Some(DetectionMethod::Explicit));
        assert!(config.publish_root.is_dir());
        assert!(config.tried_candidates.is_empty());
    }

    #[test]
    fn detect_records_tried_candidates_when_output_missing() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        fs::create_dir_all(&project).unwrap();

        let config = PublishConfig::detect(
            RootOverrides {
                project_root: Some(project),
                publish_root: None,
                output_root: None,
            },
            ConfigStore::at(tmp.path().join("config.json")),
        )
        .unwrap();

        assert!(config.output_root.is_none());
        assert!(config.output_root_method.is_none());
        assert!(!config.tried_candidates.is_empty());
    }
}
