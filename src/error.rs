//! The cross-boundary error taxonomy for publish operations.
//!
//! Every failure that can cross the component boundary carries a stable
//! machine-readable code (via [`PublishError::code`]) plus a human-readable
//! message (via `Display`). Callers branch on the code; the message is for
//! operators.
//!
//! Two families are deliberately kept apart:
//!
//! - **Path-safety rejections** (`SourcePathOutsideRoot`,
//!   `PathTraversalDetected`) — security-relevant, never downgraded to
//!   warnings, never silently corrected.
//! - **Configuration problems** (`OutputRootNotFound`, `OutputRootInvalid`, …)
//!   — operator-fixable, reported with full diagnostic context elsewhere
//!   (see [`crate::publish::PublishInfo`]).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(
        "Asset {0} not found or expired. The registry is in-memory and session-scoped; \
         generate a new asset in the current session."
    )]
    AssetNotFoundOrExpired(String),

    #[error(
        "Invalid target filename: '{0}'. Must match ^[a-z0-9][a-z0-9._-]{{0,63}}\\.(webp|png|jpg|jpeg)$"
    )]
    InvalidTargetFilename(String),

    #[error("Invalid manifest key: '{0}'. Must match ^[a-z0-9][a-z0-9._-]{{0,63}}$")]
    InvalidManifestKey(String),

    #[error(
        "manifest_key is required when target_filename is omitted (library mode). \
         Provide either target_filename or manifest_key."
    )]
    ManifestKeyRequired,

    #[error("Source path {path} is outside the output root {root}")]
    SourcePathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Path traversal detected: {path} escapes {root}")]
    PathTraversalDetected { path: PathBuf, root: PathBuf },

    #[error("Output root not configured or not found{}", fmt_detail(.detail))]
    OutputRootNotFound { detail: Option<String> },

    #[error("Output root is not a directory: {0}")]
    OutputRootNotDirectory(PathBuf),

    #[error(
        "Path does not look like a render output directory: {0}. \
         Expected rendered image files or output/temp subdirectories."
    )]
    OutputRootInvalid(PathBuf),

    #[error("Publish root is not writable: {0}")]
    PublishRootNotWritable(PathBuf),

    #[error("Failed to save configuration to {path}: {source}")]
    ConfigSaveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Image cannot be compressed below {max_bytes} bytes \
         (smallest achieved: {smallest} bytes, original: {original} bytes)"
    )]
    SizeLimitUnreachable {
        max_bytes: usize,
        smallest: usize,
        original: usize,
    },

    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl PublishError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AssetNotFoundOrExpired(_) => "ASSET_NOT_FOUND_OR_EXPIRED",
            Self::InvalidTargetFilename(_) => "INVALID_TARGET_FILENAME",
            Self::InvalidManifestKey(_) => "INVALID_MANIFEST_KEY",
            Self::ManifestKeyRequired => "MANIFEST_KEY_REQUIRED",
            Self::SourcePathOutsideRoot { .. } => "SOURCE_PATH_OUTSIDE_ROOT",
            Self::PathTraversalDetected { .. } => "PATH_TRAVERSAL_DETECTED",
            Self::OutputRootNotFound { .. } => "OUTPUT_ROOT_NOT_FOUND",
            Self::OutputRootNotDirectory(_) => "OUTPUT_ROOT_NOT_DIRECTORY",
            Self::OutputRootInvalid(_) => "OUTPUT_ROOT_INVALID",
            Self::PublishRootNotWritable(_) => "PUBLISH_ROOT_NOT_WRITABLE",
            Self::ConfigSaveFailed { .. } => "CONFIG_SAVE_FAILED",
            Self::SizeLimitUnreachable { .. } => "SIZE_LIMIT_UNREACHABLE",
            Self::PublishFailed(_) => "PUBLISH_FAILED",
        }
    }
}
