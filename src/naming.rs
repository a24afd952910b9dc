//! Centralized filename-safety rules for publishing.
//!
//! Caller-supplied target filenames and manifest keys are validated here,
//! before any filesystem access, against deliberately strict patterns:
//! lowercase alphanumeric start, a short safe character set, bounded length,
//! and (for filenames) a fixed extension whitelist. Path separators and
//! `..` cannot pass, so a name that validates can only ever address a file
//! directly inside its root — the containment check in
//! [`crate::paths`] then stands as the authoritative second layer.
//!
//! Library mode (publish without an explicit filename) generates
//! `asset_<shortid>.<ext>` from the external id; the short id is a prefix
//! of the random UUID, so it leaks nothing about the stable identity.

use regex::Regex;
use std::sync::LazyLock;

/// Simple filename only: no paths, fixed extension set.
static TARGET_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}\.(webp|png|jpg|jpeg)$").expect("static regex")
});

/// Same shape as a target filename, minus the extension.
static MANIFEST_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").expect("static regex"));

pub fn validate_target_filename(filename: &str) -> bool {
    TARGET_FILENAME_RE.is_match(filename)
}

pub fn validate_manifest_key(key: &str) -> bool {
    MANIFEST_KEY_RE.is_match(key)
}

/// Generate a library-mode filename from an external id.
///
/// Uses the first 8 characters of the id as the short id. The extension is
/// normalized (leading dot stripped, `webp` when empty).
pub fn auto_generate_filename(external_id: &str, extension: &str) -> String {
    let shortid = if external_id.len() >= 8 {
        &external_id[..8]
    } else {
        external_id
    };
    let ext = extension.trim_start_matches('.');
    let ext = if ext.is_empty() { "webp" } else { ext };
    format!("asset_{shortid}.{ext}")
}

/// Lowercased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for a published file, inferred from its extension.
pub fn mime_type_for(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
