//! # assetgate
//!
//! Asset identity registry and sandboxed publish pipeline for a media
//! generation bridge. A rendering engine produces files in its own output
//! tree; this crate tracks each produced asset under an opaque id and moves
//! it — safely, atomically, optionally web-optimized — into a web project's
//! publish directory.
//!
//! # Architecture: Register, Then Publish
//!
//! The two halves share nothing but the record:
//!
//! ```text
//! 1. Register   engine job result  →  AssetRecord (opaque external id, TTL)
//! 2. Publish    external id        →  <publish_root>/<filename> (+ manifest)
//! ```
//!
//! Registration is the provenance gate: publish accepts only ids this
//! process itself minted, so nothing outside the engine's verified output
//! can ever be copied into the web tree. Between the two halves sit the
//! safety layers — strict filename patterns, canonicalize-then-contain path
//! checks, and a deterministic compression ladder with a hard byte budget.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | In-memory asset registry — id/identity indices, TTL expiry, session listing |
//! | [`publish`] | Publish orchestration — validation, safe copy, atomic writes, manifest |
//! | [`compress`] | Deterministic (downscale, quality) ladder to a byte budget, lossy WebP out |
//! | [`config`] | Root detection, output-root heuristic, persisted JSON configuration |
//! | [`paths`] | Canonicalize + containment primitives, symlink-safe |
//! | [`naming`] | Filename/manifest-key validation, library-mode filename generation |
//! | [`error`] | [`error::PublishError`] taxonomy with stable machine-readable codes |
//!
//! # Design Decisions
//!
//! ## Canonicalize-Then-Contain, Not String Checks
//!
//! Every caller-influenced path is resolved through the real filesystem
//! (symlinks followed) and then checked for containment under its root.
//! String-level `..` filtering exists only as the pattern layer in
//! [`naming`]; it is never the authoritative defense, because it is wrong
//! under symlinks.
//!
//! ## Deterministic Compression
//!
//! Web optimization walks a fixed (downscale × quality) grid and takes the
//! first encoding under budget. Identical input and budget always produce
//! identical bytes — no binary search, no encoder-version-dependent
//! heuristics — so published artifacts are reproducible and cache-friendly.
//!
//! ## In-Memory, Session-Scoped Registry
//!
//! Records live in one process and die by TTL. This is deliberate: the
//! registry exists to gate publishing to assets generated *by this
//! process*, and persisting it would silently widen that gate across
//! restarts. Expiry is reaped opportunistically on lookup; no background
//! thread.
//!
//! ## Atomic Everything
//!
//! Published files and the manifest are written to a sibling temp file and
//! renamed into place. A reader of the publish root never observes partial
//! content, and a failed publish leaves nothing behind.

pub mod compress;
pub mod config;
pub mod error;
pub mod naming;
pub mod paths;
pub mod publish;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_helpers;
