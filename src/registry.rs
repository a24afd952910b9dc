//! In-memory registry of generated assets.
//!
//! Every completed generation is registered here and handed back to the
//! caller as an opaque external id. The registry is the sole provenance
//! gate for publishing: only ids minted by this process can be published.
//!
//! # Design
//!
//! Two indices over one store:
//!
//! - `records`: external id → [`AssetRecord`]
//! - `identity_index`: stable-identity key (`category:subfolder:name`) →
//!   external id, for deduplication
//!
//! Registration is idempotent per live identity: registering a triple that
//! already has a live record returns that record unchanged, so two
//! generations of the same artifact share one id. Records are never updated
//! in place — a regeneration mints a new record — and die only by TTL
//! expiry. The TTL is fixed at construction.
//!
//! Expiry is opportunistic: there is no background sweeper. `get` drops an
//! expired record it finds, and `list` reaps before answering. A record may
//! therefore occupy memory past its expiry until some lookup touches the
//! registry, but it is never *visible* past `expires_at`.
//!
//! All mutation happens under one coarse lock; the workload is low-frequency
//! enough that finer granularity would buy nothing. Callers always receive
//! clones, never references into the store.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use uuid::Uuid;

/// Default record time-to-live: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Identity of an output artifact, independent of any URL or hostname.
///
/// Two generations producing the same triple are the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StableIdentity {
    /// Output filename as reported by the rendering engine.
    pub name: String,
    /// Subfolder under the engine's output root; often empty.
    pub subfolder: String,
    /// Output category (e.g. `output`, `temp`).
    pub category: String,
}

impl StableIdentity {
    pub fn new(
        name: impl Into<String>,
        subfolder: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subfolder: subfolder.into(),
            category: category.into(),
        }
    }

    /// Deduplication key for the identity index.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.category, self.subfolder, self.name)
    }
}

/// Opaque reproducibility blobs stored verbatim at registration.
///
/// The registry never interprets these; they exist so a caller can replay
/// or audit exactly what produced an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Provenance {
    /// The exact request submitted to the rendering engine.
    pub request: serde_json::Value,
    /// The full upstream execution trace.
    pub trace: serde_json::Value,
}

/// A registered asset. Created only by [`AssetRegistry::register`]; never
/// mutated; destroyed only by expiry reaping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetRecord {
    /// Globally unique opaque handle, never reused.
    pub external_id: String,
    pub identity: StableIdentity,
    pub mime_type: String,
    pub byte_size: u64,
    /// Pixel dimensions, present only for raster images.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: SystemTime,
    /// Always `created_at + ttl`.
    pub expires_at: SystemTime,
    /// Name of the template/operation that produced the asset.
    pub source_tag: String,
    /// Upstream job identifier, stored opaquely for status polling.
    pub correlation_id: String,
    /// Optional grouping key for conversation-scoped listing.
    pub session_tag: Option<String>,
    pub provenance: Provenance,
}

impl AssetRecord {
    fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }
}

/// Arguments to [`AssetRegistry::register`] — exactly what the generation
/// collaborator supplies per completed job.
#[derive(Debug, Clone)]
pub struct RegisterAsset {
    pub identity: StableIdentity,
    pub mime_type: String,
    pub byte_size: u64,
    pub dimensions: Option<(u32, u32)>,
    pub source_tag: String,
    pub correlation_id: String,
    pub provenance: Provenance,
    pub session_tag: Option<String>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, AssetRecord>,
    /// Stable-identity key → external id, for deduplication.
    identity_index: HashMap<String, String>,
    /// External ids in registration order; `list` walks it backwards.
    order: Vec<String>,
}

/// Concurrent registry of generated assets with TTL expiry.
pub struct AssetRegistry {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        info!(ttl_secs = ttl.as_secs(), "initialized asset registry");
        Self {
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a generated asset, or return the existing live record for
    /// the same stable identity (idempotent registration).
    ///
    /// Under a race between two registrations of the same identity, the
    /// loser returns the winner's record; two live records for one identity
    /// cannot exist because the check and the insert happen under one lock.
    pub fn register(&self, asset: RegisterAsset) -> AssetRecord {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        let key = asset.identity.key();
        if let Some(existing_id) = inner.identity_index.get(&key)
            && let Some(existing) = inner.records.get(existing_id)
            && !existing.is_expired(now)
        {
            debug!(external_id = %existing.external_id, identity = %key, "deduplicated registration");
            return existing.clone();
        }
        // Any entry still under this key points at an expired record.
        if let Some(stale_id) = inner.identity_index.remove(&key) {
            remove_record(&mut inner, &stale_id);
        }

        let external_id = Uuid::new_v4().to_string();
        let record = AssetRecord {
            external_id: external_id.clone(),
            identity: asset.identity,
            mime_type: asset.mime_type,
            byte_size: asset.byte_size,
            width: asset.dimensions.map(|(w, _)| w),
            height: asset.dimensions.map(|(_, h)| h),
            created_at: now,
            expires_at: now + self.ttl,
            source_tag: asset.source_tag,
            correlation_id: asset.correlation_id,
            session_tag: asset.session_tag,
            provenance: asset.provenance,
        };

        inner.records.insert(external_id.clone(), record.clone());
        inner.identity_index.insert(key, external_id.clone());
        inner.order.push(external_id.clone());

        debug!(external_id = %external_id, source_tag = %record.source_tag, "registered asset");
        record
    }

    /// Expiry-aware lookup. An expired record is dropped on the spot and
    /// reported as absent; absence is a normal result, not an error.
    pub fn get(&self, external_id: &str) -> Option<AssetRecord> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        match inner.records.get(external_id) {
            Some(record) if !record.is_expired(now) => Some(record.clone()),
            Some(_) => {
                debug!(external_id, "asset expired");
                remove_record(&mut inner, external_id);
                inner.order.retain(|id| id != external_id);
                None
            }
            None => None,
        }
    }

    /// List live records, most-recent-first, truncated to `limit`,
    /// optionally filtered by source tag and/or session tag.
    ///
    /// Reaps expired records as a side effect.
    pub fn list(
        &self,
        limit: usize,
        source_filter: Option<&str>,
        session_filter: Option<&str>,
    ) -> Vec<AssetRecord> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        reap_locked(&mut inner, now);

        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| source_filter.is_none_or(|f| r.source_tag == f))
            .filter(|r| session_filter.is_none_or(|f| r.session_tag.as_deref() == Some(f)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Remove all expired records from both indices. Idempotent; safe to
    /// call from any lookup path or on a timer. Returns the reap count.
    pub fn reap(&self) -> usize {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        reap_locked(&mut inner, now)
    }

    #[cfg(test)]
    pub(crate) fn index_sizes(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.records.len(), inner.identity_index.len())
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop a record from the id index and, if it still points here, the
/// identity index. Does not touch `order`.
fn remove_record(inner: &mut Inner, external_id: &str) {
    if let Some(record) = inner.records.remove(external_id) {
        let key = record.identity.key();
        if inner.identity_index.get(&key).map(String::as_str) == Some(external_id) {
            inner.identity_index.remove(&key);
        }
    }
}

fn reap_locked(inner: &mut Inner, now: SystemTime) -> usize {
    let expired: Vec<String> = inner
        .records
        .values()
        .filter(|r| r.is_expired(now))
        .map(|r| r.external_id.clone())
        .collect();

    for id in &expired {
        remove_record(inner, id);
    }
    if !expired.is_empty() {
        inner.order.retain(|id| inner.records.contains_key(id));
        info!(count = expired.len(), "reaped expired assets");
    }
    expired.len()
}
