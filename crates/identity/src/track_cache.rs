//! Per-track identity cache.
//!
//! Resolving a face against the gallery on every frame is wasteful once a
//! track is known, and wrong when a tracker hands an ID over to a different
//! person. The cache keeps the last identity and embedding per track and
//! re-resolves only when:
//!
//! - the track is seen for the first time,
//! - the new embedding no longer matches the stored one (possible ID switch),
//! - the track is still Unknown and its last check is older than the recheck window.
//!
//! Otherwise the stored identity is reused.

use crate::resolver::IdentityResolver;
use common::{Embedding, Identity, TrackId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecheckPolicy {
    /// Minimum similarity between a track's new and stored embedding to
    /// consider it the same person
    pub reidentification_threshold: f32,
    /// Frames after which an Unknown track is resolved again
    pub max_frames_before_recheck: u64,
    /// Drop records not seen for this many frames (`None` keeps them forever)
    pub eviction_after_frames: Option<u64>,
}

impl Default for RecheckPolicy {
    fn default() -> Self {
        Self {
            reidentification_threshold: 0.35,
            max_frames_before_recheck: 250,
            eviction_after_frames: Some(750),
        }
    }
}

impl RecheckPolicy {
    /// Absent embeddings on either side never count as the same person.
    pub fn is_same_person(&self, new: Option<&Embedding>, stored: Option<&Embedding>) -> bool {
        match (new, stored) {
            (Some(new), Some(stored)) => {
                new.cosine_similarity(stored) >= self.reidentification_threshold
            }
            _ => false,
        }
    }

    fn recheck_reason(
        &self,
        record: &TrackRecord,
        new_embedding: Option<&Embedding>,
        frame_index: u64,
    ) -> Option<ResolutionReason> {
        if !self.is_same_person(new_embedding, record.embedding.as_ref()) {
            return Some(ResolutionReason::EmbeddingMismatch);
        }

        let since_check = frame_index.saturating_sub(record.last_checked_frame);
        if record.identity.is_unknown() && since_check >= self.max_frames_before_recheck {
            return Some(ResolutionReason::StaleUnknown);
        }

        None
    }
}

/// Why a track was resolved against the gallery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionReason {
    FirstSight,
    EmbeddingMismatch,
    StaleUnknown,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstSight => "first_sight",
            Self::EmbeddingMismatch => "embedding_mismatch",
            Self::StaleUnknown => "stale_unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Resolved(ResolutionReason),
    Reused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub identity: Identity,
    pub verification: Verification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub track_id: TrackId,
    pub identity: Identity,
    pub embedding: Option<Embedding>,
    pub last_checked_frame: u64,
    pub last_seen_frame: u64,
}

/// Track ID -> last known identity. Owned by a single processing worker.
#[derive(Debug, Default)]
pub struct TrackCache {
    policy: RecheckPolicy,
    records: HashMap<TrackId, TrackRecord>,
}

impl TrackCache {
    pub fn new(policy: RecheckPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RecheckPolicy {
        &self.policy
    }

    /// Record a sighting of `track_id` on `frame_index` and return the identity to display.
    ///
    /// After this call the cache holds exactly one record for `track_id`.
    pub fn observe(
        &mut self,
        track_id: TrackId,
        embedding: Option<Embedding>,
        frame_index: u64,
        resolver: &dyn IdentityResolver,
    ) -> Observation {
        let policy = self.policy;
        let reason = match self.records.get_mut(&track_id) {
            None => ResolutionReason::FirstSight,
            Some(record) => match policy.recheck_reason(record, embedding.as_ref(), frame_index) {
                Some(reason) => reason,
                None => {
                    record.last_seen_frame = frame_index;
                    return Observation {
                        identity: record.identity.clone(),
                        verification: Verification::Reused,
                    };
                }
            },
        };

        let identity = match embedding.as_ref() {
            Some(embedding) => resolver.resolve(embedding),
            None => Identity::Unknown,
        };

        self.records.insert(
            track_id,
            TrackRecord {
                track_id,
                identity: identity.clone(),
                embedding,
                last_checked_frame: frame_index,
                last_seen_frame: frame_index,
            },
        );

        Observation {
            identity,
            verification: Verification::Resolved(reason),
        }
    }

    /// Remove records not seen within the eviction window and return their IDs
    pub fn evict_stale(&mut self, current_frame: u64) -> Vec<TrackId> {
        let Some(window) = self.policy.eviction_after_frames else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        self.records.retain(|track_id, record| {
            let keep = current_frame.saturating_sub(record.last_seen_frame) < window;
            if !keep {
                evicted.push(*track_id);
            }
            keep
        });
        evicted.sort_unstable();
        evicted
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackRecord> {
        self.records.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Gallery, GalleryEntry, GalleryResolver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        inner: GalleryResolver,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(entries: Vec<GalleryEntry>, threshold: f32) -> Self {
            Self {
                inner: GalleryResolver::new(Arc::new(Gallery::from_entries(entries)), threshold),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IdentityResolver for Counting {
        fn resolve(&self, embedding: &Embedding) -> Identity {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(embedding)
        }
    }

    fn emb(values: &[f32]) -> Option<Embedding> {
        Some(Embedding::new(values.to_vec()))
    }

    fn policy() -> RecheckPolicy {
        RecheckPolicy {
            reidentification_threshold: 0.45,
            max_frames_before_recheck: 250,
            eviction_after_frames: None,
        }
    }

    #[test]
    fn test_first_sight_resolves_and_inserts() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(policy());

        let obs = cache.observe(7, emb(&[0.9, 0.1]), 0, &resolver);
        assert_eq!(obs.identity.name(), "Alice");
        assert_eq!(
            obs.verification,
            Verification::Resolved(ResolutionReason::FirstSight)
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(7).map(|r| r.last_checked_frame), Some(0));
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_stable_track_is_not_re_resolved() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(policy());

        cache.observe(7, emb(&[1.0, 0.05]), 0, &resolver);
        for frame in 1..500 {
            let obs = cache.observe(7, emb(&[1.0, 0.02]), frame, &resolver);
            assert_eq!(obs.identity.name(), "Alice");
            assert_eq!(obs.verification, Verification::Reused);
        }
        assert_eq!(resolver.calls(), 1);
        assert_eq!(cache.get(7).map(|r| r.last_seen_frame), Some(499));
        assert_eq!(cache.get(7).map(|r| r.last_checked_frame), Some(0));
    }

    #[test]
    fn test_mismatch_replaces_record_even_when_unknown() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(policy());

        cache.observe(3, emb(&[1.0, 0.0]), 0, &resolver);
        let obs = cache.observe(3, emb(&[0.0, 1.0]), 1, &resolver);

        assert_eq!(obs.identity, Identity::Unknown);
        assert_eq!(
            obs.verification,
            Verification::Resolved(ResolutionReason::EmbeddingMismatch)
        );
        let record = cache.get(3).unwrap();
        assert_eq!(record.identity, Identity::Unknown);
        assert_eq!(record.embedding, emb(&[0.0, 1.0]));
        assert_eq!(record.last_checked_frame, 1);
        assert_eq!(resolver.calls(), 2);
    }

    #[test]
    fn test_unknown_track_rechecked_once_per_window() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(policy());

        cache.observe(9, emb(&[0.0, 1.0]), 0, &resolver);
        let mut rechecks = Vec::new();
        for frame in 1..=1000 {
            let obs = cache.observe(9, emb(&[0.0, 1.0]), frame, &resolver);
            if obs.verification == Verification::Resolved(ResolutionReason::StaleUnknown) {
                rechecks.push(frame);
            }
        }
        assert_eq!(rechecks, vec![250, 500, 750, 1000]);
        assert_eq!(resolver.calls(), 5);
    }

    #[test]
    fn test_known_track_is_never_rechecked_for_staleness() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(policy());

        cache.observe(1, emb(&[1.0, 0.0]), 0, &resolver);
        let obs = cache.observe(1, emb(&[1.0, 0.0]), 10_000, &resolver);
        assert_eq!(obs.verification, Verification::Reused);
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_stale_unknown_resolves_improved_embedding() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(RecheckPolicy {
            reidentification_threshold: 0.0,
            ..policy()
        });

        let first = cache.observe(9, emb(&[0.1, 0.995]), 9, &resolver);
        assert!(first.identity.is_unknown());

        let early = cache.observe(9, emb(&[0.5, 0.866]), 100, &resolver);
        assert!(early.identity.is_unknown());
        assert_eq!(early.verification, Verification::Reused);

        let later = cache.observe(9, emb(&[0.5, 0.866]), 260, &resolver);
        assert_eq!(later.identity.name(), "Alice");
        assert_eq!(
            later.verification,
            Verification::Resolved(ResolutionReason::StaleUnknown)
        );
        assert_eq!(cache.get(9).map(|r| r.last_checked_frame), Some(260));
    }

    #[test]
    fn test_absent_embedding_counts_as_mismatch_without_resolver_call() {
        let resolver = Counting::new(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        let mut cache = TrackCache::new(policy());

        cache.observe(4, emb(&[1.0, 0.0]), 0, &resolver);
        let obs = cache.observe(4, None, 1, &resolver);
        assert_eq!(obs.identity, Identity::Unknown);
        assert_eq!(
            obs.verification,
            Verification::Resolved(ResolutionReason::EmbeddingMismatch)
        );
        assert_eq!(cache.get(4).and_then(|r| r.embedding.clone()), None);
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_eviction_drops_tracks_not_seen_recently() {
        let resolver = Counting::new(vec![], 0.45);
        let mut cache = TrackCache::new(RecheckPolicy {
            eviction_after_frames: Some(10),
            ..policy()
        });

        cache.observe(1, emb(&[1.0]), 0, &resolver);
        cache.observe(2, emb(&[1.0]), 5, &resolver);

        assert!(cache.evict_stale(9).is_empty());
        assert_eq!(cache.evict_stale(10), vec![1]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evict_stale(15), vec![2]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_disabled() {
        let resolver = Counting::new(vec![], 0.45);
        let mut cache = TrackCache::new(policy());
        cache.observe(1, emb(&[1.0]), 0, &resolver);
        assert!(cache.evict_stale(1_000_000).is_empty());
        assert_eq!(cache.len(), 1);
    }
}
