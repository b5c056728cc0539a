//! Identity policy tests against a gallery loaded from disk
//!
//! Scenarios:
//! 1. A stable known track is resolved once and then reused
//! 2. An Unknown track gets a second chance after the staleness window
//! 3. An Unknown track is re-resolved exactly once per window
//! 4. An embedding mismatch replaces the whole record
//! 5. An empty or missing gallery always yields Unknown

use anyhow::Result;
use common::{Embedding, Identity};
use identity::{
    Gallery, GalleryResolver, IdentityResolver, RecheckPolicy, ResolutionReason, TrackCache,
    Verification,
};
use ndarray::arr1;
use ndarray_npy::write_npy;
use std::path::Path;
use std::sync::Arc;
use surveillance_node::mock::CountingResolver;
use tempfile::TempDir;

// --- Fixtures ---

fn write_embedding(root: &Path, person: &str, index: usize, values: &[f32]) -> Result<()> {
    let dir = root.join(person);
    std::fs::create_dir_all(&dir)?;
    write_npy(dir.join(format!("encoding_{index}.npy")), &arr1(values))?;
    Ok(())
}

/// Gallery = {("Alice", [1, 0])}
fn alice_gallery() -> Result<(TempDir, Arc<Gallery>)> {
    let dir = tempfile::tempdir()?;
    write_embedding(dir.path(), "Alice", 0, &[1.0, 0.0])?;
    let gallery = Gallery::load_dir(dir.path())?;
    Ok((dir, Arc::new(gallery)))
}

fn counting_resolver(gallery: Arc<Gallery>) -> CountingResolver {
    CountingResolver::new(GalleryResolver::new(gallery, 0.45))
}

fn embedding(values: &[f32]) -> Option<Embedding> {
    Some(Embedding::new(values.to_vec()))
}

// --- Scenarios ---

#[test]
fn stable_known_track_is_not_rescanned() -> Result<()> {
    let (_dir, gallery) = alice_gallery()?;
    assert_eq!(gallery.len(), 1);
    let resolver = counting_resolver(gallery);
    let mut cache = TrackCache::new(RecheckPolicy::default());

    // cosine 0.9 to Alice
    let first = cache.observe(7, embedding(&[0.9, 0.43589]), 0, &resolver);
    assert_eq!(first.identity.name(), "Alice");
    assert_eq!(
        first.verification,
        Verification::Resolved(ResolutionReason::FirstSight)
    );

    // cosine 0.92 to Alice, ~0.999 to the stored embedding
    let second = cache.observe(7, embedding(&[0.92, 0.39192]), 1, &resolver);
    assert_eq!(second.identity.name(), "Alice");
    assert_eq!(second.verification, Verification::Reused);

    for frame in 2..100 {
        cache.observe(7, embedding(&[0.91, 0.41461]), frame, &resolver);
    }
    assert_eq!(resolver.calls(), 1);
    Ok(())
}

#[test]
fn unknown_track_resolves_after_staleness_window() -> Result<()> {
    let (_dir, gallery) = alice_gallery()?;
    let resolver = counting_resolver(gallery);
    let mut cache = TrackCache::new(RecheckPolicy::default());

    // max similarity 0.1
    let first = cache.observe(9, embedding(&[0.1, 0.99499]), 9, &resolver);
    assert!(first.identity.is_unknown());

    // better pose: similarity 0.5 to Alice
    let later = cache.observe(9, embedding(&[0.5, 0.86603]), 260, &resolver);
    assert_eq!(
        later.verification,
        Verification::Resolved(ResolutionReason::StaleUnknown)
    );
    assert_eq!(later.identity.name(), "Alice");
    assert_eq!(cache.get(9).map(|r| r.last_checked_frame), Some(260));
    assert_eq!(resolver.calls(), 2);
    Ok(())
}

#[test]
fn unknown_track_rechecked_once_per_window() -> Result<()> {
    let (_dir, gallery) = alice_gallery()?;
    let resolver = counting_resolver(gallery);
    let mut cache = TrackCache::new(RecheckPolicy::default());

    let mut resolved_at = Vec::new();
    for frame in 0..1000 {
        let observation = cache.observe(4, embedding(&[0.0, 1.0]), frame, &resolver);
        assert!(observation.identity.is_unknown());
        if matches!(observation.verification, Verification::Resolved(_)) {
            resolved_at.push(frame);
        }
    }

    assert_eq!(resolved_at, vec![0, 250, 500, 750]);
    assert_eq!(resolver.calls(), 4);
    Ok(())
}

#[test]
fn mismatch_replaces_record_even_when_unknown() -> Result<()> {
    let (_dir, gallery) = alice_gallery()?;
    let resolver = counting_resolver(gallery);
    let mut cache = TrackCache::new(RecheckPolicy::default());

    cache.observe(5, embedding(&[1.0, 0.0]), 0, &resolver);
    assert_eq!(cache.get(5).map(|r| r.identity.name()), Some("Alice"));

    // tracker handed the ID to someone else
    let swapped = cache.observe(5, embedding(&[0.0, 1.0]), 1, &resolver);
    assert_eq!(
        swapped.verification,
        Verification::Resolved(ResolutionReason::EmbeddingMismatch)
    );
    assert_eq!(swapped.identity, Identity::Unknown);

    let record = cache.get(5).cloned();
    let record = record.ok_or_else(|| anyhow::anyhow!("record missing"))?;
    assert_eq!(record.embedding, embedding(&[0.0, 1.0]));
    assert_eq!(record.last_checked_frame, 1);
    assert_eq!(resolver.calls(), 2);
    Ok(())
}

#[test]
fn empty_gallery_always_unknown() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let empty = Arc::new(Gallery::load_dir(dir.path())?);
    let missing = Arc::new(Gallery::load_dir(dir.path().join("nobody"))?);
    assert!(empty.is_empty());
    assert!(missing.is_empty());

    for gallery in [empty, missing] {
        let resolver = GalleryResolver::new(gallery, 0.0);
        for values in [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.5], [0.0, 0.0]] {
            assert!(resolver.resolve(&Embedding::new(values.to_vec())).is_unknown());
        }
    }
    Ok(())
}

#[test]
fn gallery_ignores_non_embedding_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_embedding(dir.path(), "Alice", 0, &[1.0, 0.0])?;
    write_embedding(dir.path(), "Alice", 1, &[0.9, 0.1])?;
    write_embedding(dir.path(), "Bob", 0, &[0.0, 1.0])?;
    std::fs::write(dir.path().join("Bob").join("landmarks.json"), "{}")?;
    std::fs::write(dir.path().join("Bob").join("encoding_9.npy"), b"garbage")?;

    let gallery = Gallery::load_dir(dir.path())?;
    assert_eq!(gallery.len(), 3);
    assert_eq!(
        gallery.person_names().into_iter().collect::<Vec<_>>(),
        vec!["Alice", "Bob"]
    );

    let resolver = GalleryResolver::new(Arc::new(gallery), 0.45);
    assert_eq!(
        resolver.resolve(&Embedding::new(vec![0.1, 0.9])).name(),
        "Bob"
    );
    Ok(())
}
