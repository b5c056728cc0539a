use crate::gallery::{Gallery, GalleryEntry};
use common::{Embedding, Identity};
use std::sync::Arc;

/// Resolves a face embedding to a known person or Unknown
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, embedding: &Embedding) -> Identity;
}

/// Nearest-neighbour resolution against the gallery by cosine similarity
#[derive(Debug, Clone)]
pub struct GalleryResolver {
    gallery: Arc<Gallery>,
    threshold: f32,
}

impl GalleryResolver {
    pub fn new(gallery: Arc<Gallery>, threshold: f32) -> Self {
        Self { gallery, threshold }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Highest-similarity gallery entry. Ties keep the first entry in gallery order.
    pub fn best_match(&self, embedding: &Embedding) -> Option<(&GalleryEntry, f32)> {
        let mut best: Option<(&GalleryEntry, f32)> = None;
        for entry in self.gallery.entries() {
            let similarity = embedding.cosine_similarity(&entry.embedding);
            if similarity.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, best_similarity)| similarity > best_similarity) {
                best = Some((entry, similarity));
            }
        }
        best
    }
}

impl IdentityResolver for GalleryResolver {
    fn resolve(&self, embedding: &Embedding) -> Identity {
        match self.best_match(embedding) {
            Some((entry, similarity)) if similarity >= self.threshold => {
                Identity::known(entry.person_name.clone(), similarity)
            }
            _ => Identity::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(entries: Vec<GalleryEntry>, threshold: f32) -> GalleryResolver {
        GalleryResolver::new(Arc::new(Gallery::from_entries(entries)), threshold)
    }

    #[test]
    fn test_empty_gallery_always_unknown() {
        let resolver = resolver(vec![], 0.0);
        for query in [vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]] {
            assert_eq!(resolver.resolve(&Embedding::new(query)), Identity::Unknown);
        }
    }

    #[test]
    fn test_best_match_above_threshold() {
        let resolver = resolver(
            vec![
                GalleryEntry::new("Alice", vec![1.0_f32, 0.0]),
                GalleryEntry::new("Bob", vec![0.0_f32, 1.0]),
            ],
            0.45,
        );

        let identity = resolver.resolve(&Embedding::new(vec![0.2, 0.9]));
        assert_eq!(identity.name(), "Bob");
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let resolver = resolver(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 0.45);
        // cos = 0.1 / |(0.1, 0.995)| ~ 0.1
        let identity = resolver.resolve(&Embedding::new(vec![0.1, 0.995]));
        assert_eq!(identity, Identity::Unknown);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let resolver = resolver(vec![GalleryEntry::new("Alice", vec![1.0_f32, 0.0])], 1.0);
        let identity = resolver.resolve(&Embedding::new(vec![2.0, 0.0]));
        assert_eq!(identity.name(), "Alice");
    }

    #[test]
    fn test_ties_keep_first_entry() {
        let resolver = resolver(
            vec![
                GalleryEntry::new("First", vec![1.0_f32, 0.0]),
                GalleryEntry::new("Second", vec![1.0_f32, 0.0]),
            ],
            0.5,
        );
        let identity = resolver.resolve(&Embedding::new(vec![1.0, 0.0]));
        assert_eq!(identity.name(), "First");
    }

    #[test]
    fn test_multiple_poses_per_person() {
        let resolver = resolver(
            vec![
                GalleryEntry::new("Alice", vec![1.0_f32, 0.0, 0.0]),
                GalleryEntry::new("Alice", vec![0.0_f32, 0.0, 1.0]),
                GalleryEntry::new("Bob", vec![0.0_f32, 1.0, 0.0]),
            ],
            0.8,
        );
        let identity = resolver.resolve(&Embedding::new(vec![0.1, 0.0, 1.0]));
        match identity {
            Identity::Known { name, similarity } => {
                assert_eq!(name, "Alice");
                assert!(similarity > 0.99);
            }
            Identity::Unknown => panic!("expected Alice"),
        }
    }
}
