//! Identity layer of the surveillance pipeline: the known-face gallery,
//! gallery resolution, and the per-track identity cache that decides when a
//! tracked person's identity can be trusted and when it must be re-checked.

pub mod error;
pub mod gallery;
pub mod resolver;
pub mod track_cache;

pub use error::GalleryError;
pub use gallery::{Gallery, GalleryEntry};
pub use resolver::{GalleryResolver, IdentityResolver};
pub use track_cache::{
    Observation, RecheckPolicy, ResolutionReason, TrackCache, TrackRecord, Verification,
};
