//! Known-face gallery
//!
//! On disk the gallery is one directory per person, named after the person,
//! holding any number of `encoding_<n>.npy` files (one embedding per captured
//! pose). Everything else in those directories (landmark JSON, face crops) is
//! ignored. The gallery is loaded once and is read-only afterwards.

use crate::error::GalleryError;
use common::Embedding;
use ndarray::ArrayD;
use ndarray_npy::read_npy;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EMBEDDING_FILE_PREFIX: &str = "encoding_";
const EMBEDDING_FILE_EXTENSION: &str = "npy";

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub person_name: String,
    pub embedding: Embedding,
}

impl GalleryEntry {
    pub fn new(person_name: impl Into<String>, embedding: impl Into<Embedding>) -> Self {
        Self {
            person_name: person_name.into(),
            embedding: embedding.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Load every person directory under `root`.
    ///
    /// A missing root yields an empty gallery, so every track resolves to
    /// Unknown. Person directories that cannot be listed and files that
    /// cannot be decoded are skipped with a warning.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Self, GalleryError> {
        let root = root.as_ref();
        if !root.is_dir() {
            warn!(
                path = %root.display(),
                "gallery directory not found, all tracks will resolve to Unknown"
            );
            return Ok(Self::empty());
        }

        let mut entries = Vec::new();
        for person_dir in sorted_children(root)? {
            if !person_dir.is_dir() {
                continue;
            }
            let Some(person_name) = person_dir
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
            else {
                warn!(path = %person_dir.display(), "skipping gallery directory with non UTF-8 name");
                continue;
            };

            match load_person_dir(&person_dir, &person_name) {
                Ok(person_entries) => entries.extend(person_entries),
                Err(e) => warn!(
                    person = %person_name,
                    error = %e,
                    "skipping unreadable gallery directory"
                ),
            }
        }

        let gallery = Self { entries };
        info!(
            path = %root.display(),
            entries = gallery.len(),
            persons = gallery.person_names().len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Entries in load order (person directories and files sorted by name)
    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct person names, sorted
    pub fn person_names(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .map(|entry| entry.person_name.as_str())
            .collect()
    }
}

/// Every decodable embedding in one person's directory
fn load_person_dir(person_dir: &Path, person_name: &str) -> Result<Vec<GalleryEntry>, GalleryError> {
    let mut entries = Vec::new();
    for file in sorted_children(person_dir)? {
        if !is_embedding_file(&file) {
            continue;
        }
        match read_embedding_file(&file) {
            Ok(embedding) => {
                debug!(
                    person = %person_name,
                    file = %file.display(),
                    dimension = embedding.len(),
                    "loaded gallery embedding"
                );
                entries.push(GalleryEntry {
                    person_name: person_name.to_string(),
                    embedding,
                });
            }
            Err(e) => warn!(error = %e, "skipping unreadable gallery embedding"),
        }
    }
    Ok(entries)
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let mut children = fs::read_dir(dir)
        .map_err(|e| GalleryError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GalleryError::io(dir, e))?;
    children.sort();
    Ok(children)
}

fn is_embedding_file(path: &Path) -> bool {
    let has_prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(EMBEDDING_FILE_PREFIX));
    let has_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EMBEDDING_FILE_EXTENSION));
    path.is_file() && has_prefix && has_extension
}

/// Read one embedding file. float32 and float64 arrays of any shape are
/// accepted and flattened, so both `(512,)` and `(1, 512)` layouts load.
pub fn read_embedding_file(path: &Path) -> Result<Embedding, GalleryError> {
    let values: Vec<f32> = match read_npy::<_, ArrayD<f32>>(path) {
        Ok(array) => array.iter().copied().collect(),
        Err(f32_err) => {
            let array: ArrayD<f64> = read_npy(path).map_err(|f64_err| {
                GalleryError::decode(path, format!("as f32: {f32_err}; as f64: {f64_err}"))
            })?;
            array.iter().map(|v| *v as f32).collect()
        }
    };

    if values.is_empty() {
        return Err(GalleryError::decode(path, "embedding is empty"));
    }
    Ok(Embedding::new(values))
}
