//! Label lookup for face embeddings.
//!
//! The gallery is a JSON file of labeled reference embeddings. A probe is
//! compared with every entry; the best entry wins if it clears the
//! similarity threshold.

use crate::types::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// Label returned when no gallery entry is similar enough.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("gallery I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("gallery {} JSON error: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("label must not be empty")]
    EmptyLabel,
}

/// Anything that maps an embedding to a label.
pub trait Classify {
    fn classify(&self, embedding: &Embedding) -> Result<String, ClassifierError>;
}

/// One enrolled reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    pub label: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gallery {
    pub entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = fs::read_to_string(path).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ClassifierError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, or start empty if it does not exist yet.
    pub fn load_or_empty(path: &Path) -> Result<Self, ClassifierError> {
        match Self::load(path) {
            Err(ClassifierError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write the gallery via a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let io_err = |source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ClassifierError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }

    /// Append a new entry and return its id.
    pub fn enroll(&mut self, label: &str, embedding: Embedding) -> Result<String, ClassifierError> {
        if label.trim().is_empty() {
            return Err(ClassifierError::EmptyLabel);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.entries.push(GalleryEntry {
            id: id.clone(),
            label: label.to_string(),
            embedding,
            enrolled_at: Utc::now(),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Nearest-neighbour classifier over a [`Gallery`].
pub struct GalleryClassifier {
    gallery: Gallery,
    threshold: f32,
}

impl GalleryClassifier {
    pub fn new(gallery: Gallery, threshold: f32) -> Self {
        Self { gallery, threshold }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }
}

impl Classify for GalleryClassifier {
    fn classify(&self, embedding: &Embedding) -> Result<String, ClassifierError> {
        let best = self
            .gallery
            .entries
            .iter()
            .map(|entry| (entry, embedding.similarity(&entry.embedding)))
            .fold(None::<(&GalleryEntry, f32)>, |best, (entry, sim)| match best {
                Some((_, best_sim)) if sim <= best_sim => best,
                _ => Some((entry, sim)),
            });

        match best {
            Some((entry, sim)) if sim >= self.threshold => {
                tracing::debug!(label = %entry.label, similarity = sim, "gallery match");
                Ok(entry.label.clone())
            }
            Some((_, sim)) => {
                tracing::debug!(similarity = sim, "best gallery entry below threshold");
                Ok(UNKNOWN_LABEL.to_string())
            }
            None => Ok(UNKNOWN_LABEL.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn gallery() -> Gallery {
        let mut g = Gallery::default();
        g.enroll("decoy1", emb(&[0.0, 1.0, 0.0])).unwrap();
        g.enroll("decoy2", emb(&[0.0, 0.0, 1.0])).unwrap();
        g.enroll("alice", emb(&[1.0, 0.0, 0.0])).unwrap();
        g
    }

    #[test]
    fn test_best_match_is_returned() {
        let clf = GalleryClassifier::new(gallery(), 0.5);
        assert_eq!(clf.classify(&emb(&[0.9, 0.1, 0.0])).unwrap(), "alice");
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let clf = GalleryClassifier::new(gallery(), 0.9);
        assert_eq!(clf.classify(&emb(&[1.0, 1.0, 1.0])).unwrap(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let clf = GalleryClassifier::new(Gallery::default(), 0.1);
        assert_eq!(clf.classify(&emb(&[1.0, 0.0])).unwrap(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_enroll_rejects_blank_label() {
        let mut g = Gallery::default();
        assert!(matches!(g.enroll("  ", emb(&[1.0])), Err(ClassifierError::EmptyLabel)));
        assert!(g.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("gallery.json");
        let g = gallery();
        g.save(&path).unwrap();

        let loaded = Gallery::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.entries[2].label, "alice");
        assert_eq!(loaded.entries[0].id, g.entries[0].id);
    }

    #[test]
    fn test_load_or_empty_missing_file() {
        let dir = tempdir().unwrap();
        let g = Gallery::load_or_empty(&dir.path().join("none.json")).unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(Gallery::load(&path), Err(ClassifierError::Json { .. })));
        assert!(matches!(Gallery::load_or_empty(&path), Err(ClassifierError::Json { .. })));
    }
}
