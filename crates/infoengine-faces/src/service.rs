//! Enrollment, matching and removal of known people.
//!
//! Each call runs to completion on the caller's thread. The three stores
//! are joined on the person id.

use crate::config::Config;
use crate::error::FaceError;
use infoengine_core::{Embedding, FaceEncoder, GalleryEntry};
use infoengine_store::{EmbeddingStore, Person, PersonRegistry, PhotoStore, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A person identified from a query photo.
#[derive(Debug, Clone, Serialize)]
pub struct PersonMatch {
    pub person: Person,
    pub distance: f32,
    /// Stored enrollment photo, `None` if it has gone missing.
    pub photo: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub enum MatchOutcome {
    Matched(PersonMatch),
    NoMatch,
}

/// What a removal actually deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub person_deleted: bool,
    pub embedding_deleted: bool,
    pub photos_deleted: usize,
}

impl Removal {
    pub fn is_noop(&self) -> bool {
        *self == Removal::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub people: usize,
    pub embeddings: usize,
    pub photos: usize,
}

pub struct FaceService<E> {
    config: Config,
    registry: PersonRegistry,
    embeddings: EmbeddingStore,
    photos: PhotoStore,
    encoder: E,
}

impl<E: FaceEncoder> FaceService<E> {
    /// Open (creating as needed) every store named by `config`.
    pub fn open(config: Config, encoder: E) -> Result<Self, FaceError> {
        let registry = PersonRegistry::open(&config.db_path)?;
        let embeddings = EmbeddingStore::open(&config.encodings_dir)?;
        let photos = PhotoStore::open(&config.photos_dir)?;

        tracing::info!(
            db = %config.db_path.display(),
            encodings = %config.encodings_dir.display(),
            photos = %config.photos_dir.display(),
            "face stores opened"
        );

        Ok(Self { config, registry, embeddings, photos, encoder })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a new person from a photo holding their face.
    ///
    /// Nothing is written unless the photo decodes and contains a face.
    /// The registry row, embedding and photo copy are then written as one
    /// unit: if the embedding or photo cannot be written, whatever was
    /// written is deleted again and the row is rolled back.
    pub fn enroll(&mut self, photo: &Path, name: &str, info: &str) -> Result<Person, FaceError> {
        if name.trim().is_empty() {
            return Err(FaceError::Validation("name"));
        }
        if info.trim().is_empty() {
            return Err(FaceError::Validation("info"));
        }

        let embedding = self.encode_one(photo)?;

        let embeddings = &self.embeddings;
        let photos = &self.photos;
        let mut attempted = None;

        let created = self.registry.create_with(name, info, |id| -> Result<(), FaceError> {
            attempted = Some(id);
            embeddings.put(id, &embedding)?;
            // A leftover `<id>_*` file from an uncommitted attempt would shadow the new copy.
            let stale = photos.delete(id)?;
            if stale > 0 {
                tracing::warn!(id, stale, "removed leftover photos for a fresh id");
            }
            photos.put(id, photo)?;
            Ok(())
        });

        let person = match created {
            Ok(person) => person,
            Err(e) => {
                if let Some(id) = attempted {
                    tracing::warn!(id, error = %e, "enrollment failed after id assignment; compensating");
                    discard_files(embeddings, photos, id);
                }
                return Err(e);
            }
        };

        tracing::info!(id = person.id, name = %person.name, "person enrolled");
        Ok(person)
    }

    /// Identify the face in `photo` against every enrolled person.
    ///
    /// Candidates are scanned in ascending id order. "No match" is a normal
    /// outcome, not an error.
    pub fn identify(&mut self, photo: &Path) -> Result<MatchOutcome, FaceError> {
        let query = self.encode_one(photo)?;

        let mut people: HashMap<i64, Person> = self
            .registry
            .get_all()?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let gallery = self.gallery(&people, &query)?;
        let matcher = self.config.match_policy.matcher(self.config.metric);
        let result = matcher.compare(&query, &gallery, self.config.distance_threshold);

        tracing::info!(
            candidates = gallery.len(),
            matched = result.matched,
            distance = result.distance,
            policy = ?self.config.match_policy,
            "identify complete"
        );

        let Some(person) = result.entry_id.and_then(|id| people.remove(&id)) else {
            return Ok(MatchOutcome::NoMatch);
        };

        let stored_photo = self.photos.find(person.id)?;
        if stored_photo.is_none() {
            tracing::warn!(id = person.id, "matched person has no stored photo");
        }

        Ok(MatchOutcome::Matched(PersonMatch {
            person,
            distance: result.distance,
            photo: stored_photo,
        }))
    }

    /// Delete a person together with their embedding and photos.
    ///
    /// Removing an unknown id is not an error.
    pub fn remove(&mut self, id: i64) -> Result<Removal, FaceError> {
        let removal = Removal {
            person_deleted: self.registry.delete(id)?,
            embedding_deleted: self.embeddings.delete(id)?,
            photos_deleted: self.photos.delete(id)?,
        };

        if removal.is_noop() {
            tracing::debug!(id, "remove: nothing stored for id");
        } else {
            tracing::info!(id, ?removal, "person removed");
        }
        Ok(removal)
    }

    /// Every enrolled person, ordered by id.
    pub fn people(&self) -> Result<Vec<Person>, FaceError> {
        Ok(self.registry.get_all()?)
    }

    pub fn status(&self) -> Result<StoreStatus, FaceError> {
        Ok(StoreStatus {
            people: self.registry.count()?,
            embeddings: self.embeddings.count()?,
            photos: self.photos.count()?,
        })
    }

    /// Decode `photo` and return the embedding of its most confident face.
    fn encode_one(&mut self, photo: &Path) -> Result<Embedding, FaceError> {
        let image = image::open(photo)
            .map_err(|source| FaceError::ImageDecode { path: photo.to_path_buf(), source })?
            .to_rgb8();

        let faces = self.encoder.encode(&image)?;
        if faces.len() > 1 {
            tracing::warn!(
                faces = faces.len(),
                photo = %photo.display(),
                "several faces found; using the most confident one"
            );
        }

        faces
            .into_iter()
            .next()
            .ok_or_else(|| FaceError::NoFaceFound(photo.to_path_buf()))
    }

    /// Stored embeddings joined with registry rows, ascending by id.
    ///
    /// Entries that cannot be compared with `query` are left out with a
    /// warning: unreadable files, a different dimension, or a different
    /// model version when both sides record one.
    fn gallery(
        &self,
        people: &HashMap<i64, Person>,
        query: &Embedding,
    ) -> Result<Vec<GalleryEntry>, FaceError> {
        let mut gallery = Vec::new();
        for id in self.embeddings.list_ids()? {
            if !people.contains_key(&id) {
                tracing::warn!(id, "embedding without a registry entry skipped");
                continue;
            }
            let embedding = match self.embeddings.get(id) {
                Ok(Some(embedding)) => embedding,
                Ok(None) => continue,
                Err(e @ StoreError::Serialize { .. }) => {
                    tracing::warn!(id, error = %e, "unreadable embedding skipped");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if embedding.values.len() != query.values.len() {
                tracing::warn!(
                    id,
                    stored = embedding.values.len(),
                    expected = query.values.len(),
                    "embedding dimension differs; skipped"
                );
                continue;
            }
            if let (Some(stored), Some(current)) = (&embedding.model_version, &query.model_version) {
                if stored != current {
                    tracing::warn!(id, stored = %stored, current = %current, "embedding from another model skipped");
                    continue;
                }
            }
            gallery.push(GalleryEntry { id, embedding });
        }
        Ok(gallery)
    }
}

fn discard_files(embeddings: &EmbeddingStore, photos: &PhotoStore, id: i64) {
    if let Err(e) = embeddings.delete(id) {
        tracing::error!(id, error = %e, "could not delete partial embedding");
    }
    if let Err(e) = photos.delete(id) {
        tracing::error!(id, error = %e, "could not delete partial photo");
    }
}
