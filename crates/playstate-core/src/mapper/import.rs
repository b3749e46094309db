use chrono::{DateTime, Utc};
use playstate_models::Entity;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::error::StorageError;
use crate::mapper::{AddOutcome, ImportMapper, ImportOptions, MapperOptions};
use crate::storage::{CommitReport, StateStorage};

/// Import mapper holding the whole working set in memory
///
/// Entities are kept in numbered slots so staged items without a storage id
/// can be tracked alongside stored ones.
pub struct MemoryMapper<S: StateStorage + ?Sized> {
    storage: Arc<S>,
    options: MapperOptions,
    objects: BTreeMap<usize, Entity>,
    pointers: HashMap<String, usize>,
    slot_pointers: HashMap<usize, Vec<String>>,
    ids: HashMap<i64, usize>,
    changed: BTreeSet<usize>,
    next_slot: usize,
    rejected: usize,
}

impl<S: StateStorage + ?Sized> MemoryMapper<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            options: MapperOptions::default(),
            objects: BTreeMap::new(),
            pointers: HashMap::new(),
            slot_pointers: HashMap::new(),
            ids: HashMap::new(),
            changed: BTreeSet::new(),
            next_slot: 0,
            rejected: 0,
        }
    }

    /// Items refused by `add` since the last reset
    pub fn rejected_count(&self) -> usize {
        self.rejected
    }

    /// Slots staged for the next commit
    pub fn changed_count(&self) -> usize {
        self.changed.len()
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Drop the pointers a slot was indexed under
    fn unindex(&mut self, slot: usize) {
        for pointer in self.slot_pointers.remove(&slot).unwrap_or_default() {
            if self.pointers.get(&pointer) == Some(&slot) {
                self.pointers.remove(&pointer);
            }
        }
    }

    /// Re-index a slot, pointers replaced by a merge stop resolving to it
    fn index(&mut self, slot: usize) {
        self.unindex(slot);
        let Some(entity) = self.objects.get(&slot) else {
            return;
        };

        if let Some(id) = entity.id {
            self.ids.insert(id, slot);
        }
        let pointers = entity.all_pointers();
        for pointer in &pointers {
            self.pointers.insert(pointer.clone(), slot);
        }
        self.slot_pointers.insert(slot, pointers);
    }

    fn insert_slot(&mut self, entity: Entity) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.objects.insert(slot, entity);
        self.index(slot);
        slot
    }

    fn find_slot(&self, entity: &Entity) -> Option<usize> {
        if let Some(slot) = entity.id.and_then(|id| self.ids.get(&id)) {
            return Some(*slot);
        }

        entity
            .all_pointers()
            .iter()
            .find_map(|pointer| self.pointers.get(pointer).copied())
            .filter(|slot| {
                self.objects
                    .get(slot)
                    .map(|found| found.entity_type == entity.entity_type)
                    .unwrap_or(false)
            })
    }

    fn reject(&mut self, entity: &Entity, reason: String) -> AddOutcome {
        self.rejected += 1;
        warn!(
            operation = "import_add",
            backend = %entity.via,
            entity = %entity.name(),
            reason = %reason,
            "Ignoring item"
        );
        AddOutcome::Rejected(reason)
    }
}

impl<S: StateStorage + ?Sized> ImportMapper for MemoryMapper<S> {
    fn set_up(&mut self, options: MapperOptions) {
        self.options = options;
    }

    fn load_data(&mut self, since: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        let start = std::time::Instant::now();

        for entity in self.storage.get_all(since)? {
            match self.find_slot(&entity) {
                Some(slot) => {
                    self.objects.insert(slot, entity);
                    self.index(slot);
                }
                None => {
                    self.insert_slot(entity);
                }
            }
        }

        info!(
            operation = "import_load",
            objects = self.objects.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded import mapper"
        );

        Ok(())
    }

    fn add(&mut self, mut entity: Entity, options: &ImportOptions) -> AddOutcome {
        if let Err(e) = entity.validate() {
            return self.reject(&entity, e.to_string());
        }

        if !entity.has_guids() && !entity.has_relative_guid() {
            return self.reject(&entity, "no supported external ids".to_string());
        }

        let metadata_only = options.metadata_only
            || options
                .after
                .map(|after| entity.updated <= after.timestamp())
                .unwrap_or(false);

        let backend = entity.via.clone();
        let (watched, updated) = (entity.watched, entity.updated);

        let Some(slot) = self.find_slot(&entity) else {
            if options.metadata_only {
                debug!(operation = "import_add", backend = %backend, entity = %entity.name(), "Unknown item in metadata only mode");
                return AddOutcome::Skipped;
            }

            entity.id = None;
            entity.record_backend_state(&backend, watched, updated);
            debug!(operation = "import_add", backend = %backend, entity = %entity.name(), "Staged new item");
            let slot = self.insert_slot(entity);
            self.changed.insert(slot);
            return AddOutcome::Added;
        };

        let priority = self.options.priority.clone();
        let Some(stored) = self.objects.get_mut(&slot) else {
            return AddOutcome::Unchanged;
        };

        let mut changed = if metadata_only {
            stored.merge_metadata_from(&entity)
        } else {
            stored.merge_from(&entity, &priority)
        };
        changed |= stored.record_backend_state(&backend, watched, updated);

        if !changed {
            return AddOutcome::Unchanged;
        }

        debug!(
            operation = "import_add",
            backend = %backend,
            entity = %stored.name(),
            metadata_only = metadata_only,
            "Updated item"
        );
        self.changed.insert(slot);
        self.index(slot);
        AddOutcome::Updated
    }

    fn get(&self, entity: &Entity) -> Option<&Entity> {
        self.find_slot(entity).and_then(|slot| self.objects.get(&slot))
    }

    fn remove(&mut self, entity: &Entity) -> Result<bool, StorageError> {
        let Some(slot) = self.find_slot(entity) else {
            return Ok(false);
        };
        let Some(stored) = self.objects.remove(&slot) else {
            return Ok(false);
        };

        let staged = self.changed.remove(&slot);
        self.unindex(slot);
        if let Some(id) = stored.id {
            self.ids.remove(&id);
        }

        if self.options.dry_run {
            return Ok(true);
        }

        // Staged items may have no row yet, storage resolves the rest by pointer
        let removed = self.storage.remove(&stored)?;
        Ok(removed || staged)
    }

    fn has(&self, entity: &Entity) -> bool {
        self.find_slot(entity).is_some()
    }

    fn commit(&mut self) -> Result<CommitReport, StorageError> {
        let slots: Vec<usize> = self.changed.iter().copied().filter(|slot| self.objects.contains_key(slot)).collect();
        let staged: Vec<Entity> = slots.iter().filter_map(|slot| self.objects.get(slot).cloned()).collect();

        if self.options.dry_run {
            let mut report = CommitReport::default();
            for entity in &staged {
                let counts = report.counts_mut(entity.entity_type);
                if entity.id.is_some() {
                    counts.updated += 1;
                } else {
                    counts.added += 1;
                }
            }
            info!(operation = "import_commit", dry_run = true, added = report.added(), updated = report.updated(), "Skipped writing changes");
            self.changed.clear();
            return Ok(report);
        }

        let report = self.storage.commit(staged)?;
        for (slot, id) in slots.into_iter().zip(report.ids.iter().copied()) {
            let Some(id) = id else {
                continue;
            };
            if let Some(entity) = self.objects.get_mut(&slot) {
                entity.id = Some(id);
            }
            self.ids.insert(id, slot);
        }
        self.changed.clear();
        Ok(report)
    }

    fn reset(&mut self) {
        self.objects.clear();
        self.pointers.clear();
        self.slot_pointers.clear();
        self.ids.clear();
        self.changed.clear();
        self.next_slot = 0;
        self.rejected = 0;
    }

    fn objects(&self, filter: Option<&dyn Fn(&Entity) -> bool>) -> Vec<&Entity> {
        self.objects
            .values()
            .filter(|entity| filter.map(|f| f(entity)).unwrap_or(true))
            .collect()
    }

    fn objects_count(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::storage::{MigrationDirection, SqliteStorage};
    use playstate_models::guid::{GUID_IMDB, GUID_TMDB, GUID_TVDB};
    use playstate_models::SourcePriority;

    fn mapper() -> MemoryMapper<SqliteStorage> {
        let storage = SqliteStorage::new(open_memory_pool().unwrap());
        storage.migrate(MigrationDirection::Up).unwrap();
        let mut mapper = MemoryMapper::new(Arc::new(storage));
        mapper.set_up(MapperOptions {
            priority: SourcePriority::new(vec!["plex".into(), "emby".into()]),
            dry_run: false,
        });
        mapper
    }

    fn movie(via: &str, watched: bool, updated: i64) -> Entity {
        let mut movie = Entity::movie(via, "Heat")
            .with_guid(GUID_IMDB, "tt0113277")
            .with_watched(watched, updated);
        movie.suids.insert(format!("{}@main", via), format!("{}-1", via));
        movie
    }

    #[test]
    fn test_add_stage_and_merge() {
        let mut mapper = mapper();
        let opts = ImportOptions::default();

        assert_eq!(mapper.add(movie("plex", false, 100), &opts), AddOutcome::Added);
        assert_eq!(mapper.add(movie("emby", true, 200), &opts), AddOutcome::Updated);
        assert_eq!(mapper.add(movie("emby", true, 200), &opts), AddOutcome::Unchanged);
        assert_eq!(mapper.objects_count(), 1);

        let stored = mapper.get(&movie("jellyfin", false, 0)).unwrap();
        assert!(stored.watched);
        assert_eq!(stored.suids.len(), 2);
        assert_eq!(stored.backend_watched("plex"), Some(false));
        assert_eq!(stored.backend_watched("emby"), Some(true));
    }

    #[test]
    fn test_rejects_items_without_ids_or_bad_numbers() {
        let mut mapper = mapper();
        let opts = ImportOptions::default();

        let no_ids = Entity::movie("plex", "Mystery").with_watched(true, 1);
        assert!(matches!(mapper.add(no_ids, &opts), AddOutcome::Rejected(_)));

        let bad_episode = Entity::episode("plex", "Show", 1, 0).with_guid(GUID_TVDB, "1");
        assert!(matches!(mapper.add(bad_episode, &opts), AddOutcome::Rejected(_)));

        let relative_only = Entity::episode("plex", "Show", 1, 1).with_parent(GUID_TVDB, "77");
        assert_eq!(mapper.add(relative_only, &opts), AddOutcome::Added);

        assert_eq!(mapper.rejected_count(), 2);
    }

    #[test]
    fn test_after_limits_to_metadata() {
        let mut mapper = mapper();
        mapper.add(movie("plex", true, 500), &ImportOptions::default());

        let opts = ImportOptions {
            after: Some(DateTime::from_timestamp(1000, 0).unwrap()),
            metadata_only: false,
        };
        let stale = movie("emby", false, 900).with_guid(GUID_TMDB, "949");
        assert_eq!(mapper.add(stale, &opts), AddOutcome::Updated);

        let stored = mapper.get(&movie("plex", true, 0)).unwrap();
        assert!(stored.watched);
        assert_eq!(stored.via, "plex");
        assert_eq!(stored.guids.get(GUID_TMDB).map(String::as_str), Some("949"));
    }

    #[test]
    fn test_metadata_only_skips_unknown() {
        let mut mapper = mapper();
        let opts = ImportOptions {
            after: None,
            metadata_only: true,
        };
        assert_eq!(mapper.add(movie("plex", true, 1), &opts), AddOutcome::Skipped);
        assert_eq!(mapper.objects_count(), 0);
    }

    #[test]
    fn test_tie_uses_priority() {
        let mut mapper = mapper();
        let opts = ImportOptions::default();
        mapper.add(movie("emby", false, 100), &opts);
        mapper.add(movie("plex", true, 100), &opts);
        assert!(mapper.get(&movie("x", false, 0)).unwrap().watched);

        mapper.reset();
        mapper.add(movie("plex", true, 100), &opts);
        mapper.add(movie("emby", false, 100), &opts);
        assert!(mapper.get(&movie("x", false, 0)).unwrap().watched);
    }

    #[test]
    fn test_commit_and_reload() {
        let mut mapper = mapper();
        let opts = ImportOptions::default();
        mapper.add(movie("plex", true, 100), &opts);
        mapper.add(Entity::episode("plex", "Show", 1, 1).with_guid(GUID_TVDB, "5").with_watched(true, 10), &opts);

        let report = mapper.commit().unwrap();
        assert_eq!(report.movie.added, 1);
        assert_eq!(report.episode.added, 1);
        assert_eq!(mapper.changed_count(), 0);

        let storage = Arc::clone(mapper.storage());
        let mut fresh = MemoryMapper::new(storage);
        fresh.load_data(None).unwrap();
        assert_eq!(fresh.objects_count(), 2);

        let episodes = fresh.objects(Some(&|e: &Entity| e.is_episode()));
        assert_eq!(episodes.len(), 1);

        assert_eq!(fresh.add(movie("emby", false, 300), &opts), AddOutcome::Updated);
        let report = fresh.commit().unwrap();
        assert_eq!(report.movie.updated, 1);
        assert_eq!(fresh.storage().count(None).unwrap(), 2);
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let mut mapper = mapper();
        mapper.set_up(MapperOptions {
            priority: SourcePriority::default(),
            dry_run: true,
        });
        mapper.add(movie("plex", true, 100), &ImportOptions::default());

        let report = mapper.commit().unwrap();
        assert_eq!(report.added(), 1);
        assert_eq!(mapper.storage().count(None).unwrap(), 0);

        assert!(mapper.remove(&movie("plex", true, 0)).unwrap());
        assert_eq!(mapper.objects_count(), 0);
    }

    #[test]
    fn test_remove() {
        let mut mapper = mapper();
        mapper.add(movie("plex", true, 100), &ImportOptions::default());
        mapper.commit().unwrap();

        let mut reloaded = MemoryMapper::new(Arc::clone(mapper.storage()));
        reloaded.load_data(None).unwrap();
        assert!(reloaded.remove(&movie("plex", true, 0)).unwrap());
        assert!(!reloaded.has(&movie("plex", true, 0)));
        assert_eq!(reloaded.storage().count(None).unwrap(), 0);
    }

    #[test]
    fn test_commit_assigns_ids_and_remove_deletes_row() {
        let mut mapper = mapper();
        mapper.add(movie("plex", true, 100), &ImportOptions::default());
        mapper.commit().unwrap();

        let id = mapper.get(&movie("plex", true, 0)).and_then(|e| e.id);
        assert!(id.is_some());
        assert!(mapper.get(&Entity { id, ..Entity::movie("x", "") }).is_some());

        assert!(mapper.remove(&movie("plex", true, 0)).unwrap());
        assert_eq!(mapper.objects_count(), 0);
        assert_eq!(mapper.storage().count(None).unwrap(), 0);
    }

    #[test]
    fn test_replaced_guid_stops_resolving() {
        let mut mapper = mapper();
        let opts = ImportOptions::default();
        mapper.add(movie("plex", true, 100).with_guid(GUID_TMDB, "1"), &opts);
        assert_eq!(mapper.add(movie("emby", true, 200).with_guid(GUID_TMDB, "2"), &opts), AddOutcome::Updated);

        let old = Entity::movie("x", "Heat").with_guid(GUID_TMDB, "1");
        let new = Entity::movie("x", "Heat").with_guid(GUID_TMDB, "2");
        assert!(!mapper.has(&old));
        assert!(mapper.has(&new));
        assert_eq!(mapper.objects_count(), 1);
    }
}
