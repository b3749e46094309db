use chrono::{DateTime, Utc};
use playstate_models::entity::suid_pointer;
use playstate_models::{Entity, Guid};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use crate::error::StorageError;
use crate::mapper::MapperOptions;
use crate::requests::{OutboundRequest, RequestQueue};
use crate::storage::StateStorage;

/// Read side cache used while exporting play state to backends
///
/// After a full `load_data(None)` the cache is authoritative and a miss
/// never reaches storage. After a partial load each miss costs one storage
/// lookup and hits are kept for the rest of the run.
pub struct ExportMapper<S: StateStorage + ?Sized> {
    storage: Arc<S>,
    options: MapperOptions,
    objects: HashMap<i64, Entity>,
    pointers: HashMap<String, i64>,
    queue: RequestQueue,
    fully_loaded: bool,
}

impl<S: StateStorage + ?Sized> ExportMapper<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            options: MapperOptions::default(),
            objects: HashMap::new(),
            pointers: HashMap::new(),
            queue: RequestQueue::new(),
            fully_loaded: false,
        }
    }

    pub fn set_up(&mut self, options: MapperOptions) -> &mut Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub fn load_data(&mut self, since: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        let start = std::time::Instant::now();

        for entity in self.storage.get_all(since)? {
            self.remember(entity);
        }
        self.fully_loaded = since.is_none();

        info!(
            operation = "export_load",
            objects = self.objects.len(),
            fully_loaded = self.fully_loaded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded export cache"
        );

        Ok(())
    }

    /// Cache an entity and index its pointers, returns its id
    fn remember(&mut self, entity: Entity) -> Option<i64> {
        let id = entity.id?;
        for pointer in entity.suid_pointers().into_iter().chain(entity.all_pointers()) {
            self.pointers.insert(pointer, id);
        }
        self.objects.insert(id, entity);
        Some(id)
    }

    /// Same lookup order as storage: id, `via` local id, relative pointers, pointers
    fn cached_id(&self, entity: &Entity) -> Option<i64> {
        if let Some(id) = entity.id.filter(|id| self.objects.contains_key(id)) {
            return Some(id);
        }

        entity
            .suids_for(&entity.via)
            .map(|(key, value)| suid_pointer(key, value))
            .chain(entity.relative_pointers())
            .chain(entity.pointers())
            .find_map(|pointer| self.pointers.get(&pointer).copied())
            .filter(|id| {
                self.objects
                    .get(id)
                    .map(|found| found.entity_type == entity.entity_type)
                    .unwrap_or(false)
            })
    }

    pub fn get(&mut self, entity: &Entity) -> Result<Option<&Entity>, StorageError> {
        let id = match self.cached_id(entity) {
            Some(id) => Some(id),
            None if self.fully_loaded => None,
            None => {
                debug!(operation = "export_get", entity = %entity.name(), "Cache miss, asking storage");
                self.storage.get(entity)?.and_then(|found| self.remember(found))
            }
        };

        Ok(id.and_then(|id| self.objects.get(&id)))
    }

    /// Lookup by a raw scheme -> value map, e.g. ids reported by a webhook
    pub fn find_by_ids(&mut self, ids: &BTreeMap<String, String>) -> Result<Option<&Entity>, StorageError> {
        let guid = Guid::from_map(ids);

        let cached = guid
            .pointers()
            .iter()
            .find_map(|pointer| self.pointers.get(pointer).copied());

        let id = match cached {
            Some(id) => Some(id),
            None if self.fully_loaded || guid.is_empty() => None,
            None => {
                let candidates: Vec<(String, String)> =
                    guid.all().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                self.storage.match_any_id(&candidates)?.and_then(|found| self.remember(found))
            }
        };

        Ok(id.and_then(|id| self.objects.get(&id)))
    }

    pub fn has(&mut self, entity: &Entity) -> Result<bool, StorageError> {
        Ok(self.get(entity)?.is_some())
    }

    pub fn queue(&mut self, request: OutboundRequest) {
        self.queue.add(request);
    }

    pub fn queued(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn take_queue(&mut self) -> RequestQueue {
        std::mem::take(&mut self.queue)
    }

    /// Drop cached state and pending requests between independent runs
    pub fn reset(&mut self) {
        self.objects.clear();
        self.pointers.clear();
        self.queue.reset();
        self.fully_loaded = false;
    }

    pub fn objects(&self) -> impl Iterator<Item = &Entity> {
        self.objects.values()
    }

    pub fn objects_count(&self) -> usize {
        self.objects.len()
    }

    /// Cached entities whose play state differs from what `backend` last reported
    ///
    /// Only entities the backend can address (a local id is known) and that
    /// were changed at or after `since` are returned, ordered by id.
    pub fn diff_for_backend(&self, backend: &str, since: Option<DateTime<Utc>>) -> Vec<Entity> {
        let since = since.map(|d| d.timestamp());

        let mut changed: Vec<Entity> = self
            .objects
            .values()
            .filter(|entity| since.map(|s| entity.updated >= s).unwrap_or(true))
            .filter(|entity| entity.suids_for(backend).next().is_some())
            .filter(|entity| entity.backend_watched(backend) != Some(entity.watched))
            .cloned()
            .collect();

        changed.sort_by_key(|entity| entity.id);
        changed
    }

    /// Queue one request per entity returned by `diff_for_backend`, returns the count
    pub fn queue_changes(&mut self, backend: &str, since: Option<DateTime<Utc>>) -> usize {
        let requests: Vec<OutboundRequest> = self
            .diff_for_backend(backend, since)
            .iter()
            .filter_map(|entity| OutboundRequest::for_entity(backend, entity))
            .collect();

        let count = requests.len();
        for request in requests {
            self.queue.add(request);
        }

        debug!(operation = "export_diff", backend = backend, queued = count, "Queued play state changes");
        count
    }
}
