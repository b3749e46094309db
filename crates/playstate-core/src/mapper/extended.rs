use chrono::{DateTime, Utc};
use playstate_models::Entity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn, Span};
use crate::error::StorageError;
use crate::mapper::{AddOutcome, ImportMapper, ImportOptions, MapperOptions, MemoryMapper};
use crate::storage::{CommitReport, StateStorage};

/// Small key/value cache shared across mapper runs
pub trait MapperCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
}

#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MapperCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(key);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserContext {
    pub name: String,
}

impl UserContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// What the caller knows about a backend when asking for changes
#[derive(Debug, Clone, PartialEq)]
pub struct BackendState {
    pub name: String,
    /// Last successful sync, falls back to the cached value when absent
    pub last_sync: Option<DateTime<Utc>>,
}

impl BackendState {
    pub fn new(name: impl Into<String>, last_sync: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            last_sync,
        }
    }
}

/// Multi user import mapper
///
/// Every user owns a separate storage handle and `MemoryMapper`; the
/// `ImportMapper` calls act on the active user while the others are parked.
pub struct ExtendedMemoryMapper<S: StateStorage + ?Sized> {
    cache: Arc<dyn MapperCache>,
    span: Span,
    options: MapperOptions,
    user: UserContext,
    mapper: MemoryMapper<S>,
    parked: HashMap<String, MemoryMapper<S>>,
}

impl<S: StateStorage + ?Sized> ExtendedMemoryMapper<S> {
    pub fn new(user: UserContext, storage: Arc<S>, cache: Arc<dyn MapperCache>, span: Span) -> Self {
        Self {
            cache,
            span,
            options: MapperOptions::default(),
            user,
            mapper: MemoryMapper::new(storage),
            parked: HashMap::new(),
        }
    }

    /// Register a user, replacing any previous mapper under that name
    pub fn add_user(&mut self, user: UserContext, storage: Arc<S>) {
        let mut mapper = MemoryMapper::new(storage);
        mapper.set_up(self.options.clone());

        if user.name == self.user.name {
            self.mapper = mapper;
        } else {
            self.parked.insert(user.name, mapper);
        }
    }

    /// Make `name` the active user, returns false when unknown
    pub fn switch_user(&mut self, name: &str) -> bool {
        if name == self.user.name {
            return true;
        }

        let Some(next) = self.parked.remove(name) else {
            warn!(parent: &self.span, user = name, "Unknown user");
            return false;
        };

        let previous = std::mem::replace(&mut self.mapper, next);
        let previous_user = std::mem::replace(&mut self.user, UserContext::new(name));
        self.parked.insert(previous_user.name, previous);
        true
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn users(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parked.keys().map(String::as_str).collect();
        names.push(self.user.name.as_str());
        names.sort_unstable();
        names
    }

    fn sync_key(&self, backend: &str) -> String {
        format!("{}:last_sync:{}", self.user.name, backend)
    }

    /// Record a successful sync for the active user
    pub fn mark_synced(&self, backend: &str, at: DateTime<Utc>) {
        self.cache.set(&self.sync_key(backend), Value::from(at.timestamp()));
    }

    fn last_sync(&self, backend: &BackendState) -> Option<i64> {
        backend
            .last_sync
            .map(|d| d.timestamp())
            .or_else(|| self.cache.get(&self.sync_key(&backend.name)).and_then(|v| v.as_i64()))
    }

    /// Entities each backend has not seen yet
    ///
    /// For every backend: items of the active user changed after its last
    /// sync by some other backend. A backend that never synced gets
    /// everything reported by others.
    pub fn compute_changes(&self, backends: &[BackendState]) -> HashMap<String, Vec<Entity>> {
        let _guard = self.span.enter();
        let mut changes = HashMap::new();

        for backend in backends {
            let since = self.last_sync(backend);

            let mut items: Vec<Entity> = self
                .mapper
                .objects(None)
                .into_iter()
                .filter(|entity| entity.via != backend.name)
                .filter(|entity| since.map(|s| entity.updated > s).unwrap_or(true))
                .cloned()
                .collect();
            items.sort_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.id.cmp(&b.id)));

            debug!(backend = %backend.name, since = ?since, changes = items.len(), "Computed backend changes");
            changes.insert(backend.name.clone(), items);
        }

        changes
    }
}

impl<S: StateStorage + ?Sized> ImportMapper for ExtendedMemoryMapper<S> {
    fn set_up(&mut self, options: MapperOptions) {
        self.mapper.set_up(options.clone());
        for mapper in self.parked.values_mut() {
            mapper.set_up(options.clone());
        }
        self.options = options;
    }

    fn load_data(&mut self, since: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        let _guard = self.span.enter();
        self.mapper.load_data(since)
    }

    fn add(&mut self, entity: Entity, options: &ImportOptions) -> AddOutcome {
        let _guard = self.span.enter();
        self.mapper.add(entity, options)
    }

    fn get(&self, entity: &Entity) -> Option<&Entity> {
        self.mapper.get(entity)
    }

    fn remove(&mut self, entity: &Entity) -> Result<bool, StorageError> {
        let _guard = self.span.enter();
        self.mapper.remove(entity)
    }

    fn has(&self, entity: &Entity) -> bool {
        self.mapper.has(entity)
    }

    fn commit(&mut self) -> Result<CommitReport, StorageError> {
        let _guard = self.span.enter();
        self.mapper.commit()
    }

    fn reset(&mut self) {
        self.mapper.reset();
    }

    fn objects(&self, filter: Option<&dyn Fn(&Entity) -> bool>) -> Vec<&Entity> {
        self.mapper.objects(filter)
    }

    fn objects_count(&self) -> usize {
        self.mapper.objects_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::storage::{MigrationDirection, SqliteStorage};
    use playstate_models::guid::GUID_TMDB;
    use tracing::info_span;

    fn storage() -> Arc<SqliteStorage> {
        let storage = SqliteStorage::new(open_memory_pool().unwrap());
        storage.migrate(MigrationDirection::Up).unwrap();
        Arc::new(storage)
    }

    fn movie(via: &str, id: &str, updated: i64) -> Entity {
        Entity::movie(via, format!("Movie {}", id))
            .with_guid(GUID_TMDB, id)
            .with_watched(true, updated)
    }

    fn mapper() -> ExtendedMemoryMapper<SqliteStorage> {
        ExtendedMemoryMapper::new(
            UserContext::new("main"),
            storage(),
            Arc::new(MemoryCache::new()),
            info_span!("import", user = "main"),
        )
    }

    #[test]
    fn test_users_are_partitioned() {
        let mut mapper = mapper();
        mapper.add_user(UserContext::new("kid"), storage());
        let opts = ImportOptions::default();

        mapper.add(movie("plex", "1", 10), &opts);
        assert!(mapper.switch_user("kid"));
        assert_eq!(mapper.objects_count(), 0);
        mapper.add(movie("plex", "2", 10), &opts);
        mapper.add(movie("plex", "3", 10), &opts);
        assert_eq!(mapper.commit().unwrap().added(), 2);

        assert!(mapper.switch_user("main"));
        assert_eq!(mapper.objects_count(), 1);
        assert!(!mapper.switch_user("nobody"));
        assert_eq!(mapper.user().name, "main");
        assert_eq!(mapper.users(), vec!["kid", "main"]);
    }

    #[test]
    fn test_compute_changes() {
        let mut mapper = mapper();
        let opts = ImportOptions::default();
        mapper.add(movie("plex", "1", 100), &opts);
        mapper.add(movie("emby", "2", 200), &opts);
        mapper.add(movie("jellyfin", "3", 300), &opts);

        mapper.mark_synced("emby", DateTime::from_timestamp(150, 0).unwrap());

        let changes = mapper.compute_changes(&[
            BackendState::new("emby", None),
            BackendState::new("plex", Some(DateTime::from_timestamp(250, 0).unwrap())),
            BackendState::new("jellyfin", None),
        ]);

        let ids = |name: &str| -> Vec<String> {
            changes[name].iter().map(|e| e.guids[GUID_TMDB].clone()).collect()
        };
        assert_eq!(ids("emby"), vec!["3"]);
        assert_eq!(ids("plex"), vec!["3"]);
        assert_eq!(ids("jellyfin"), vec!["1", "2"]);
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::new();
        cache.set("k", Value::from(1));
        assert_eq!(cache.get("k"), Some(Value::from(1)));
        cache.remove("k");
        assert!(cache.get("k").is_none());
    }
}
