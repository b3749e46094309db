use chrono::{DateTime, Utc};
use playstate_models::entity::suid_pointer;
use playstate_models::{Entity, EntityType, Guid, ModelError, SourcePriority};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, info};
use crate::db::ConnectionPool;
use crate::error::{query_error, StorageError};
use crate::storage::migrations::{self, MigrationDirection, CURRENT_SCHEMA_VERSION};
use crate::storage::{CommitReport, MaintenanceReport, StateStorage};

const COLUMNS: &str =
    "s.id, s.type, s.updated, s.watched, s.via, s.title, s.year, s.season, s.episode, s.parent, s.guids, s.suids, s.extra";

/// SQLite backed entity store
///
/// Pointers are materialized into `state_pointers` on every write so lookups
/// by any external id stay index backed.
pub struct SqliteStorage {
    pool: Arc<ConnectionPool>,
    priority: SourcePriority,
}

impl SqliteStorage {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            priority: SourcePriority::default(),
        }
    }

    /// Tie-break order used when `commit` folds an unseen entity into a stored one
    pub fn with_priority(mut self, priority: SourcePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        Arc::clone(&self.pool)
    }

    /// Returns the row id and whether the row was created
    fn commit_one(&self, conn: &Connection, entity: &Entity) -> Result<(Option<i64>, bool), StorageError> {
        if entity.id.is_some() {
            return Ok((update_with(conn, entity)?.id, false));
        }

        match get_with(conn, entity)? {
            Some(mut stored) => {
                stored.merge_from(entity, &self.priority);
                Ok((update_with(conn, &stored)?.id, false))
            }
            None => Ok((insert_with(conn, entity)?.id, true)),
        }
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
    let type_name: String = row.get(1)?;
    let entity_type = EntityType::parse(&type_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, format!("unknown entity type '{}'", type_name).into())
    })?;

    Ok(Entity {
        id: Some(row.get(0)?),
        entity_type,
        updated: row.get(2)?,
        watched: row.get(3)?,
        via: row.get(4)?,
        title: row.get(5)?,
        year: row.get(6)?,
        season: row.get(7)?,
        episode: row.get(8)?,
        parent: json_column(row, 9)?,
        guids: json_column(row, 10)?,
        suids: json_column(row, 11)?,
        extra: json_column(row, 12)?,
    })
}

fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Entity>, StorageError> {
    let sql = format!("SELECT {} FROM state s WHERE s.id = ?1", COLUMNS);
    conn.query_row(&sql, params![id], row_to_entity)
        .optional()
        .map_err(query_error("find_by_id", id))
}

/// Episodes matched by a show level guid must also agree on season and episode
fn find_by_pointer(
    conn: &Connection,
    pointer: &str,
    entity_type: Option<EntityType>,
    numbers: Option<(u32, u32)>,
) -> Result<Option<Entity>, StorageError> {
    let mut sql = format!(
        "SELECT {} FROM state s JOIN state_pointers p ON p.state_id = s.id WHERE p.pointer = ?",
        COLUMNS
    );
    let mut values = vec![Value::Text(pointer.to_string())];

    if let Some(entity_type) = entity_type {
        sql.push_str(" AND s.type = ?");
        values.push(Value::Text(entity_type.as_str().to_string()));
    }

    if let Some((season, episode)) = numbers {
        sql.push_str(" AND s.season = ? AND s.episode = ?");
        values.push(Value::Integer(season as i64));
        values.push(Value::Integer(episode as i64));
    }

    sql.push_str(" ORDER BY s.id ASC LIMIT 1");

    conn.query_row(&sql, params_from_iter(values.iter()), row_to_entity)
        .optional()
        .map_err(query_error("find_by_pointer", &values))
}

fn get_with(conn: &Connection, entity: &Entity) -> Result<Option<Entity>, StorageError> {
    if let Some(id) = entity.id {
        if let Some(found) = find_by_id(conn, id)? {
            return Ok(Some(found));
        }
    }

    let entity_type = Some(entity.entity_type);

    for (key, value) in entity.suids_for(&entity.via) {
        if let Some(found) = find_by_pointer(conn, &suid_pointer(key, value), entity_type, None)? {
            return Ok(Some(found));
        }
    }

    for pointer in entity.relative_pointers() {
        if let Some(found) = find_by_pointer(conn, &pointer, entity_type, None)? {
            return Ok(Some(found));
        }
    }

    let numbers = if entity.is_episode() {
        entity.season.zip(entity.episode)
    } else {
        None
    };

    for pointer in entity.pointers() {
        if let Some(found) = find_by_pointer(conn, &pointer, entity_type, numbers)? {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

fn write_pointers(conn: &Connection, entity: &Entity, id: i64) -> Result<(), StorageError> {
    conn.execute("DELETE FROM state_pointers WHERE state_id = ?1", params![id])
        .map_err(query_error("write_pointers", id))?;

    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO state_pointers (pointer, state_id) VALUES (?1, ?2)")
        .map_err(query_error("write_pointers", id))?;

    for pointer in entity.all_pointers().into_iter().chain(entity.suid_pointers()) {
        stmt.execute(params![pointer, id])
            .map_err(query_error("write_pointers", (&pointer, id)))?;
    }

    Ok(())
}

fn insert_with(conn: &Connection, entity: &Entity) -> Result<Entity, StorageError> {
    if entity.id.is_some() {
        return Err(ModelError::InvalidEntity(format!("{}: already stored, use update", entity.name())).into());
    }
    entity.validate()?;

    conn.execute(
        "INSERT INTO state (type, updated, watched, via, title, year, season, episode, parent, guids, suids, extra)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entity.entity_type.as_str(),
            entity.updated,
            entity.watched,
            entity.via,
            entity.title,
            entity.year,
            entity.season,
            entity.episode,
            serde_json::to_string(&entity.parent)?,
            serde_json::to_string(&entity.guids)?,
            serde_json::to_string(&entity.suids)?,
            serde_json::to_string(&entity.extra)?,
        ],
    )
    .map_err(query_error("insert", entity.to_value()))?;

    let id = conn.last_insert_rowid();
    write_pointers(conn, entity, id)?;

    let mut stored = entity.clone();
    stored.id = Some(id);
    Ok(stored)
}

fn update_with(conn: &Connection, entity: &Entity) -> Result<Entity, StorageError> {
    let id = entity
        .id
        .ok_or_else(|| ModelError::InvalidEntity(format!("{}: cannot update without id", entity.name())))?;
    entity.validate()?;

    let changed = conn
        .execute(
            "UPDATE state SET type = ?1, updated = ?2, watched = ?3, via = ?4, title = ?5, year = ?6,
             season = ?7, episode = ?8, parent = ?9, guids = ?10, suids = ?11, extra = ?12
             WHERE id = ?13",
            params![
                entity.entity_type.as_str(),
                entity.updated,
                entity.watched,
                entity.via,
                entity.title,
                entity.year,
                entity.season,
                entity.episode,
                serde_json::to_string(&entity.parent)?,
                serde_json::to_string(&entity.guids)?,
                serde_json::to_string(&entity.suids)?,
                serde_json::to_string(&entity.extra)?,
                id,
            ],
        )
        .map_err(query_error("update", entity.to_value()))?;

    if changed == 0 {
        return Err(ModelError::InvalidEntity(format!("{}: no stored record with id {}", entity.name(), id)).into());
    }

    write_pointers(conn, entity, id)?;
    Ok(entity.clone())
}

impl StateStorage for SqliteStorage {
    fn insert(&self, entity: &Entity) -> Result<Entity, StorageError> {
        let conn = self.pool.get()?;
        let stored = insert_with(&conn, entity)?;
        debug!(operation = "insert", id = ?stored.id, entity = %stored.name(), "Inserted entity");
        Ok(stored)
    }

    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError> {
        let conn = self.pool.get()?;
        get_with(&conn, entity)
    }

    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError> {
        let conn = self.pool.get()?;
        let since = since.map(|d| d.timestamp()).unwrap_or(i64::MIN);
        let sql = format!("SELECT {} FROM state s WHERE s.updated >= ?1 ORDER BY s.id ASC", COLUMNS);

        let mut stmt = conn.prepare(&sql).map_err(query_error("get_all", since))?;
        let entities = stmt
            .query_map(params![since], row_to_entity)
            .map_err(query_error("get_all", since))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error("get_all", since))?;

        Ok(entities)
    }

    fn count(&self, since: Option<DateTime<Utc>>) -> Result<usize, StorageError> {
        let conn = self.pool.get()?;
        let since = since.map(|d| d.timestamp()).unwrap_or(i64::MIN);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM state WHERE updated >= ?1", params![since], |row| row.get(0))
            .map_err(query_error("count", since))?;
        Ok(count as usize)
    }

    fn update(&self, entity: &Entity) -> Result<Entity, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(query_error("update", entity.id))?;
        let stored = update_with(&tx, entity)?;
        tx.commit().map_err(query_error("update", entity.id))?;
        Ok(stored)
    }

    fn match_any_id(&self, ids: &[(String, String)]) -> Result<Option<Entity>, StorageError> {
        let conn = self.pool.get()?;

        for (scheme, value) in ids {
            let guid = Guid::from_pairs([(scheme.as_str(), value.as_str())]);
            for pointer in guid.pointers() {
                if let Some(found) = find_by_pointer(&conn, &pointer, None, None)? {
                    return Ok(Some(found));
                }
            }
        }

        Ok(None)
    }

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError> {
        let id = match entity.id {
            Some(id) => id,
            None => match self.get(entity)?.and_then(|found| found.id) {
                Some(id) => id,
                None => return Ok(false),
            },
        };

        let conn = self.pool.get()?;
        conn.execute("DELETE FROM state_pointers WHERE state_id = ?1", params![id])
            .map_err(query_error("remove", id))?;
        let removed = conn
            .execute("DELETE FROM state WHERE id = ?1", params![id])
            .map_err(query_error("remove", id))?;

        Ok(removed > 0)
    }

    fn commit(&self, entities: Vec<Entity>) -> Result<CommitReport, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(query_error("commit", entities.len()))?;
        let mut report = CommitReport::default();

        for entity in &entities {
            let outcome = self.commit_one(&tx, entity);
            let counts = report.counts_mut(entity.entity_type);
            let id = match outcome {
                Ok((id, true)) => {
                    counts.added += 1;
                    id
                }
                Ok((id, false)) => {
                    counts.updated += 1;
                    id
                }
                Err(e) => {
                    counts.failed += 1;
                    error!(
                        operation = "commit",
                        entity = %entity.name(),
                        via = %entity.via,
                        error = %e,
                        "Failed to commit entity"
                    );
                    None
                }
            };
            report.ids.push(id);
        }

        tx.commit().map_err(query_error("commit", entities.len()))?;

        info!(
            operation = "commit",
            added = report.added(),
            updated = report.updated(),
            failed = report.failed(),
            "Committed entities"
        );

        Ok(report)
    }

    fn migrate(&self, direction: MigrationDirection) -> Result<(), StorageError> {
        let mut conn = self.pool.get()?;
        migrations::migrate(&mut conn, direction)
    }

    fn is_migrated(&self) -> Result<bool, StorageError> {
        let conn = self.pool.get()?;
        Ok(migrations::schema_version(&conn)? == CURRENT_SCHEMA_VERSION)
    }

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        let conn = self.pool.get()?;

        let mut stmt = conn
            .prepare("PRAGMA integrity_check")
            .map_err(query_error("maintenance", "integrity_check"))?;
        let messages = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_error("maintenance", "integrity_check"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error("maintenance", "integrity_check"))?;
        drop(stmt);

        let integrity_ok = messages.len() == 1 && messages[0] == "ok";

        conn.execute_batch("VACUUM; ANALYZE;")
            .map_err(query_error("maintenance", "vacuum"))?;

        info!(operation = "maintenance", integrity_ok = integrity_ok, "Database maintenance finished");

        Ok(MaintenanceReport { integrity_ok, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use playstate_models::guid::{GUID_IMDB, GUID_TMDB, GUID_TVDB};
    use serde_json::json;

    fn storage() -> SqliteStorage {
        let storage = SqliteStorage::new(open_memory_pool().unwrap());
        storage.migrate(MigrationDirection::Up).unwrap();
        storage
    }

    fn movie(via: &str, updated: i64) -> Entity {
        Entity::movie(via, "Heat").with_watched(true, updated)
    }

    #[test]
    fn test_insert_and_get() {
        let storage = storage();
        let stored = storage.insert(&movie("plex", 100).with_guid(GUID_IMDB, "tt0113277")).unwrap();
        assert!(stored.id.is_some());

        let by_id = storage.get(&stored).unwrap().unwrap();
        assert_eq!(by_id, stored);

        let probe = Entity::movie("jellyfin", "Heat").with_guid(GUID_IMDB, "tt0113277");
        assert_eq!(storage.get(&probe).unwrap().unwrap().id, stored.id);

        assert!(storage.insert(&stored).unwrap_err().is_validation());
    }

    #[test]
    fn test_schemes_do_not_collide() {
        let storage = storage();
        storage.insert(&movie("plex", 1).with_guid(GUID_TVDB, "123")).unwrap();

        let probe = Entity::movie("plex", "Other").with_guid(GUID_TMDB, "123");
        assert!(storage.get(&probe).unwrap().is_none());
    }

    #[test]
    fn test_episode_lookup_requires_numbers() {
        let storage = storage();
        let ep = Entity::episode("plex", "Show", 1, 2)
            .with_guid(GUID_TVDB, "555")
            .with_parent(GUID_TVDB, "10")
            .with_watched(true, 10);
        storage.insert(&ep).unwrap();

        let other_ep = Entity::episode("emby", "Show", 1, 3).with_guid(GUID_TVDB, "555");
        assert!(storage.get(&other_ep).unwrap().is_none());

        let relative = Entity::episode("emby", "Show", 1, 2).with_parent(GUID_TVDB, "10");
        assert!(storage.get(&relative).unwrap().is_some());
    }

    #[test]
    fn test_get_by_backend_local_id() {
        let storage = storage();
        let mut item = movie("plex", 5);
        item.suids.insert("plex@alice".into(), "42".into());
        let stored = storage.insert(&item).unwrap();

        let mut probe = Entity::movie("plex", "");
        probe.suids.insert("plex@alice".into(), "42".into());
        assert_eq!(storage.get(&probe).unwrap().unwrap().id, stored.id);

        probe.via = "emby".into();
        assert!(storage.get(&probe).unwrap().is_none());
    }

    #[test]
    fn test_get_all_since_is_inclusive() {
        let storage = storage();
        storage.insert(&movie("plex", 100).with_guid(GUID_TMDB, "1")).unwrap();
        storage.insert(&movie("plex", 200).with_guid(GUID_TMDB, "2")).unwrap();
        storage.insert(&movie("plex", 300).with_guid(GUID_TMDB, "3")).unwrap();

        let since = DateTime::from_timestamp(200, 0).unwrap();
        assert_eq!(storage.get_all(Some(since)).unwrap().len(), 2);
        assert_eq!(storage.get_all(None).unwrap().len(), 3);
        assert_eq!(storage.count(Some(since)).unwrap(), 2);
    }

    #[test]
    fn test_commit_merges_matching_entities() {
        let storage = storage();
        let mut a = movie("plex", 100).with_guid(GUID_IMDB, "tt1");
        a.watched = false;
        a.suids.insert("plex@main".into(), "1".into());
        storage.insert(&a).unwrap();

        let mut b = movie("jellyfin", 200).with_guid(GUID_IMDB, "tt1").with_guid(GUID_TMDB, "9");
        b.suids.insert("jellyfin@main".into(), "abc".into());
        b.extra.insert("jellyfin".into(), json!({"watched": true}));

        let report = storage.commit(vec![b]).unwrap();
        assert_eq!(report.movie.updated, 1);
        assert_eq!(report.added(), 0);

        let merged = storage.get(&a).unwrap().unwrap();
        assert!(merged.watched);
        assert_eq!(merged.updated, 200);
        assert_eq!(merged.via, "jellyfin");
        assert_eq!(merged.guids.len(), 2);
        assert_eq!(merged.suids.len(), 2);
        assert_eq!(storage.count(None).unwrap(), 1);
    }

    #[test]
    fn test_commit_counts_failures_per_type() {
        let storage = storage();
        let good = movie("plex", 1).with_guid(GUID_TMDB, "1");
        let bad_episode = Entity::episode("plex", "Show", 1, 0).with_guid(GUID_TVDB, "3");
        let good_episode = Entity::episode("plex", "Show", 1, 1).with_guid(GUID_TVDB, "4");

        let report = storage.commit(vec![good, bad_episode, good_episode]).unwrap();
        assert_eq!(report.movie.added, 1);
        assert_eq!(report.episode.added, 1);
        assert_eq!(report.episode.failed, 1);
        assert_eq!(storage.count(None).unwrap(), 2);

        assert_eq!(report.ids.len(), 3);
        assert!(report.ids[0].is_some() && report.ids[2].is_some());
        assert!(report.ids[1].is_none());
    }

    #[test]
    fn test_update_and_remove() {
        let storage = storage();
        let mut stored = storage.insert(&movie("plex", 1).with_guid(GUID_TMDB, "1")).unwrap();

        stored.guids.clear();
        stored.guids.insert(GUID_TMDB.into(), "2".into());
        storage.update(&stored).unwrap();

        let old_probe = Entity::movie("plex", "").with_guid(GUID_TMDB, "1");
        assert!(storage.get(&old_probe).unwrap().is_none());

        let new_probe = Entity::movie("plex", "").with_guid(GUID_TMDB, "2");
        assert!(storage.remove(&new_probe).unwrap());
        assert!(!storage.remove(&new_probe).unwrap());
        assert!(storage.update(&stored).unwrap_err().is_validation());
    }

    #[test]
    fn test_match_any_id_uses_caller_order() {
        let storage = storage();
        let first = storage.insert(&movie("plex", 1).with_guid(GUID_TMDB, "1")).unwrap();
        let second = storage.insert(&movie("plex", 1).with_guid(GUID_IMDB, "tt2")).unwrap();

        let ids = vec![
            (GUID_IMDB.to_string(), "tt2".to_string()),
            (GUID_TMDB.to_string(), "1".to_string()),
        ];
        assert_eq!(storage.match_any_id(&ids).unwrap().unwrap().id, second.id);

        let ids = vec![
            ("guid_unknown".to_string(), "x".to_string()),
            (GUID_TMDB.to_string(), "1".to_string()),
        ];
        assert_eq!(storage.match_any_id(&ids).unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_query_error_carries_operation() {
        let storage = storage();
        storage.migrate(MigrationDirection::Down).unwrap();
        assert!(!storage.is_migrated().unwrap());

        match storage.insert(&movie("plex", 1)) {
            Err(StorageError::Query { operation, params, .. }) => {
                assert_eq!(operation, "insert");
                assert!(params.contains("Heat"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_maintenance() {
        let storage = storage();
        assert!(storage.is_migrated().unwrap());
        let report = storage.maintenance().unwrap();
        assert!(report.integrity_ok);
    }
}
