use chrono::{DateTime, SecondsFormat, Utc};
use playstate_models::{Event, EventStatus, ModelError};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use crate::db::ConnectionPool;
use crate::error::{query_error, StorageError};

pub const EVENT_COLUMNS: &[&str] = &[
    "id",
    "status",
    "reference",
    "event",
    "event_data",
    "options",
    "attempts",
    "logs",
    "created_at",
    "updated_at",
];

/// Equality filters on the events table, unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventCriteria {
    pub id: Option<String>,
    pub status: Option<EventStatus>,
    pub reference: Option<String>,
    pub event: Option<String>,
}

impl EventCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Fill unset fields from `other`
    fn or(mut self, other: &EventCriteria) -> Self {
        self.id = self.id.or_else(|| other.id.clone());
        self.status = self.status.or(other.status);
        self.reference = self.reference.or_else(|| other.reference.clone());
        self.event = self.event.or_else(|| other.event.clone());
        self
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(id) = &self.id {
            clauses.push("id = ?");
            values.push(Value::Text(id.clone()));
        }
        if let Some(status) = self.status {
            clauses.push("status = ?");
            values.push(Value::Integer(status.as_i64()));
        }
        if let Some(reference) = &self.reference {
            clauses.push("reference = ?");
            values.push(Value::Text(reference.clone()));
        }
        if let Some(event) = &self.event {
            clauses.push("event = ?");
            values.push(Value::Text(event.clone()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches chronological order
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Build an event from whatever subset of columns the row carries
fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let stmt = row.as_ref();
    let index = |name: &str| stmt.column_index(name).ok();

    let mut event = Event::new(String::new(), serde_json::Value::Null);
    event.created_at = DateTime::<Utc>::MIN_UTC;

    if let Some(i) = index("id") {
        event.id = row.get(i)?;
    }
    if let Some(i) = index("status") {
        let raw: i64 = row.get(i)?;
        event.status = EventStatus::from_i64(raw).map_err(|e| conversion_error(i, e))?;
    }
    if let Some(i) = index("reference") {
        event.reference = row.get(i)?;
    }
    if let Some(i) = index("event") {
        event.event = row.get(i)?;
    }
    if let Some(i) = index("event_data") {
        let raw: String = row.get(i)?;
        event.event_data = serde_json::from_str(&raw).map_err(|e| conversion_error(i, e))?;
    }
    if let Some(i) = index("options") {
        let raw: String = row.get(i)?;
        event.options = serde_json::from_str(&raw).map_err(|e| conversion_error(i, e))?;
    }
    if let Some(i) = index("attempts") {
        event.attempts = row.get(i)?;
    }
    if let Some(i) = index("logs") {
        let raw: String = row.get(i)?;
        event.logs = serde_json::from_str::<VecDeque<String>>(&raw).map_err(|e| conversion_error(i, e))?;
    }
    if let Some(i) = index("created_at") {
        let raw: String = row.get(i)?;
        event.created_at = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| conversion_error(i, e))?
            .with_timezone(&Utc);
    }
    if let Some(i) = index("updated_at") {
        let raw: Option<String> = row.get(i)?;
        event.updated_at = match raw {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| conversion_error(i, e))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
    }

    Ok(event)
}

/// Persistence for queued work items
pub struct EventsRepository {
    pool: Arc<ConnectionPool>,
}

impl EventsRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn select(
        conn: &Connection,
        operation: &'static str,
        columns: &[&str],
        criteria: &EventCriteria,
        tail: &str,
    ) -> Result<Vec<Event>, StorageError> {
        let (where_clause, values) = criteria.where_clause();
        let sql = format!("SELECT {} FROM events{}{}", columns.join(", "), where_clause, tail);

        let mut stmt = conn.prepare(&sql).map_err(query_error(operation, &values))?;
        let events = stmt
            .query_map(params_from_iter(values.iter()), row_to_event)
            .map_err(query_error(operation, &values))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error(operation, &values))?;

        Ok(events)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Event>, StorageError> {
        self.find_one(&EventCriteria::new().id(id))
    }

    pub fn find_one(&self, criteria: &EventCriteria) -> Result<Option<Event>, StorageError> {
        let conn = self.pool.get()?;
        let mut found = Self::select(&conn, "find_one", EVENT_COLUMNS, criteria, " LIMIT 1")?;
        Ok(found.pop())
    }

    /// All matching events, newest first
    ///
    /// `columns` limits what is read, the rest of each event keeps its
    /// default value. Unknown column names are a validation error.
    pub fn find_all(&self, criteria: &EventCriteria, columns: Option<&[&str]>) -> Result<Vec<Event>, StorageError> {
        let columns = match columns {
            Some(columns) => {
                if let Some(unknown) = columns.iter().find(|c| !EVENT_COLUMNS.contains(c)) {
                    return Err(ModelError::InvalidEntity(format!("unknown event column '{}'", unknown)).into());
                }
                columns
            }
            None => EVENT_COLUMNS,
        };

        let conn = self.pool.get()?;
        Self::select(&conn, "find_all", columns, criteria, " ORDER BY created_at DESC")
    }

    /// Most recently created event carrying `reference`
    pub fn find_by_reference(
        &self,
        reference: &str,
        extra: Option<&EventCriteria>,
    ) -> Result<Option<Event>, StorageError> {
        let mut criteria = EventCriteria::new().reference(reference);
        if let Some(extra) = extra {
            criteria = criteria.or(extra);
        }

        let conn = self.pool.get()?;
        let mut found = Self::select(
            &conn,
            "find_by_reference",
            EVENT_COLUMNS,
            &criteria,
            " ORDER BY created_at DESC LIMIT 1",
        )?;
        Ok(found.pop())
    }

    /// Delete the newest event carrying `reference`, pending only unless `criteria` says otherwise
    pub fn remove_by_reference(
        &self,
        reference: &str,
        criteria: Option<&EventCriteria>,
    ) -> Result<bool, StorageError> {
        let default_criteria = EventCriteria::new().status(EventStatus::Pending);
        let criteria = EventCriteria::new()
            .reference(reference)
            .or(criteria.unwrap_or(&default_criteria));

        let (where_clause, values) = criteria.where_clause();
        let sql = format!(
            "DELETE FROM events WHERE id IN (SELECT id FROM events{} ORDER BY created_at DESC LIMIT 1)",
            where_clause
        );

        let conn = self.pool.get()?;
        let removed = conn
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(query_error("remove_by_reference", &values))?;

        debug!(operation = "remove_by_reference", reference = reference, removed = removed, "Removed events");
        Ok(removed > 0)
    }

    fn save_with(conn: &Connection, event: &mut Event) -> Result<String, StorageError> {
        let id = match &event.id {
            Some(id) => id.clone(),
            None => Uuid::new_v4().to_string(),
        };

        conn.execute(
            "INSERT INTO events (id, status, reference, event, event_data, options, attempts, logs, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                reference = excluded.reference,
                event = excluded.event,
                event_data = excluded.event_data,
                options = excluded.options,
                attempts = excluded.attempts,
                logs = excluded.logs,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                id,
                event.status.as_i64(),
                event.reference,
                event.event,
                serde_json::to_string(&event.event_data)?,
                serde_json::to_string(&event.options)?,
                event.attempts,
                serde_json::to_string(&event.logs)?,
                format_date(&event.created_at),
                event.updated_at.as_ref().map(format_date),
            ],
        )
        .map_err(query_error("save", (&id, &event.event, &event.reference)))?;

        event.id = Some(id.clone());
        Ok(id)
    }

    /// Insert or update, a new id is generated when the event has none
    pub fn save(&self, event: &mut Event) -> Result<String, StorageError> {
        let conn = self.pool.get()?;
        Self::save_with(&conn, event)
    }

    pub fn save_all(&self, events: &mut [Event]) -> Result<Vec<String>, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(query_error("save_all", events.len()))?;

        let mut ids = Vec::with_capacity(events.len());
        for event in events.iter_mut() {
            ids.push(Self::save_with(&tx, event)?);
        }

        tx.commit().map_err(query_error("save_all", ids.len()))?;
        Ok(ids)
    }

    pub fn remove(&self, event: &Event) -> Result<bool, StorageError> {
        let Some(id) = &event.id else {
            return Ok(false);
        };

        let conn = self.pool.get()?;
        let removed = conn
            .execute("DELETE FROM events WHERE id = ?1", params![id])
            .map_err(query_error("remove", id))?;
        Ok(removed > 0)
    }

    pub fn count(&self, criteria: &EventCriteria) -> Result<usize, StorageError> {
        let (where_clause, values) = criteria.where_clause();
        let sql = format!("SELECT COUNT(*) FROM events{}", where_clause);

        let conn = self.pool.get()?;
        let count: i64 = conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .optional()
            .map_err(query_error("count", &values))?
            .unwrap_or(0);
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::storage::migrations::{migrate, MigrationDirection};
    use chrono::Duration;
    use serde_json::json;

    fn repo() -> EventsRepository {
        let pool = open_memory_pool().unwrap();
        {
            let mut conn = pool.get().unwrap();
            migrate(&mut conn, MigrationDirection::Up).unwrap();
        }
        EventsRepository::new(pool)
    }

    fn event_at(reference: &str, status: EventStatus, minutes_ago: i64) -> Event {
        let mut event = Event::new("run_task", json!({"name": "scan"})).with_reference(reference);
        event.status = status;
        event.created_at = Utc::now() - Duration::minutes(minutes_ago);
        event
    }

    #[test]
    fn test_save_assigns_id_and_round_trips() {
        let repo = repo();
        let mut event = Event::new("run_task", json!({"name": "scan"})).with_reference("task://scan");
        event.add_log("queued");

        let id = repo.save(&mut event).unwrap();
        assert_eq!(event.id.as_deref(), Some(id.as_str()));
        assert!(Uuid::parse_str(&id).is_ok());

        let loaded = repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(loaded.event, "run_task");
        assert_eq!(loaded.logs, event.logs);
        assert_eq!(loaded.status, EventStatus::Pending);

        event.start().unwrap();
        repo.save(&mut event).unwrap();
        assert_eq!(repo.find_by_id(&id).unwrap().unwrap().status, EventStatus::Running);
        assert_eq!(repo.count(&EventCriteria::new()).unwrap(), 1);
    }

    #[test]
    fn test_find_by_reference_returns_newest() {
        let repo = repo();
        let mut events = vec![
            event_at("task://scan", EventStatus::Success, 30),
            event_at("task://scan", EventStatus::Failed, 5),
            event_at("task://scan", EventStatus::Success, 10),
        ];
        let ids = repo.save_all(&mut events).unwrap();

        let newest = repo.find_by_reference("task://scan", None).unwrap().unwrap();
        assert_eq!(newest.id.as_deref(), Some(ids[1].as_str()));

        let criteria = EventCriteria::new().status(EventStatus::Success);
        let newest_success = repo.find_by_reference("task://scan", Some(&criteria)).unwrap().unwrap();
        assert_eq!(newest_success.id.as_deref(), Some(ids[2].as_str()));

        assert!(repo.find_by_reference("task://other", None).unwrap().is_none());
    }

    #[test]
    fn test_remove_by_reference_defaults_to_pending() {
        let repo = repo();
        let mut done = event_at("task://scan", EventStatus::Success, 10);
        repo.save(&mut done).unwrap();

        assert!(!repo.remove_by_reference("task://scan", None).unwrap());
        assert_eq!(repo.count(&EventCriteria::new()).unwrap(), 1);

        let mut pending = event_at("task://scan", EventStatus::Pending, 1);
        repo.save(&mut pending).unwrap();
        assert!(repo.remove_by_reference("task://scan", None).unwrap());
        assert!(repo.find_by_id(pending.id.as_deref().unwrap()).unwrap().is_none());
        assert!(repo.find_by_id(done.id.as_deref().unwrap()).unwrap().is_some());

        let any_success = EventCriteria::new().status(EventStatus::Success);
        assert!(repo.remove_by_reference("task://scan", Some(&any_success)).unwrap());
        assert_eq!(repo.count(&EventCriteria::new()).unwrap(), 0);
    }

    #[test]
    fn test_remove_by_reference_removes_one_row() {
        let repo = repo();
        let mut events = vec![
            event_at("task://scan", EventStatus::Pending, 10),
            event_at("task://scan", EventStatus::Pending, 1),
        ];
        let ids = repo.save_all(&mut events).unwrap();

        assert!(repo.remove_by_reference("task://scan", None).unwrap());
        let left = repo.find_all(&EventCriteria::new(), None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id.as_deref(), Some(ids[0].as_str()));
    }

    #[test]
    fn test_find_all_with_columns() {
        let repo = repo();
        let mut events = vec![
            event_at("task://a", EventStatus::Pending, 2),
            event_at("task://b", EventStatus::Failed, 1),
        ];
        repo.save_all(&mut events).unwrap();

        let partial = repo
            .find_all(&EventCriteria::new().event("run_task"), Some(&["id", "reference"]))
            .unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial[0].reference.as_deref(), Some("task://b"));
        assert!(partial[0].event.is_empty());

        assert!(repo.find_all(&EventCriteria::new(), Some(&["id; DROP TABLE events"])).is_err());

        let failed = repo.find_one(&EventCriteria::new().status(EventStatus::Failed)).unwrap().unwrap();
        assert_eq!(failed.reference.as_deref(), Some("task://b"));
    }

    #[test]
    fn test_remove() {
        let repo = repo();
        let mut event = event_at("task://a", EventStatus::Pending, 0);
        assert!(!repo.remove(&event).unwrap());

        repo.save(&mut event).unwrap();
        assert!(repo.remove(&event).unwrap());
        assert_eq!(repo.count(&EventCriteria::new()).unwrap(), 0);
    }
}
