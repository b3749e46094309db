use chrono::Utc;
use playstate_models::{Event, EventOptions, EventStatus, ModelError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use crate::error::StorageError;
use crate::events::repository::{EventCriteria, EventsRepository};

#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub reference: Option<String>,
    /// Replace any event sharing the reference instead of reusing a pending one
    pub unique: bool,
    pub options: EventOptions,
}

impl QueueOptions {
    pub fn reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Single-flight front end for the events table
pub struct EventQueue {
    repository: Arc<EventsRepository>,
}

impl EventQueue {
    pub fn new(repository: Arc<EventsRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &EventsRepository {
        &self.repository
    }

    /// Persist a new pending event
    ///
    /// With a reference and `unique == false` a pending event carrying the
    /// same reference is refreshed in place and returned. With `unique` any
    /// newest event under that reference is deleted first.
    pub fn queue_event(&self, event: &str, data: Value, opts: QueueOptions) -> Result<Event, StorageError> {
        let existing = match &opts.reference {
            Some(reference) if !opts.unique => {
                let pending = EventCriteria::new().status(EventStatus::Pending);
                self.repository.find_by_reference(reference, Some(&pending))?
            }
            Some(reference) => {
                if let Some(found) = self.repository.find_by_reference(reference, None)? {
                    debug!(operation = "queue_event", reference = %reference, id = ?found.id, "Replacing event");
                    self.repository.remove(&found)?;
                }
                None
            }
            None => None,
        };

        let mut item = match existing {
            Some(mut found) => {
                found.event = event.to_string();
                found.status = EventStatus::Pending;
                found.event_data = data;
                found.options = opts.options;
                found.created_at = Utc::now();
                found.updated_at = Some(found.created_at);
                found
            }
            None => {
                let mut fresh = Event::new(event, data).with_options(opts.options);
                fresh.reference = opts.reference;
                fresh
            }
        };

        let id = self.repository.save(&mut item)?;
        info!(operation = "queue_event", event = event, id = %id, reference = ?item.reference, "Queued event");
        Ok(item)
    }

    /// Cancel a pending event, running ones are refused
    pub fn cancel(&self, id: &str) -> Result<Event, StorageError> {
        let mut event = self
            .repository
            .find_by_id(id)?
            .ok_or_else(|| ModelError::InvalidEntity(format!("event '{}' not found", id)))?;

        event.cancel()?;
        self.repository.save(&mut event)?;
        info!(operation = "cancel_event", id = id, "Cancelled event");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::storage::migrations::{migrate, MigrationDirection};
    use serde_json::json;

    fn queue() -> EventQueue {
        let pool = open_memory_pool().unwrap();
        {
            let mut conn = pool.get().unwrap();
            migrate(&mut conn, MigrationDirection::Up).unwrap();
        }
        EventQueue::new(Arc::new(EventsRepository::new(pool)))
    }

    #[test]
    fn test_pending_reference_is_reused() {
        let queue = queue();
        let first = queue
            .queue_event("run_task", json!({"name": "scan"}), QueueOptions::reference("task://scan"))
            .unwrap();
        let second = queue
            .queue_event("run_task", json!({"name": "scan", "force": true}), QueueOptions::reference("task://scan"))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.event_data["force"], json!(true));
        assert_eq!(queue.repository().count(&EventCriteria::new()).unwrap(), 1);
    }

    #[test]
    fn test_finished_reference_gets_new_event() {
        let queue = queue();
        let mut first = queue
            .queue_event("run_task", json!({}), QueueOptions::reference("task://scan"))
            .unwrap();
        first.start().unwrap();
        first.succeed().unwrap();
        queue.repository().save(&mut first).unwrap();

        let second = queue
            .queue_event("run_task", json!({}), QueueOptions::reference("task://scan"))
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(queue.repository().count(&EventCriteria::new()).unwrap(), 2);
    }

    #[test]
    fn test_unique_replaces_existing() {
        let queue = queue();
        let mut first = queue
            .queue_event("run_task", json!({}), QueueOptions::reference("task://scan"))
            .unwrap();
        first.start().unwrap();
        queue.repository().save(&mut first).unwrap();

        let second = queue
            .queue_event("run_task", json!({}), QueueOptions::reference("task://scan").unique())
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(queue.repository().find_by_id(first.id.as_deref().unwrap()).unwrap().is_none());
        assert_eq!(second.status, EventStatus::Pending);
    }

    #[test]
    fn test_cancel() {
        let queue = queue();
        let pending = queue.queue_event("run_task", json!({}), QueueOptions::default()).unwrap();
        let cancelled = queue.cancel(pending.id.as_deref().unwrap()).unwrap();
        assert_eq!(cancelled.status, EventStatus::Cancelled);

        let mut running = queue.queue_event("run_task", json!({}), QueueOptions::default()).unwrap();
        running.start().unwrap();
        queue.repository().save(&mut running).unwrap();

        let err = queue.cancel(running.id.as_deref().unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::Validation(ModelError::CancelRunning)));
        let stored = queue.repository().find_by_id(running.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Running);

        assert!(queue.cancel("missing").is_err());
    }
}
