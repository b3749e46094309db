use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use playstate_config::TaskDefinition;
use playstate_models::{Event, EventStatus};
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use crate::error::{SchedulerError, StorageError};
use crate::events::{EventCriteria, EventQueue, EventsRepository, QueueOptions};

/// Event name used for queued task runs
pub const TASK_EVENT: &str = "run_task";

pub fn task_reference(name: &str) -> String {
    format!("task://{}", name)
}

/// Parse a 5 field cron timer, the cron crate wants a leading seconds field
fn schedule(timer: &str) -> Option<Schedule> {
    match Schedule::from_str(&format!("0 {}", timer.trim())) {
        Ok(schedule) => Some(schedule),
        Err(e) => {
            debug!(timer = timer, error = %e, "Unparseable task timer");
            None
        }
    }
}

pub fn next_run(timer: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule(timer)?.after(&after).next()
}

pub fn prev_run(timer: &str, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule(timer)?.after(&before).next_back()
}

/// A task as presented to callers
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: TaskDefinition,
    pub next_run: Option<DateTime<Utc>>,
    pub prev_run: Option<DateTime<Utc>>,
    pub queued: bool,
}

/// Owns the task table and turns due timers into queued events
pub struct TaskScheduler {
    tasks: Vec<TaskDefinition>,
    queue: EventQueue,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl TaskScheduler {
    pub fn new(tasks: Vec<TaskDefinition>, repository: Arc<EventsRepository>) -> Self {
        Self {
            tasks,
            queue: EventQueue::new(repository),
            last_check: Mutex::new(None),
        }
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Result<&TaskDefinition, SchedulerError> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        *self.last_check.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Forget the last check, the next tick only looks one minute back
    pub fn reset(&self) {
        *self.last_check.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn pending(&self, name: &str) -> Result<Option<Event>, SchedulerError> {
        let criteria = EventCriteria::new().status(EventStatus::Pending);
        Ok(self.queue.repository().find_by_reference(&task_reference(name), Some(&criteria))?)
    }

    pub fn is_queued(&self, name: &str) -> Result<bool, SchedulerError> {
        Ok(self.pending(name)?.is_some())
    }

    fn format_task(&self, task: &TaskDefinition, now: DateTime<Utc>) -> Result<TaskView, SchedulerError> {
        let (next, prev) = if task.enabled {
            (next_run(&task.timer, now), prev_run(&task.timer, now))
        } else {
            (None, None)
        };

        Ok(TaskView {
            task: task.clone(),
            next_run: next,
            prev_run: prev,
            queued: self.is_queued(&task.name)?,
        })
    }

    pub fn list(&self, include_hidden: bool) -> Result<Vec<TaskView>, SchedulerError> {
        let now = Utc::now();
        self.tasks
            .iter()
            .filter(|t| include_hidden || !t.hide)
            .map(|t| self.format_task(t, now))
            .collect()
    }

    pub fn view(&self, name: &str) -> Result<TaskView, SchedulerError> {
        let task = self.task(name)?;
        self.format_task(task, Utc::now())
    }

    /// Queue a run of `name`, refused while a pending run exists
    pub fn queue(&self, name: &str) -> Result<Event, SchedulerError> {
        let task = self.task(name)?;
        if self.is_queued(&task.name)? {
            return Err(SchedulerError::AlreadyQueued(task.name.clone()));
        }

        let event = self.queue.queue_event(
            TASK_EVENT,
            json!({ "name": task.name }),
            QueueOptions::reference(task_reference(&task.name)),
        )?;
        Ok(event)
    }

    pub fn cancel(&self, name: &str) -> Result<Event, SchedulerError> {
        let task = self.task(name)?;

        let Some(mut event) = self.pending(&task.name)? else {
            let latest = self.queue.repository().find_by_reference(&task_reference(&task.name), None)?;
            return match latest {
                Some(event) if event.status == EventStatus::Running => {
                    Err(SchedulerError::Running(task.name.clone()))
                }
                _ => Err(SchedulerError::NotQueued(task.name.clone())),
            };
        };

        event.cancel().map_err(StorageError::from)?;
        self.queue.repository().save(&mut event)?;
        info!(operation = "cancel_task", task = %task.name, "Cancelled queued task");
        Ok(event)
    }

    /// Enabled tasks whose last scheduled fire time falls after the previous check
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<&TaskDefinition> {
        let since = self.last_check().unwrap_or(now - Duration::minutes(1));

        self.tasks
            .iter()
            .filter(|t| t.enabled)
            .filter(|t| match prev_run(&t.timer, now + Duration::seconds(1)) {
                Some(fired) => fired > since && fired <= now,
                None => false,
            })
            .collect()
    }

    /// Queue every due task that is not queued already, returns the new events
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Event>, SchedulerError> {
        let due: Vec<String> = self.due_tasks(now).into_iter().map(|t| t.name.clone()).collect();
        let mut queued = Vec::new();

        for name in due {
            match self.queue(&name) {
                Ok(event) => queued.push(event),
                Err(SchedulerError::AlreadyQueued(_)) => {
                    debug!(task = %name, "Task already queued, skipping");
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "Failed to queue task");
                    return Err(e);
                }
            }
        }

        *self.last_check.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
        Ok(queued)
    }
}
