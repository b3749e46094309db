use playstate_models::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestAction {
    MarkPlayed,
    MarkUnplayed,
}

/// A play state change bound for one backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundRequest {
    pub backend: String,
    pub entity_id: Option<i64>,
    pub action: RequestAction,
    pub remote_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl OutboundRequest {
    /// Build the request that brings `backend` in line with the canonical entity
    ///
    /// Returns `None` when the backend has no local id for the item.
    pub fn for_entity(backend: &str, entity: &Entity) -> Option<Self> {
        let (_, remote_id) = entity.suids_for(backend).next()?;

        Some(Self {
            backend: backend.to_string(),
            entity_id: entity.id,
            action: if entity.watched {
                RequestAction::MarkPlayed
            } else {
                RequestAction::MarkUnplayed
            },
            remote_id: remote_id.clone(),
            payload: json!({
                "name": entity.name(),
                "updated": entity.updated,
            }),
        })
    }
}

/// Ordered batch of outbound requests, dispatch happens elsewhere
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    items: Vec<OutboundRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, request: OutboundRequest) {
        self.items.push(request);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundRequest> {
        self.items.iter()
    }

    /// Requests bound for a single backend, in queue order
    pub fn for_backend<'a>(&'a self, backend: &'a str) -> impl Iterator<Item = &'a OutboundRequest> + 'a {
        self.items.iter().filter(move |r| r.backend == backend)
    }

    pub fn reset(&mut self) {
        self.items.clear();
    }

    pub fn drain(&mut self) -> Vec<OutboundRequest> {
        std::mem::take(&mut self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_for_entity() {
        let mut movie = Entity::movie("plex", "Heat").with_watched(true, 10);
        assert!(OutboundRequest::for_entity("emby", &movie).is_none());

        movie.suids.insert("emby@alice".into(), "e-1".into());
        let request = OutboundRequest::for_entity("emby", &movie).unwrap();
        assert_eq!(request.action, RequestAction::MarkPlayed);
        assert_eq!(request.remote_id, "e-1");
    }

    #[test]
    fn test_queue_keeps_order() {
        let mut queue = RequestQueue::new();
        for (backend, id) in [("emby", "1"), ("plex", "2"), ("emby", "3")] {
            queue.add(OutboundRequest {
                backend: backend.to_string(),
                entity_id: None,
                action: RequestAction::MarkUnplayed,
                remote_id: id.to_string(),
                payload: Value::Null,
            });
        }

        let emby: Vec<&str> = queue.for_backend("emby").map(|r| r.remote_id.as_str()).collect();
        assert_eq!(emby, vec!["1", "3"]);

        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert!(queue.is_empty());
    }
}
