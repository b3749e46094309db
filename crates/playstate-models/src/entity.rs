use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use crate::error::ModelError;
use crate::guid::Guid;
use crate::priority::SourcePriority;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Movie,
    Episode,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Movie => "movie",
            EntityType::Episode => "episode",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "movie" => Some(EntityType::Movie),
            "episode" => Some(EntityType::Episode),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical watch-state record for one movie or episode
///
/// The same item usually exists on several backends under different local
/// ids; `guids` (external ids) and `parent` (show ids, for episodes) are
/// what ties those copies together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>, // Assigned by storage
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub watched: bool,
    #[serde(default)]
    pub updated: i64, // Epoch seconds of the last watch state change
    #[serde(default)]
    pub via: String, // Backend that last reported this entity
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default)]
    pub parent: BTreeMap<String, String>,
    #[serde(default)]
    pub guids: BTreeMap<String, String>,
    #[serde(default)]
    pub suids: BTreeMap<String, String>, // "backend@scope" -> backend local id
    #[serde(default)]
    pub extra: BTreeMap<String, Value>, // Per backend metadata, keyed by backend name
}

impl Entity {
    pub fn new(entity_type: EntityType, via: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_type,
            watched: false,
            updated: 0,
            via: via.into(),
            title: title.into(),
            year: None,
            season: None,
            episode: None,
            parent: BTreeMap::new(),
            guids: BTreeMap::new(),
            suids: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn movie(via: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(EntityType::Movie, via, title)
    }

    pub fn episode(via: impl Into<String>, title: impl Into<String>, season: u32, episode: u32) -> Self {
        let mut entity = Self::new(EntityType::Episode, via, title);
        entity.season = Some(season);
        entity.episode = Some(episode);
        entity
    }

    pub fn with_guid(mut self, scheme: &str, value: &str) -> Self {
        self.guids.insert(scheme.to_string(), value.to_string());
        self
    }

    pub fn with_parent(mut self, scheme: &str, value: &str) -> Self {
        self.parent.insert(scheme.to_string(), value.to_string());
        self
    }

    pub fn with_watched(mut self, watched: bool, updated: i64) -> Self {
        self.watched = watched;
        self.updated = updated;
        self
    }

    pub fn is_movie(&self) -> bool {
        self.entity_type == EntityType::Movie
    }

    pub fn is_episode(&self) -> bool {
        self.entity_type == EntityType::Episode
    }

    /// Scheme-qualified pointers for every supported, well-formed guid
    pub fn pointers(&self) -> Vec<String> {
        Guid::from_map(&self.guids).pointers()
    }

    /// `r{scheme}://{parent}/{season}/{episode}` pointers, episodes only
    pub fn relative_pointers(&self) -> Vec<String> {
        if !self.is_episode() {
            return Vec::new();
        }

        let (Some(season), Some(episode)) = (self.season, self.episode) else {
            return Vec::new();
        };

        Guid::from_map(&self.parent)
            .pointers()
            .into_iter()
            .map(|pointer| format!("r{}/{}/{}", pointer, season, episode))
            .collect()
    }

    pub fn all_pointers(&self) -> Vec<String> {
        let mut pointers = self.pointers();
        pointers.extend(self.relative_pointers());
        pointers
    }

    /// Backend local id pointers, only meaningful inside storage lookups
    pub fn suid_pointers(&self) -> Vec<String> {
        self.suids
            .iter()
            .map(|(key, value)| suid_pointer(key, value))
            .collect()
    }

    /// Local ids reported by `backend`, one per scope
    pub fn suids_for<'a>(&'a self, backend: &'a str) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
        self.suids.iter().filter(move |(key, _)| {
            key.split_once('@').map(|(name, _)| name).unwrap_or(key.as_str()) == backend
        })
    }

    pub fn has_guids(&self) -> bool {
        !Guid::from_map(&self.guids).is_empty()
    }

    pub fn has_relative_guid(&self) -> bool {
        !self.relative_pointers().is_empty()
    }

    /// Human readable name, e.g. `Show (2019) - 01x005`
    pub fn name(&self) -> String {
        let title = if self.title.trim().is_empty() { "??" } else { self.title.as_str() };
        let year = self
            .year
            .filter(|y| *y > 0)
            .map(|y| format!("{:04}", y))
            .unwrap_or_else(|| "0000".to_string());

        match self.entity_type {
            EntityType::Movie => format!("{} ({})", title, year),
            EntityType::Episode => format!(
                "{} ({}) - {:02}x{:03}",
                title,
                year,
                self.season.unwrap_or(0),
                self.episode.unwrap_or(0)
            ),
        }
    }

    /// True when the two entities share at least one pointer
    pub fn matches(&self, other: &Entity) -> bool {
        let mine: HashSet<String> = self.all_pointers().into_iter().collect();
        other.all_pointers().iter().any(|p| mine.contains(p))
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.via.trim().is_empty() {
            return Err(ModelError::InvalidEntity(format!("{}: missing 'via' backend", self.name())));
        }

        if self.updated < 0 {
            return Err(ModelError::InvalidEntity(format!(
                "{}: negative updated timestamp {}",
                self.name(),
                self.updated
            )));
        }

        if self.is_episode() {
            if self.season.is_none() {
                return Err(ModelError::InvalidEntity(format!("{}: episode without season number", self.name())));
            }

            match self.episode {
                Some(number) if number >= 1 => {}
                _ => {
                    return Err(ModelError::InvalidEntity(format!(
                        "{}: episode number must be 1 or greater",
                        self.name()
                    )))
                }
            }
        }

        Ok(())
    }

    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        serde_json::from_value(value).map_err(|e| ModelError::InvalidEntity(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        // Plain data with string keys, serialization cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether `other` should win a conflict against `self`
    fn other_wins(&self, other: &Entity, priority: &SourcePriority) -> bool {
        match other.updated.cmp(&self.updated) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => priority.prefers(&other.via, &self.via),
        }
    }

    /// Merge `other` into `self`, returns true when anything changed
    ///
    /// The newer record wins the watch state and descriptive fields; on equal
    /// timestamps `priority` decides. Identifier maps and backend metadata are
    /// unioned with the winner's value kept on key collisions.
    pub fn merge_from(&mut self, other: &Entity, priority: &SourcePriority) -> bool {
        let before = self.clone();
        let other_wins = self.other_wins(other, priority);

        if other_wins {
            self.watched = other.watched;
            self.updated = other.updated;
            self.via = other.via.clone();
            if !other.title.trim().is_empty() {
                self.title = other.title.clone();
            }
            self.year = other.year.or(self.year);
            self.season = other.season.or(self.season);
            self.episode = other.episode.or(self.episode);
        }

        union_into(&mut self.guids, &other.guids, other_wins);
        union_into(&mut self.parent, &other.parent, other_wins);
        union_into(&mut self.suids, &other.suids, other_wins);
        union_into(&mut self.extra, &other.extra, other_wins);

        *self != before
    }

    /// Merge identifiers and backend metadata only, watch state is untouched
    pub fn merge_metadata_from(&mut self, other: &Entity) -> bool {
        let before = self.clone();

        union_into(&mut self.guids, &other.guids, false);
        union_into(&mut self.parent, &other.parent, false);
        // Backend owned data always reflects the latest report
        union_into(&mut self.suids, &other.suids, true);
        union_into(&mut self.extra, &other.extra, true);

        *self != before
    }

    /// Remember the play state `backend` last reported, returns true when it changed
    pub fn record_backend_state(&mut self, backend: &str, watched: bool, updated: i64) -> bool {
        let entry = self
            .extra
            .entry(backend.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }

        let Some(map) = entry.as_object_mut() else {
            return false;
        };

        let before = (map.get("watched").cloned(), map.get("updated").cloned());
        map.insert("watched".to_string(), Value::Bool(watched));
        map.insert("updated".to_string(), Value::from(updated));

        before != (Some(Value::Bool(watched)), Some(Value::from(updated)))
    }

    /// Play state `backend` last reported, if known
    pub fn backend_watched(&self, backend: &str) -> Option<bool> {
        self.extra.get(backend)?.get("watched")?.as_bool()
    }
}

pub fn suid_pointer(key: &str, value: &str) -> String {
    format!("suid:{}/{}", key, value)
}

fn union_into<V: Clone + PartialEq>(target: &mut BTreeMap<String, V>, source: &BTreeMap<String, V>, overwrite: bool) {
    for (key, value) in source {
        match target.get(key) {
            Some(existing) if !overwrite || existing == value => {}
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::{GUID_IMDB, GUID_TMDB, GUID_TVDB};
    use serde_json::json;

    fn priority() -> SourcePriority {
        SourcePriority::new(vec!["plex".to_string(), "jellyfin".to_string()])
    }

    #[test]
    fn test_relative_pointers() {
        let ep = Entity::episode("plex", "Show", 1, 5)
            .with_parent(GUID_TVDB, "100")
            .with_parent(GUID_IMDB, "bad");

        assert_eq!(ep.relative_pointers(), vec!["rguid_tvdb://100/1/5"]);
        assert!(ep.has_relative_guid());
        assert!(!ep.has_guids());

        let movie = Entity::movie("plex", "Film").with_parent(GUID_TVDB, "100");
        assert!(movie.relative_pointers().is_empty());
    }

    #[test]
    fn test_name() {
        let mut movie = Entity::movie("plex", "Heat");
        movie.year = Some(1995);
        assert_eq!(movie.name(), "Heat (1995)");

        let ep = Entity::episode("plex", "", 2, 7);
        assert_eq!(ep.name(), "?? (0000) - 02x007");
    }

    #[test]
    fn test_matches_by_pointer() {
        let a = Entity::movie("plex", "A").with_guid(GUID_TMDB, "10");
        let b = Entity::movie("jellyfin", "A").with_guid(GUID_TMDB, "10").with_guid(GUID_IMDB, "tt1");
        let c = Entity::movie("jellyfin", "A").with_guid(GUID_TVDB, "10");

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_validate() {
        assert!(Entity::episode("plex", "S", 1, 0).validate().is_err());
        assert!(Entity::episode("plex", "S", 1, 1).validate().is_ok());
        assert!(Entity::movie("", "M").validate().is_err());

        let mut ep = Entity::episode("plex", "S", 1, 1);
        ep.season = None;
        assert!(ep.validate().is_err());
    }

    #[test]
    fn test_merge_newer_wins_and_unions() {
        let mut stored = Entity::movie("plex", "Film")
            .with_guid(GUID_TMDB, "10")
            .with_watched(false, 100);
        stored.extra.insert("plex".into(), json!({"played": false}));

        let mut incoming = Entity::movie("jellyfin", "Film")
            .with_guid(GUID_IMDB, "tt10")
            .with_watched(true, 200);
        incoming.extra.insert("jellyfin".into(), json!({"played": true}));

        assert!(stored.merge_from(&incoming, &priority()));
        assert!(stored.watched);
        assert_eq!(stored.updated, 200);
        assert_eq!(stored.via, "jellyfin");
        assert_eq!(stored.guids.len(), 2);
        assert_eq!(stored.extra.len(), 2);
    }

    #[test]
    fn test_merge_older_keeps_state() {
        let mut stored = Entity::movie("plex", "Film").with_watched(true, 300);
        let incoming = Entity::movie("jellyfin", "Film")
            .with_guid(GUID_IMDB, "tt10")
            .with_watched(false, 200);

        assert!(stored.merge_from(&incoming, &priority()));
        assert!(stored.watched);
        assert_eq!(stored.via, "plex");
        assert_eq!(stored.guids.get(GUID_IMDB).map(String::as_str), Some("tt10"));
    }

    #[test]
    fn test_merge_tie_uses_priority() {
        let mut stored = Entity::movie("jellyfin", "Film").with_watched(false, 100);
        let incoming = Entity::movie("plex", "Film").with_watched(true, 100);
        stored.merge_from(&incoming, &priority());
        assert!(stored.watched);

        let mut stored = Entity::movie("plex", "Film").with_watched(false, 100);
        let incoming = Entity::movie("jellyfin", "Film").with_watched(true, 100);
        stored.merge_from(&incoming, &priority());
        assert!(!stored.watched);
    }

    #[test]
    fn test_merge_same_data_reports_no_change() {
        let mut stored = Entity::movie("plex", "Film").with_guid(GUID_TMDB, "1").with_watched(true, 50);
        let same = stored.clone();
        assert!(!stored.merge_from(&same, &priority()));
    }

    #[test]
    fn test_value_mapping() {
        let ep = Entity::episode("emby", "Show", 3, 4).with_guid(GUID_TVDB, "77");
        let value = ep.to_value();
        assert_eq!(value["type"], "episode");
        assert_eq!(Entity::from_value(value).unwrap(), ep);

        assert!(Entity::from_value(json!({"type": "song"})).is_err());
    }

    #[test]
    fn test_backend_state() {
        let mut movie = Entity::movie("plex", "Film");
        assert_eq!(movie.backend_watched("plex"), None);

        assert!(movie.record_backend_state("plex", true, 10));
        assert!(!movie.record_backend_state("plex", true, 10));
        assert_eq!(movie.backend_watched("plex"), Some(true));
        assert_eq!(movie.extra["plex"]["updated"], 10);
    }

    #[test]
    fn test_suids_for_backend() {
        let mut ep = Entity::episode("plex", "Show", 1, 1);
        ep.suids.insert("plex@alice".into(), "11".into());
        ep.suids.insert("plex@bob".into(), "12".into());
        ep.suids.insert("emby@alice".into(), "99".into());

        assert_eq!(ep.suids_for("plex").count(), 2);
        assert_eq!(ep.suid_pointers().len(), 3);
    }
}
