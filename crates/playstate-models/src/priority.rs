use serde::{Deserialize, Serialize};

/// Ordered list of backend names used to break ties between equally recent reports
///
/// Listed backends beat unlisted ones, earlier entries beat later ones and two
/// unlisted backends are ordered by name so the outcome never depends on
/// arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SourcePriority {
    order: Vec<String>,
}

impl SourcePriority {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    pub fn rank(&self, backend: &str) -> Option<usize> {
        self.order.iter().position(|name| name == backend)
    }

    /// True when `candidate` should win over `current`
    pub fn prefers(&self, candidate: &str, current: &str) -> bool {
        if candidate == current {
            return false;
        }

        match (self.rank(candidate), self.rank(current)) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => candidate < current,
        }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }
}
