use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use crate::error::ModelError;

pub const GUID_IMDB: &str = "guid_imdb";
pub const GUID_TVDB: &str = "guid_tvdb";
pub const GUID_TMDB: &str = "guid_tmdb";
pub const GUID_TVMAZE: &str = "guid_tvmaze";
pub const GUID_TVRAGE: &str = "guid_tvrage";
pub const GUID_ANIDB: &str = "guid_anidb";
pub const GUID_YOUTUBE: &str = "guid_youtube";
pub const GUID_CMDB: &str = "guid_cmdb";

/// How a scheme's values are checked before they become pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueFormat {
    /// `tt` followed by digits, e.g. `tt1234567`
    Imdb,
    /// digits only, e.g. `123456`
    Numeric,
    /// opaque value, only non-empty is required
    Opaque,
}

impl ValueFormat {
    fn example(self) -> &'static str {
        match self {
            ValueFormat::Imdb => "tt(number)",
            ValueFormat::Numeric => "(number)",
            ValueFormat::Opaque => "(any)",
        }
    }

    fn accepts(self, value: &str) -> bool {
        let is_numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '/');

        match self {
            ValueFormat::Imdb => value
                .get(..2)
                .map(|prefix| prefix.eq_ignore_ascii_case("tt"))
                .unwrap_or(false)
                && is_numeric(&value[2..]),
            ValueFormat::Numeric => is_numeric(value),
            ValueFormat::Opaque => !value.trim().is_empty(),
        }
    }
}

const SUPPORTED: &[(&str, ValueFormat)] = &[
    (GUID_IMDB, ValueFormat::Imdb),
    (GUID_TVDB, ValueFormat::Numeric),
    (GUID_TMDB, ValueFormat::Numeric),
    (GUID_TVMAZE, ValueFormat::Numeric),
    (GUID_TVRAGE, ValueFormat::Numeric),
    (GUID_ANIDB, ValueFormat::Numeric),
    (GUID_YOUTUBE, ValueFormat::Opaque),
    (GUID_CMDB, ValueFormat::Opaque),
];

fn format_of(scheme: &str) -> Option<ValueFormat> {
    SUPPORTED
        .iter()
        .find(|(name, _)| *name == scheme)
        .map(|(_, format)| *format)
}

/// Names of every supported GUID scheme, in declaration order
pub fn supported_schemes() -> impl Iterator<Item = &'static str> {
    SUPPORTED.iter().map(|(name, _)| *name)
}

pub fn is_supported(scheme: &str) -> bool {
    format_of(scheme).is_some()
}

/// Normalize a scheme name given by a user (`imdb` or `guid_imdb`)
pub fn normalize_scheme(scheme: &str) -> String {
    let scheme = scheme.trim().to_lowercase();
    if scheme.starts_with("guid_") {
        scheme
    } else {
        format!("guid_{}", scheme)
    }
}

/// Validated set of external identifiers for one item
///
/// Only supported schemes with well-formed values survive construction,
/// everything else is dropped (and logged at debug level). Pointers are
/// scheme-qualified (`guid_tvdb://123`), so equal literal values from two
/// different schemes never collide.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Guid {
    data: BTreeMap<String, String>,
}

impl Guid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a raw scheme -> value map, discarding unsupported or malformed entries
    pub fn from_map(guids: &BTreeMap<String, String>) -> Self {
        Self::from_pairs(guids.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut data = BTreeMap::new();

        for (scheme, value) in pairs {
            let Some(format) = format_of(scheme) else {
                continue;
            };

            let value = value.trim();
            if !format.accepts(value) {
                debug!(
                    scheme = scheme,
                    value = value,
                    expected = format.example(),
                    "Ignoring external id with unexpected value"
                );
                continue;
            }

            data.insert(scheme.to_string(), value.to_string());
        }

        Self { data }
    }

    /// Explicitly validate a single user supplied id
    pub fn validate(scheme: &str, value: &str) -> Result<(), ModelError> {
        let scheme = normalize_scheme(scheme);
        let format = format_of(&scheme).ok_or_else(|| ModelError::UnsupportedScheme(scheme.clone()))?;

        if !format.accepts(value.trim()) {
            return Err(ModelError::InvalidGuid {
                scheme,
                value: value.to_string(),
                example: format.example().to_string(),
            });
        }

        Ok(())
    }

    /// Lookup keys in `{scheme}://{value}` form, ordered by scheme name
    pub fn pointers(&self) -> Vec<String> {
        self.data
            .iter()
            .map(|(scheme, value)| format!("{}://{}", scheme, value))
            .collect()
    }

    pub fn get(&self, scheme: &str) -> Option<&str> {
        self.data.get(scheme).map(String::as_str)
    }

    pub fn all(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
