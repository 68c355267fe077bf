use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SketchError;

/// Family identifies the estimator kind behind a sketch. Extensibility is by
/// appending new tags; the wire strings below are normative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// HyperLogLog++ distinct-count estimation.
    Cardinality,
    /// Count-Min-Log per-item frequency estimation.
    Frequency,
    /// Approximate heavy-hitter ranking.
    TopK,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Cardinality, Family::Frequency, Family::TopK];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Cardinality => "cardinality",
            Family::Frequency => "frequency",
            Family::TopK => "top-k",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = SketchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cardinality" => Ok(Family::Cardinality),
            "frequency" => Ok(Family::Frequency),
            "top-k" => Ok(Family::TopK),
            "" => Err(SketchError::MissingFamily),
            other => Err(SketchError::UnknownFamily(other.to_string())),
        }
    }
}

/// SketchKey names a sketch by the pair (name, family).
///
/// The pair is the catalog's identity; the `.`-joined canonical id exists
/// only as the key into the two stores, so names containing the separator
/// never confuse in-memory lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SketchKey {
    pub name: String,
    pub family: Family,
}

impl SketchKey {
    pub fn new(name: impl Into<String>, family: Family) -> Self {
        Self {
            name: name.into(),
            family,
        }
    }

    /// canonical_id renders the storage key "{name}.{family}".
    pub fn canonical_id(&self) -> String {
        format!("{}.{}", self.name, self.family)
    }
}

impl fmt::Display for SketchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.name)
    }
}

/// Info is the descriptor persisted in the info store: identity, family tag,
/// construction options and opaque per-family accounting.
///
/// The envelope is self-describing JSON; keys not understood by this build
/// survive a load/store round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub id: String,
    #[serde(rename = "type")]
    pub family: String,
    #[serde(default)]
    pub properties: HashMap<String, f64>,
    #[serde(default)]
    pub state: HashMap<String, u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Info {
    pub fn new(key: &SketchKey, properties: HashMap<String, f64>) -> Self {
        Self {
            id: key.canonical_id(),
            family: key.family.to_string(),
            properties,
            state: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    /// property returns a numeric construction option by name.
    pub fn property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }

    /// state_counter returns an accounting counter, zero when unset.
    pub fn state_counter(&self, name: &str) -> u64 {
        self.state.get(name).copied().unwrap_or(0)
    }

    /// add_to_state bumps an accounting counter by delta.
    pub fn add_to_state(&mut self, name: &str, delta: u64) {
        *self.state.entry(name.to_string()).or_insert(0) += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_round_trip() {
        for family in Family::ALL {
            assert_eq!(Family::from_str(family.as_str()).unwrap(), family);
        }
    }

    #[test]
    fn test_family_rejects_unknown_and_empty() {
        assert!(matches!(
            Family::from_str("bloom"),
            Err(SketchError::UnknownFamily(_))
        ));
        assert!(matches!(
            Family::from_str(""),
            Err(SketchError::MissingFamily)
        ));
    }

    #[test]
    fn test_canonical_id() {
        let key = SketchKey::new("marvel", Family::Cardinality);
        assert_eq!(key.canonical_id(), "marvel.cardinality");
        assert_eq!(key.to_string(), "cardinality/marvel");
    }

    #[test]
    fn test_info_envelope_round_trip() {
        let mut properties = HashMap::new();
        properties.insert("capacity".to_string(), 100000.0);
        let mut info = Info::new(&SketchKey::new("marvel", Family::Cardinality), properties);
        info.add_to_state("additions", 3);

        let data = serde_json::to_vec(&info).unwrap();
        let parsed: Info = serde_json::from_slice(&data).unwrap();
        assert_eq!(parsed.id, "marvel.cardinality");
        assert_eq!(parsed.family, "cardinality");
        assert_eq!(parsed.property("capacity"), Some(100000.0));
        assert_eq!(parsed.state_counter("additions"), 3);
    }

    #[test]
    fn test_info_preserves_unknown_keys() {
        let raw = r#"{"id":"x.cardinality","type":"cardinality","properties":{},"state":{},"owner":"metrics-team"}"#;
        let parsed: Info = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.extra["owner"], serde_json::json!("metrics-team"));

        let out = serde_json::to_string(&parsed).unwrap();
        let reparsed: Info = serde_json::from_str(&out).unwrap();
        assert_eq!(reparsed.extra["owner"], serde_json::json!("metrics-team"));
    }
}
