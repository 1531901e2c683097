//! Engine configuration.
//!
//! Everything here is a policy choice made by the embedding application;
//! the defaults match an interactive query builder.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::ExecutionLimits;

/// What `add_to_view` does with a path ending on an object (root, reference
/// or collection) rather than an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectViewPolicy {
    /// Refuse the path.
    Reject,
    /// Select the object itself; the store returns its id.
    SelectObject,
    /// Select the class's default fields (see [`EngineConfig::default_fields`]).
    #[default]
    ExpandToDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Direction::Asc),
            "desc" | "descending" => Ok(Direction::Desc),
            other => Err(format!("unknown sort direction `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub object_view: ObjectViewPolicy,
    /// Class -> attribute names shown when an object path is selected. Classes
    /// without an entry fall back to their primary-key attributes.
    pub default_fields: BTreeMap<String, Vec<String>>,
    pub execution_timeout_ms: Option<u64>,
    pub max_rows: Option<usize>,
    pub default_sort_direction: Direction,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            object_view: ObjectViewPolicy::default(),
            default_fields: BTreeMap::new(),
            execution_timeout_ms: None,
            max_rows: None,
            default_sort_direction: Direction::Asc,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_object_view(mut self, policy: ObjectViewPolicy) -> Self {
        self.object_view = policy;
        self
    }

    pub fn with_default_fields(mut self, class: &str, fields: &[&str]) -> Self {
        self.default_fields.insert(
            class.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            timeout: self.execution_timeout_ms.map(Duration::from_millis),
            max_rows: self.max_rows,
        }
    }
}
