//! Primary-key definitions.
//!
//! Keys use the properties format of the warehouse's `*_keyDefs.properties`
//! files:
//!
//! ```text
//! # comment
//! Gene.key_primaryidentifier = primaryIdentifier
//! Organism.key_taxonid = taxonId
//! Employee.key_name = name, department
//! ```

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// One named primary key of a class: an ordered list of field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub class: String,
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinitions {
    pub keys: Vec<PrimaryKey>,
}

impl KeyDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let mut keys = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let bad = |message: &str| ModelError::KeyDefinition {
                line: idx + 1,
                message: message.to_string(),
            };

            let (lhs, rhs) = line
                .split_once('=')
                .ok_or_else(|| bad("expected `Class.key_name = field, ...`"))?;
            let (class, name) = lhs
                .trim()
                .split_once('.')
                .ok_or_else(|| bad("key name must be qualified by its class"))?;
            let fields: Vec<String> = rhs
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            if class.is_empty() || name.is_empty() {
                return Err(bad("empty class or key name"));
            }
            if fields.is_empty() {
                return Err(bad("key has no fields"));
            }

            keys.push(PrimaryKey {
                class: class.to_string(),
                name: name.to_string(),
                fields,
            });
        }
        Ok(Self { keys })
    }

    pub fn push(&mut self, class: &str, name: &str, fields: &[&str]) {
        self.keys.push(PrimaryKey {
            class: class.to_string(),
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
    }

    pub fn for_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a PrimaryKey> + 'a {
        self.keys.iter().filter(move |k| k.class == class)
    }
}
