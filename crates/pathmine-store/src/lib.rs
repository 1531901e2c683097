//! In-memory object store for Pathmine.
//!
//! Objects are instances of one or more model classes (a *dynamic class
//! set*) carrying attribute values, references and collections. Every object
//! is validated against the [`Model`] on insert, and class membership is
//! indexed per class and per superclass in roaring bitmaps so a query slot
//! can test "is this object a `BioEntity`?" in O(1).
//!
//! [`MemoryObjectStore`] implements [`pathmine_query::ObjectStore`]; see
//! [`exec`] for how compiled queries run.

pub mod exec;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pathmine_model::{FieldKind, Model, ID_FIELD};
use pathmine_query::{ObjectView, Value};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object {id} has no classes")]
    NoClasses { id: u32 },
    #[error("object {id} names unknown class `{class}`")]
    UnknownClass { id: u32, class: String },
    #[error("duplicate object id {0}")]
    DuplicateId(u32),
    #[error("object {id} has no field `{field}`")]
    UnknownField { id: u32, field: String },
    #[error("field `{field}` of object {id} is a {actual}, not a {expected}")]
    WrongKind {
        id: u32,
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("object {id}: value {value} does not fit `{field}` ({ty})")]
    BadValue {
        id: u32,
        field: String,
        ty: String,
        value: String,
    },
    #[error("object {id}: `{field}` points at missing object {target}")]
    DanglingReference { id: u32, field: String, target: u32 },
    #[error("object {id}: `{field}` points at object {target}, which is not a `{expected}`")]
    WrongTargetClass {
        id: u32,
        field: String,
        target: u32,
        expected: String,
    },
    #[error("malformed object JSON: {0}")]
    Json(String),
}

// ============================================================================
// Objects
// ============================================================================

/// Serialized form of one object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectData {
    pub id: u32,
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub references: BTreeMap<String, u32>,
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub id: u32,
    /// Leaf classes of the object's dynamic class set.
    pub classes: BTreeSet<String>,
    pub attributes: BTreeMap<String, Value>,
    pub references: BTreeMap<String, u32>,
    pub collections: BTreeMap<String, Vec<u32>>,
}

impl StoredObject {
    /// Attribute value; `id` reads the object id unless stored explicitly.
    pub fn attribute(&self, field: &str) -> Option<Value> {
        match self.attributes.get(field) {
            Some(v) => Some(v.clone()),
            None if field == ID_FIELD => Some(Value::Integer(i64::from(self.id))),
            None => None,
        }
    }

    pub fn has_field_value(&self, field: &str) -> bool {
        self.attributes.contains_key(field)
            || self.references.contains_key(field)
            || (field == ID_FIELD)
    }
}

impl ObjectView for StoredObject {
    fn classes(&self) -> Vec<String> {
        self.classes.iter().cloned().collect()
    }

    fn attribute(&self, field: &str) -> Option<Value> {
        StoredObject::attribute(self, field)
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    model: Arc<Model>,
    objects: BTreeMap<u32, StoredObject>,
    /// Class -> ids of objects that are instances of it (directly or through
    /// a subclass).
    class_index: BTreeMap<String, RoaringBitmap>,
}

impl MemoryObjectStore {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            objects: BTreeMap::new(),
            class_index: BTreeMap::new(),
        }
    }

    /// Load a JSON array of [`ObjectData`], checking references once every
    /// object is in.
    pub fn from_json(model: Arc<Model>, json: &str) -> Result<Self, StoreError> {
        let data: Vec<ObjectData> =
            serde_json::from_str(json).map_err(|e| StoreError::Json(e.to_string()))?;
        let mut store = Self::new(model);
        for object in data {
            store.insert(object)?;
        }
        store.check_links()?;
        tracing::debug!(objects = store.len(), "loaded object store");
        Ok(store)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object(&self, id: u32) -> Option<&StoredObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &StoredObject> {
        self.objects.values()
    }

    /// Ids of every instance of `class`, including instances of subclasses.
    pub fn by_class(&self, class: &str) -> Option<&RoaringBitmap> {
        self.class_index.get(class)
    }

    pub fn is_instance(&self, id: u32, class: &str) -> bool {
        self.class_index
            .get(class)
            .map(|bm| bm.contains(id))
            .unwrap_or(false)
    }

    /// Validate and add one object. Reference targets are checked by
    /// [`check_links`](Self::check_links), since they may be inserted later.
    pub fn insert(&mut self, data: ObjectData) -> Result<(), StoreError> {
        let id = data.id;
        if self.objects.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }
        if data.classes.is_empty() {
            return Err(StoreError::NoClasses { id });
        }
        let mut names = Vec::with_capacity(data.classes.len());
        for class in &data.classes {
            let cld = self.model.class(class).ok_or_else(|| StoreError::UnknownClass {
                id,
                class: class.clone(),
            })?;
            names.push(cld.name.as_str());
        }
        let classes = self.model.decompose(names.iter().copied());
        let fields = self.model.fields_of_set(classes.iter().map(String::as_str));

        let mut attributes = BTreeMap::new();
        for (name, json) in &data.attributes {
            let field = fields.get(name.as_str()).ok_or_else(|| StoreError::UnknownField {
                id,
                field: name.clone(),
            })?;
            let FieldKind::Attribute { ty } = &field.kind else {
                return Err(wrong_kind(id, name, "attribute", field.kind.label()));
            };
            if json.is_null() {
                continue;
            }
            let value = Value::from_json(*ty, json).ok_or_else(|| StoreError::BadValue {
                id,
                field: name.clone(),
                ty: ty.type_name().to_string(),
                value: json.to_string(),
            })?;
            attributes.insert(name.clone(), value);
        }

        for name in data.references.keys() {
            let field = fields.get(name.as_str()).ok_or_else(|| StoreError::UnknownField {
                id,
                field: name.clone(),
            })?;
            if !field.is_reference() {
                return Err(wrong_kind(id, name, "reference", field.kind.label()));
            }
        }
        for name in data.collections.keys() {
            let field = fields.get(name.as_str()).ok_or_else(|| StoreError::UnknownField {
                id,
                field: name.clone(),
            })?;
            if !field.is_collection() {
                return Err(wrong_kind(id, name, "collection", field.kind.label()));
            }
        }

        for class in &classes {
            let ancestors = self.model.ancestors(class);
            for c in std::iter::once(class).chain(ancestors.iter()) {
                self.class_index.entry(c.clone()).or_default().insert(id);
            }
        }
        self.objects.insert(
            id,
            StoredObject {
                id,
                classes,
                attributes,
                references: data.references,
                collections: data.collections,
            },
        );
        Ok(())
    }

    /// Every reference and collection element must point at an existing
    /// object of the referenced class.
    pub fn check_links(&self) -> Result<(), StoreError> {
        for object in self.objects.values() {
            let fields = self
                .model
                .fields_of_set(object.classes.iter().map(String::as_str));
            let links = object
                .references
                .iter()
                .map(|(f, t)| (f, *t))
                .chain(
                    object
                        .collections
                        .iter()
                        .flat_map(|(f, ts)| ts.iter().map(move |t| (f, *t))),
                );
            for (field, target) in links {
                if !self.objects.contains_key(&target) {
                    return Err(StoreError::DanglingReference {
                        id: object.id,
                        field: field.clone(),
                        target,
                    });
                }
                let expected = fields
                    .get(field.as_str())
                    .and_then(|f| f.referenced_type())
                    .unwrap_or_default();
                if !self.is_instance(target, expected) {
                    return Err(StoreError::WrongTargetClass {
                        id: object.id,
                        field: field.clone(),
                        target,
                        expected: expected.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn wrong_kind(id: u32, field: &str, expected: &'static str, actual: &'static str) -> StoreError {
    StoreError::WrongKind {
        id,
        field: field.to_string(),
        expected,
        actual,
    }
}
