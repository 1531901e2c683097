//! Pathmine class metadata model.
//!
//! A [`Model`] is the process-wide, read-only registry of classes the query
//! engine plans against: class descriptors with (multiple) superclasses,
//! attribute / reference / collection fields, and primary keys.
//!
//! ## Lifecycle
//!
//! - Loaders ([`Model::from_xml`], [`Model::from_json`]) or tests build
//!   [`ClassDescriptor`]s and hand them to [`Model::new`].
//! - `Model::new` validates the class graph and derives, once, the ancestor
//!   closure, subclass closure and effective (inherited) field table.
//! - After that the model is never mutated; share it behind an `Arc` and read
//!   it from any thread without locking.
//!
//! ## Dynamic class sets
//!
//! A stored object may be an instance of several declared classes at once.
//! [`Model::decompose`] reduces such a set to its leaf classes and
//! [`Model::fields_of_set`] unions the fields visible through any of them.

pub mod descriptor;
pub mod keys;
pub mod xml;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use descriptor::{unqualified_name, AttributeType, ClassDescriptor, FieldDescriptor, FieldKind};
pub use keys::{KeyDefinitions, PrimaryKey};

/// Name of the identity attribute every root class carries.
pub const ID_FIELD: &str = "id";

// ============================================================================
// Errors
// ============================================================================

/// Problems with the metadata itself. These are configuration errors, never
/// recovered from inside the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("duplicate class `{0}`")]
    DuplicateClass(String),
    #[error("class `{class}` declares field `{field}` twice")]
    DuplicateField { class: String, field: String },
    #[error("class `{class}` extends unknown class `{superclass}`")]
    UnknownSuperclass { class: String, superclass: String },
    #[error("field `{class}.{field}` references unknown class `{referenced}`")]
    UnknownReferencedType {
        class: String,
        field: String,
        referenced: String,
    },
    #[error("field `{class}.{field}` names reverse reference `{reverse}` which is not a reference or collection of `{referenced}`")]
    BadReverseReference {
        class: String,
        field: String,
        referenced: String,
        reverse: String,
    },
    #[error("inheritance cycle through class `{0}`")]
    InheritanceCycle(String),
    #[error("primary key `{class}.{key}` names unknown field `{field}`")]
    UnknownKeyField {
        class: String,
        key: String,
        field: String,
    },
    #[error("primary key defined for unknown class `{0}`")]
    UnknownKeyClass(String),
    #[error("malformed key definition at line {line}: {message}")]
    KeyDefinition { line: usize, message: String },
    #[error("malformed model XML at byte {position}: {message}")]
    Xml { position: usize, message: String },
    #[error("malformed model JSON: {0}")]
    Json(String),
}

// ============================================================================
// Model
// ============================================================================

/// Serialized form of a model (JSON loader / writer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub package: Option<String>,
    pub classes: Vec<ClassDescriptor>,
    #[serde(default)]
    pub keys: Vec<PrimaryKey>,
}

#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    package: Option<String>,
    classes: BTreeMap<String, ClassDescriptor>,
    /// Class -> all superclasses, nearest first (breadth-first), excluding self.
    ancestors: BTreeMap<String, Vec<String>>,
    /// Class -> all transitive subclasses, excluding self.
    subclasses: BTreeMap<String, BTreeSet<String>>,
    /// Class -> effective fields (declared + inherited).
    fields: BTreeMap<String, BTreeMap<String, FieldDescriptor>>,
    /// Class -> keys declared directly on it.
    keys: BTreeMap<String, Vec<PrimaryKey>>,
}

impl Model {
    /// Build and validate a model. Root classes (no superclasses) that do not
    /// declare an `id` attribute get an implicit integer one.
    pub fn new(
        name: impl Into<String>,
        package: Option<String>,
        classes: Vec<ClassDescriptor>,
    ) -> Result<Self, ModelError> {
        let mut by_name: BTreeMap<String, ClassDescriptor> = BTreeMap::new();
        for mut class in classes {
            let mut seen = BTreeSet::new();
            for field in &mut class.fields {
                if !seen.insert(field.name.clone()) {
                    return Err(ModelError::DuplicateField {
                        class: class.name.clone(),
                        field: field.name.clone(),
                    });
                }
                field.declared_in = class.name.clone();
            }
            if class.superclasses.is_empty() && class.declared_field(ID_FIELD).is_none() {
                let mut id = FieldDescriptor::attribute(ID_FIELD, AttributeType::Integer);
                id.declared_in = class.name.clone();
                class.fields.insert(0, id);
            }
            if by_name.contains_key(&class.name) {
                return Err(ModelError::DuplicateClass(class.name));
            }
            by_name.insert(class.name.clone(), class);
        }

        for class in by_name.values() {
            for sup in &class.superclasses {
                if !by_name.contains_key(sup) {
                    return Err(ModelError::UnknownSuperclass {
                        class: class.name.clone(),
                        superclass: sup.clone(),
                    });
                }
            }
            for field in &class.fields {
                if let Some(referenced) = field.referenced_type() {
                    if !by_name.contains_key(referenced) {
                        return Err(ModelError::UnknownReferencedType {
                            class: class.name.clone(),
                            field: field.name.clone(),
                            referenced: referenced.to_string(),
                        });
                    }
                }
            }
        }

        check_acyclic(&by_name)?;

        let ancestors: BTreeMap<String, Vec<String>> = by_name
            .keys()
            .map(|name| (name.clone(), ancestors_of(&by_name, name)))
            .collect();

        let mut subclasses: BTreeMap<String, BTreeSet<String>> =
            by_name.keys().map(|n| (n.clone(), BTreeSet::new())).collect();
        for (class, supers) in &ancestors {
            for sup in supers {
                if let Some(set) = subclasses.get_mut(sup) {
                    set.insert(class.clone());
                }
            }
        }

        let mut fields = BTreeMap::new();
        for (name, class) in &by_name {
            let mut effective: BTreeMap<String, FieldDescriptor> = class
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.clone()))
                .collect();
            for sup in &ancestors[name] {
                for field in &by_name[sup].fields {
                    effective
                        .entry(field.name.clone())
                        .or_insert_with(|| field.clone());
                }
            }
            fields.insert(name.clone(), effective);
        }

        let model = Self {
            name: name.into(),
            package,
            classes: by_name,
            ancestors,
            subclasses,
            fields,
            keys: BTreeMap::new(),
        };
        model.check_reverse_references()?;

        tracing::debug!(
            model = %model.name,
            classes = model.classes.len(),
            "loaded class metadata model"
        );
        Ok(model)
    }

    pub fn from_xml(xml: &str) -> Result<Self, ModelError> {
        xml::parse_model_xml(xml)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let def: ModelDefinition =
            serde_json::from_str(json).map_err(|err| ModelError::Json(err.to_string()))?;
        let keys = KeyDefinitions { keys: def.keys };
        Self::new(def.name, def.package, def.classes)?.with_keys(keys)
    }

    /// Attach primary keys, validating that every key field exists on the
    /// class (directly or inherited).
    pub fn with_keys(mut self, defs: KeyDefinitions) -> Result<Self, ModelError> {
        for key in defs.keys {
            let Some(fields) = self.fields.get(&key.class) else {
                return Err(ModelError::UnknownKeyClass(key.class));
            };
            for field in &key.fields {
                if !fields.contains_key(field) {
                    return Err(ModelError::UnknownKeyField {
                        class: key.class.clone(),
                        key: key.name.clone(),
                        field: field.clone(),
                    });
                }
            }
            self.keys.entry(key.class.clone()).or_default().push(key);
        }
        Ok(self)
    }

    pub fn to_definition(&self) -> ModelDefinition {
        ModelDefinition {
            name: self.name.clone(),
            package: self.package.clone(),
            classes: self.classes.values().cloned().collect(),
            keys: self.keys.values().flatten().cloned().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Fully qualified class name, when the model has a package.
    pub fn qualified_name(&self, class: &str) -> String {
        match &self.package {
            Some(pkg) => format!("{pkg}.{class}"),
            None => class.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Class lookup
    // ------------------------------------------------------------------

    /// Look up a class by unqualified name, or by name qualified with this
    /// model's package.
    pub fn class(&self, name: &str) -> Option<&ClassDescriptor> {
        if let Some(cld) = self.classes.get(name) {
            return Some(cld);
        }
        match (&self.package, name.rsplit_once('.')) {
            (Some(pkg), Some((prefix, short))) if prefix == pkg => self.classes.get(short),
            _ => None,
        }
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.class(name).is_some()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.values()
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// All superclasses of `class`, nearest first.
    pub fn ancestors(&self, class: &str) -> &[String] {
        self.ancestors.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All transitive subclasses of `class` (excluding itself).
    pub fn all_subclasses(&self, class: &str) -> Vec<&ClassDescriptor> {
        self.subclasses
            .get(class)
            .map(|set| set.iter().filter_map(|n| self.classes.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        self.ancestors(sub).iter().any(|a| a == sup)
    }

    /// `sub` is `sup` or one of its subclasses.
    pub fn is_assignable(&self, sub: &str, sup: &str) -> bool {
        sub == sup || self.is_subclass(sub, sup)
    }

    /// Reduce a dynamic class set to its leaf classes: any class that is a
    /// superclass of another member is dropped. Unknown names are kept so the
    /// caller can report them.
    pub fn decompose<'a, I>(&self, classes: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let set: BTreeSet<&str> = classes.into_iter().collect();
        set.iter()
            .filter(|c| !set.iter().any(|other| other != *c && self.is_subclass(other, c)))
            .map(|c| c.to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Field lookup
    // ------------------------------------------------------------------

    /// Effective field (declared or inherited) of a class.
    pub fn field(&self, class: &str, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(class).and_then(|fields| fields.get(name))
    }

    /// All effective fields of a class, sorted by name.
    pub fn all_fields(&self, class: &str) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.get(class).into_iter().flat_map(|m| m.values())
    }

    /// Union of the fields of every class in a dynamic class set. When two
    /// classes declare the same name, the first class in set order wins.
    pub fn fields_of_set<'a, I>(&self, classes: I) -> BTreeMap<&str, &FieldDescriptor>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = BTreeMap::new();
        for class in classes {
            for field in self.all_fields(class) {
                out.entry(field.name.as_str()).or_insert(field);
            }
        }
        out
    }

    /// The class a reference/collection field points at.
    pub fn referenced_class(&self, field: &FieldDescriptor) -> Option<&ClassDescriptor> {
        field.referenced_type().and_then(|t| self.class(t))
    }

    // ------------------------------------------------------------------
    // Primary keys
    // ------------------------------------------------------------------

    /// Keys that apply to a class: its own, then inherited ones nearest first.
    pub fn primary_keys(&self, class: &str) -> Vec<&PrimaryKey> {
        std::iter::once(class)
            .chain(self.ancestors(class).iter().map(String::as_str))
            .filter_map(|c| self.keys.get(c))
            .flatten()
            .collect()
    }

    /// Ordered, de-duplicated fields of every key that applies to `class`.
    pub fn primary_key_fields(&self, class: &str) -> Vec<&FieldDescriptor> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for key in self.primary_keys(class) {
            for name in &key.fields {
                if seen.insert(name.as_str()) {
                    if let Some(field) = self.field(class, name) {
                        out.push(field);
                    }
                }
            }
        }
        out
    }

    fn check_reverse_references(&self) -> Result<(), ModelError> {
        for class in self.classes.values() {
            for field in &class.fields {
                let (Some(referenced), Some(reverse)) =
                    (field.referenced_type(), field.reverse_reference())
                else {
                    continue;
                };
                let ok = self
                    .field(referenced, reverse)
                    .map(|r| !r.is_attribute())
                    .unwrap_or(false);
                if !ok {
                    return Err(ModelError::BadReverseReference {
                        class: class.name.clone(),
                        field: field.name.clone(),
                        referenced: referenced.to_string(),
                        reverse: reverse.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_acyclic(classes: &BTreeMap<String, ClassDescriptor>) -> Result<(), ModelError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        classes: &'a BTreeMap<String, ClassDescriptor>,
        marks: &mut BTreeMap<&'a str, Mark>,
    ) -> Result<(), ModelError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(ModelError::InheritanceCycle(name.to_string())),
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        if let Some(class) = classes.get(name) {
            for sup in &class.superclasses {
                visit(sup, classes, marks)?;
            }
        }
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    for name in classes.keys() {
        visit(name, classes, &mut marks)?;
    }
    Ok(())
}

fn ancestors_of(classes: &BTreeMap<String, ClassDescriptor>, class: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut queue: VecDeque<&str> = classes[class]
        .superclasses
        .iter()
        .map(String::as_str)
        .collect();
    while let Some(next) = queue.pop_front() {
        if out.iter().any(|c| c == next) {
            continue;
        }
        out.push(next.to_string());
        queue.extend(classes[next].superclasses.iter().map(String::as_str));
    }
    out
}
