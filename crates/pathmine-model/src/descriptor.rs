//! Class and field descriptors.
//!
//! Descriptors are plain data: they are built by the loaders (or by hand in
//! tests) and become immutable once handed to [`crate::Model::new`], which
//! derives inheritance closures and the effective field table per class.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Attribute Types
// ============================================================================

/// Scalar type of an attribute field.
///
/// Model files use Java type names (`java.lang.String`, `int`, ...); both
/// the boxed and primitive spellings map to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeType {
    String,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
}

impl AttributeType {
    /// Parse a Java (or short) type name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let ty = match name {
            "java.lang.String" | "String" | "string" => Self::String,
            "short" | "java.lang.Short" | "Short" => Self::Short,
            "int" | "java.lang.Integer" | "Integer" | "integer" => Self::Integer,
            "long" | "java.lang.Long" | "Long" => Self::Long,
            "float" | "java.lang.Float" | "Float" => Self::Float,
            "double" | "java.lang.Double" | "Double" => Self::Double,
            "java.math.BigDecimal" | "BigDecimal" | "decimal" => Self::Decimal,
            "boolean" | "java.lang.Boolean" | "Boolean" => Self::Boolean,
            "java.util.Date" | "Date" | "date" => Self::Date,
            _ => return None,
        };
        Some(ty)
    }

    /// Canonical Java type name, as written back into model files.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::String => "java.lang.String",
            Self::Short => "java.lang.Short",
            Self::Integer => "java.lang.Integer",
            Self::Long => "java.lang.Long",
            Self::Float => "java.lang.Float",
            Self::Double => "java.lang.Double",
            Self::Decimal => "java.math.BigDecimal",
            Self::Boolean => "java.lang.Boolean",
            Self::Date => "java.util.Date",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Self::Short | Self::Integer | Self::Long)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integral() || matches!(self, Self::Float | Self::Double | Self::Decimal)
    }

    /// Whether substring and wildcard operators make sense for this type.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::String)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl TryFrom<String> for AttributeType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_type_name(&value).ok_or_else(|| format!("unknown attribute type `{value}`"))
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        value.type_name().to_string()
    }
}

// ============================================================================
// Field Descriptors
// ============================================================================

/// What a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Attribute {
        #[serde(rename = "type")]
        ty: AttributeType,
    },
    Reference {
        referenced_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_reference: Option<String>,
    },
    Collection {
        referenced_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_reference: Option<String>,
    },
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Attribute { .. } => "attribute",
            Self::Reference { .. } => "reference",
            Self::Collection { .. } => "collection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Class that declares this field. Filled in by the model.
    #[serde(skip)]
    pub declared_in: String,
}

impl FieldDescriptor {
    pub fn attribute(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Attribute { ty },
            declared_in: String::new(),
        }
    }

    pub fn reference(name: impl Into<String>, referenced_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference {
                referenced_type: referenced_type.into(),
                reverse_reference: None,
            },
            declared_in: String::new(),
        }
    }

    pub fn collection(name: impl Into<String>, referenced_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Collection {
                referenced_type: referenced_type.into(),
                reverse_reference: None,
            },
            declared_in: String::new(),
        }
    }

    /// Set the reverse reference of a reference/collection field.
    pub fn with_reverse(mut self, reverse: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::Reference {
                reverse_reference, ..
            }
            | FieldKind::Collection {
                reverse_reference, ..
            } => *reverse_reference = Some(reverse.into()),
            FieldKind::Attribute { .. } => {}
        }
        self
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, FieldKind::Attribute { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, FieldKind::Collection { .. })
    }

    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self.kind {
            FieldKind::Attribute { ty } => Some(ty),
            _ => None,
        }
    }

    /// Class reached by dereferencing a reference or collection field.
    pub fn referenced_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference {
                referenced_type, ..
            }
            | FieldKind::Collection {
                referenced_type, ..
            } => Some(referenced_type),
            FieldKind::Attribute { .. } => None,
        }
    }

    pub fn reverse_reference(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference {
                reverse_reference, ..
            }
            | FieldKind::Collection {
                reverse_reference, ..
            } => reverse_reference.as_deref(),
            FieldKind::Attribute { .. } => None,
        }
    }

    /// Unqualified type name of whatever the field holds.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            FieldKind::Attribute { ty } => ty.type_name(),
            FieldKind::Reference {
                referenced_type, ..
            }
            | FieldKind::Collection {
                referenced_type, ..
            } => referenced_type,
        }
    }
}

// ============================================================================
// Class Descriptors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,
    #[serde(default, alias = "extends")]
    pub superclasses: Vec<String>,
    #[serde(default)]
    pub is_interface: bool,
    /// Fields declared directly on this class (not inherited ones).
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclasses: Vec::new(),
            is_interface: false,
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclasses.push(superclass.into());
        self
    }

    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn declared_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Strip a package prefix: `org.flymine.model.genomic.Gene` → `Gene`.
pub fn unqualified_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}
