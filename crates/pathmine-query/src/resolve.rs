//! Path resolution against the class metadata model.
//!
//! Resolution walks a [`Path`] segment by segment:
//!
//! - the first segment names the start class (optionally `Class[Subclass]`);
//! - a segment naming a field of the current class consumes that field;
//!   references and collections descend into the referenced class,
//!   attributes end the path;
//! - a segment naming a subclass of the current class (and no field) narrows
//!   the current type without consuming a field; `field[Subclass]` does the
//!   same inline.
//!
//! Resolution is pure: the model is only read. The same path against the same
//! model always yields an equal [`ResolvedPath`].

use std::fmt;

use pathmine_model::{AttributeType, FieldKind, Model};
use serde::Serialize;
use thiserror::Error;

use crate::path::{parse_segments, Path, RawSegment};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PathErrorReason {
    Syntax { offset: usize },
    UnknownStartType { class: String },
    OutsideContext { class: String, context: String },
    UnknownSegment { segment: String, class: String },
    AttributeTraversal { attribute: String },
    NotASubclass { class: String, narrowed: String },
    RootMismatch { root: String, query_root: String },
}

impl fmt::Display for PathErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { offset } => write!(f, "syntax error at offset {offset}"),
            Self::UnknownStartType { class } => write!(f, "unknown start type `{class}`"),
            Self::OutsideContext { class, context } => {
                write!(f, "`{class}` is not `{context}` or one of its subclasses")
            }
            Self::UnknownSegment { segment, class } => {
                write!(f, "no field or subclass `{segment}` in class `{class}`")
            }
            Self::AttributeTraversal { attribute } => {
                write!(f, "attribute `{attribute}` cannot be traversed")
            }
            Self::NotASubclass { class, narrowed } => {
                write!(f, "`{narrowed}` is not a subclass of `{class}`")
            }
            Self::RootMismatch { root, query_root } => {
                write!(f, "root `{root}` differs from query root `{query_root}`")
            }
        }
    }
}

/// A path string that failed resolution, tagged with the offending path.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid path `{path}`: {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: PathErrorReason,
}

impl PathError {
    pub fn new(path: impl Into<String>, reason: PathErrorReason) -> Self {
        Self {
            path: path.into(),
            reason,
        }
    }

    pub fn path_string(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// Resolved paths
// ============================================================================

/// What a path (or path prefix) ends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The start class itself.
    Root,
    Attribute,
    Reference,
    Collection,
    /// Kept from an import whose path no longer resolves.
    Unresolved,
}

impl NodeKind {
    pub fn is_attribute(self) -> bool {
        self == Self::Attribute
    }

    /// Root, reference and collection ends denote objects.
    pub fn is_object(self) -> bool {
        matches!(self, Self::Root | Self::Reference | Self::Collection)
    }
}

/// Resolution of one syntactic segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    /// Path up to and including this segment, as written.
    pub path: Path,
    /// Field consumed by this segment; `None` for the root and for bare
    /// subclass narrowing.
    pub field: Option<String>,
    pub kind: NodeKind,
    /// Class reached (object ends) after any narrowing.
    pub class: Option<String>,
    pub attribute_type: Option<AttributeType>,
    /// Field-only form of the path up to here (narrowing removed). Two
    /// segments with equal canonical forms denote the same query object.
    pub canonical: String,
}

impl ResolvedSegment {
    /// Unqualified type name: class for object ends, Java type for attributes.
    pub fn type_name(&self) -> &str {
        match (&self.class, self.attribute_type) {
            (Some(class), _) => class,
            (None, Some(ty)) => ty.type_name(),
            (None, None) => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: Path,
    segments: Vec<ResolvedSegment>,
}

impl ResolvedPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn segments(&self) -> &[ResolvedSegment] {
        &self.segments
    }

    fn last(&self) -> &ResolvedSegment {
        // a resolved path always has at least the root segment
        &self.segments[self.segments.len() - 1]
    }

    /// Start class after any root narrowing.
    pub fn root_class(&self) -> &str {
        self.segments[0].class.as_deref().unwrap_or_default()
    }

    pub fn end_kind(&self) -> NodeKind {
        self.last().kind
    }

    pub fn is_attribute(&self) -> bool {
        self.end_kind().is_attribute()
    }

    /// Class at the end of an object path; `None` for attribute paths.
    pub fn end_class(&self) -> Option<&str> {
        self.last().class.as_deref()
    }

    pub fn attribute_type(&self) -> Option<AttributeType> {
        self.last().attribute_type
    }

    /// Name of the final field, if the last segment consumed one.
    pub fn end_field(&self) -> Option<&str> {
        self.last().field.as_deref()
    }

    pub fn end_type_name(&self) -> &str {
        self.last().type_name()
    }

    pub fn canonical(&self) -> &str {
        &self.last().canonical
    }

    /// The segment denoting the nearest object: the path itself for object
    /// ends, the parent segment for attribute ends.
    pub fn object_segment(&self) -> &ResolvedSegment {
        if self.is_attribute() {
            &self.segments[self.segments.len() - 2]
        } else {
            self.last()
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'m> {
    model: &'m Model,
}

impl<'m> PathResolver<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn resolve_str(&self, path: &str) -> Result<ResolvedPath, PathError> {
        self.resolve(&Path::new(path))
    }

    /// Resolve a path relative to a start type: `resolve_from("Gene",
    /// "organism.name")` resolves `Gene.organism.name`.
    pub fn resolve_from(&self, start_type: &str, relative: &str) -> Result<ResolvedPath, PathError> {
        let relative = relative.trim();
        if relative.is_empty() {
            return self.resolve(&Path::new(start_type));
        }
        self.resolve(&Path::new(format!("{start_type}.{relative}")))
    }

    /// Resolve a full path whose start type must be `context` or one of its
    /// subclasses.
    pub fn resolve_in_context(&self, context: &str, path: &Path) -> Result<ResolvedPath, PathError> {
        let resolved = self.resolve(path)?;
        let root = resolved.root_class();
        if !self.model.is_assignable(root, context) {
            return Err(PathError::new(
                path.as_str(),
                PathErrorReason::OutsideContext {
                    class: root.to_string(),
                    context: context.to_string(),
                },
            ));
        }
        Ok(resolved)
    }

    pub fn resolve(&self, path: &Path) -> Result<ResolvedPath, PathError> {
        let fail = |reason| PathError::new(path.as_str(), reason);
        let raw = parse_segments(path.as_str())
            .map_err(|offset| fail(PathErrorReason::Syntax { offset }))?;

        let (first, rest) = raw
            .split_first()
            .ok_or_else(|| fail(PathErrorReason::Syntax { offset: 0 }))?;

        let start = self
            .model
            .class(first.name)
            .ok_or_else(|| {
                fail(PathErrorReason::UnknownStartType {
                    class: first.name.to_string(),
                })
            })?
            .name
            .clone();
        let mut class = start.clone();
        if let Some(narrowed) = first.narrowed {
            class = self.narrow(&class, narrowed).map_err(&fail)?;
        }

        let mut written = first.text.to_string();
        let mut canonical = start;
        let mut segments = vec![ResolvedSegment {
            path: Path::new(written.clone()),
            field: None,
            kind: NodeKind::Root,
            class: Some(class.clone()),
            attribute_type: None,
            canonical: canonical.clone(),
        }];
        let mut kind = NodeKind::Root;

        for seg in rest {
            written.push('.');
            written.push_str(seg.text);

            if kind.is_attribute() {
                let attribute = segments
                    .last()
                    .and_then(|s| s.field.clone())
                    .unwrap_or_default();
                return Err(fail(PathErrorReason::AttributeTraversal { attribute }));
            }

            let resolved = self.step(&class, seg).map_err(&fail)?;
            match resolved {
                Step::Field {
                    name,
                    kind: field_kind,
                    class: next_class,
                    attribute_type,
                } => {
                    canonical.push('.');
                    canonical.push_str(&name);
                    kind = field_kind;
                    if let Some(next) = &next_class {
                        class = next.clone();
                    }
                    segments.push(ResolvedSegment {
                        path: Path::new(written.clone()),
                        field: Some(name),
                        kind,
                        class: next_class,
                        attribute_type,
                        canonical: canonical.clone(),
                    });
                }
                Step::Narrow { class: narrowed } => {
                    class = narrowed;
                    segments.push(ResolvedSegment {
                        path: Path::new(written.clone()),
                        field: None,
                        kind,
                        class: Some(class.clone()),
                        attribute_type: None,
                        canonical: canonical.clone(),
                    });
                }
            }
        }

        Ok(ResolvedPath {
            path: path.clone(),
            segments,
        })
    }

    fn step(&self, class: &str, seg: &RawSegment<'_>) -> Result<Step, PathErrorReason> {
        if let Some(field) = self.model.field(class, seg.name) {
            return match &field.kind {
                FieldKind::Attribute { ty } => {
                    if seg.narrowed.is_some() {
                        return Err(PathErrorReason::AttributeTraversal {
                            attribute: field.name.clone(),
                        });
                    }
                    Ok(Step::Field {
                        name: field.name.clone(),
                        kind: NodeKind::Attribute,
                        class: None,
                        attribute_type: Some(*ty),
                    })
                }
                FieldKind::Reference {
                    referenced_type, ..
                }
                | FieldKind::Collection {
                    referenced_type, ..
                } => {
                    let kind = if field.is_reference() {
                        NodeKind::Reference
                    } else {
                        NodeKind::Collection
                    };
                    let target = match seg.narrowed {
                        Some(narrowed) => self.narrow(referenced_type, narrowed)?,
                        None => referenced_type.clone(),
                    };
                    Ok(Step::Field {
                        name: field.name.clone(),
                        kind,
                        class: Some(target),
                        attribute_type: None,
                    })
                }
            };
        }

        if seg.narrowed.is_none() && self.model.is_assignable(seg.name, class) {
            return Ok(Step::Narrow {
                class: seg.name.to_string(),
            });
        }

        Err(PathErrorReason::UnknownSegment {
            segment: seg.name.to_string(),
            class: class.to_string(),
        })
    }

    fn narrow(&self, class: &str, narrowed: &str) -> Result<String, PathErrorReason> {
        let target = self
            .model
            .class(narrowed)
            .map(|c| c.name.clone())
            .ok_or_else(|| PathErrorReason::NotASubclass {
                class: class.to_string(),
                narrowed: narrowed.to_string(),
            })?;
        if !self.model.is_assignable(&target, class) {
            return Err(PathErrorReason::NotASubclass {
                class: class.to_string(),
                narrowed: narrowed.to_string(),
            });
        }
        Ok(target)
    }
}

enum Step {
    Field {
        name: String,
        kind: NodeKind,
        class: Option<String>,
        attribute_type: Option<AttributeType>,
    },
    Narrow {
        class: String,
    },
}
