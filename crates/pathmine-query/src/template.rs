//! Templates: published queries with editable constraints.
//!
//! A [`Template`] wraps a [`PathQuery`] whose editable constraints are filled
//! in at run time. [`Template::materialize`] always works on a private copy,
//! so a published template is never mutated and concurrent materializations
//! cannot interfere.

use std::collections::{BTreeMap, BTreeSet};

use pathmine_model::Model;
use serde::Serialize;
use thiserror::Error;

use crate::compile::{compile, CompileError};
use crate::constraint::{Constraint, ConstraintOp, ConstraintValue};
use crate::executor::{ExecutionError, ExecutionLimits, ObjectStore};
use crate::path::Path;
use crate::query::{PathQuery, QueryError};
use crate::registry::{Scope, TemplateRegistry};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("template `{template}` has {expected} editable constraints but {actual} values were given")]
    ArityMismatch {
        template: String,
        expected: usize,
        actual: usize,
    },

    #[error("no template named `{0}`")]
    NotFound(String),

    #[error("object has no value for `{field}` needed by template `{template}`")]
    MissingObjectValue { template: String, field: String },

    #[error("template `{template}`: {source}")]
    Query {
        template: String,
        source: QueryError,
    },

    #[error("template `{template}`: {source}")]
    Compile {
        template: String,
        source: CompileError,
    },

    #[error("template `{template}`: {source}")]
    Execution {
        template: String,
        source: ExecutionError,
    },
}

/// Operator and operand for one editable constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValue {
    pub op: ConstraintOp,
    pub value: ConstraintValue,
}

impl TemplateValue {
    pub fn new(op: ConstraintOp, value: impl Into<String>) -> Self {
        Self {
            op,
            value: ConstraintValue::Literal(value.into()),
        }
    }

    pub fn equals(value: impl Into<String>) -> Self {
        Self::new(ConstraintOp::Eq, value)
    }

    pub fn with_value(op: ConstraintOp, value: ConstraintValue) -> Self {
        Self { op, value }
    }
}

#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    title: Option<String>,
    description: Option<String>,
    query: PathQuery,
}

impl Template {
    /// Publish `query` as a template. Editable constraints without an
    /// identifier get `<node path>.<ordinal>`, the ordinal counting from 1
    /// within the node.
    pub fn new(name: impl Into<String>, mut query: PathQuery) -> Self {
        let name = name.into();
        query.assign_editable_identifiers();
        query.set_name(name.clone());
        Self {
            name,
            title: None,
            description: None,
            query,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn query(&self) -> &PathQuery {
        &self.query
    }

    pub fn editable_constraints(&self) -> Vec<(&Path, &Constraint)> {
        self.query.editable_constraints()
    }

    pub fn editable_count(&self) -> usize {
        self.editable_constraints().len()
    }

    /// Fill the editable constraints, in declaration order, into a fresh copy
    /// of the query. Either every value is applied or none is.
    pub fn materialize(&self, values: &[TemplateValue]) -> Result<PathQuery, TemplateError> {
        let editable = self.editable_constraints();
        if values.len() != editable.len() {
            return Err(TemplateError::ArityMismatch {
                template: self.name.clone(),
                expected: editable.len(),
                actual: values.len(),
            });
        }

        let targets: Vec<(Path, usize)> = editable
            .iter()
            .map(|(path, c)| {
                let index = self
                    .query
                    .node(path.as_str())
                    .and_then(|n| n.constraints.iter().position(|k| k.code == c.code))
                    .unwrap_or_default();
                ((*path).clone(), index)
            })
            .collect();

        let mut query = self.query.clone();
        for ((path, index), value) in targets.into_iter().zip(values) {
            query
                .replace_constraint(path, index, value.op, value.value.clone())
                .map_err(|source| TemplateError::Query {
                    template: self.name.clone(),
                    source,
                })?;
        }
        Ok(query)
    }

    /// Materialize and count in one step, using the query's configured
    /// execution limits.
    pub fn count(
        &self,
        values: &[TemplateValue],
        store: &dyn ObjectStore,
    ) -> Result<u64, TemplateError> {
        let query = self.materialize(values)?;
        let limits = query.config().limits();
        count_results(&self.name, &query, store, &limits)
    }
}

/// Compile a (materialized) query and ask the store for its row count.
pub fn count_results(
    name: &str,
    query: &PathQuery,
    store: &dyn ObjectStore,
    limits: &ExecutionLimits,
) -> Result<u64, TemplateError> {
    let compiled = compile(query).map_err(|source| TemplateError::Compile {
        template: name.to_string(),
        source,
    })?;
    store
        .count(&compiled, limits)
        .map_err(|source| TemplateError::Execution {
            template: name.to_string(),
            source,
        })
}

// ============================================================================
// Batch counting
// ============================================================================

/// Per-template result of a batch count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CountOutcome {
    Counted(u64),
    /// The template does not apply (wrong number of values, missing data).
    Skipped(#[serde(serialize_with = "display")] TemplateError),
    /// Compilation or execution failed.
    Failed(#[serde(serialize_with = "display")] TemplateError),
}

fn display<S: serde::Serializer>(err: &TemplateError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

impl CountOutcome {
    pub fn count(&self) -> Option<u64> {
        match self {
            CountOutcome::Counted(n) => Some(*n),
            _ => None,
        }
    }

    fn from_result(result: Result<u64, TemplateError>) -> Self {
        match result {
            Ok(n) => CountOutcome::Counted(n),
            Err(
                err @ (TemplateError::ArityMismatch { .. }
                | TemplateError::MissingObjectValue { .. }),
            ) => CountOutcome::Skipped(err),
            Err(err) => CountOutcome::Failed(err),
        }
    }
}

/// Count several templates independently. A failing template is recorded
/// and the batch carries on.
pub fn count_templates<'t, I>(
    requests: I,
    store: &dyn ObjectStore,
    limits: &ExecutionLimits,
) -> BTreeMap<String, CountOutcome>
where
    I: IntoIterator<Item = (&'t Template, Vec<TemplateValue>)>,
{
    let mut out = BTreeMap::new();
    for (template, values) in requests {
        let result = template
            .materialize(&values)
            .and_then(|q| count_results(template.name(), &q, store, limits));
        let outcome = CountOutcome::from_result(result);
        log_outcome(template.name(), &outcome);
        out.insert(template.name().to_string(), outcome);
    }
    out
}

fn log_outcome(template: &str, outcome: &CountOutcome) {
    match outcome {
        CountOutcome::Counted(n) => tracing::debug!(template, count = n, "counted template"),
        CountOutcome::Skipped(err) => {
            tracing::debug!(template, reason = %err, "template skipped")
        }
        CountOutcome::Failed(err) => {
            tracing::warn!(template, error = %err, "template count failed")
        }
    }
}

// ============================================================================
// Per-object template counts
// ============================================================================

/// An object as seen by template counting: its dynamic class set and its
/// attribute values.
pub trait ObjectView {
    fn classes(&self) -> Vec<String>;
    fn attribute(&self, field: &str) -> Option<Value>;
}

/// Class -> template name -> the editable node paths, in order, whose last
/// field supplies each value.
pub type TemplateNodeMap = BTreeMap<String, BTreeMap<String, Vec<Path>>>;

/// Count every template mapped to one of the object's classes (or their
/// superclasses), filling each editable constraint with `=` and the object's
/// value for the node's last field.
pub fn object_template_counts(
    object: &dyn ObjectView,
    model: &Model,
    mapping: &TemplateNodeMap,
    registry: &TemplateRegistry,
    store: &dyn ObjectStore,
    limits: &ExecutionLimits,
) -> BTreeMap<String, CountOutcome> {
    let mut classes = BTreeSet::new();
    for class in object.classes() {
        classes.extend(model.ancestors(&class).iter().cloned());
        classes.insert(class);
    }

    let mut out = BTreeMap::new();
    for (template_name, paths) in classes.iter().filter_map(|c| mapping.get(c)).flatten() {
        if out.contains_key(template_name) {
            continue;
        }
        let result = registry
            .find_template(template_name, Scope::All)
            .ok_or_else(|| TemplateError::NotFound(template_name.clone()))
            .and_then(|template| {
                let values = object_values(template_name, object, paths)?;
                let query = template.materialize(&values)?;
                count_results(template_name, &query, store, limits)
            });
        let outcome = CountOutcome::from_result(result);
        log_outcome(template_name, &outcome);
        out.insert(template_name.clone(), outcome);
    }
    out
}

fn object_values(
    template: &str,
    object: &dyn ObjectView,
    paths: &[Path],
) -> Result<Vec<TemplateValue>, TemplateError> {
    paths
        .iter()
        .map(|p| {
            let field = p.last_segment();
            object
                .attribute(field)
                .map(|v| TemplateValue::equals(v.to_string()))
                .ok_or_else(|| TemplateError::MissingObjectValue {
                    template: template.to_string(),
                    field: field.to_string(),
                })
        })
        .collect()
}
