//! Query compilation.
//!
//! [`compile`] turns a [`PathQuery`] into an [`ExecutableQuery`]: one slot
//! per distinct object prefix, joins between parent and child slots, typed
//! column and sort targets, and a constraint tree following the query's
//! constraint logic.
//!
//! Slots are keyed by the canonical (field-only) form of the prefix, so
//! `Gene.organism.name` and `Gene.organism.taxonId` share the `Gene.organism`
//! slot, and `Department.employees[Manager]` shares the slot of
//! `Department.employees` (refining its class to `Manager`).
//!
//! Compilation is pure and deterministic. It fails, listing every offending
//! path, if any path of the query does not resolve.

use std::collections::BTreeMap;

use pathmine_model::{AttributeType, Model};
use serde::Serialize;
use thiserror::Error;

use crate::config::Direction;
use crate::constraint::{check_constraint, Constraint, ConstraintOp, ConstraintValue};
use crate::logic::LogicExpr;
use crate::path::Path;
use crate::query::{PathQuery, QueryError};
use crate::resolve::{NodeKind, PathError, ResolvedPath};
use crate::value::Value;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("paths do not resolve: {}", format_paths(.0))]
    Paths(Vec<PathError>),

    #[error("query selects nothing")]
    EmptyView,

    #[error("invalid value `{value}` for `{path}`: {message}")]
    InvalidValue {
        path: String,
        value: String,
        message: String,
    },

    #[error("`{path}` is narrowed to both `{first}` and `{second}`")]
    ConflictingNarrowing {
        path: String,
        first: String,
        second: String,
    },

    #[error("LOOKUP on `{path}` needs primary key attributes on `{class}`")]
    NoLookupKeys { path: String, class: String },

    #[error("constraint {code} on `{path}` no longer applies: {reason}")]
    IllegalConstraint {
        path: String,
        code: String,
        reason: String,
    },
}

fn format_paths(errors: &[PathError]) -> String {
    errors
        .iter()
        .map(|e| e.path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl CompileError {
    /// Offending paths, when compilation failed on resolution.
    pub fn path_errors(&self) -> &[PathError] {
        match self {
            CompileError::Paths(errors) => errors,
            _ => &[],
        }
    }
}

// ============================================================================
// Compiled form
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Reference,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotJoin {
    pub parent: usize,
    pub field: String,
    pub kind: JoinKind,
}

/// One queryable class in the compiled query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySlot {
    pub id: usize,
    /// Canonical prefix this slot stands for.
    pub path: String,
    pub class: String,
    /// `None` for the root slot.
    pub join: Option<SlotJoin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Target {
    Field {
        slot: usize,
        field: String,
        #[serde(rename = "type")]
        ty: AttributeType,
    },
    Object {
        slot: usize,
    },
}

impl Target {
    pub fn slot(&self) -> usize {
        match self {
            Target::Field { slot, .. } | Target::Object { slot } => *slot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub path: Path,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub path: Path,
    pub target: Target,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum ConstraintTest {
    /// `=`, `!=`, `<`, `<=`, `>`, `>=` against a literal.
    Compare {
        slot: usize,
        field: String,
        op: ConstraintOp,
        value: Value,
    },
    /// `CONTAINS`, `DOES NOT CONTAIN`, `LIKE`; case-insensitive.
    Text {
        slot: usize,
        field: String,
        op: ConstraintOp,
        pattern: String,
    },
    /// Attribute or reference field of `slot` is (not) null.
    Null {
        slot: usize,
        field: String,
        is_null: bool,
    },
    /// Attribute value, or object id when `field` is `None`, in a list.
    InList {
        slot: usize,
        field: Option<String>,
        values: Vec<Value>,
        negated: bool,
    },
    /// Any of the key attributes equals `value`, case-insensitively.
    Lookup {
        slot: usize,
        fields: Vec<String>,
        value: String,
    },
    /// Two slots bind the same object (or different ones).
    Loop {
        slot: usize,
        other: usize,
        equal: bool,
    },
}

impl ConstraintTest {
    /// Highest slot the test reads; it can be evaluated once slots up to
    /// this one are bound.
    pub fn max_slot(&self) -> usize {
        match self {
            ConstraintTest::Loop { slot, other, .. } => (*slot).max(*other),
            ConstraintTest::Compare { slot, .. }
            | ConstraintTest::Text { slot, .. }
            | ConstraintTest::Null { slot, .. }
            | ConstraintTest::InList { slot, .. }
            | ConstraintTest::Lookup { slot, .. } => *slot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledConstraint {
    pub code: String,
    pub test: ConstraintTest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintNode {
    Leaf(CompiledConstraint),
    And(Vec<ConstraintNode>),
    Or(Vec<ConstraintNode>),
}

impl ConstraintNode {
    pub fn max_slot(&self) -> usize {
        match self {
            ConstraintNode::Leaf(c) => c.test.max_slot(),
            ConstraintNode::And(parts) | ConstraintNode::Or(parts) => {
                parts.iter().map(ConstraintNode::max_slot).max().unwrap_or(0)
            }
        }
    }

    /// Top-level conjuncts: the parts of a root `And`, or the node itself.
    pub fn conjuncts(&self) -> Vec<&ConstraintNode> {
        match self {
            ConstraintNode::And(parts) => parts.iter().collect(),
            other => vec![other],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutableQuery {
    pub root: String,
    /// Parents always precede their children.
    pub slots: Vec<QuerySlot>,
    pub columns: Vec<Column>,
    pub order_by: Vec<SortKey>,
    pub constraints: Option<ConstraintNode>,
}

impl ExecutableQuery {
    pub fn slot(&self, canonical: &str) -> Option<&QuerySlot> {
        self.slots.iter().find(|s| s.path == canonical)
    }

    pub fn view_strings(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.path.to_string()).collect()
    }

    pub fn sort_strings(&self) -> Vec<(String, Direction)> {
        self.order_by
            .iter()
            .map(|k| (k.path.to_string(), k.direction))
            .collect()
    }

    pub fn joins(&self) -> impl Iterator<Item = (&QuerySlot, &SlotJoin)> {
        self.slots
            .iter()
            .filter_map(|s| s.join.as_ref().map(|j| (s, j)))
    }
}

// ============================================================================
// Compiler
// ============================================================================

pub fn compile(query: &PathQuery) -> Result<ExecutableQuery, CompileError> {
    // Resolve everything first so every bad path is reported at once.
    let mut errors = Vec::new();
    let mut resolve = |path: &Path| match query.resolve(path) {
        Ok(r) => Some(r),
        Err(e) => {
            if !errors.contains(&e) {
                errors.push(e);
            }
            None
        }
    };

    let view: Vec<Option<ResolvedPath>> = query.view().iter().map(&mut resolve).collect();
    let sort: Vec<Option<ResolvedPath>> = query
        .sort_order()
        .iter()
        .map(|o| resolve(&o.path))
        .collect();
    let constraints = query.constraints();
    let mut constrained = Vec::with_capacity(constraints.len());
    for (path, c) in &constraints {
        let node = resolve(*path);
        let target = c.loop_path().and_then(&mut resolve);
        constrained.push((node, target));
    }
    if !errors.is_empty() {
        return Err(CompileError::Paths(errors));
    }
    if query.view().is_empty() {
        return Err(CompileError::EmptyView);
    }

    let mut compiler = Compiler::new(query.model());

    let mut columns = Vec::with_capacity(view.len());
    for resolved in view.into_iter().flatten() {
        let target = compiler.target(&resolved)?;
        columns.push(Column {
            path: resolved.path().clone(),
            target,
        });
    }

    let mut order_by = Vec::with_capacity(sort.len());
    for (resolved, order) in sort.into_iter().zip(query.sort_order()) {
        if let Some(resolved) = resolved {
            order_by.push(SortKey {
                path: order.path.clone(),
                target: compiler.target(&resolved)?,
                direction: order.direction,
            });
        }
    }

    let mut leaves: BTreeMap<String, CompiledConstraint> = BTreeMap::new();
    for ((path, constraint), (node, target)) in constraints.iter().zip(constrained) {
        let Some(node) = node else { continue };
        let test = compiler.constraint(path, constraint, &node, target.as_ref())?;
        leaves.insert(
            constraint.code.clone(),
            CompiledConstraint {
                code: constraint.code.clone(),
                test,
            },
        );
    }

    let codes: Vec<&str> = constraints.iter().map(|(_, c)| c.code.as_str()).collect();
    let mut logic = query
        .constraint_logic()
        .cloned()
        .or_else(|| LogicExpr::all_of(codes.iter().copied()));
    if let Some(expr) = logic.take() {
        let mut expr = expr;
        for code in &codes {
            if !expr.contains_code(code) {
                expr = expr.and_with(*code);
            }
        }
        logic = Some(expr);
    }
    let constraint_tree = logic.and_then(|expr| build_tree(&expr, &mut leaves));

    let root = compiler
        .slots
        .first()
        .map(|s| s.class.clone())
        .unwrap_or_default();
    let compiled = ExecutableQuery {
        root,
        slots: compiler.slots,
        columns,
        order_by,
        constraints: constraint_tree,
    };

    tracing::debug!(
        root = %compiled.root,
        slots = compiled.slots.len(),
        joins = compiled.joins().count(),
        columns = compiled.columns.len(),
        constraints = codes.len(),
        "compiled path query"
    );
    Ok(compiled)
}

fn build_tree(
    expr: &LogicExpr,
    leaves: &mut BTreeMap<String, CompiledConstraint>,
) -> Option<ConstraintNode> {
    match expr {
        LogicExpr::Code(code) => leaves.remove(code).map(ConstraintNode::Leaf),
        LogicExpr::And(parts) | LogicExpr::Or(parts) => {
            let mut children: Vec<ConstraintNode> =
                parts.iter().filter_map(|p| build_tree(p, leaves)).collect();
            match children.len() {
                0 => None,
                1 => children.pop(),
                _ if matches!(expr, LogicExpr::And(_)) => Some(ConstraintNode::And(children)),
                _ => Some(ConstraintNode::Or(children)),
            }
        }
    }
}

struct Compiler<'q> {
    model: &'q Model,
    slots: Vec<QuerySlot>,
    by_path: BTreeMap<String, usize>,
}

impl<'q> Compiler<'q> {
    fn new(model: &'q Model) -> Self {
        Self {
            model,
            slots: Vec::new(),
            by_path: BTreeMap::new(),
        }
    }

    /// Allocate (or reuse) slots for segments `0..=end`; returns the slot of
    /// segment `end`.
    fn allocate(&mut self, resolved: &ResolvedPath, end: usize) -> Result<usize, CompileError> {
        let mut parent: Option<usize> = None;
        for seg in &resolved.segments()[..=end] {
            let class = seg.class.clone().unwrap_or_default();
            let id = match self.by_path.get(&seg.canonical) {
                Some(&id) => {
                    self.refine(id, &class)?;
                    id
                }
                None => {
                    let id = self.slots.len();
                    let join = match (parent, &seg.field) {
                        (Some(parent), Some(field)) => Some(SlotJoin {
                            parent,
                            field: field.clone(),
                            kind: if seg.kind == NodeKind::Collection {
                                JoinKind::Collection
                            } else {
                                JoinKind::Reference
                            },
                        }),
                        _ => None,
                    };
                    self.slots.push(QuerySlot {
                        id,
                        path: seg.canonical.clone(),
                        class,
                        join,
                    });
                    self.by_path.insert(seg.canonical.clone(), id);
                    id
                }
            };
            parent = Some(id);
        }
        // `end` is in range for every caller, so at least one segment ran
        Ok(parent.unwrap_or_default())
    }

    fn refine(&mut self, id: usize, class: &str) -> Result<(), CompileError> {
        let slot = &mut self.slots[id];
        if slot.class == class || self.model.is_subclass(&slot.class, class) {
            return Ok(());
        }
        if self.model.is_subclass(class, &slot.class) {
            slot.class = class.to_string();
            return Ok(());
        }
        Err(CompileError::ConflictingNarrowing {
            path: slot.path.clone(),
            first: slot.class.clone(),
            second: class.to_string(),
        })
    }

    fn object_slot(&mut self, resolved: &ResolvedPath) -> Result<usize, CompileError> {
        let last = resolved.segments().len() - 1;
        let end = if resolved.is_attribute() { last - 1 } else { last };
        self.allocate(resolved, end)
    }

    fn target(&mut self, resolved: &ResolvedPath) -> Result<Target, CompileError> {
        let slot = self.object_slot(resolved)?;
        Ok(match (resolved.end_field(), resolved.attribute_type()) {
            (Some(field), Some(ty)) => Target::Field {
                slot,
                field: field.to_string(),
                ty,
            },
            _ => Target::Object { slot },
        })
    }

    fn constraint(
        &mut self,
        path: &Path,
        constraint: &Constraint,
        node: &ResolvedPath,
        target: Option<&ResolvedPath>,
    ) -> Result<ConstraintTest, CompileError> {
        check_constraint(self.model, node, constraint.op, &constraint.value, target).map_err(
            |err| CompileError::IllegalConstraint {
                path: path.to_string(),
                code: constraint.code.clone(),
                reason: match err {
                    QueryError::IllegalOperator { reason, .. } => reason,
                    other => other.to_string(),
                },
            },
        )?;

        let op = constraint.op;
        let invalid = |value: &str, message: String| CompileError::InvalidValue {
            path: path.to_string(),
            value: value.to_string(),
            message,
        };

        if node.is_attribute() {
            let slot = self.object_slot(node)?;
            let field = node.end_field().unwrap_or_default().to_string();
            let ty = node.attribute_type().unwrap_or(AttributeType::String);
            return Ok(match &constraint.value {
                ConstraintValue::None => ConstraintTest::Null {
                    slot,
                    field,
                    is_null: op == ConstraintOp::IsNull,
                },
                ConstraintValue::List(items) => ConstraintTest::InList {
                    slot,
                    field: Some(field),
                    values: items
                        .iter()
                        .map(|v| Value::parse(ty, v).map_err(|m| invalid(v.as_str(), m)))
                        .collect::<Result<_, _>>()?,
                    negated: op == ConstraintOp::NotIn,
                },
                ConstraintValue::Literal(text) if op.is_text() => ConstraintTest::Text {
                    slot,
                    field,
                    op,
                    pattern: text.clone(),
                },
                ConstraintValue::Literal(text) => ConstraintTest::Compare {
                    slot,
                    field,
                    op,
                    value: Value::parse(ty, text).map_err(|m| invalid(text.as_str(), m))?,
                },
                // loop operands on attributes are rejected by check_constraint
                ConstraintValue::Path(p) => {
                    return Err(invalid(p.as_str(), "not an object path".to_string()))
                }
            });
        }

        match &constraint.value {
            ConstraintValue::Path(_) => {
                let slot = self.object_slot(node)?;
                let other = match target {
                    Some(target) => self.object_slot(target)?,
                    None => slot,
                };
                Ok(ConstraintTest::Loop {
                    slot,
                    other,
                    equal: op == ConstraintOp::Eq,
                })
            }
            ConstraintValue::None => {
                // reference null checks read the parent's field and must not
                // force a join to the referenced object
                let segs = node.segments();
                let reference = segs.iter().rposition(|s| s.field.is_some()).unwrap_or(0);
                let slot = self.allocate(node, reference.saturating_sub(1))?;
                Ok(ConstraintTest::Null {
                    slot,
                    field: segs[reference].field.clone().unwrap_or_default(),
                    is_null: op == ConstraintOp::IsNull,
                })
            }
            ConstraintValue::List(items) => {
                let slot = self.object_slot(node)?;
                let values = items
                    .iter()
                    .map(|v| {
                        v.trim()
                            .parse::<i64>()
                            .map(Value::Integer)
                            .map_err(|_| invalid(v.as_str(), "object ids are integers".to_string()))
                    })
                    .collect::<Result<_, _>>()?;
                Ok(ConstraintTest::InList {
                    slot,
                    field: None,
                    values,
                    negated: op == ConstraintOp::NotIn,
                })
            }
            ConstraintValue::Literal(text) => {
                let slot = self.object_slot(node)?;
                let class = node.end_class().unwrap_or_default();
                let fields: Vec<String> = self
                    .model
                    .primary_key_fields(class)
                    .into_iter()
                    .filter(|f| f.is_attribute())
                    .map(|f| f.name.clone())
                    .collect();
                if fields.is_empty() {
                    return Err(CompileError::NoLookupKeys {
                        path: path.to_string(),
                        class: class.to_string(),
                    });
                }
                Ok(ConstraintTest::Lookup {
                    slot,
                    fields,
                    value: text.clone(),
                })
            }
        }
    }
}
