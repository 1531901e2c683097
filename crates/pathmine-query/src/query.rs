//! The query node graph.
//!
//! A [`PathQuery`] keeps one [`PathNode`] per distinct path prefix that is
//! selected, constrained, sorted on or traversed, keyed by its path string.
//! Nodes never point at each other: the tree is implied by prefix
//! containment of the keys.
//!
//! Every mutation resolves its paths first and leaves the query unchanged when
//! anything fails. A query belongs to one editing context and is not locked
//! internally; [`PathQuery::clone`] is cheap for the shared parts (model and
//! config are behind `Arc`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pathmine_model::Model;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis;
use crate::config::{Direction, EngineConfig, ObjectViewPolicy};
use crate::constraint::{check_constraint, code_for, Constraint, ConstraintOp, ConstraintValue};
use crate::logic::LogicExpr;
use crate::path::Path;
use crate::resolve::{NodeKind, PathError, PathErrorReason, PathResolver, ResolvedPath};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("path `{path}` is locked by a loop constraint")]
    LockedPath { path: String },

    #[error("`{op}` cannot constrain `{path}`: {reason}")]
    IllegalOperator {
        path: String,
        op: ConstraintOp,
        reason: String,
    },

    #[error("`{op}` on `{path}` takes {expected}")]
    MissingValue {
        path: String,
        op: ConstraintOp,
        expected: &'static str,
    },

    #[error("loop constraint between `{path}` and `{target}` joins unrelated classes")]
    IncompatibleLoop { path: String, target: String },

    #[error("no constraint {index} on `{path}`")]
    NoSuchConstraint { path: String, index: usize },

    #[error("unknown constraint code `{0}`")]
    UnknownConstraintCode(String),

    #[error("`{path}` ends on an object and object selection is disabled")]
    ObjectPath { path: String },

    #[error("no default fields to show for `{path}` ({class})")]
    NoDefaultFields { path: String, class: String },

    #[error("{0}")]
    InvalidLogic(String),

    #[error("new view order is not a permutation of the current view")]
    NotAPermutation,
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathNode {
    pub path: Path,
    pub kind: NodeKind,
    /// Unqualified class for object nodes, Java type name for attributes,
    /// empty for unresolved nodes.
    pub end_type: String,
    pub constraints: Vec<Constraint>,
}

impl PathNode {
    fn new(path: Path, kind: NodeKind, end_type: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            end_type: end_type.into(),
            constraints: Vec::new(),
        }
    }

    pub fn is_attribute(&self) -> bool {
        self.kind.is_attribute()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub path: Path,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(path: impl Into<Path>, direction: Direction) -> Self {
        Self {
            path: path.into(),
            direction,
        }
    }
}

// ============================================================================
// PathQuery
// ============================================================================

#[derive(Debug, Clone)]
pub struct PathQuery {
    model: Arc<Model>,
    config: Arc<EngineConfig>,
    name: Option<String>,
    description: Option<String>,
    nodes: BTreeMap<Path, PathNode>,
    view: Vec<Path>,
    sort_order: Vec<OrderBy>,
    logic: Option<LogicExpr>,
    problems: Vec<PathError>,
    next_seq: u64,
}

impl PathQuery {
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_config(model, Arc::new(EngineConfig::default()))
    }

    pub fn with_config(model: Arc<Model>, config: Arc<EngineConfig>) -> Self {
        Self {
            model,
            config,
            name: None,
            description: None,
            nodes: BTreeMap::new(),
            view: Vec::new(),
            sort_order: Vec::new(),
            logic: None,
            problems: Vec::new(),
            next_seq: 0,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// Start class shared by every path in the query.
    pub fn root(&self) -> Option<&str> {
        self.nodes.keys().next().map(|p| p.root())
    }

    pub fn view(&self) -> &[Path] {
        &self.view
    }

    pub fn view_strings(&self) -> Vec<String> {
        self.view.iter().map(|p| p.to_string()).collect()
    }

    pub fn sort_order(&self) -> &[OrderBy] {
        &self.sort_order
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PathNode> {
        self.nodes.values()
    }

    pub fn node(&self, path: &str) -> Option<&PathNode> {
        self.nodes.get(path)
    }

    pub fn constraint_logic(&self) -> Option<&LogicExpr> {
        self.logic.as_ref()
    }

    /// Resolution problems found by the last import, [`validate`](Self::validate)
    /// or [`rebind`](Self::rebind).
    pub fn problems(&self) -> &[PathError] {
        &self.problems
    }

    /// Offending path strings, one per problem, in discovery order.
    pub fn error_paths(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.problems
            .iter()
            .filter(|p| seen.insert(p.path.as_str()))
            .map(|p| p.path.clone())
            .collect()
    }

    /// Every constraint with the path of its node, in declaration order.
    pub fn constraints(&self) -> Vec<(&Path, &Constraint)> {
        let mut out: Vec<(&Path, &Constraint)> = self
            .nodes
            .values()
            .flat_map(|n| n.constraints.iter().map(move |c| (&n.path, c)))
            .collect();
        out.sort_by_key(|(_, c)| c.seq);
        out
    }

    /// Editable constraints in declaration order.
    pub fn editable_constraints(&self) -> Vec<(&Path, &Constraint)> {
        self.constraints()
            .into_iter()
            .filter(|(_, c)| c.editable)
            .collect()
    }

    pub fn constraint_by_code(&self, code: &str) -> Option<(&Path, &Constraint)> {
        self.nodes
            .values()
            .flat_map(|n| n.constraints.iter().map(move |c| (&n.path, c)))
            .find(|(_, c)| c.code == code)
    }

    pub fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.model)
    }

    /// Resolve a path against this query's model, enforcing the shared root.
    pub fn resolve(&self, path: &Path) -> Result<ResolvedPath, PathError> {
        let resolved = self.resolver().resolve(path)?;
        if let Some(root) = self.root() {
            if root != path.root() {
                return Err(PathError::new(
                    path.as_str(),
                    PathErrorReason::RootMismatch {
                        root: path.root().to_string(),
                        query_root: root.to_string(),
                    },
                ));
            }
        }
        Ok(resolved)
    }

    // ------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------

    /// Select a path. Attribute paths are appended as-is; object paths follow
    /// the configured [`ObjectViewPolicy`]. Selecting a path already in the
    /// view is a no-op. Returns the view entries the call covers.
    pub fn add_to_view(&mut self, path: impl Into<Path>) -> Result<Vec<Path>, QueryError> {
        let path = path.into();
        let resolved = self.resolve(&path)?;

        if resolved.is_attribute() {
            self.select(&resolved);
            return Ok(vec![path]);
        }

        match self.config.object_view {
            ObjectViewPolicy::Reject => Err(QueryError::ObjectPath {
                path: path.to_string(),
            }),
            ObjectViewPolicy::SelectObject => {
                self.select(&resolved);
                Ok(vec![path])
            }
            ObjectViewPolicy::ExpandToDefaults => {
                let class = resolved.end_class().unwrap_or_default().to_string();
                let fields = self.default_fields(&class);
                if fields.is_empty() {
                    return Err(QueryError::NoDefaultFields {
                        path: path.to_string(),
                        class,
                    });
                }
                let children = fields
                    .iter()
                    .map(|f| self.resolve(&path.child(f)))
                    .collect::<Result<Vec<_>, _>>()?;
                for child in &children {
                    self.select(child);
                }
                Ok(children.into_iter().map(|c| c.path().clone()).collect())
            }
        }
    }

    fn select(&mut self, resolved: &ResolvedPath) {
        self.ensure_nodes(resolved);
        if !self.view.contains(resolved.path()) {
            self.view.push(resolved.path().clone());
        }
    }

    /// Rendering defaults for a class: configured fields (own class, then
    /// nearest superclass with an entry), otherwise primary-key attributes.
    pub fn default_fields(&self, class: &str) -> Vec<String> {
        let configured = std::iter::once(class)
            .chain(self.model.ancestors(class).iter().map(String::as_str))
            .find_map(|c| self.config.default_fields.get(c));
        if let Some(fields) = configured {
            return fields.clone();
        }
        self.model
            .primary_key_fields(class)
            .into_iter()
            .filter(|f| f.is_attribute())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Remove a path from the view. Fails when the path is locked by a loop
    /// constraint; otherwise returns whether it was selected.
    pub fn remove_from_view(&mut self, path: impl Into<Path>) -> Result<bool, QueryError> {
        let path = path.into();
        self.check_unlocked(&path)?;
        let Some(pos) = self.view.iter().position(|p| *p == path) else {
            return Ok(false);
        };
        self.view.remove(pos);
        self.prune();
        Ok(true)
    }

    /// Replace the view with a permutation of itself.
    pub fn reorder_view(&mut self, order: Vec<Path>) -> Result<(), QueryError> {
        let current: BTreeSet<&Path> = self.view.iter().collect();
        let proposed: BTreeSet<&Path> = order.iter().collect();
        if order.len() != self.view.len() || current != proposed {
            return Err(QueryError::NotAPermutation);
        }
        self.view = order;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sort order
    // ------------------------------------------------------------------

    /// Replace the sort order wholesale. Sorting on unselected paths is
    /// allowed.
    pub fn set_sort_order(&mut self, order: Vec<OrderBy>) -> Result<(), QueryError> {
        let resolved = order
            .iter()
            .map(|o| self.resolve(&o.path))
            .collect::<Result<Vec<_>, _>>()?;
        for r in &resolved {
            self.ensure_nodes(r);
        }
        self.sort_order = order;
        self.prune();
        Ok(())
    }

    pub fn add_sort(&mut self, path: impl Into<Path>, direction: Direction) -> Result<(), QueryError> {
        let mut order = self.sort_order.clone();
        let path = path.into();
        order.retain(|o| o.path != path);
        order.push(OrderBy::new(path, direction));
        self.set_sort_order(order)
    }

    // ------------------------------------------------------------------
    // Constraints
    // ------------------------------------------------------------------

    /// Constrain a node. Returns the code assigned to the new constraint,
    /// which is and-ed onto the constraint logic.
    pub fn add_constraint(
        &mut self,
        path: impl Into<Path>,
        op: ConstraintOp,
        value: ConstraintValue,
    ) -> Result<String, QueryError> {
        let path = path.into();
        let (resolved, target) = self.check(&path, op, &value)?;
        self.ensure_nodes(&resolved);
        if let Some(target) = &target {
            self.ensure_nodes(target);
        }

        let code = self.next_code();
        let constraint = Constraint::new(op, value, code.clone(), self.bump_seq());
        self.push_constraint(&path, constraint);
        Ok(code)
    }

    /// Remove the `index`th constraint of a node and its logic variable.
    pub fn remove_constraint(
        &mut self,
        path: impl Into<Path>,
        index: usize,
    ) -> Result<Constraint, QueryError> {
        let path = path.into();
        let no_such = || QueryError::NoSuchConstraint {
            path: path.to_string(),
            index,
        };
        let node = self.nodes.get_mut(&path).ok_or_else(no_such)?;
        if index >= node.constraints.len() {
            return Err(no_such());
        }
        let removed = node.constraints.remove(index);
        self.logic = self.logic.take().and_then(|l| l.remove_code(&removed.code));
        self.prune();
        Ok(removed)
    }

    /// Swap operator and operand of an existing constraint, keeping its code,
    /// position and template metadata.
    pub fn replace_constraint(
        &mut self,
        path: impl Into<Path>,
        index: usize,
        op: ConstraintOp,
        value: ConstraintValue,
    ) -> Result<(), QueryError> {
        let path = path.into();
        let exists = self
            .nodes
            .get(&path)
            .map(|n| index < n.constraints.len())
            .unwrap_or(false);
        if !exists {
            return Err(QueryError::NoSuchConstraint {
                path: path.to_string(),
                index,
            });
        }
        let (_, target) = self.check(&path, op, &value)?;
        if let Some(target) = &target {
            self.ensure_nodes(target);
        }
        if let Some(constraint) = self
            .nodes
            .get_mut(&path)
            .and_then(|n| n.constraints.get_mut(index))
        {
            constraint.op = op;
            constraint.value = value;
        }
        self.prune();
        Ok(())
    }

    pub fn set_editable(&mut self, code: &str, editable: bool) -> Result<(), QueryError> {
        let constraint = self.constraint_mut(code)?;
        constraint.editable = editable;
        Ok(())
    }

    pub fn set_constraint_description(
        &mut self,
        code: &str,
        description: impl Into<String>,
    ) -> Result<(), QueryError> {
        let constraint = self.constraint_mut(code)?;
        constraint.description = Some(description.into());
        Ok(())
    }

    /// Give every editable constraint without an identifier
    /// `<node path>.<ordinal>`, the ordinal counting from 1 within the node.
    pub(crate) fn assign_editable_identifiers(&mut self) {
        for (path, node) in self.nodes.iter_mut() {
            for (i, constraint) in node.constraints.iter_mut().enumerate() {
                if constraint.editable && constraint.identifier.is_none() {
                    constraint.identifier = Some(format!("{path}.{}", i + 1));
                }
            }
        }
    }

    /// Set the and/or logic over constraint codes. Unknown codes are rejected;
    /// codes the expression leaves out are and-ed on.
    pub fn set_constraint_logic(&mut self, expression: &str) -> Result<(), QueryError> {
        let codes: Vec<String> = self.constraints().iter().map(|(_, c)| c.code.clone()).collect();
        if expression.trim().is_empty() {
            self.logic = LogicExpr::all_of(codes);
            return Ok(());
        }
        let mut logic = LogicExpr::parse(expression).map_err(QueryError::InvalidLogic)?;
        if let Some(unknown) = logic.codes().into_iter().find(|c| !codes.iter().any(|k| k == c)) {
            return Err(QueryError::UnknownConstraintCode(unknown.to_string()));
        }
        let missing: Vec<String> = codes
            .into_iter()
            .filter(|c| !logic.contains_code(c))
            .collect();
        for code in missing {
            logic = logic.and_with(code);
        }
        self.logic = Some(logic);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Remove a node and everything below it: view and sort entries,
    /// constraints and their logic variables. Locked nodes cannot be removed.
    pub fn remove_node(&mut self, path: impl Into<Path>) -> Result<(), QueryError> {
        let path = path.into();
        self.check_unlocked(&path)?;

        let doomed: Vec<Path> = self
            .nodes
            .keys()
            .filter(|p| path.is_prefix_of(p))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(node) = self.nodes.remove(&p) {
                for c in node.constraints {
                    self.logic = self.logic.take().and_then(|l| l.remove_code(&c.code));
                }
            }
        }
        self.view.retain(|p| !path.is_prefix_of(p));
        self.sort_order.retain(|o| !path.is_prefix_of(&o.path));
        self.prune();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation against the model
    // ------------------------------------------------------------------

    /// Re-resolve every path the query holds, refreshing node kinds and the
    /// problem list. Nothing is dropped.
    pub fn validate(&mut self) -> &[PathError] {
        let mut problems = Vec::new();
        let mut seen = BTreeSet::new();
        let mut referenced: Vec<Path> = self.nodes.keys().cloned().collect();
        referenced.extend(self.view.iter().cloned());
        referenced.extend(self.sort_order.iter().map(|o| o.path.clone()));
        referenced.extend(self.loop_targets());

        for path in referenced {
            if !seen.insert(path.clone()) {
                continue;
            }
            match self.resolve(&path) {
                Ok(resolved) => {
                    if let Some(node) = self.nodes.get_mut(&path) {
                        node.kind = resolved.end_kind();
                        node.end_type = resolved.end_type_name().to_string();
                    }
                }
                Err(err) => {
                    if let Some(node) = self.nodes.get_mut(&path) {
                        node.kind = NodeKind::Unresolved;
                        node.end_type.clear();
                    }
                    problems.push(err);
                }
            }
        }
        self.problems = problems;
        &self.problems
    }

    /// Point the query at a different (typically reloaded) model and report
    /// what no longer resolves.
    pub fn rebind(&mut self, model: Arc<Model>) -> &[PathError] {
        self.model = model;
        self.validate()
    }

    // ------------------------------------------------------------------
    // Lenient insertion (import)
    // ------------------------------------------------------------------

    /// Restore a saved view entry as written, whatever the object-view
    /// policy. Entries that no longer resolve are kept and reported.
    pub(crate) fn import_view(&mut self, path: Path) {
        match self.resolve(&path) {
            Ok(resolved) => self.select(&resolved),
            Err(err) => {
                self.ensure_unresolved_nodes(&path);
                if !self.view.contains(&path) {
                    self.view.push(path);
                }
                self.problems.push(err);
            }
        }
    }

    pub(crate) fn import_sort(&mut self, order: OrderBy) {
        match self.resolve(&order.path) {
            Ok(resolved) => self.ensure_nodes(&resolved),
            Err(err) => {
                self.ensure_unresolved_nodes(&order.path);
                self.problems.push(err);
            }
        }
        self.sort_order.retain(|o| o.path != order.path);
        self.sort_order.push(order);
    }

    /// Add an imported constraint, keeping its code when free. Constraints
    /// that fail validation are kept on an unresolved node.
    pub(crate) fn import_constraint(
        &mut self,
        path: Path,
        mut constraint: Constraint,
    ) -> Result<String, QueryError> {
        let in_use = self.codes_in_use();
        if constraint.code.is_empty() || in_use.contains(&constraint.code) {
            constraint.code = self.next_code();
        }
        constraint.seq = self.bump_seq();
        let code = constraint.code.clone();

        match self.check(&path, constraint.op, &constraint.value) {
            Ok((resolved, target)) => {
                self.ensure_nodes(&resolved);
                if let Some(target) = &target {
                    self.ensure_nodes(target);
                }
            }
            Err(QueryError::Path(err)) => {
                self.ensure_unresolved_nodes(&path);
                if let Some(target) = constraint.loop_path().cloned() {
                    self.ensure_unresolved_nodes(&target);
                }
                self.problems.push(err);
            }
            Err(other) => return Err(other),
        }
        self.push_constraint(&path, constraint);
        Ok(code)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check(
        &self,
        path: &Path,
        op: ConstraintOp,
        value: &ConstraintValue,
    ) -> Result<(ResolvedPath, Option<ResolvedPath>), QueryError> {
        let resolved = self.resolve(path)?;
        let target = match value.as_path() {
            Some(target) => Some(self.resolve(target)?),
            None => None,
        };
        check_constraint(&self.model, &resolved, op, value, target.as_ref())?;
        Ok((resolved, target))
    }

    fn check_unlocked(&self, path: &Path) -> Result<(), QueryError> {
        if analysis::locked_paths(self).contains(path.as_str()) {
            return Err(QueryError::LockedPath {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn push_constraint(&mut self, path: &Path, constraint: Constraint) {
        let code = constraint.code.clone();
        if let Some(node) = self.nodes.get_mut(path) {
            node.constraints.push(constraint);
        }
        self.logic = Some(match self.logic.take() {
            Some(logic) if logic.contains_code(&code) => logic,
            Some(logic) => logic.and_with(code),
            None => LogicExpr::Code(code),
        });
    }

    fn constraint_mut(&mut self, code: &str) -> Result<&mut Constraint, QueryError> {
        self.nodes
            .values_mut()
            .flat_map(|n| n.constraints.iter_mut())
            .find(|c| c.code == code)
            .ok_or_else(|| QueryError::UnknownConstraintCode(code.to_string()))
    }

    fn ensure_nodes(&mut self, resolved: &ResolvedPath) {
        for seg in resolved.segments() {
            self.nodes
                .entry(seg.path.clone())
                .or_insert_with(|| PathNode::new(seg.path.clone(), seg.kind, seg.type_name()));
        }
    }

    fn ensure_unresolved_nodes(&mut self, path: &Path) {
        for p in std::iter::once(path.clone()).chain(path.prefixes()) {
            self.nodes
                .entry(p.clone())
                .or_insert_with(|| PathNode::new(p, NodeKind::Unresolved, ""));
        }
    }

    fn codes_in_use(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(|n| n.constraints.iter().map(|c| c.code.clone()))
            .collect()
    }

    fn next_code(&self) -> String {
        let in_use = self.codes_in_use();
        (0..)
            .map(code_for)
            .find(|c| !in_use.contains(c))
            .unwrap_or_default()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn loop_targets(&self) -> Vec<Path> {
        self.nodes
            .values()
            .flat_map(|n| n.constraints.iter().filter_map(|c| c.loop_path().cloned()))
            .collect()
    }

    /// Drop nodes no longer needed by any view entry, sort entry, constraint
    /// or loop operand.
    fn prune(&mut self) {
        let mut anchors: Vec<Path> = self.view.clone();
        anchors.extend(self.sort_order.iter().map(|o| o.path.clone()));
        anchors.extend(
            self.nodes
                .values()
                .filter(|n| !n.constraints.is_empty())
                .map(|n| n.path.clone()),
        );
        anchors.extend(self.loop_targets());

        let mut keep: BTreeSet<Path> = BTreeSet::new();
        for anchor in anchors {
            keep.extend(anchor.prefixes());
            keep.insert(anchor);
        }
        self.nodes.retain(|p, _| keep.contains(p));
    }
}
