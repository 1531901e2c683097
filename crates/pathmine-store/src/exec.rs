//! Executing compiled queries against the in-memory store.
//!
//! Slots are bound depth-first in allocation order; parents come before
//! children, so a joined slot draws its candidates from its parent's
//! reference or collection. Each top-level conjunct of the constraint tree
//! is tested as soon as the highest slot it reads is bound, pruning the
//! search early. Complete bindings are projected onto the columns,
//! de-duplicated, sorted and finally capped.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use pathmine_query::compile::{ConstraintNode, ConstraintTest, ExecutableQuery, JoinKind, Target};
use pathmine_query::value::wildcard_match;
use pathmine_query::{
    ConstraintOp, Direction, ExecutionError, ExecutionLimits, ObjectStore, ResultSet, ResultValue,
    Value,
};

use crate::{MemoryObjectStore, StoredObject};

/// How often (in bindings tried) the timeout is checked.
const TIMEOUT_CHECK_INTERVAL: u64 = 1024;

impl ObjectStore for MemoryObjectStore {
    fn execute(
        &self,
        query: &ExecutableQuery,
        limits: &ExecutionLimits,
    ) -> Result<ResultSet, ExecutionError> {
        let started = Instant::now();
        let mut run = Run::new(self, query, limits, started);
        let mut bindings = Vec::with_capacity(query.slots.len());
        run.bind(0, &mut bindings)?;

        let directions: Vec<Direction> = query.order_by.iter().map(|k| k.direction).collect();
        let mut rows = run.rows;
        rows.sort_by(|a, b| compare_sort_keys(&a.1, &b.1, &directions));
        let mut rows: Vec<Vec<ResultValue>> = rows.into_iter().map(|(row, _)| row).collect();
        if let Some(max) = limits.max_rows {
            rows.truncate(max);
        }

        tracing::debug!(
            root = %query.root,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed query"
        );
        Ok(ResultSet {
            columns: query.view_strings(),
            rows,
        })
    }
}

type Row = (Vec<ResultValue>, Vec<ResultValue>);

struct Run<'a> {
    store: &'a MemoryObjectStore,
    query: &'a ExecutableQuery,
    limits: &'a ExecutionLimits,
    started: Instant,
    /// Conjuncts grouped by the slot after whose binding they are tested.
    checks: Vec<Vec<&'a ConstraintNode>>,
    seen: HashSet<Vec<CellKey>>,
    rows: Vec<Row>,
    steps: u64,
}

impl<'a> Run<'a> {
    fn new(
        store: &'a MemoryObjectStore,
        query: &'a ExecutableQuery,
        limits: &'a ExecutionLimits,
        started: Instant,
    ) -> Self {
        let mut checks = vec![Vec::new(); query.slots.len()];
        if let Some(tree) = &query.constraints {
            for conjunct in tree.conjuncts() {
                let at = conjunct.max_slot().min(checks.len().saturating_sub(1));
                if let Some(bucket) = checks.get_mut(at) {
                    bucket.push(conjunct);
                }
            }
        }
        Self {
            store,
            query,
            limits,
            started,
            checks,
            seen: HashSet::new(),
            rows: Vec::new(),
            steps: 0,
        }
    }

    fn bind(&mut self, slot: usize, bindings: &mut Vec<u32>) -> Result<(), ExecutionError> {
        if slot == self.query.slots.len() {
            self.emit(bindings);
            return Ok(());
        }

        for candidate in self.candidates(slot, bindings) {
            self.tick()?;
            bindings.push(candidate);
            let store = self.store;
            let bound_ids: &[u32] = bindings;
            let passes = self.checks[slot]
                .iter()
                .all(|c| eval_node(store, c, bound_ids));
            if passes {
                self.bind(slot + 1, bindings)?;
            }
            bindings.pop();
        }
        Ok(())
    }

    fn candidates(&self, slot: usize, bindings: &[u32]) -> Vec<u32> {
        let spec = &self.query.slots[slot];
        let Some(members) = self.store.by_class(&spec.class) else {
            return Vec::new();
        };
        let Some(join) = &spec.join else {
            return members.iter().collect();
        };
        let Some(parent) = self.store.object(bindings[join.parent]) else {
            return Vec::new();
        };
        let linked: Vec<u32> = match join.kind {
            JoinKind::Reference => parent.references.get(&join.field).copied().into_iter().collect(),
            JoinKind::Collection => parent
                .collections
                .get(&join.field)
                .cloned()
                .unwrap_or_default(),
        };
        linked.into_iter().filter(|id| members.contains(*id)).collect()
    }

    fn tick(&mut self) -> Result<(), ExecutionError> {
        self.steps += 1;
        if self.steps % TIMEOUT_CHECK_INTERVAL != 0 {
            return Ok(());
        }
        match self.limits.timeout {
            Some(timeout) if self.started.elapsed() > timeout => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    steps = self.steps,
                    "query execution timed out"
                );
                Err(ExecutionError::Timeout(timeout))
            }
            _ => Ok(()),
        }
    }

    fn emit(&mut self, bindings: &[u32]) {
        let row: Vec<ResultValue> = self
            .query
            .columns
            .iter()
            .map(|c| project(self.store, &c.target, bindings))
            .collect();
        let key: Vec<CellKey> = row.iter().map(CellKey::from).collect();
        if !self.seen.insert(key) {
            return;
        }
        let sort: Vec<ResultValue> = self
            .query
            .order_by
            .iter()
            .map(|k| project(self.store, &k.target, bindings))
            .collect();
        self.rows.push((row, sort));
    }
}

fn project(store: &MemoryObjectStore, target: &Target, bindings: &[u32]) -> ResultValue {
    match target {
        Target::Object { slot } => ResultValue::Object(bindings[*slot]),
        Target::Field { slot, field, .. } => store
            .object(bindings[*slot])
            .and_then(|o| o.attribute(field))
            .map(ResultValue::Value)
            .unwrap_or(ResultValue::Null),
    }
}

fn compare_sort_keys(a: &[ResultValue], b: &[ResultValue], directions: &[Direction]) -> Ordering {
    for ((x, y), dir) in a.iter().zip(b).zip(directions) {
        let ord = x.sort_cmp(y);
        let ord = match dir {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

// ============================================================================
// Constraint evaluation
// ============================================================================

fn eval_node(store: &MemoryObjectStore, node: &ConstraintNode, bindings: &[u32]) -> bool {
    match node {
        ConstraintNode::Leaf(c) => eval_test(store, &c.test, bindings),
        ConstraintNode::And(parts) => parts.iter().all(|p| eval_node(store, p, bindings)),
        ConstraintNode::Or(parts) => parts.iter().any(|p| eval_node(store, p, bindings)),
    }
}

fn bound<'s>(store: &'s MemoryObjectStore, bindings: &[u32], slot: usize) -> Option<&'s StoredObject> {
    bindings.get(slot).and_then(|id| store.object(*id))
}

fn eval_test(store: &MemoryObjectStore, test: &ConstraintTest, bindings: &[u32]) -> bool {
    match test {
        ConstraintTest::Compare {
            slot,
            field,
            op,
            value,
        } => {
            let Some(actual) = bound(store, bindings, *slot).and_then(|o| o.attribute(field)) else {
                return false;
            };
            let Some(ord) = actual.compare(value) else {
                return *op == ConstraintOp::Ne;
            };
            match op {
                ConstraintOp::Eq => ord == Ordering::Equal,
                ConstraintOp::Ne => ord != Ordering::Equal,
                ConstraintOp::Lt => ord == Ordering::Less,
                ConstraintOp::Le => ord != Ordering::Greater,
                ConstraintOp::Gt => ord == Ordering::Greater,
                ConstraintOp::Ge => ord != Ordering::Less,
                _ => false,
            }
        }
        ConstraintTest::Text {
            slot,
            field,
            op,
            pattern,
        } => {
            let Some(actual) = bound(store, bindings, *slot).and_then(|o| o.attribute(field)) else {
                return false;
            };
            let text = actual.to_string().to_lowercase();
            let needle = pattern.to_lowercase();
            match op {
                ConstraintOp::Contains => text.contains(&needle),
                ConstraintOp::DoesNotContain => !text.contains(&needle),
                ConstraintOp::Like => wildcard_match(&needle, &text),
                _ => false,
            }
        }
        ConstraintTest::Null {
            slot,
            field,
            is_null,
        } => {
            let present = bound(store, bindings, *slot)
                .map(|o| o.has_field_value(field))
                .unwrap_or(false);
            present != *is_null
        }
        ConstraintTest::InList {
            slot,
            field,
            values,
            negated,
        } => {
            let Some(object) = bound(store, bindings, *slot) else {
                return false;
            };
            let actual = match field {
                Some(field) => object.attribute(field),
                None => Some(Value::Integer(i64::from(object.id))),
            };
            let Some(actual) = actual else {
                return false;
            };
            let found = values.iter().any(|v| actual.matches(v));
            found != *negated
        }
        ConstraintTest::Lookup {
            slot,
            fields,
            value,
        } => {
            let Some(object) = bound(store, bindings, *slot) else {
                return false;
            };
            fields.iter().any(|f| {
                object
                    .attribute(f)
                    .map(|v| v.to_string().eq_ignore_ascii_case(value.trim()))
                    .unwrap_or(false)
            })
        }
        ConstraintTest::Loop { slot, other, equal } => {
            match (bindings.get(*slot), bindings.get(*other)) {
                (Some(a), Some(b)) => (a == b) == *equal,
                _ => false,
            }
        }
    }
}

// ============================================================================
// Row keys
// ============================================================================

/// Hashable image of a result cell, for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CellKey {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(String),
    Object(u32),
}

impl From<&ResultValue> for CellKey {
    fn from(value: &ResultValue) -> Self {
        match value {
            ResultValue::Null => CellKey::Null,
            ResultValue::Object(id) => CellKey::Object(*id),
            ResultValue::Value(Value::Boolean(b)) => CellKey::Boolean(*b),
            ResultValue::Value(Value::Integer(n)) => CellKey::Integer(*n),
            ResultValue::Value(Value::Float(x)) => CellKey::Float(x.to_bits()),
            ResultValue::Value(Value::String(s)) => CellKey::String(s.clone()),
        }
    }
}
