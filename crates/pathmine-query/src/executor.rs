//! The object-store boundary.
//!
//! The engine never touches storage itself: it hands an [`ExecutableQuery`]
//! to an [`ObjectStore`] and gets rows or a count back. Execution is the only
//! blocking step and the only place a timeout applies.

use std::cmp::Ordering;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::compile::ExecutableQuery;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("object store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Option<Duration>,
    pub max_rows: Option<usize>,
}

impl ExecutionLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// One result cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Null,
    Value(Value),
    /// Object id, for object columns.
    Object(u32),
}

impl ResultValue {
    /// Sort order: nulls first, then values, then object ids.
    pub fn sort_cmp(&self, other: &ResultValue) -> Ordering {
        match (self, other) {
            (ResultValue::Null, ResultValue::Null) => Ordering::Equal,
            (ResultValue::Null, _) => Ordering::Less,
            (_, ResultValue::Null) => Ordering::Greater,
            (ResultValue::Value(a), ResultValue::Value(b)) => {
                a.compare(b).unwrap_or(Ordering::Equal)
            }
            (ResultValue::Object(a), ResultValue::Object(b)) => a.cmp(b),
            (ResultValue::Value(_), ResultValue::Object(_)) => Ordering::Less,
            (ResultValue::Object(_), ResultValue::Value(_)) => Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ResultValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&ResultValue>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

pub trait ObjectStore: Send + Sync {
    fn execute(
        &self,
        query: &ExecutableQuery,
        limits: &ExecutionLimits,
    ) -> Result<ResultSet, ExecutionError>;

    /// Number of distinct result rows. The row cap does not apply.
    fn count(&self, query: &ExecutableQuery, limits: &ExecutionLimits) -> Result<u64, ExecutionError> {
        let limits = ExecutionLimits {
            max_rows: None,
            ..*limits
        };
        self.execute(query, &limits).map(|rs| rs.len() as u64)
    }
}
