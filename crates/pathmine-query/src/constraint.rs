//! Constraints attached to query nodes.
//!
//! A constraint pairs an operator with an operand. Most operands are literal
//! values typed by the user; a *loop* constraint instead names another path of
//! the same query (`Gene.organism = Gene.proteins.organism`), which ties two
//! query nodes together outside the prefix tree.

use std::fmt;
use std::str::FromStr;

use pathmine_model::{AttributeType, Model};
use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::query::QueryError;
use crate::resolve::{NodeKind, ResolvedPath};

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "CONTAINS")]
    Contains,
    #[serde(rename = "DOES NOT CONTAIN")]
    DoesNotContain,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "LOOKUP")]
    Lookup,
}

impl ConstraintOp {
    pub const ALL: [ConstraintOp; 14] = [
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Le,
        Self::Gt,
        Self::Ge,
        Self::Contains,
        Self::DoesNotContain,
        Self::Like,
        Self::IsNull,
        Self::IsNotNull,
        Self::In,
        Self::NotIn,
        Self::Lookup,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "CONTAINS",
            Self::DoesNotContain => "DOES NOT CONTAIN",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Lookup => "LOOKUP",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    pub fn is_text(self) -> bool {
        matches!(self, Self::Contains | Self::DoesNotContain | Self::Like)
    }

    pub fn is_null_check(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }

    pub fn is_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// The operand shape this operator expects.
    fn expected_operand(self) -> &'static str {
        if self.is_null_check() {
            "no value"
        } else if self.is_list() {
            "a list of values"
        } else {
            "a value"
        }
    }
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ConstraintOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" | "EQ" => Self::Eq,
            "!=" | "<>" | "NE" => Self::Ne,
            "<" | "LT" => Self::Lt,
            "<=" | "LE" => Self::Le,
            ">" | "GT" => Self::Gt,
            ">=" | "GE" => Self::Ge,
            "CONTAINS" => Self::Contains,
            "DOES NOT CONTAIN" => Self::DoesNotContain,
            "LIKE" => Self::Like,
            "IS NULL" => Self::IsNull,
            "IS NOT NULL" => Self::IsNotNull,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "LOOKUP" => Self::Lookup,
            _ => return Err(format!("unknown constraint operator `{s}`")),
        };
        Ok(op)
    }
}

// ============================================================================
// Operands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintValue {
    None,
    Literal(String),
    List(Vec<String>),
    /// Loop operand: another path of the same query.
    Path(Path),
}

impl ConstraintValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn path(path: impl Into<Path>) -> Self {
        Self::Path(path.into())
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Literal(s) => f.write_str(s),
            Self::List(values) => f.write_str(&values.join(", ")),
            Self::Path(p) => write!(f, "{p}"),
        }
    }
}

// ============================================================================
// Constraint
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub op: ConstraintOp,
    pub value: ConstraintValue,
    /// Logic variable (`A`, `B`, ...), unique within a query.
    pub code: String,
    #[serde(default)]
    pub editable: bool,
    /// Template identifier `<node path>.<ordinal>`.
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Declaration order within the query.
    #[serde(default)]
    pub seq: u64,
}

impl Constraint {
    pub fn new(op: ConstraintOp, value: ConstraintValue, code: impl Into<String>, seq: u64) -> Self {
        Self {
            op,
            value,
            code: code.into(),
            editable: false,
            identifier: None,
            description: None,
            seq,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.value, ConstraintValue::Path(_))
    }

    pub fn loop_path(&self) -> Option<&Path> {
        self.value.as_path()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ConstraintValue::None => write!(f, "{}", self.op),
            value => write!(f, "{} {}", self.op, value),
        }
    }
}

/// Constraint code for the `n`th constraint: `A` .. `Z`, `AA`, `AB`, ...
pub fn code_for(mut n: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ============================================================================
// Legality
// ============================================================================

/// Check that `op` with `value` may constrain the node `path`. For loop
/// operands `target` is the resolved operand path.
pub(crate) fn check_constraint(
    model: &Model,
    path: &ResolvedPath,
    op: ConstraintOp,
    value: &ConstraintValue,
    target: Option<&ResolvedPath>,
) -> Result<(), QueryError> {
    let illegal = |reason: &str| QueryError::IllegalOperator {
        path: path.path().to_string(),
        op,
        reason: reason.to_string(),
    };
    let missing = || QueryError::MissingValue {
        path: path.path().to_string(),
        op,
        expected: op.expected_operand(),
    };

    let shape_ok = match value {
        ConstraintValue::None => op.is_null_check(),
        ConstraintValue::List(_) => op.is_list(),
        ConstraintValue::Literal(_) => !op.is_null_check() && !op.is_list(),
        ConstraintValue::Path(_) => matches!(op, ConstraintOp::Eq | ConstraintOp::Ne),
    };
    if !shape_ok {
        return Err(missing());
    }

    match path.end_kind() {
        NodeKind::Attribute => {
            let ty = path.attribute_type().unwrap_or(AttributeType::String);
            if value.as_path().is_some() {
                return Err(illegal("loop constraints join objects, not attributes"));
            }
            if op == ConstraintOp::Lookup {
                return Err(illegal("LOOKUP applies to objects"));
            }
            if op.is_text() && !ty.is_textual() {
                return Err(illegal("text operators need a string attribute"));
            }
            if op.is_ordering() && ty == AttributeType::Boolean {
                return Err(illegal("booleans are not ordered"));
            }
            Ok(())
        }
        NodeKind::Unresolved => Err(illegal("path does not resolve")),
        kind => {
            if let Some(target) = target {
                if kind == NodeKind::Root {
                    return Err(illegal("loop constraints apply to references and collections"));
                }
                return check_loop(model, path, target);
            }
            match op {
                ConstraintOp::Lookup | ConstraintOp::In | ConstraintOp::NotIn => Ok(()),
                ConstraintOp::IsNull | ConstraintOp::IsNotNull if kind == NodeKind::Reference => {
                    Ok(())
                }
                ConstraintOp::IsNull | ConstraintOp::IsNotNull => {
                    Err(illegal("null checks apply to attributes and references"))
                }
                _ => Err(illegal("objects take LOOKUP, IN, or a loop path")),
            }
        }
    }
}

fn check_loop(model: &Model, path: &ResolvedPath, target: &ResolvedPath) -> Result<(), QueryError> {
    let incompatible = || QueryError::IncompatibleLoop {
        path: path.path().to_string(),
        target: target.path().to_string(),
    };
    let (Some(class), Some(target_class)) = (path.end_class(), target.end_class()) else {
        return Err(incompatible());
    };
    if !target.end_kind().is_object() {
        return Err(incompatible());
    }
    // the operand must be usable wherever the node's type is expected
    if model.is_assignable(target_class, class) {
        Ok(())
    } else {
        Err(incompatible())
    }
}
