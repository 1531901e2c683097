//! Constraint logic: how the constraints of a query combine.
//!
//! ```text
//! expr   := term ("or" term)*
//! term   := factor ("and" factor)*
//! factor := CODE | "(" expr ")"
//! ```
//!
//! `and` binds tighter than `or`; keywords are case-insensitive, codes are
//! upper-case letters.

use std::collections::BTreeSet;
use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char as pchar, multispace0},
    combinator::{all_consuming, map},
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicExpr {
    Code(String),
    And(Vec<LogicExpr>),
    Or(Vec<LogicExpr>),
}

impl LogicExpr {
    pub fn parse(input: &str) -> Result<Self, String> {
        all_consuming(delimited(multispace0, expr, multispace0))(input)
            .map(|(_, e)| e)
            .map_err(|err| match err {
                nom::Err::Error(e) | nom::Err::Failure(e) => format!(
                    "cannot parse constraint logic `{input}` at offset {}",
                    input.len() - e.input.len()
                ),
                nom::Err::Incomplete(_) => format!("incomplete constraint logic `{input}`"),
            })
    }

    /// All codes joined with `and`, in the given order.
    pub fn all_of<I, S>(codes: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<LogicExpr> = codes.into_iter().map(|c| LogicExpr::Code(c.into())).collect();
        Self::collapse(parts, LogicExpr::And)
    }

    /// Codes in order of first appearance.
    pub fn codes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        self.collect_codes(&mut out, &mut seen);
        out
    }

    fn collect_codes<'a>(&'a self, out: &mut Vec<&'a str>, seen: &mut BTreeSet<&'a str>) {
        match self {
            LogicExpr::Code(c) => {
                if seen.insert(c.as_str()) {
                    out.push(c.as_str());
                }
            }
            LogicExpr::And(parts) | LogicExpr::Or(parts) => {
                for p in parts {
                    p.collect_codes(out, seen);
                }
            }
        }
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.codes().contains(&code)
    }

    /// `self and code`.
    pub fn and_with(self, code: impl Into<String>) -> Self {
        let leaf = LogicExpr::Code(code.into());
        match self {
            LogicExpr::And(mut parts) => {
                parts.push(leaf);
                LogicExpr::And(parts)
            }
            other => LogicExpr::And(vec![other, leaf]),
        }
    }

    /// Remove a code; operators left with a single operand collapse into it.
    /// Returns `None` when nothing remains.
    pub fn remove_code(self, code: &str) -> Option<Self> {
        match self {
            LogicExpr::Code(c) if c == code => None,
            LogicExpr::Code(c) => Some(LogicExpr::Code(c)),
            LogicExpr::And(parts) => {
                let parts = parts.into_iter().filter_map(|p| p.remove_code(code)).collect();
                Self::collapse(parts, LogicExpr::And)
            }
            LogicExpr::Or(parts) => {
                let parts = parts.into_iter().filter_map(|p| p.remove_code(code)).collect();
                Self::collapse(parts, LogicExpr::Or)
            }
        }
    }

    fn collapse(mut parts: Vec<LogicExpr>, wrap: fn(Vec<LogicExpr>) -> LogicExpr) -> Option<Self> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(wrap(parts)),
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parent_is_and: bool) -> fmt::Result {
        let needs_parens = match self {
            LogicExpr::Code(_) => false,
            LogicExpr::And(_) => !parent_is_and,
            LogicExpr::Or(_) => parent_is_and,
        };
        if needs_parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for LogicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (parts, sep, is_and) = match self {
            LogicExpr::Code(c) => return f.write_str(c),
            LogicExpr::And(parts) => (parts, " and ", true),
            LogicExpr::Or(parts) => (parts, " or ", false),
        };
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                f.write_str(sep)?;
            }
            part.fmt_child(f, is_and)?;
        }
        Ok(())
    }
}

// ============================================================================
// Parser
// ============================================================================

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn expr(input: &str) -> IResult<&str, LogicExpr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(preceded(ws(tag_no_case("or")), term))(input)?;
    Ok((input, flatten(first, rest, true)))
}

fn term(input: &str) -> IResult<&str, LogicExpr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(preceded(ws(tag_no_case("and")), factor))(input)?;
    Ok((input, flatten(first, rest, false)))
}

fn factor(input: &str) -> IResult<&str, LogicExpr> {
    ws(alt((
        map(take_while1(|c: char| c.is_ascii_uppercase()), |c: &str| {
            LogicExpr::Code(c.to_string())
        }),
        delimited(pchar('('), expr, pchar(')')),
    )))(input)
}

/// Merge nested operators of the same kind: `A and (B and C)` is one `And`.
fn flatten(first: LogicExpr, rest: Vec<LogicExpr>, is_or: bool) -> LogicExpr {
    if rest.is_empty() {
        return first;
    }
    let mut parts = Vec::with_capacity(rest.len() + 1);
    for item in std::iter::once(first).chain(rest) {
        match (item, is_or) {
            (LogicExpr::Or(inner), true) | (LogicExpr::And(inner), false) => parts.extend(inner),
            (other, _) => parts.push(other),
        }
    }
    if is_or {
        LogicExpr::Or(parts)
    } else {
        LogicExpr::And(parts)
    }
}
