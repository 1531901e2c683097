//! Path values and path syntax.
//!
//! A [`Path`] is an immutable dot-separated string such as
//! `Gene.organism.name` or `Department.employees[Manager].title`. It carries
//! no metadata and never resolves itself: resolution is an explicit step
//! ([`crate::resolve::PathResolver`]) that returns a tagged result.
//!
//! Syntax:
//!
//! ```text
//! path     := segment ('.' segment)*
//! segment  := ident ('[' ident ']')?
//! ident    := [A-Za-z_][A-Za-z0-9_]*
//! ```

use std::borrow::Borrow;
use std::fmt;

use nom::{
    bytes::complete::take_while,
    character::complete::{char as pchar, satisfy},
    combinator::{all_consuming, consumed, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, pair},
    IResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(String);

impl Path {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim();
        if trimmed.len() == path.len() {
            Self(path)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Number of segments, including the root.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Root class name, without any bracketed narrowing.
    pub fn root(&self) -> &str {
        let first = self.0.split('.').next().unwrap_or_default();
        first.split('[').next().unwrap_or(first)
    }

    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    pub fn is_root(&self) -> bool {
        !self.0.contains('.')
    }

    /// The path with its last segment removed.
    pub fn parent(&self) -> Option<Path> {
        self.0
            .rfind('.')
            .map(|idx| Path(self.0[..idx].to_string()))
    }

    /// Proper prefixes, longest first: `A.b.c` → `[A.b, A]`.
    pub fn prefixes(&self) -> Vec<Path> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out
    }

    /// `self` equals `other` or is one of its proper prefixes.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0 == self.0 || self.is_strict_prefix_of(other)
    }

    pub fn is_strict_prefix_of(&self, other: &Path) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    pub fn child(&self, segment: &str) -> Path {
        Path(format!("{}.{segment}", self.0))
    }

    /// Everything after the root segment.
    pub fn without_root(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, rest)| rest)
    }

    /// Append a relative dotted path.
    pub fn join(&self, relative: &str) -> Path {
        let relative = relative.trim().trim_start_matches('.');
        if relative.is_empty() {
            self.clone()
        } else {
            Path(format!("{}.{relative}", self.0))
        }
    }

    /// The path with bracketed narrowings removed:
    /// `Department.employees[Manager].title` → `Department.employees.title`.
    ///
    /// Bare subclass segments are only known after resolution; see
    /// [`crate::resolve::ResolvedPath::canonical`].
    pub fn without_narrowing(&self) -> Path {
        if !self.0.contains('[') {
            return self.clone();
        }
        let mut out = String::with_capacity(self.0.len());
        let mut depth = 0usize;
        for c in self.0.chars() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                _ if depth == 0 => out.push(c),
                _ => {}
            }
        }
        Path(out)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Path {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&Path> for Path {
    fn from(value: &Path) -> Self {
        value.clone()
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Path {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Syntax
// ============================================================================

/// One syntactic segment: `employees[Manager]` → name `employees`,
/// narrowed `Manager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSegment<'a> {
    pub text: &'a str,
    pub name: &'a str,
    pub narrowed: Option<&'a str>,
}

/// Split a path into segments. On failure returns the byte offset of the
/// first character that could not be parsed.
pub fn parse_segments(path: &str) -> Result<Vec<RawSegment<'_>>, usize> {
    all_consuming(separated_list1(pchar('.'), segment))(path)
        .map(|(_, segments)| segments)
        .map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => path.len() - e.input.len(),
            nom::Err::Incomplete(_) => path.len(),
        })
}

fn segment(input: &str) -> IResult<&str, RawSegment<'_>> {
    let (rest, (text, (name, narrowed))) = consumed(pair(
        identifier,
        opt(delimited(pchar('['), identifier, pchar(']'))),
    ))(input)?;
    Ok((
        rest,
        RawSegment {
            text,
            name,
            narrowed,
        },
    ))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_continue)))(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_longest_first() {
        let p = Path::new("Gene.organism.name");
        assert_eq!(
            p.prefixes(),
            vec![Path::new("Gene.organism"), Path::new("Gene")]
        );
        assert!(Path::new("Gene").prefixes().is_empty());
    }

    #[test]
    fn prefix_relation_respects_segment_boundaries() {
        let gene = Path::new("Gene.organism");
        assert!(gene.is_prefix_of(&Path::new("Gene.organism")));
        assert!(gene.is_strict_prefix_of(&Path::new("Gene.organism.name")));
        assert!(!gene.is_prefix_of(&Path::new("Gene.organismName")));
    }

    #[test]
    fn root_strips_narrowing() {
        assert_eq!(Path::new("Employee[Manager].title").root(), "Employee");
        assert_eq!(Path::new("Gene").root(), "Gene");
        assert_eq!(Path::new("Gene.organism.name").last_segment(), "name");
        assert_eq!(
            Path::new("Department.employees[Manager].title").without_narrowing(),
            Path::new("Department.employees.title")
        );
        assert_eq!(Path::new("Gene").join("organism.name").as_str(), "Gene.organism.name");
    }

    #[test]
    fn parses_bracketed_narrowing() {
        let segs = parse_segments("Department.employees[Manager].title").unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1].name, "employees");
        assert_eq!(segs[1].narrowed, Some("Manager"));
        assert_eq!(segs[1].text, "employees[Manager]");
    }

    #[test]
    fn syntax_errors_report_offset() {
        assert_eq!(parse_segments("Gene..name"), Err(4));
        assert_eq!(parse_segments("Gene.organism["), Err(13));
        assert_eq!(parse_segments(""), Err(0));
    }
}
