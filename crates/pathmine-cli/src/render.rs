//! Plain-text rendering for terminal output.

use std::collections::BTreeMap;
use std::fmt::Write;

use colored::Colorize;
use pathmine_query::{CountOutcome, NodeKind, ResolvedPath, ResultSet, ResultValue};

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Root => "root",
        NodeKind::Attribute => "attribute",
        NodeKind::Reference => "reference",
        NodeKind::Collection => "collection",
        NodeKind::Unresolved => "unresolved",
    }
}

/// One line per step: `Gene.organism  reference  Organism`.
pub fn resolved(path: &ResolvedPath) -> String {
    let mut out = format!(
        "{} {} {}",
        "✓".green(),
        path.path().as_str().bold(),
        path.end_type_name().cyan()
    );
    let width = path
        .segments()
        .iter()
        .map(|s| s.path.as_str().len())
        .max()
        .unwrap_or(0);
    for seg in path.segments() {
        let _ = write!(
            out,
            "\n    {:<width$}  {:<10}  {}",
            seg.path.as_str(),
            kind_label(seg.kind),
            seg.type_name(),
        );
    }
    out
}

fn cell(value: &ResultValue) -> String {
    match value {
        ResultValue::Null => "-".to_string(),
        ResultValue::Value(v) => v.to_string(),
        ResultValue::Object(id) => format!("#{id}"),
    }
}

/// Column-aligned result table followed by a row count.
pub fn table(results: &ResultSet) -> String {
    let cells: Vec<Vec<String>> = results
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();
    let widths: Vec<usize> = results
        .columns
        .iter()
        .enumerate()
        .map(|(i, header)| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = results
        .columns
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect();
    let _ = writeln!(out, "{}", header.join("  ").trim_end().bold());
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }
    let _ = writeln!(out, "{} row(s)", results.len());
    out
}

pub fn counts(outcomes: &BTreeMap<String, CountOutcome>) -> String {
    let width = outcomes.keys().map(|k| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (name, outcome) in outcomes {
        let status = match outcome {
            CountOutcome::Counted(n) => n.to_string().green().to_string(),
            CountOutcome::Skipped(err) => format!("{} ({err})", "skipped".yellow()),
            CountOutcome::Failed(err) => format!("{} ({err})", "failed".red()),
        };
        let _ = writeln!(out, "{name:<width$}  {status}");
    }
    out
}
