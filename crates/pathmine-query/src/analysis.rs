//! Loop-path analysis: locked paths and view link paths.
//!
//! Both are recomputed from scratch on demand. At query-editing scale the
//! cost is linear in the number of constraints plus view entries.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::path::Path;
use crate::query::PathQuery;

/// Paths that may not be removed from `query`.
///
/// For every loop constraint on a non-attribute node, the operand path and
/// each of its proper prefixes are locked.
pub fn locked_paths(query: &PathQuery) -> BTreeSet<String> {
    let mut locked = BTreeSet::new();
    for node in query.nodes() {
        if node.is_attribute() {
            continue;
        }
        for target in node.constraints.iter().filter_map(|c| c.loop_path()) {
            lock_with_ancestors(&mut locked, target);
        }
    }
    locked
}

fn lock_with_ancestors(locked: &mut BTreeSet<String>, path: &Path) {
    let mut current = Some(path.clone());
    while let Some(p) = current {
        current = p.parent();
        locked.insert(p.into_string());
    }
}

/// For each view path, the object path its value links to: the path minus
/// its attribute for attribute ends, the path itself for object ends.
/// Ordered like the view.
pub fn link_paths(query: &PathQuery) -> IndexMap<String, String> {
    query
        .view()
        .iter()
        .map(|p| {
            // unresolved entries get the syntactic guess
            let link = match query.node(p.as_str()).map(|n| n.kind) {
                Some(kind) if kind.is_object() => p.clone(),
                _ => p.parent().unwrap_or_else(|| p.clone()),
            };
            (p.to_string(), link.into_string())
        })
        .collect()
}

/// Distinct link paths in view order.
pub fn link_prefixes(query: &PathQuery) -> Vec<String> {
    let mut seen = BTreeSet::new();
    link_paths(query)
        .into_values()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
