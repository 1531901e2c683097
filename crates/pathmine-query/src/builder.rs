//! Query-builder snapshot.
//!
//! Everything an editing UI needs to render one state of a query, computed
//! in one pass: view strings and order, sort state, error paths, locked
//! paths, link paths, breadcrumbs, and the metadata browse tree for the path
//! being edited.

use indexmap::IndexMap;
use pathmine_model::FieldKind;
use serde::Serialize;

use crate::analysis::{link_paths, link_prefixes, locked_paths};
use crate::config::Direction;
use crate::path::Path;
use crate::query::PathQuery;
use crate::resolve::{NodeKind, PathError};

/// One row of the metadata browse tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataNode {
    pub path: String,
    /// Field name, or the class name for the browse root.
    pub field: String,
    pub kind: NodeKind,
    /// Unqualified class for objects, Java type for attributes.
    pub type_name: String,
    /// Depth below the query root.
    pub indentation: usize,
    pub selected: bool,
    pub constrained: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuilderSnapshot {
    pub view_strings: Vec<String>,
    /// Position in the view of the primary sort path.
    pub sort_by_index: Option<usize>,
    pub sort_order_map: IndexMap<String, Direction>,
    pub error_paths: Vec<String>,
    /// View paths and all their prefixes.
    pub view_paths: IndexMap<String, bool>,
    pub view_path_order: IndexMap<String, usize>,
    pub locked_paths: IndexMap<String, bool>,
    pub nodes: Vec<MetadataNode>,
    pub view_path_link_prefixes: Vec<String>,
    /// Link path -> unqualified type.
    pub view_path_link_paths: IndexMap<String, String>,
    /// Breadcrumb token -> cumulative path, in order. Empty while browsing
    /// the root itself.
    pub navigation: Vec<(String, String)>,
    /// Breadcrumb token -> unqualified type at that step.
    pub navigation_paths: Vec<(String, String)>,
}

impl BuilderSnapshot {
    /// Build the snapshot for `query`, browsing `browse` (an object path of
    /// the query's root; defaults to the root class).
    pub fn build(query: &PathQuery, browse: Option<&str>) -> Result<Self, PathError> {
        let view_strings = query.view_strings();

        let mut sort_order_map: IndexMap<String, Direction> = query
            .sort_order()
            .iter()
            .map(|o| (o.path.to_string(), o.direction))
            .collect();
        if sort_order_map.is_empty() {
            if let Some(first) = view_strings.first() {
                sort_order_map.insert(first.clone(), query.config().default_sort_direction);
            }
        }
        let sort_by_index = sort_order_map
            .keys()
            .next()
            .and_then(|p| view_strings.iter().position(|v| v == p));

        let mut view_paths = IndexMap::new();
        for p in query.view() {
            for prefix in p.prefixes().into_iter().rev() {
                view_paths.insert(prefix.into_string(), true);
            }
            view_paths.insert(p.to_string(), true);
        }

        let view_path_order = view_strings
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i))
            .collect();

        let locked = locked_paths(query);
        let locked_map: IndexMap<String, bool> = locked.iter().map(|p| (p.clone(), true)).collect();

        let mut view_path_link_paths = IndexMap::new();
        for link in link_paths(query).into_values() {
            if view_path_link_paths.contains_key(&link) {
                continue;
            }
            let ty = type_for_path(&link, query).unwrap_or_default();
            view_path_link_paths.insert(link, ty);
        }

        let browse = match browse {
            Some(b) if !b.trim().is_empty() => Path::new(b),
            _ => Path::new(query.root().unwrap_or_default()),
        };
        let (navigation, navigation_paths, nodes) = if browse.as_str().is_empty() {
            (Vec::new(), Vec::new(), Vec::new())
        } else {
            browse_tree(query, &browse, &locked)?
        };

        Ok(Self {
            view_strings,
            sort_by_index,
            sort_order_map,
            error_paths: query.error_paths(),
            view_paths,
            view_path_order,
            locked_paths: locked_map,
            nodes,
            view_path_link_prefixes: link_prefixes(query),
            view_path_link_paths,
            navigation,
            navigation_paths,
        })
    }
}

type Breadcrumbs = Vec<(String, String)>;

fn browse_tree(
    query: &PathQuery,
    browse: &Path,
    locked: &std::collections::BTreeSet<String>,
) -> Result<(Breadcrumbs, Breadcrumbs, Vec<MetadataNode>), PathError> {
    let resolved = query.resolve(browse)?;
    let model = query.model();

    let mut navigation = Vec::new();
    let mut navigation_paths = Vec::new();
    let mut nodes = Vec::new();
    let selected = |p: &str| query.view().iter().any(|v| v.as_str() == p);
    let constrained = |p: &str| query.node(p).is_some_and(|n| !n.constraints.is_empty());

    // breadcrumbs only once the browse path leaves the root
    let breadcrumbs = !browse.is_root();
    for (depth, seg) in resolved.segments().iter().enumerate() {
        let token = seg.path.last_segment().to_string();
        if breadcrumbs {
            navigation.push((token.clone(), seg.path.to_string()));
            navigation_paths.push((token.clone(), seg.type_name().to_string()));
        }
        nodes.push(MetadataNode {
            path: seg.path.to_string(),
            field: token,
            kind: seg.kind,
            type_name: seg.type_name().to_string(),
            indentation: depth,
            selected: selected(seg.path.as_str()),
            constrained: constrained(seg.path.as_str()),
            locked: locked.contains(seg.path.as_str()),
        });
    }

    // the fields of the browsed class, attributes first
    if let Some(class) = resolved.end_class() {
        let depth = resolved.segments().len();
        let mut fields: Vec<_> = model.all_fields(class).collect();
        fields.sort_by_key(|f| (!f.is_attribute(), f.name.clone()));
        for field in fields {
            let path = browse.child(&field.name);
            let (kind, type_name) = match &field.kind {
                FieldKind::Attribute { ty } => (NodeKind::Attribute, ty.type_name().to_string()),
                FieldKind::Reference { referenced_type, .. } => {
                    (NodeKind::Reference, referenced_type.clone())
                }
                FieldKind::Collection { referenced_type, .. } => {
                    (NodeKind::Collection, referenced_type.clone())
                }
            };
            nodes.push(MetadataNode {
                field: field.name.clone(),
                kind,
                type_name,
                indentation: depth,
                selected: selected(path.as_str()),
                constrained: constrained(path.as_str()),
                locked: locked.contains(path.as_str()),
                path: path.into_string(),
            });
        }
    }
    Ok((navigation, navigation_paths, nodes))
}

/// Type shown for a path: the unqualified class for object ends, the
/// attribute's Java type otherwise.
pub fn type_for_path(path: &str, query: &PathQuery) -> Result<String, PathError> {
    let resolved = query.resolve(&Path::new(path))?;
    Ok(resolved.end_type_name().to_string())
}
