//! Query and template XML.
//!
//! ```xml
//! <template name="geneByOrganism" title="Genes in an organism">
//!   <query name="geneByOrganism" model="genomic"
//!          view="Gene.identifier Gene.organism.name"
//!          sortOrder="Gene.identifier asc"
//!          constraintLogic="A and B">
//!     <constraint path="Gene.organism.name" op="=" value="Drosophila" code="A" editable="true"/>
//!     <constraint path="Gene.organism" op="=" loopPath="Gene.proteins.organism" code="B"/>
//!     <constraint path="Gene.id" op="IN" code="C"><value>1</value><value>2</value></constraint>
//!   </query>
//! </template>
//! ```
//!
//! Import is lenient about paths: entries that no longer resolve against the
//! model are kept on the query and listed in [`PathQuery::problems`], so the
//! user can fix or drop just those entries.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use pathmine_model::Model;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::config::{Direction, EngineConfig};
use crate::constraint::{Constraint, ConstraintOp, ConstraintValue};
use crate::path::Path;
use crate::query::{OrderBy, PathQuery, QueryError};
use crate::template::Template;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum XmlError {
    #[error("malformed query XML at byte {position}: {message}")]
    Malformed { position: usize, message: String },

    #[error("no <query> element found")]
    NoQuery,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("cannot write query XML: {0}")]
    Write(String),
}

// ============================================================================
// Export
// ============================================================================

pub fn query_to_xml(query: &PathQuery) -> Result<String, XmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_query(&mut writer, query, query.name())?;
    finish(writer)
}

pub fn template_to_xml(template: &Template) -> Result<String, XmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_template(&mut writer, template)?;
    finish(writer)
}

/// A `<templates>` document holding every given template.
pub fn templates_to_xml<'t>(
    templates: impl IntoIterator<Item = &'t Template>,
) -> Result<String, XmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    emit(&mut writer, Event::Start(BytesStart::new("templates")))?;
    for template in templates {
        write_template(&mut writer, template)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("templates")))?;
    finish(writer)
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn finish(writer: XmlWriter) -> Result<String, XmlError> {
    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| XmlError::Write(e.to_string()))
}

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), XmlError> {
    writer
        .write_event(event)
        .map_err(|e| XmlError::Write(e.to_string()))
}

fn write_template(writer: &mut XmlWriter, template: &Template) -> Result<(), XmlError> {
    let mut elem = BytesStart::new("template");
    elem.push_attribute(("name", template.name()));
    if let Some(title) = template.title() {
        elem.push_attribute(("title", title));
    }
    if let Some(description) = template.description() {
        elem.push_attribute(("description", description));
    }
    emit(writer, Event::Start(elem))?;
    write_query(writer, template.query(), Some(template.name()))?;
    emit(writer, Event::End(BytesEnd::new("template")))
}

fn write_query(writer: &mut XmlWriter, query: &PathQuery, name: Option<&str>) -> Result<(), XmlError> {
    let view = query.view_strings().join(" ");
    let sort = query
        .sort_order()
        .iter()
        .map(|o| format!("{} {}", o.path, o.direction))
        .collect::<Vec<_>>()
        .join(" ");
    let logic = query.constraint_logic().map(|l| l.to_string());

    let mut elem = BytesStart::new("query");
    elem.push_attribute(("name", name.unwrap_or_default()));
    elem.push_attribute(("model", query.model().name()));
    elem.push_attribute(("view", view.as_str()));
    if !sort.is_empty() {
        elem.push_attribute(("sortOrder", sort.as_str()));
    }
    if let Some(logic) = &logic {
        elem.push_attribute(("constraintLogic", logic.as_str()));
    }
    if let Some(description) = query.description() {
        elem.push_attribute(("longDescription", description));
    }

    let constraints = query.constraints();
    if constraints.is_empty() {
        return emit(writer, Event::Empty(elem));
    }
    emit(writer, Event::Start(elem))?;
    for (path, c) in constraints {
        write_constraint(writer, path, c)?;
    }
    emit(writer, Event::End(BytesEnd::new("query")))
}

fn write_constraint(writer: &mut XmlWriter, path: &Path, c: &Constraint) -> Result<(), XmlError> {
    let mut elem = BytesStart::new("constraint");
    elem.push_attribute(("path", path.as_str()));
    elem.push_attribute(("op", c.op.symbol()));
    match &c.value {
        ConstraintValue::Literal(v) => elem.push_attribute(("value", v.as_str())),
        ConstraintValue::Path(p) => elem.push_attribute(("loopPath", p.as_str())),
        ConstraintValue::None | ConstraintValue::List(_) => {}
    }
    elem.push_attribute(("code", c.code.as_str()));
    if c.editable {
        elem.push_attribute(("editable", "true"));
    }
    if let Some(identifier) = &c.identifier {
        elem.push_attribute(("identifier", identifier.as_str()));
    }
    if let Some(description) = &c.description {
        elem.push_attribute(("description", description.as_str()));
    }

    let ConstraintValue::List(values) = &c.value else {
        return emit(writer, Event::Empty(elem));
    };
    emit(writer, Event::Start(elem))?;
    for value in values {
        emit(writer, Event::Start(BytesStart::new("value")))?;
        emit(writer, Event::Text(BytesText::new(value)))?;
        emit(writer, Event::End(BytesEnd::new("value")))?;
    }
    emit(writer, Event::End(BytesEnd::new("constraint")))
}

// ============================================================================
// Import
// ============================================================================

/// Parse the first `<query>` element of a document.
pub fn parse_query(xml: &str, model: Arc<Model>, config: Arc<EngineConfig>) -> Result<PathQuery, XmlError> {
    parse_document(xml, model, config)?
        .into_iter()
        .next()
        .map(|(_, query)| query)
        .ok_or(XmlError::NoQuery)
}

/// Parse `<template>` elements (optionally wrapped in `<templates>`).
pub fn parse_templates(
    xml: &str,
    model: Arc<Model>,
    config: Arc<EngineConfig>,
) -> Result<Vec<Template>, XmlError> {
    let mut templates = Vec::new();
    for (header, query) in parse_document(xml, model, config)? {
        let Some(header) = header else { continue };
        let name = header
            .get("name")
            .cloned()
            .or_else(|| query.name().map(str::to_string))
            .unwrap_or_default();
        let mut template = Template::new(name, query);
        if let Some(title) = header.get("title") {
            template = template.with_title(title.clone());
        }
        if let Some(description) = header.get("description").or_else(|| header.get("comment")) {
            template = template.with_description(description.clone());
        }
        templates.push(template);
    }
    Ok(templates)
}

type Attrs = BTreeMap<String, String>;

struct PendingQuery {
    attrs: Attrs,
    constraints: Vec<(Attrs, Vec<String>)>,
}

struct PendingConstraint {
    attrs: Attrs,
    values: Vec<String>,
    in_value: bool,
}

/// Every `<query>` in document order, with the attributes of its enclosing
/// `<template>` if any.
fn parse_document(
    xml: &str,
    model: Arc<Model>,
    config: Arc<EngineConfig>,
) -> Result<Vec<(Option<Attrs>, PathQuery)>, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut out = Vec::new();
    let mut template: Option<Attrs> = None;
    let mut query: Option<PendingQuery> = None;
    let mut constraint: Option<PendingConstraint> = None;

    loop {
        let position = reader.buffer_position();
        let event = reader.read_event().map_err(|err| XmlError::Malformed {
            position,
            message: err.to_string(),
        })?;
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"template" => template = Some(attributes(&e, position)?),
                b"query" => {
                    query = Some(PendingQuery {
                        attrs: attributes(&e, position)?,
                        constraints: Vec::new(),
                    })
                }
                b"constraint" => {
                    constraint = Some(PendingConstraint {
                        attrs: attributes(&e, position)?,
                        values: Vec::new(),
                        in_value: false,
                    })
                }
                b"value" => {
                    if let Some(c) = constraint.as_mut() {
                        c.in_value = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"query" => {
                    let pending = PendingQuery {
                        attrs: attributes(&e, position)?,
                        constraints: Vec::new(),
                    };
                    out.push((template.clone(), build_query(pending, &model, &config, position)?));
                }
                b"constraint" => {
                    let attrs = attributes(&e, position)?;
                    if let Some(q) = query.as_mut() {
                        q.constraints.push((attrs, Vec::new()));
                    }
                }
                b"value" => {
                    if let Some(c) = constraint.as_mut() {
                        c.values.push(String::new());
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some(c) = constraint.as_mut().filter(|c| c.in_value) {
                    let text = t.unescape().map_err(|err| XmlError::Malformed {
                        position,
                        message: err.to_string(),
                    })?;
                    c.values.push(text.into_owned());
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"value" => {
                    if let Some(c) = constraint.as_mut() {
                        c.in_value = false;
                    }
                }
                b"constraint" => {
                    if let (Some(c), Some(q)) = (constraint.take(), query.as_mut()) {
                        q.constraints.push((c.attrs, c.values));
                    }
                }
                b"query" => {
                    if let Some(pending) = query.take() {
                        out.push((template.clone(), build_query(pending, &model, &config, position)?));
                    }
                }
                b"template" => template = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn build_query(
    pending: PendingQuery,
    model: &Arc<Model>,
    config: &Arc<EngineConfig>,
    position: usize,
) -> Result<PathQuery, XmlError> {
    let malformed = |message: String| XmlError::Malformed { position, message };
    let attrs = pending.attrs;

    if let Some(declared) = attrs.get("model") {
        if declared != model.name() {
            tracing::warn!(declared = %declared, model = %model.name(), "query was saved against another model");
        }
    }

    let mut query = PathQuery::with_config(Arc::clone(model), Arc::clone(config));
    if let Some(name) = attrs.get("name").filter(|n| !n.is_empty()) {
        query.set_name(name.clone());
    }
    if let Some(description) = attrs.get("longDescription") {
        query.set_description(description.clone());
    }

    for path in attrs.get("view").map(String::as_str).unwrap_or_default().split_whitespace() {
        query.import_view(Path::new(path));
    }

    for (c, values) in pending.constraints {
        let path = c
            .get("path")
            .map(Path::new)
            .ok_or_else(|| malformed("<constraint> without a path".to_string()))?;
        let op: ConstraintOp = c
            .get("op")
            .map(String::as_str)
            .unwrap_or("=")
            .parse()
            .map_err(malformed)?;
        let value = if let Some(loop_path) = c.get("loopPath") {
            ConstraintValue::Path(Path::new(loop_path.as_str()))
        } else if op.is_list() {
            ConstraintValue::List(values)
        } else if op.is_null_check() {
            ConstraintValue::None
        } else {
            ConstraintValue::Literal(c.get("value").cloned().unwrap_or_default())
        };
        let mut constraint = Constraint::new(op, value, c.get("code").cloned().unwrap_or_default(), 0);
        constraint.editable = c.get("editable").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        constraint.identifier = c.get("identifier").cloned();
        constraint.description = c.get("description").cloned();
        query.import_constraint(path, constraint)?;
    }

    let tokens: Vec<&str> = attrs
        .get("sortOrder")
        .map(String::as_str)
        .unwrap_or_default()
        .split_whitespace()
        .collect();
    let mut i = 0;
    while i < tokens.len() {
        let path = Path::new(tokens[i]);
        let direction = match tokens.get(i + 1).and_then(|t| t.parse::<Direction>().ok()) {
            Some(direction) => {
                i += 2;
                direction
            }
            None => {
                i += 1;
                Direction::Asc
            }
        };
        query.import_sort(OrderBy::new(path, direction));
    }

    if let Some(logic) = attrs.get("constraintLogic") {
        if let Err(err) = query.set_constraint_logic(logic) {
            tracing::warn!(logic = %logic, error = %err, "ignoring saved constraint logic");
        }
    }
    Ok(query)
}

fn attributes(e: &BytesStart<'_>, position: usize) -> Result<Attrs, XmlError> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlError::Malformed {
            position,
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Malformed {
                position,
                message: err.to_string(),
            })?
            .into_owned();
        out.insert(key, value);
    }
    Ok(out)
}
