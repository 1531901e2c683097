//! Model XML reader.
//!
//! Reads the warehouse model format:
//!
//! ```xml
//! <model name="genomic" package="org.flymine.model.genomic">
//!   <class name="Gene" extends="BioEntity" is-interface="true">
//!     <attribute name="length" type="java.lang.Integer"/>
//!     <reference name="chromosome" referenced-type="Chromosome"/>
//!     <collection name="proteins" referenced-type="Protein" reverse-reference="genes"/>
//!   </class>
//! </model>
//! ```
//!
//! Qualified class names are reduced to their unqualified form, and the
//! implicit `java.lang.Object` / `InterMineObject` superclasses are dropped.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::descriptor::{unqualified_name, AttributeType, ClassDescriptor, FieldDescriptor};
use crate::{Model, ModelError};

const IMPLICIT_SUPERCLASSES: &[&str] = &["java.lang.Object", "Object", "InterMineObject"];

pub fn parse_model_xml(xml: &str) -> Result<Model, ModelError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut name: Option<String> = None;
    let mut package: Option<String> = None;
    let mut classes: Vec<ClassDescriptor> = Vec::new();
    let mut current: Option<ClassDescriptor> = None;

    loop {
        let position = reader.buffer_position();
        let event = reader.read_event().map_err(|err| ModelError::Xml {
            position,
            message: err.to_string(),
        })?;
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"model" => {
                    let attrs = attributes(&e, position)?;
                    name = attrs.get("name").cloned();
                    package = attrs.get("package").cloned();
                }
                b"class" => {
                    if current.is_some() {
                        return Err(xml_error(position, "nested <class> element"));
                    }
                    current = Some(class_from(&e, position)?);
                }
                other => push_field(&mut current, other, &e, position)?,
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"model" => {
                    let attrs = attributes(&e, position)?;
                    name = attrs.get("name").cloned();
                    package = attrs.get("package").cloned();
                }
                b"class" => classes.push(class_from(&e, position)?),
                other => push_field(&mut current, other, &e, position)?,
            },
            Event::End(e) => {
                if e.name().as_ref() == b"class" {
                    if let Some(class) = current.take() {
                        classes.push(class);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let name = name.ok_or_else(|| xml_error(0, "missing <model name=\"...\"> element"))?;
    Model::new(name, package, classes)
}

fn push_field(
    current: &mut Option<ClassDescriptor>,
    tag: &[u8],
    e: &BytesStart<'_>,
    position: usize,
) -> Result<(), ModelError> {
    let kind = match tag {
        b"attribute" | b"reference" | b"collection" => tag,
        _ => return Ok(()),
    };
    let Some(class) = current.as_mut() else {
        return Err(xml_error(position, "field element outside of <class>"));
    };

    let attrs = attributes(e, position)?;
    let field_name = attrs
        .get("name")
        .cloned()
        .ok_or_else(|| xml_error(position, "field element without a name"))?;

    let field = match kind {
        b"attribute" => {
            let ty_name = attrs.get("type").map(String::as_str).unwrap_or_default();
            let ty = AttributeType::from_type_name(ty_name).ok_or_else(|| {
                xml_error(
                    position,
                    &format!(
                        "attribute `{}.{}` has unknown type `{ty_name}`",
                        class.name, field_name
                    ),
                )
            })?;
            FieldDescriptor::attribute(field_name, ty)
        }
        _ => {
            let referenced = attrs.get("referenced-type").ok_or_else(|| {
                xml_error(
                    position,
                    &format!("`{}.{}` has no referenced-type", class.name, field_name),
                )
            })?;
            let referenced = unqualified_name(referenced).to_string();
            let mut field = if kind == b"reference" {
                FieldDescriptor::reference(field_name, referenced)
            } else {
                FieldDescriptor::collection(field_name, referenced)
            };
            if let Some(reverse) = attrs.get("reverse-reference") {
                field = field.with_reverse(reverse.clone());
            }
            field
        }
    };
    class.fields.push(field);
    Ok(())
}

fn class_from(e: &BytesStart<'_>, position: usize) -> Result<ClassDescriptor, ModelError> {
    let attrs = attributes(e, position)?;
    let name = attrs
        .get("name")
        .ok_or_else(|| xml_error(position, "<class> without a name"))?;
    let mut class = ClassDescriptor::new(unqualified_name(name));
    if let Some(extends) = attrs.get("extends") {
        class.superclasses = extends
            .split_whitespace()
            .filter(|s| !IMPLICIT_SUPERCLASSES.contains(s))
            .map(|s| unqualified_name(s).to_string())
            .filter(|s| !IMPLICIT_SUPERCLASSES.contains(&s.as_str()))
            .collect();
    }
    class.is_interface = attrs
        .get("is-interface")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    Ok(class)
}

fn attributes(e: &BytesStart<'_>, position: usize) -> Result<BTreeMap<String, String>, ModelError> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(position, &err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| xml_error(position, &err.to_string()))?
            .into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn xml_error(position: usize, message: &str) -> ModelError {
    ModelError::Xml {
        position,
        message: message.to_string(),
    }
}
