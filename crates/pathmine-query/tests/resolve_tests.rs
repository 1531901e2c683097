//! Path resolution against the genomic test model.

use pathmine_model::{KeyDefinitions, Model};
use pathmine_query::*;

const MODEL_XML: &str = include_str!("../../../testdata/model.xml");
const KEYS: &str = include_str!("../../../testdata/keys.properties");

fn genomic() -> Model {
    Model::from_xml(MODEL_XML)
        .unwrap()
        .with_keys(KeyDefinitions::parse(KEYS).unwrap())
        .unwrap()
}

// ============================================================================
// Successful resolution
// ============================================================================

#[test]
fn test_relative_resolution_reaches_attribute() {
    let model = genomic();
    let resolver = PathResolver::new(&model);
    let resolved = resolver.resolve_from("Gene", "organism.name").unwrap();

    assert_eq!(resolved.path().as_str(), "Gene.organism.name");
    assert_eq!(resolved.end_kind(), NodeKind::Attribute);
    assert!(resolved.is_attribute());
    assert_eq!(resolved.end_type_name(), "java.lang.String");
    assert_eq!(resolved.end_class(), None);

    let kinds: Vec<NodeKind> = resolved.segments().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![NodeKind::Root, NodeKind::Reference, NodeKind::Attribute]
    );
    assert_eq!(resolved.segments()[1].type_name(), "Organism");
}

#[test]
fn test_unknown_segment_reports_full_path() {
    let model = genomic();
    let err = PathResolver::new(&model)
        .resolve_from("Gene", "organism.bogus")
        .unwrap_err();
    assert_eq!(err.path, "Gene.organism.bogus");
    assert_eq!(
        err.reason,
        PathErrorReason::UnknownSegment {
            segment: "bogus".into(),
            class: "Organism".into(),
        }
    );
}

#[test]
fn test_inherited_fields_resolve_on_subclasses() {
    let model = genomic();
    let resolver = PathResolver::new(&model);
    let resolved = resolver.resolve_str("Protein.organism.taxonId").unwrap();
    assert_eq!(resolved.end_type_name(), "java.lang.Integer");
    let resolved = resolver.resolve_str("CEO.department.company.name").unwrap();
    assert_eq!(resolved.segments()[2].type_name(), "Company");
}

#[test]
fn test_collections_resolve_to_element_class() {
    let model = genomic();
    let resolved = PathResolver::new(&model)
        .resolve_str("Department.employees")
        .unwrap();
    assert_eq!(resolved.end_kind(), NodeKind::Collection);
    assert_eq!(resolved.end_class(), Some("Employee"));
}

#[test]
fn test_bracket_narrowing() {
    let model = genomic();
    let resolved = PathResolver::new(&model)
        .resolve_str("Department.employees[Manager].title")
        .unwrap();
    assert_eq!(resolved.canonical(), "Department.employees.title");
    assert_eq!(resolved.object_segment().class.as_deref(), Some("Manager"));
}

#[test]
fn test_bare_subclass_segment_narrows_without_consuming_a_field() {
    let model = genomic();
    let resolved = PathResolver::new(&model)
        .resolve_str("Department.employees.CEO.salary")
        .unwrap();
    let narrowing = &resolved.segments()[2];
    assert_eq!(narrowing.field, None);
    assert_eq!(narrowing.class.as_deref(), Some("CEO"));
    assert_eq!(narrowing.canonical, "Department.employees");
    assert_eq!(resolved.canonical(), "Department.employees.salary");
}

#[test]
fn test_root_narrowing() {
    let model = genomic();
    let resolved = PathResolver::new(&model)
        .resolve_str("BioEntity[Gene].length")
        .unwrap();
    assert_eq!(resolved.root_class(), "Gene");
    assert_eq!(resolved.end_type_name(), "java.lang.Integer");
}

#[test]
fn test_root_only_path() {
    let model = genomic();
    let resolved = PathResolver::new(&model).resolve_str("Gene").unwrap();
    assert_eq!(resolved.end_kind(), NodeKind::Root);
    assert_eq!(resolved.end_class(), Some("Gene"));
    assert_eq!(resolved.segments().len(), 1);
}

#[test]
fn test_context_accepts_subclasses() {
    let model = genomic();
    let resolver = PathResolver::new(&model);
    assert!(resolver
        .resolve_in_context("BioEntity", &Path::new("Gene.symbol"))
        .is_ok());
    let err = resolver
        .resolve_in_context("Gene", &Path::new("Protein.symbol"))
        .unwrap_err();
    assert!(matches!(err.reason, PathErrorReason::OutsideContext { .. }));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_failure_reasons() {
    let model = genomic();
    let resolver = PathResolver::new(&model);
    let reason = |p: &str| resolver.resolve_str(p).unwrap_err().reason;

    assert_eq!(
        reason("Plasmid.name"),
        PathErrorReason::UnknownStartType {
            class: "Plasmid".into()
        }
    );
    assert_eq!(
        reason("Gene.symbol.length"),
        PathErrorReason::AttributeTraversal {
            attribute: "symbol".into()
        }
    );
    assert_eq!(
        reason("Gene.organism[Gene]"),
        PathErrorReason::NotASubclass {
            class: "Organism".into(),
            narrowed: "Gene".into(),
        }
    );
    assert!(matches!(reason("Gene..symbol"), PathErrorReason::Syntax { .. }));
    assert!(matches!(reason(""), PathErrorReason::Syntax { .. }));
    // a class that is not a subclass of the current one is not a narrowing
    assert!(matches!(
        reason("Gene.Protein"),
        PathErrorReason::UnknownSegment { .. }
    ));
}

#[test]
fn test_resolution_is_deterministic() {
    let model = genomic();
    let resolver = PathResolver::new(&model);
    let a = resolver.resolve_str("Gene.proteins.genes.organism.name").unwrap();
    let b = resolver.resolve_str("Gene.proteins.genes.organism.name").unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_errors_serialize_with_reason_tag() {
    let model = genomic();
    let err = PathResolver::new(&model).resolve_str("Gene.bogus").unwrap_err();
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["path"], "Gene.bogus");
    assert_eq!(json["reason"]["reason"], "unknown_segment");
}
