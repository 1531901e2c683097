//! Integration tests for the complete Pathmine pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Model XML + key definitions → PathQuery editing → compile → object store
//! - Query XML import/export → builder snapshot
//! - Template documents → registry → batch and per-object counts
//! - Model reload → stale path reporting
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use pathmine_model::{KeyDefinitions, Model};
use pathmine_query::template::TemplateNodeMap;
use pathmine_query::*;
use pathmine_store::MemoryObjectStore;

const MODEL_XML: &str = include_str!("../testdata/model.xml");
const KEYS: &str = include_str!("../testdata/keys.properties");
const OBJECTS: &str = include_str!("../testdata/objects.json");
const QUERY_XML: &str = include_str!("../testdata/query.xml");
const TEMPLATES_XML: &str = include_str!("../testdata/templates.xml");

fn model_from(xml: &str) -> Arc<Model> {
    Arc::new(
        Model::from_xml(xml)
            .expect("model parses")
            .with_keys(KeyDefinitions::parse(KEYS).expect("keys parse"))
            .expect("keys match the model"),
    )
}

fn genomic() -> Arc<Model> {
    model_from(MODEL_XML)
}

fn config() -> Arc<EngineConfig> {
    Arc::new(EngineConfig::default())
}

fn strings(rs: &ResultSet, column: &str) -> Vec<String> {
    rs.column(column)
        .expect("column present")
        .into_iter()
        .map(|v| match v {
            ResultValue::Value(v) => v.to_string(),
            ResultValue::Null => "null".to_string(),
            ResultValue::Object(id) => format!("#{id}"),
        })
        .collect()
}

// ============================================================================
// Saved query → store
// ============================================================================

#[test]
fn test_saved_query_runs_against_store() {
    let model = genomic();
    let store = MemoryObjectStore::from_json(Arc::clone(&model), OBJECTS).unwrap();
    let query = parse_query(QUERY_XML, Arc::clone(&model), config()).unwrap();

    let compiled = compile(&query).unwrap();
    let results = store.execute(&compiled, &ExecutionLimits::unlimited()).unwrap();

    assert_eq!(results.columns, query.view_strings());
    assert_eq!(strings(&results, "Gene.symbol"), vec!["w", "dpp", "eve"]);
    assert_eq!(
        strings(&results, "Gene.chromosome.identifier"),
        vec!["X", "2L", "2L"]
    );
    assert_eq!(store.count(&compiled, &ExecutionLimits::unlimited()).unwrap(), 3);
}

// ============================================================================
// Interactive editing session
// ============================================================================

#[test]
fn test_editing_session_round_trips_through_xml() {
    let model = genomic();
    let store = MemoryObjectStore::from_json(Arc::clone(&model), OBJECTS).unwrap();

    // the user picks the gene, then its organism (expanded to key fields)
    let mut query = PathQuery::with_config(Arc::clone(&model), config());
    query.add_to_view("Gene.symbol").unwrap();
    let added = query.add_to_view("Gene.organism").unwrap();
    assert_eq!(added.len(), 2);
    query
        .add_constraint(
            "Gene.organism",
            ConstraintOp::Eq,
            ConstraintValue::path("Gene.proteins.organism"),
        )
        .unwrap();
    query.add_sort("Gene.symbol", Direction::Asc).unwrap();

    let snapshot = BuilderSnapshot::build(&query, Some("Gene.proteins")).unwrap();
    assert_eq!(snapshot.locked_paths.get("Gene.proteins"), Some(&true));
    assert_eq!(snapshot.sort_by_index, Some(0));
    assert_eq!(snapshot.navigation.len(), 2);
    assert!(matches!(
        query.remove_node("Gene.proteins"),
        Err(QueryError::LockedPath { .. })
    ));

    let xml = query_to_xml(&query).unwrap();
    let reloaded = parse_query(&xml, Arc::clone(&model), config()).unwrap();
    assert_eq!(reloaded.view_strings(), query.view_strings());
    assert_eq!(locked_paths(&reloaded), locked_paths(&query));

    // only genes with a protein from the same organism
    let results = store
        .execute(&compile(&reloaded).unwrap(), &ExecutionLimits::unlimited())
        .unwrap();
    assert_eq!(strings(&results, "Gene.symbol"), vec!["dpp", "w"]);
}

// ============================================================================
// Templates
// ============================================================================

#[test]
fn test_registry_counts_templates() {
    let model = genomic();
    let store = MemoryObjectStore::from_json(Arc::clone(&model), OBJECTS).unwrap();
    let registry = TemplateRegistry::new();
    let loaded = registry
        .load_xml(TEMPLATES_XML, Scope::Global, Arc::clone(&model), config())
        .unwrap();
    assert_eq!(loaded, 3);

    let templates: Vec<Arc<Template>> = registry
        .names(Scope::All)
        .iter()
        .filter_map(|name| registry.find_template(name, Scope::All))
        .collect();
    let requests = templates.iter().map(|t| {
        let values: Vec<TemplateValue> = t
            .editable_constraints()
            .into_iter()
            .map(|(_, c)| TemplateValue::with_value(c.op, c.value.clone()))
            .collect();
        (t.as_ref(), values)
    });
    let outcomes = count_templates(requests, &store, &ExecutionLimits::unlimited());
    assert_eq!(outcomes["geneByOrganism"].count(), Some(3));
    assert_eq!(outcomes["employeesInDepartment"].count(), Some(4));
    assert_eq!(outcomes["organismGenes"].count(), Some(1));

    let mut mapping = TemplateNodeMap::new();
    mapping
        .entry("Organism".into())
        .or_default()
        .insert("organismGenes".into(), vec![Path::new("Gene.organism.name")]);
    for (id, expected) in [(1, 3), (2, 1)] {
        let organism = store.object(id).unwrap();
        let counts = object_template_counts(
            organism,
            &model,
            &mapping,
            &registry,
            &store,
            &ExecutionLimits::unlimited(),
        );
        assert_eq!(counts["organismGenes"].count(), Some(expected), "organism {id}");
    }
}

// ============================================================================
// Model reload
// ============================================================================

#[test]
fn test_model_reload_reports_stale_paths() {
    let query_model = genomic();
    let mut query = parse_query(QUERY_XML, query_model, config()).unwrap();

    let reduced = MODEL_XML.replace(
        r#"<reference name="chromosome" referenced-type="Chromosome"/>"#,
        "",
    );
    let problems: Vec<String> = query
        .rebind(model_from(&reduced))
        .iter()
        .map(|p| p.path.clone())
        .collect();
    assert!(problems.contains(&"Gene.chromosome".to_string()));
    assert!(problems.contains(&"Gene.chromosome.identifier".to_string()));
    assert_eq!(
        query.node("Gene.chromosome").map(|n| n.kind),
        Some(NodeKind::Unresolved)
    );

    // nothing was dropped; compilation lists what to fix
    assert_eq!(query.view().len(), 4);
    let err = compile(&query).unwrap_err();
    assert!(!err.path_errors().is_empty());

    // the full model makes it whole again
    assert!(query.rebind(genomic()).is_empty());
    assert!(compile(&query).is_ok());
}
