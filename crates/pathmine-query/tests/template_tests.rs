//! Templates: materialization, batch counting and the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pathmine_model::{KeyDefinitions, Model};
use pathmine_query::compile::{ConstraintNode, ConstraintTest};
use pathmine_query::template::TemplateNodeMap;
use pathmine_query::*;

const MODEL_XML: &str = include_str!("../../../testdata/model.xml");
const KEYS: &str = include_str!("../../../testdata/keys.properties");
const TEMPLATES_XML: &str = include_str!("../../../testdata/templates.xml");

fn genomic() -> Arc<Model> {
    Arc::new(
        Model::from_xml(MODEL_XML)
            .unwrap()
            .with_keys(KeyDefinitions::parse(KEYS).unwrap())
            .unwrap(),
    )
}

/// Genes of an organism above a length; both constraints editable.
fn gene_template() -> Template {
    let mut q = PathQuery::new(genomic());
    q.add_to_view("Gene.symbol").unwrap();
    let a = q
        .add_constraint(
            "Gene.organism.name",
            ConstraintOp::Eq,
            ConstraintValue::literal("Drosophila melanogaster"),
        )
        .unwrap();
    let b = q
        .add_constraint("Gene.length", ConstraintOp::Gt, ConstraintValue::literal("0"))
        .unwrap();
    q.set_editable(&a, true).unwrap();
    q.set_editable(&b, true).unwrap();
    Template::new("geneTemplate", q).with_title("Genes by organism")
}

/// Single editable `Gene.symbol = ?` template.
fn symbol_template(name: &str) -> Template {
    let mut q = PathQuery::new(genomic());
    q.add_to_view("Gene.identifier").unwrap();
    let a = q
        .add_constraint("Gene.symbol", ConstraintOp::Eq, ConstraintValue::literal("dpp"))
        .unwrap();
    q.set_editable(&a, true).unwrap();
    Template::new(name, q)
}

/// Store that answers every query with a fixed number of rows and keeps
/// what it was asked.
struct RecordingStore {
    rows: usize,
    seen: Mutex<Vec<ExecutableQuery>>,
}

impl RecordingStore {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl ObjectStore for RecordingStore {
    fn execute(
        &self,
        query: &ExecutableQuery,
        _limits: &ExecutionLimits,
    ) -> Result<ResultSet, ExecutionError> {
        self.seen.lock().push(query.clone());
        Ok(ResultSet {
            columns: query.view_strings(),
            rows: vec![vec![ResultValue::Null; query.columns.len()]; self.rows],
        })
    }
}

// ============================================================================
// Materialization
// ============================================================================

#[test]
fn test_arity_must_match_editable_constraints() {
    let template = gene_template();
    assert_eq!(template.editable_count(), 2);

    let err = template
        .materialize(&[TemplateValue::equals("Homo sapiens")])
        .unwrap_err();
    assert_eq!(
        err,
        TemplateError::ArityMismatch {
            template: "geneTemplate".into(),
            expected: 2,
            actual: 1,
        }
    );
}

#[test]
fn test_count_matches_hand_built_query() {
    let template = gene_template();
    let store = RecordingStore::new(7);
    let values = [
        TemplateValue::equals("Homo sapiens"),
        TemplateValue::new(ConstraintOp::Ge, "1000"),
    ];
    assert_eq!(template.count(&values, &store).unwrap(), 7);

    let mut by_hand = PathQuery::new(genomic());
    by_hand.add_to_view("Gene.symbol").unwrap();
    by_hand
        .add_constraint("Gene.organism.name", ConstraintOp::Eq, ConstraintValue::literal("Homo sapiens"))
        .unwrap();
    by_hand
        .add_constraint("Gene.length", ConstraintOp::Ge, ConstraintValue::literal("1000"))
        .unwrap();

    let seen = store.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], compile(&by_hand).unwrap());
}

#[test]
fn test_materialize_leaves_template_untouched() {
    let template = gene_template();
    let before = template.query().constraints().iter().map(|(_, c)| (*c).clone()).collect::<Vec<_>>();

    let q = template
        .materialize(&[
            TemplateValue::equals("Homo sapiens"),
            TemplateValue::new(ConstraintOp::Lt, "500"),
        ])
        .unwrap();
    let (_, b) = q.constraint_by_code("B").unwrap();
    assert_eq!(b.op, ConstraintOp::Lt);
    assert_eq!(b.value, ConstraintValue::literal("500"));
    // editable flag and identifier survive
    assert!(b.editable);
    assert_eq!(b.identifier.as_deref(), Some("Gene.length.1"));

    let after = template.query().constraints().iter().map(|(_, c)| (*c).clone()).collect::<Vec<_>>();
    assert_eq!(before, after);
}

#[test]
fn test_illegal_value_applies_nothing() {
    let template = gene_template();
    let err = template
        .materialize(&[
            TemplateValue::equals("Homo sapiens"),
            TemplateValue::new(ConstraintOp::Contains, "00"),
        ])
        .unwrap_err();
    assert!(matches!(err, TemplateError::Query { .. }));
    let (_, a) = template.query().constraint_by_code("A").unwrap();
    assert_eq!(a.value, ConstraintValue::literal("Drosophila melanogaster"));
}

#[test]
fn test_identifiers_number_constraints_per_node() {
    let mut q = PathQuery::new(genomic());
    q.add_to_view("Gene.symbol").unwrap();
    let a = q
        .add_constraint("Gene.length", ConstraintOp::Gt, ConstraintValue::literal("0"))
        .unwrap();
    let b = q
        .add_constraint("Gene.length", ConstraintOp::Lt, ConstraintValue::literal("100000"))
        .unwrap();
    let c = q
        .add_constraint("Gene.symbol", ConstraintOp::Ne, ConstraintValue::literal("w"))
        .unwrap();
    q.set_editable(&a, true).unwrap();
    q.set_editable(&b, true).unwrap();

    let template = Template::new("lengthRange", q);
    let identifier = |code: &str| {
        template
            .query()
            .constraint_by_code(code)
            .and_then(|(_, c)| c.identifier.clone())
    };
    assert_eq!(identifier(&a).as_deref(), Some("Gene.length.1"));
    assert_eq!(identifier(&b).as_deref(), Some("Gene.length.2"));
    // not editable, no identifier
    assert_eq!(identifier(&c), None);
    assert_eq!(template.query().name(), Some("lengthRange"));
}

#[test]
fn test_concurrent_materialization() {
    let template = gene_template();
    let organisms = [
        "Drosophila melanogaster",
        "Homo sapiens",
        "Mus musculus",
        "Danio rerio",
        "Caenorhabditis elegans",
        "Saccharomyces cerevisiae",
    ];

    std::thread::scope(|s| {
        for (i, organism) in organisms.iter().enumerate() {
            let template = &template;
            s.spawn(move || {
                for round in 0..20 {
                    let min = (i * 100 + round).to_string();
                    let q = template
                        .materialize(&[
                            TemplateValue::equals(*organism),
                            TemplateValue::new(ConstraintOp::Gt, min.clone()),
                        ])
                        .unwrap();
                    let (_, a) = q.constraint_by_code("A").unwrap();
                    let (_, b) = q.constraint_by_code("B").unwrap();
                    assert_eq!(a.value, ConstraintValue::literal(*organism));
                    assert_eq!(b.value, ConstraintValue::literal(min));
                }
            });
        }
    });

    let (_, a) = template.query().constraint_by_code("A").unwrap();
    assert_eq!(a.value, ConstraintValue::literal("Drosophila melanogaster"));
}

// ============================================================================
// Batch counting
// ============================================================================

#[test]
fn test_batch_isolates_failures() {
    let good = symbol_template("bySymbol");
    let wrong_arity = gene_template();
    let mut q = PathQuery::new(genomic());
    q.add_to_view("Gene.symbol").unwrap();
    let a = q
        .add_constraint("Gene.length", ConstraintOp::Eq, ConstraintValue::literal("0"))
        .unwrap();
    q.set_editable(&a, true).unwrap();
    let bad_value = Template::new("byLength", q);

    let store = RecordingStore::new(3);
    let outcomes = count_templates(
        vec![
            (&good, vec![TemplateValue::equals("eve")]),
            (&wrong_arity, vec![TemplateValue::equals("Homo sapiens")]),
            (&bad_value, vec![TemplateValue::equals("very long")]),
        ],
        &store,
        &ExecutionLimits::unlimited(),
    );

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes["bySymbol"], CountOutcome::Counted(3));
    assert!(matches!(
        outcomes["geneTemplate"],
        CountOutcome::Skipped(TemplateError::ArityMismatch { .. })
    ));
    assert!(matches!(
        outcomes["byLength"],
        CountOutcome::Failed(TemplateError::Compile { .. })
    ));
    assert_eq!(outcomes["byLength"].count(), None);
    // only the good template reached the store
    assert_eq!(store.seen.lock().len(), 1);

    let json = serde_json::to_value(&outcomes).unwrap();
    assert_eq!(json["bySymbol"]["outcome"], "counted");
    assert_eq!(json["bySymbol"]["detail"], 3);
    assert_eq!(json["geneTemplate"]["outcome"], "skipped");
    assert!(json["geneTemplate"]["detail"]
        .as_str()
        .unwrap()
        .contains("2 editable constraints"));
}

struct Object {
    classes: Vec<String>,
    attributes: BTreeMap<String, Value>,
}

impl ObjectView for Object {
    fn classes(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn attribute(&self, field: &str) -> Option<Value> {
        self.attributes.get(field).cloned()
    }
}

#[test]
fn test_object_counts_fill_values_from_the_object() {
    let registry = TemplateRegistry::new();
    registry.publish(Scope::Global, symbol_template("geneBySymbol"));
    registry.publish(Scope::Global, gene_template());

    let mut mapping = TemplateNodeMap::new();
    // mapped on the superclass; reached through Gene's ancestors
    mapping
        .entry("BioEntity".into())
        .or_default()
        .insert("geneBySymbol".into(), vec![Path::new("Gene.symbol")]);
    mapping.entry("Gene".into()).or_default().insert(
        "geneTemplate".into(),
        vec![Path::new("Gene.organism.name"), Path::new("Gene.length")],
    );
    mapping
        .entry("Gene".into())
        .or_default()
        .insert("retired".into(), vec![Path::new("Gene.symbol")]);

    let gene = Object {
        classes: vec!["Gene".into()],
        attributes: BTreeMap::from([("symbol".to_string(), Value::String("dpp".into()))]),
    };
    let store = RecordingStore::new(1);
    let model = genomic();
    let outcomes = object_template_counts(
        &gene,
        &model,
        &mapping,
        &registry,
        &store,
        &ExecutionLimits::unlimited(),
    );

    assert_eq!(outcomes["geneBySymbol"], CountOutcome::Counted(1));
    assert!(matches!(
        outcomes["geneTemplate"],
        CountOutcome::Skipped(TemplateError::MissingObjectValue { .. })
    ));
    assert!(matches!(
        outcomes["retired"],
        CountOutcome::Failed(TemplateError::NotFound(_))
    ));

    let seen = store.seen.lock();
    assert_eq!(seen.len(), 1);
    let Some(ConstraintNode::Leaf(leaf)) = &seen[0].constraints else {
        panic!("expected one leaf");
    };
    let ConstraintTest::Compare { value, .. } = &leaf.test else {
        panic!("expected a comparison");
    };
    assert_eq!(value, &Value::String("dpp".into()));
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_user_templates_shadow_global_ones() {
    let registry = TemplateRegistry::new();
    assert!(registry
        .publish(Scope::Global, symbol_template("shared"))
        .is_none());
    registry.publish(Scope::User, gene_template());
    let replaced = registry.publish(Scope::User, Template::new("shared", gene_template().query().clone()));
    assert!(replaced.is_none());

    let found = registry.find_template("shared", Scope::All).unwrap();
    assert_eq!(found.editable_count(), 2);
    let global = registry.find_template("shared", Scope::Global).unwrap();
    assert_eq!(global.editable_count(), 1);
    assert!(registry.find_template("geneTemplate", Scope::Global).is_none());

    assert_eq!(registry.names(Scope::All), vec!["geneTemplate", "shared"]);
    assert_eq!(registry.names(Scope::Global), vec!["shared"]);

    assert!(registry.unpublish(Scope::User, "shared").is_some());
    assert_eq!(
        registry.find_template("shared", Scope::All).unwrap().editable_count(),
        1
    );
    assert_eq!("user".parse::<Scope>(), Ok(Scope::User));
    assert!("team".parse::<Scope>().is_err());
}

#[test]
fn test_registry_loads_template_documents() {
    let registry = TemplateRegistry::new();
    let loaded = registry
        .load_xml(
            TEMPLATES_XML,
            Scope::Global,
            genomic(),
            Arc::new(EngineConfig::default()),
        )
        .unwrap();
    assert_eq!(loaded, 3);
    assert_eq!(
        registry.names(Scope::Global),
        vec!["employeesInDepartment", "geneByOrganism", "organismGenes"]
    );

    let template = registry.find_template("geneByOrganism", Scope::All).unwrap();
    assert_eq!(template.title(), Some("Genes in an organism"));
    assert_eq!(
        template.description(),
        Some("Genes of one organism, longer than a threshold")
    );
    assert_eq!(template.editable_count(), 2);
    let (_, a) = template.query().constraint_by_code("A").unwrap();
    assert_eq!(a.description.as_deref(), Some("Organism"));
    assert_eq!(a.identifier.as_deref(), Some("Gene.organism.name.1"));
}
