//! Compilation of query graphs into slot/join plans.

use std::sync::Arc;

use pathmine_model::{AttributeType, ClassDescriptor, FieldDescriptor, KeyDefinitions, Model};
use pathmine_query::compile::{ConstraintNode, ConstraintTest, JoinKind, Target};
use pathmine_query::*;

const MODEL_XML: &str = include_str!("../../../testdata/model.xml");
const KEYS: &str = include_str!("../../../testdata/keys.properties");

fn genomic() -> Arc<Model> {
    Arc::new(
        Model::from_xml(MODEL_XML)
            .unwrap()
            .with_keys(KeyDefinitions::parse(KEYS).unwrap())
            .unwrap(),
    )
}

fn query() -> PathQuery {
    PathQuery::new(genomic())
}

fn code(node: &ConstraintNode) -> &str {
    match node {
        ConstraintNode::Leaf(c) => &c.code,
        other => panic!("expected a leaf, got {other:?}"),
    }
}

// ============================================================================
// Slots and joins
// ============================================================================

#[test]
fn test_shared_prefix_allocates_one_slot() {
    let mut q = query();
    q.add_to_view("Gene.organism.name").unwrap();
    q.add_to_view("Gene.organism.taxonId").unwrap();

    let compiled = compile(&q).unwrap();
    assert_eq!(compiled.root, "Gene");
    assert_eq!(compiled.slots.len(), 2);
    assert_eq!(compiled.columns[0].target.slot(), compiled.columns[1].target.slot());

    let organism = compiled.slot("Gene.organism").unwrap();
    assert_eq!(compiled.columns[0].target.slot(), organism.id);
    assert_eq!(organism.class, "Organism");
    let join = organism.join.as_ref().unwrap();
    assert_eq!(join.parent, compiled.slot("Gene").unwrap().id);
    assert_eq!(join.field, "organism");
    assert_eq!(join.kind, JoinKind::Reference);

    assert_eq!(
        compiled.columns[1].target,
        Target::Field {
            slot: organism.id,
            field: "taxonId".into(),
            ty: AttributeType::Integer,
        }
    );
}

#[test]
fn test_parents_precede_children() {
    let mut q = query();
    q.add_to_view("Gene.proteins.organism.name").unwrap();
    q.add_to_view("Gene.symbol").unwrap();

    let compiled = compile(&q).unwrap();
    for (slot, join) in compiled.joins() {
        assert!(join.parent < slot.id, "{} joins a later slot", slot.path);
    }
    assert_eq!(
        compiled.slot("Gene.proteins").unwrap().join.as_ref().unwrap().kind,
        JoinKind::Collection
    );
}

#[test]
fn test_narrowed_path_refines_the_shared_slot() {
    let mut q = query();
    q.add_to_view("Department.employees.name").unwrap();
    q.add_to_view("Department.employees[Manager].title").unwrap();

    let compiled = compile(&q).unwrap();
    assert_eq!(compiled.slots.len(), 2);
    assert_eq!(compiled.slot("Department.employees").unwrap().class, "Manager");
    assert_eq!(
        compiled.view_strings(),
        vec!["Department.employees.name", "Department.employees[Manager].title"]
    );
}

#[test]
fn test_bare_subclass_segment_refines_the_shared_slot() {
    let mut q = query();
    q.add_to_view("Department.employees.name").unwrap();
    q.add_to_view("Department.employees.CEO.salary").unwrap();

    let compiled = compile(&q).unwrap();
    assert_eq!(compiled.slots.len(), 2);
    assert_eq!(compiled.slot("Department.employees").unwrap().class, "CEO");
}

#[test]
fn test_sibling_narrowings_conflict() {
    let mut q = query();
    q.add_to_view("Synonym.subject[Gene].symbol").unwrap();
    q.add_to_view("Synonym.subject[Protein].primaryAccession").unwrap();

    assert_eq!(
        compile(&q).unwrap_err(),
        CompileError::ConflictingNarrowing {
            path: "Synonym.subject".into(),
            first: "Gene".into(),
            second: "Protein".into(),
        }
    );
}

#[test]
fn test_object_columns_target_the_object() {
    let config = EngineConfig::default().with_object_view(ObjectViewPolicy::SelectObject);
    let mut q = PathQuery::with_config(genomic(), Arc::new(config));
    q.add_to_view("Gene.organism").unwrap();

    let compiled = compile(&q).unwrap();
    let organism = compiled.slot("Gene.organism").unwrap().id;
    assert_eq!(compiled.columns[0].target, Target::Object { slot: organism });
}

#[test]
fn test_sort_on_unselected_path() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_sort("Gene.length", Direction::Desc).unwrap();

    let compiled = compile(&q).unwrap();
    assert_eq!(compiled.columns.len(), 1);
    assert_eq!(
        compiled.sort_strings(),
        vec![("Gene.length".to_string(), Direction::Desc)]
    );
    assert_eq!(
        compiled.order_by[0].target,
        Target::Field {
            slot: 0,
            field: "length".into(),
            ty: AttributeType::Integer,
        }
    );
}

// ============================================================================
// Constraints
// ============================================================================

#[test]
fn test_literal_values_are_typed() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.length", ConstraintOp::Gt, ConstraintValue::literal("1,000"))
        .unwrap();

    let compiled = compile(&q).unwrap();
    let Some(ConstraintNode::Leaf(leaf)) = &compiled.constraints else {
        panic!("expected one leaf: {:?}", compiled.constraints);
    };
    assert_eq!(leaf.code, "A");
    assert_eq!(
        leaf.test,
        ConstraintTest::Compare {
            slot: 0,
            field: "length".into(),
            op: ConstraintOp::Gt,
            value: Value::Integer(1000),
        }
    );
}

#[test]
fn test_invalid_literal_is_reported() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.length", ConstraintOp::Eq, ConstraintValue::literal("long"))
        .unwrap();

    match compile(&q).unwrap_err() {
        CompileError::InvalidValue { path, value, .. } => {
            assert_eq!(path, "Gene.length");
            assert_eq!(value, "long");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_reference_null_check_reads_the_parent() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.chromosome", ConstraintOp::IsNotNull, ConstraintValue::None)
        .unwrap();

    let compiled = compile(&q).unwrap();
    // no join to Chromosome
    assert_eq!(compiled.slots.len(), 1);
    let Some(ConstraintNode::Leaf(leaf)) = &compiled.constraints else {
        panic!("expected one leaf");
    };
    assert_eq!(
        leaf.test,
        ConstraintTest::Null {
            slot: 0,
            field: "chromosome".into(),
            is_null: false,
        }
    );
}

#[test]
fn test_lookup_uses_key_attributes() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.organism", ConstraintOp::Lookup, ConstraintValue::literal("9606"))
        .unwrap();

    let compiled = compile(&q).unwrap();
    let Some(ConstraintNode::Leaf(leaf)) = &compiled.constraints else {
        panic!("expected one leaf");
    };
    let ConstraintTest::Lookup { slot, fields, value } = &leaf.test else {
        panic!("expected a lookup: {:?}", leaf.test);
    };
    assert_eq!(*slot, compiled.slot("Gene.organism").unwrap().id);
    assert_eq!(fields, &vec!["taxonId".to_string(), "name".to_string()]);
    assert_eq!(value, "9606");
}

#[test]
fn test_lookup_without_keys_fails() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.synonyms", ConstraintOp::Lookup, ConstraintValue::literal("dpp"))
        .unwrap();

    assert_eq!(
        compile(&q).unwrap_err(),
        CompileError::NoLookupKeys {
            path: "Gene.synonyms".into(),
            class: "Synonym".into(),
        }
    );
}

#[test]
fn test_object_in_list_takes_ids() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene", ConstraintOp::In, ConstraintValue::list(["20", "23"]))
        .unwrap();
    let compiled = compile(&q).unwrap();
    let Some(ConstraintNode::Leaf(leaf)) = &compiled.constraints else {
        panic!("expected one leaf");
    };
    assert_eq!(
        leaf.test,
        ConstraintTest::InList {
            slot: 0,
            field: None,
            values: vec![Value::Integer(20), Value::Integer(23)],
            negated: false,
        }
    );

    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene", ConstraintOp::NotIn, ConstraintValue::list(["dpp"]))
        .unwrap();
    assert!(matches!(
        compile(&q).unwrap_err(),
        CompileError::InvalidValue { .. }
    ));
}

#[test]
fn test_loop_compiles_to_slot_comparison() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint(
        "Gene.organism",
        ConstraintOp::Eq,
        ConstraintValue::path("Gene.proteins.organism"),
    )
    .unwrap();

    let compiled = compile(&q).unwrap();
    let Some(ConstraintNode::Leaf(leaf)) = &compiled.constraints else {
        panic!("expected one leaf");
    };
    assert_eq!(
        leaf.test,
        ConstraintTest::Loop {
            slot: compiled.slot("Gene.organism").unwrap().id,
            other: compiled.slot("Gene.proteins.organism").unwrap().id,
            equal: true,
        }
    );
    assert_eq!(leaf.test.max_slot(), compiled.slots.len() - 1);
}

#[test]
fn test_constraint_tree_follows_logic() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.symbol", ConstraintOp::Eq, ConstraintValue::literal("dpp"))
        .unwrap();
    q.add_constraint("Gene.symbol", ConstraintOp::Eq, ConstraintValue::literal("eve"))
        .unwrap();
    q.add_constraint("Gene.length", ConstraintOp::Gt, ConstraintValue::literal("1000"))
        .unwrap();
    q.set_constraint_logic("(A or B) and C").unwrap();

    let compiled = compile(&q).unwrap();
    let Some(ConstraintNode::And(parts)) = &compiled.constraints else {
        panic!("expected a conjunction: {:?}", compiled.constraints);
    };
    assert_eq!(parts.len(), 2);
    let ConstraintNode::Or(alternatives) = &parts[0] else {
        panic!("expected a disjunction: {:?}", parts[0]);
    };
    let codes: Vec<&str> = alternatives.iter().map(code).collect();
    assert_eq!(codes, vec!["A", "B"]);
    assert_eq!(code(&parts[1]), "C");
    assert_eq!(compiled.constraints.as_ref().unwrap().conjuncts().len(), 2);
}

#[test]
fn test_no_constraints_no_tree() {
    let mut q = query();
    q.add_to_view("Gene.symbol").unwrap();
    assert_eq!(compile(&q).unwrap().constraints, None);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_empty_view_is_rejected() {
    let mut q = query();
    q.add_constraint("Gene.symbol", ConstraintOp::Eq, ConstraintValue::literal("dpp"))
        .unwrap();
    assert_eq!(compile(&q).unwrap_err(), CompileError::EmptyView);
}

#[test]
fn test_every_bad_path_is_listed() {
    let xml = r#"
        <query name="stale" model="genomic" view="Gene.symbol Gene.colour Gene.organism.planet">
          <constraint path="Gene.bogus" op="=" value="x" code="A"/>
        </query>"#;
    let q = parse_query(xml, genomic(), Arc::new(EngineConfig::default())).unwrap();

    let err = compile(&q).unwrap_err();
    let paths: Vec<&str> = err.path_errors().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["Gene.colour", "Gene.organism.planet", "Gene.bogus"]);
    assert!(err.to_string().contains("Gene.organism.planet"));
}

#[test]
fn test_constraint_made_illegal_by_model_change() {
    let tiny = Arc::new(
        Model::new(
            "genomic",
            None,
            vec![ClassDescriptor::new("Gene")
                .field(FieldDescriptor::attribute("symbol", AttributeType::String))
                .field(FieldDescriptor::attribute("length", AttributeType::String))],
        )
        .unwrap(),
    );
    let mut q = PathQuery::new(tiny);
    q.add_to_view("Gene.symbol").unwrap();
    q.add_constraint("Gene.length", ConstraintOp::Contains, ConstraintValue::literal("00"))
        .unwrap();
    compile(&q).unwrap();

    // length becomes an integer: CONTAINS no longer applies
    assert!(q.rebind(genomic()).is_empty());
    match compile(&q).unwrap_err() {
        CompileError::IllegalConstraint { path, code, .. } => {
            assert_eq!(path, "Gene.length");
            assert_eq!(code, "A");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_loop_made_illegal_by_model_change() {
    let flat = Arc::new(
        Model::new(
            "genomic",
            None,
            vec![
                ClassDescriptor::new("Employee")
                    .field(FieldDescriptor::attribute("name", AttributeType::String)),
                ClassDescriptor::new("Department")
                    .field(FieldDescriptor::attribute("name", AttributeType::String))
                    .field(FieldDescriptor::reference("manager", "Employee"))
                    .field(FieldDescriptor::collection("employees", "Employee")),
            ],
        )
        .unwrap(),
    );
    let mut q = PathQuery::new(flat);
    q.add_to_view("Department.name").unwrap();
    q.add_constraint(
        "Department.manager",
        ConstraintOp::Eq,
        ConstraintValue::path("Department.employees"),
    )
    .unwrap();
    compile(&q).unwrap();

    // the manager reference now points at a subclass of Employee
    assert!(q.rebind(genomic()).is_empty());
    match compile(&q).unwrap_err() {
        CompileError::IllegalConstraint { path, code, .. } => {
            assert_eq!(path, "Department.manager");
            assert_eq!(code, "A");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let mut q = query();
    q.add_to_view("Gene.organism.name").unwrap();
    q.add_to_view("Gene.proteins.primaryAccession").unwrap();
    q.add_constraint("Gene.length", ConstraintOp::Ge, ConstraintValue::literal("100"))
        .unwrap();
    assert_eq!(compile(&q).unwrap(), compile(&q).unwrap());
}

#[test]
fn test_plan_serializes() {
    let mut q = query();
    q.add_to_view("Gene.organism.name").unwrap();
    q.add_constraint("Gene.organism.taxonId", ConstraintOp::Eq, ConstraintValue::literal("7227"))
        .unwrap();

    let json = serde_json::to_value(compile(&q).unwrap()).unwrap();
    assert_eq!(json["slots"][1]["join"]["kind"], "reference");
    assert_eq!(json["columns"][0]["target"]["target"], "field");
    assert_eq!(json["constraints"]["leaf"]["test"]["test"], "compare");
}
