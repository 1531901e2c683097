use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../testdata")
        .join(name)
}

fn pathmine(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pathmine"))
        .arg("--model")
        .arg(testdata("model.xml"))
        .arg("--keys")
        .arg(testdata("keys.properties"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("run pathmine")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn resolve_prints_each_step() {
    let out = pathmine(&["resolve", "Gene.organism.name", "Department.employees[Manager].title"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("Gene.organism"));
    assert!(text.contains("reference"));
    assert!(text.contains("java.lang.String"));
}

#[test]
fn resolve_fails_on_bad_path() {
    let out = pathmine(&["resolve", "Gene.colour"]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("colour"));
}

#[test]
fn run_prints_sorted_table() {
    let query = testdata("query.xml");
    let objects = testdata("objects.json");
    let out = pathmine(&[
        "run",
        query.to_str().unwrap(),
        "--objects",
        objects.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    let w = text.find("FBgn0003996").unwrap();
    let dpp = text.find("FBgn0000490").unwrap();
    let eve = text.find("FBgn0000606").unwrap();
    assert!(w < dpp && dpp < eve, "sorted by length descending:\n{text}");
    assert!(text.contains("3 row(s)"));
}

#[test]
fn run_json_respects_row_cap() {
    let query = testdata("query.xml");
    let objects = testdata("objects.json");
    let out = pathmine(&[
        "run",
        query.to_str().unwrap(),
        "--objects",
        objects.to_str().unwrap(),
        "--format",
        "json",
        "--max-rows",
        "1",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["rows"].as_array().unwrap().len(), 1);
    assert_eq!(json["rows"][0][0], "w");
}

#[test]
fn count_uses_saved_values_and_explicit_ones() {
    let templates = testdata("templates.xml");
    let objects = testdata("objects.json");
    let out = pathmine(&[
        "count",
        templates.to_str().unwrap(),
        "--objects",
        objects.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["geneByOrganism"]["detail"], 3);
    assert_eq!(json["employeesInDepartment"]["detail"], 4);
    assert_eq!(json["organismGenes"]["detail"], 1);

    let out = pathmine(&[
        "count",
        templates.to_str().unwrap(),
        "--objects",
        objects.to_str().unwrap(),
        "--template",
        "geneByOrganism",
        "--value",
        "Drosophila melanogaster",
        "--value",
        ">:2000",
        "--format",
        "json",
    ]);
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["geneByOrganism"]["outcome"], "counted");
    assert_eq!(json["geneByOrganism"]["detail"], 2);
}

#[test]
fn config_file_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{ "max_rows": 2 }"#).unwrap();

    let query = testdata("query.xml");
    let objects = testdata("objects.json");
    let out = pathmine(&[
        "--config",
        config.to_str().unwrap(),
        "run",
        query.to_str().unwrap(),
        "--objects",
        objects.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("2 row(s)"));
}

#[test]
fn snapshot_and_export() {
    let query = testdata("query.xml");
    let out = pathmine(&["snapshot", query.to_str().unwrap(), "--browse", "Gene.organism"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["view_strings"][0], "Gene.symbol");
    assert_eq!(json["navigation"][0][0], "Gene");
    assert_eq!(json["navigation_paths"][1][1], "Organism");

    let out = pathmine(&["export", query.to_str().unwrap()]);
    assert!(out.status.success());
    let xml = stdout(&out);
    assert!(xml.contains(r#"name="flyGenes""#));
    assert!(xml.contains(r#"sortOrder="Gene.length desc""#));
}

#[test]
fn validate_reports_clean_query() {
    let query = testdata("query.xml");
    let out = pathmine(&["validate", query.to_str().unwrap()]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("query is valid"));
}
