mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;

const MAPPINGS: &str = r#"[
    {"snowflake_table": "LWS.PUBLIC.PROJECTS", "azure_csv_name": "projects",
     "raw_csv_name": "projects_raw", "cleaned_csv_name": "projects",
     "primary_key": "Scoop ID"}
]"#;

fn cloudpipe() -> Command {
    Command::cargo_bin("cloudpipe").expect("binary exists")
}

#[test]
fn sanitize_prints_identifiers_for_labels() {
    cloudpipe()
        .args(["sanitize", "Scoop ID", "scoop-id", "select", "--config-dir", "missing_dir"])
        .assert()
        .success()
        .stdout(contains("Scoop_ID"))
        .stdout(contains("scoop_id_2"))
        .stdout(contains("COL_select"));
}

#[test]
fn sanitize_reads_header_row_with_upper_case() {
    cloudpipe()
        .args(["sanitize", "--case", "upper", "-i"])
        .arg(fixture_path("projects_export.csv"))
        .assert()
        .success()
        .stdout(contains("INSTALL_DATE"))
        .stdout(contains("CONTRACT_AMOUNT"));
}

#[test]
fn match_reports_rule_and_fails_when_absent() {
    cloudpipe()
        .args(["match", "projects", "--candidates", "leads.csv,Projects.csv"])
        .assert()
        .success()
        .stdout(contains("Projects.csv\tcase_insensitive"));
    cloudpipe()
        .args(["match", "ghost", "--candidates", "leads.csv"])
        .assert()
        .failure()
        .stderr(contains("No object matches 'ghost'"));
}

#[test]
fn infer_prints_column_types() {
    cloudpipe()
        .args(["infer", "-i"])
        .arg(fixture_path("projects_export.csv"))
        .assert()
        .success()
        .stdout(contains("NUMBER(3)"))
        .stdout(contains("DATE"))
        .stdout(contains("FLOAT"))
        .stdout(contains("BOOLEAN"));
}

#[test]
fn missing_configuration_is_fatal() {
    let workspace = TestWorkspace::new();
    cloudpipe()
        .args(["sync", "--config-dir"])
        .arg(workspace.path().join("nope"))
        .assert()
        .failure()
        .stderr(contains("error: Loading configuration"));
}

#[test]
fn clean_then_sync_loads_warehouse_and_writes_summary() {
    let workspace = TestWorkspace::new();
    workspace.configure("{}", MAPPINGS);
    workspace.blob(
        "projects_raw.csv",
        "Scoop ID,Install Date,Notes\n101,2024-01-05, first \n101,2024-01-05,dup\n,,\n102,2024-02-10,\u{7}second\n",
    );

    cloudpipe()
        .args(["clean", "--config-dir", &workspace.config_arg()])
        .assert()
        .success()
        .stdout(contains("cleaned"));
    let cleaned = fs::read_to_string(workspace.blob_dir().join("projects.csv")).unwrap();
    assert_eq!(cleaned.lines().count(), 3);
    assert!(!cleaned.contains("dup"));

    let summary_path = workspace.path().join("summary.json");
    cloudpipe()
        .args(["sync", "--config-dir", &workspace.config_arg(), "--summary"])
        .arg(&summary_path)
        .assert()
        .success()
        .stdout(contains("LWS.PUBLIC.PROJECTS"))
        .stdout(contains("finished with status success"));

    let summary: Value = serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(summary["status"], "success");
    assert_eq!(summary["tables"][0]["source"], "projects.csv");
    assert_eq!(summary["tables"][0]["load"]["rows_written"], 2);

    let definition =
        fs::read_to_string(workspace.warehouse_dir().join("LWS/PUBLIC/PROJECTS.yaml")).unwrap();
    assert!(definition.contains("Install_Date"));
}

#[test]
fn sync_dry_run_prints_plan_only() {
    let workspace = TestWorkspace::new();
    workspace.configure("{}", MAPPINGS);
    workspace.blob("projects.csv", "Scoop ID\n7\n");
    cloudpipe()
        .args(["sync", "--dry-run", "--config-dir", &workspace.config_arg()])
        .assert()
        .success()
        .stdout(contains("CREATE TABLE LWS.PUBLIC.PROJECTS (\"Scoop_ID\" NUMBER(1));"));
    assert!(!workspace.warehouse_dir().exists());
}

#[test]
fn sync_fails_when_no_table_succeeds() {
    let workspace = TestWorkspace::new();
    workspace.configure("{}", MAPPINGS);
    workspace.blob("unrelated.csv", "a\n1\n");
    cloudpipe()
        .args(["sync", "--config-dir", &workspace.config_arg()])
        .assert()
        .failure()
        .stdout(contains("no source file matched"))
        .stderr(contains("Schema sync failed for every table"));
}

#[test]
fn diff_writes_comparison_csv() {
    let workspace = TestWorkspace::new();
    workspace.configure("{}", MAPPINGS);
    workspace.blob("projects.csv", "Scoop ID,Notes\n1,a\n");
    cloudpipe()
        .args(["sync", "--config-dir", &workspace.config_arg()])
        .assert()
        .success();
    workspace.blob("projects.csv", "Scoop ID,Region\n1,West\n");

    let report = workspace.path().join("diff.csv");
    cloudpipe()
        .args(["diff", "--config-dir", &workspace.config_arg(), "-o"])
        .arg(&report)
        .assert()
        .success();
    let contents = fs::read_to_string(&report).unwrap();
    assert!(contents.contains("\"Scoop_ID\",\"MATCH\""));
    assert!(contents.contains("\"Notes\",\"EXTRA_IN_TARGET\""));
    assert!(contents.contains("\"Region\",\"MISSING_IN_TARGET\""));
}

#[test]
fn extract_without_sources_is_a_no_op() {
    let workspace = TestWorkspace::new();
    workspace.configure("{}", MAPPINGS);
    cloudpipe()
        .args(["extract", "--config-dir", &workspace.config_arg()])
        .assert()
        .success()
        .stdout(contains("source").not());
}

#[test]
fn extract_reads_file_sources_into_store() {
    let workspace = TestWorkspace::new();
    workspace.configure("{}", MAPPINGS);
    let records = workspace.write(
        "records.json",
        r#"{"data": [{"Scoop ID": 5, "Install Date": "2024-05-01"}]}"#,
    );
    workspace.write(
        "config_files/sources.json",
        &format!(
            r#"[{{"name": "projects", "url": "file://{}", "records_pointer": "/data"}}]"#,
            records.display()
        ),
    );
    cloudpipe()
        .args(["extract", "--config-dir", &workspace.config_arg()])
        .assert()
        .success()
        .stdout(contains("projects_raw.csv"));
    assert!(workspace.blob_dir().join("projects_raw.csv").exists());
}
