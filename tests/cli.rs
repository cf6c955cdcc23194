/// End-to-end tests driving the `pkgsizer` binary against fixture environments.
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

/// Install a fake distribution with sparse files of the given sizes and a dist-info
/// directory whose RECORD lists them.
fn install(site: &Path, name: &str, requires: &[&str], files: &[(&str, u64)]) {
    let mut record = Vec::new();
    for (file, bytes) in files {
        let relative = format!("{}/{}", name, file);
        let path = site.join(&relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::File::create(&path).unwrap().set_len(*bytes).unwrap();
        record.push(format!("{},,", relative));
    }

    let info = site.join(format!("{}-1.0.dist-info", name));
    fs::create_dir_all(&info).unwrap();
    let mut metadata = format!("Metadata-Version: 2.1\nName: {}\nVersion: 1.0\n", name);
    for requirement in requires {
        metadata.push_str(&format!("Requires-Dist: {}\n", requirement));
    }
    fs::write(info.join("METADATA"), metadata).unwrap();
    fs::write(info.join("RECORD"), record.join("\n")).unwrap();
    fs::write(info.join("top_level.txt"), name).unwrap();
}

/// a -> b -> c with 10MB/5, 20MB/3 and 30MB/2 files.
fn chain_site() -> TempDir {
    let site = TempDir::new().unwrap();
    install(
        site.path(),
        "a",
        &["b"],
        &[("1", 2 * MB), ("2", 2 * MB), ("3", 2 * MB), ("4", 2 * MB), ("5", 2 * MB)],
    );
    install(site.path(), "b", &["c"], &[("1", 10 * MB), ("2", 5 * MB), ("3", 5 * MB)]);
    install(site.path(), "c", &[], &[("1", 15 * MB), ("2", 15 * MB)]);
    site
}

fn pkgsizer(workdir: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("pkgsizer");
    cmd.current_dir(workdir).env_remove("VIRTUAL_ENV").env_remove("RUST_LOG");
    cmd
}

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is a JSON document")
}

#[test]
fn test_scan_chain_depth_and_totals() {
    let site = chain_site();
    let output = pkgsizer(site.path())
        .args(["scan-env", "--depth", "2", "--by", "name", "--json", "-"])
        .arg("--site-packages")
        .arg(site.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = json_stdout(&output.stdout);
    assert_eq!(report["schema_version"], "1.0");
    assert_eq!(report["total_size_bytes"], 60 * MB);
    assert_eq!(report["total_files"], 10);
    assert_eq!(report["truncated"], false);

    let packages = report["packages"].as_array().unwrap();
    let summary: Vec<(&str, u64, bool, Vec<&str>)> = packages
        .iter()
        .map(|p| {
            (
                p["name"].as_str().unwrap(),
                p["depth"].as_u64().unwrap(),
                p["direct"].as_bool().unwrap(),
                p["parents"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|parent| parent.as_str().unwrap())
                    .collect(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        [
            ("a", 0, true, vec![]),
            ("b", 1, false, vec!["a"]),
            ("c", 2, false, vec!["b"]),
        ]
    );
}

#[test]
fn test_table_output() {
    let site = chain_site();
    pkgsizer(site.path())
        .arg("scan-env")
        .arg("--site-packages")
        .arg(site.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Package"))
        .stdout(predicate::str::contains("30.0 MiB"))
        .stdout(predicate::str::contains("Total: 60.0 MiB in 10 files across 3 packages"));
}

#[test]
fn test_fail_over_threshold() {
    let site = chain_site();
    pkgsizer(site.path())
        .args(["scan-env", "--fail-over", "50MB"])
        .arg("--site-packages")
        .arg(site.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("exceeds the limit"));

    pkgsizer(site.path())
        .args(["scan-env", "--fail-over", "100MB"])
        .arg("--site-packages")
        .arg(site.path())
        .assert()
        .code(0);
}

#[test]
fn test_invalid_threshold_is_an_error() {
    let site = chain_site();
    pkgsizer(site.path())
        .args(["scan-env", "--fail-over", "fifty"])
        .arg("--site-packages")
        .arg(site.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[pkgsizer error]"))
        .stderr(predicate::str::contains("Invalid size threshold"));
}

#[test]
fn test_json_is_stable_across_runs() {
    let site = chain_site();
    let run = || {
        let output = pkgsizer(site.path())
            .args(["scan-env", "--include-deps", "--module-depth", "2", "--json", "-"])
            .arg("--site-packages")
            .arg(site.path())
            .output()
            .unwrap();
        assert!(output.status.success());
        let mut report = json_stdout(&output.stdout);
        report.as_object_mut().unwrap().remove("generated_at");
        serde_json::to_string(&report).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_json_and_html_files() {
    let site = chain_site();
    let out = TempDir::new().unwrap();
    let json = out.path().join("report.json");
    let html = out.path().join("report.html");
    pkgsizer(out.path())
        .arg("scan-env")
        .arg("--site-packages")
        .arg(site.path())
        .arg("--json")
        .arg(&json)
        .arg("--html")
        .arg(&html)
        .assert()
        .success()
        .stderr(predicate::str::contains("JSON report written to"));

    let report: Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(report["package_count"], 3);
    let page = fs::read_to_string(&html).unwrap();
    assert!(page.starts_with("<!DOCTYPE html>"));
    assert!(page.contains("<svg"));
}

#[test]
fn test_analyze_file_roots() {
    let site = chain_site();
    let project = TempDir::new().unwrap();
    let requirements = project.path().join("requirements.txt");
    fs::write(&requirements, "# deps\nB>=0.5\n").unwrap();

    let output = pkgsizer(project.path())
        .arg("analyze-file")
        .arg(&requirements)
        .arg("--site-packages")
        .arg(site.path())
        .args(["--json", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report = json_stdout(&output.stdout);
    assert_eq!(report["package_count"], 2);
    assert_eq!(report["total_size_bytes"], 50 * MB);
}

#[test]
fn test_why_terminates_on_a_cycle() {
    let site = TempDir::new().unwrap();
    install(site.path(), "a", &["b"], &[("m.py", 100)]);
    install(site.path(), "b", &["a"], &[("m.py", 200)]);

    let output = pkgsizer(site.path())
        .args(["why", "b", "--json", "-"])
        .arg("--site-packages")
        .arg(site.path())
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success());
    let report = json_stdout(&output.stdout);
    let paths = report["paths"].as_array().unwrap();
    assert_eq!(paths.len(), 1);
    let names: Vec<&str> = paths[0]["packages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|step| step["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["a", "b"]);

    pkgsizer(site.path())
        .args(["why", "b"])
        .arg("--site-packages")
        .arg(site.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Dependency paths (1)"));
}

#[test]
fn test_why_unknown_package() {
    let site = chain_site();
    pkgsizer(site.path())
        .args(["why", "nope"])
        .arg("--site-packages")
        .arg(site.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("`nope` is not installed"));
}

#[test]
fn test_unused_detection() {
    let site = TempDir::new().unwrap();
    install(site.path(), "foo", &[], &[("__init__.py", 10)]);
    install(site.path(), "unused_pkg", &[], &[("__init__.py", 20)]);
    let code = TempDir::new().unwrap();
    fs::write(code.path().join("main.py"), "import json\nfrom foo import bar\n").unwrap();

    let output = pkgsizer(code.path())
        .arg("unused")
        .arg(code.path())
        .arg("--site-packages")
        .arg(site.path())
        .args(["--json", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report = json_stdout(&output.stdout);
    let names = |key: &str| -> Vec<String> {
        report[key]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(names("used"), ["foo"]);
    assert_eq!(names("unused"), ["unused-pkg"]);
    assert_eq!(report["unused_size_bytes"], 20);
}

#[test]
fn test_alternatives_list_all() {
    let dir = TempDir::new().unwrap();
    pkgsizer(dir.path())
        .args(["alternatives", "--list-all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("requests"))
        .stdout(predicate::str::contains("httpx"));
}

#[test]
fn test_compare_environments() {
    let left = chain_site();
    let right = TempDir::new().unwrap();
    install(right.path(), "a", &[], &[("1", 100)]);
    install(right.path(), "d", &[], &[("1", 100)]);

    let output = pkgsizer(left.path())
        .arg("compare")
        .arg(left.path())
        .arg(right.path())
        .args(["--name1", "left", "--name2", "right", "--json", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report = json_stdout(&output.stdout);
    assert_eq!(report["common_count"], 1);
    assert_eq!(report["same_version_count"], 1);
    assert_eq!(report["only_in_left"].as_array().unwrap().len(), 2);
    assert_eq!(report["only_in_right"][0]["package"], "d");
}

#[test]
fn test_missing_site_packages() {
    let dir = TempDir::new().unwrap();
    pkgsizer(dir.path())
        .arg("scan-env")
        .arg("--site-packages")
        .arg(dir.path().join("missing"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("site-packages directory does not exist"));
}
