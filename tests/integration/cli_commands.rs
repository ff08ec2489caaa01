//! Binary-level checks for the commands that never launch a browser

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

fn cli(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("commcare-downloader").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("EMAIL")
        .env_remove("PASSWORD")
        .env_remove("PASSWORD_CC")
        .env_remove("COMMCARE_DOWNLOAD_DIR")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn list_prints_every_program() {
    let temp = TempDir::new().unwrap();
    let output = cli(&temp).arg("list").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Datasets (16)"));
    for program in ["CALL", "PTME", "OEV", "MUSO", "GARDENS"] {
        assert!(stdout.contains(program), "missing {program}");
    }
    assert!(stdout.contains("muso_beneficiaries (created 2025-03-25) [heavy]"));
}

#[test]
fn list_json_honors_program_filter() {
    let temp = TempDir::new().unwrap();
    let output = cli(&temp)
        .args(["list", "--program", "muso", "--output-format", "json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let datasets: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let datasets = datasets.as_array().unwrap();
    assert_eq!(datasets.len(), 4);
    assert!(datasets.iter().all(|d| d["program"] == "MUSO"));
}

#[test]
fn check_exits_partial_when_files_are_missing() {
    let temp = TempDir::new().unwrap();
    let output = cli(&temp)
        .args(["check", "--date", "2025-08-14", "--download-dir"])
        .arg(temp.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("[missing] All Gardens 2025-08-14.xlsx"));
    assert!(stdout.contains("0/16 present"));
}

#[test]
fn check_succeeds_when_selection_is_present() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("All Gardens 2025-08-14.xlsx"), b"PK").unwrap();

    let output = cli(&temp)
        .args([
            "check",
            "--program",
            "gardens",
            "--date",
            "2025-08-14",
            "--output-format",
            "json",
            "--download-dir",
        ])
        .arg(temp.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["missing"].as_array().unwrap().len(), 0);
    assert_eq!(report["present"][0]["dataset"], "All Gardens");
}

#[test]
fn clean_removes_partials_and_duplicates() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("All Gardens 2025-08-14.xlsx"), b"PK").unwrap();
    fs::write(temp.path().join("All Gardens 2025-08-14 (1).xlsx"), b"PK").unwrap();
    fs::write(temp.path().join("stale.xlsx.crdownload"), b"PK").unwrap();

    let output = cli(&temp)
        .args(["clean", "--date", "2025-08-14", "--download-dir"])
        .arg(temp.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(!temp.path().join("stale.xlsx.crdownload").exists());
    let remaining: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("All Gardens"))
        .collect();
    assert_eq!(remaining.len(), 1);
}

#[test]
fn run_with_everything_present_needs_no_credentials() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("All Gardens 2025-08-14.xlsx"), b"PK").unwrap();

    let output = cli(&temp)
        .args([
            "run",
            "--program",
            "gardens",
            "--date",
            "2025-08-14",
            "--output-format",
            "json",
            "--download-dir",
        ])
        .arg(temp.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "nothing_to_do");
    assert_eq!(report["browser_launched"], false);
}

#[test]
fn run_without_credentials_fails_when_work_remains() {
    let temp = TempDir::new().unwrap();
    let output = cli(&temp)
        .args(["run", "--program", "gardens", "--date", "2025-08-14", "--download-dir"])
        .arg(temp.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("missing credentials"));
}

#[test]
fn unknown_dataset_is_rejected() {
    let temp = TempDir::new().unwrap();
    let output = cli(&temp)
        .args(["check", "--dataset", "Nutrition"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
}
