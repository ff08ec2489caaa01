//! Full runs against the scripted browser

use crate::support::{
    artifact_name, controller, dataset, fast_policy, place_artifact, today, Delivery, FakeBrowser,
    FakeLauncher, STRAY_MARKER,
};
use commcare_downloader::controller::{Disposition, PassSummary, RunStatus};
use commcare_downloader::dataset::NamingClass;
use std::fs::File;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[tokio::test]
async fn present_datasets_never_launch_a_browser() {
    let temp = TempDir::new().unwrap();
    let visits = dataset("Visite Enfant", NamingClass::Created);
    let mothers = dataset("Household mother", NamingClass::Simple);
    place_artifact(temp.path(), &visits, today());
    place_artifact(temp.path(), &mothers, today());

    let launcher = FakeLauncher::new(FakeBrowser::new(temp.path()));
    let report = controller(vec![visits, mothers], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::NothingToDo);
    assert_eq!(launcher.launches(), 0);
    assert_eq!(report.total_attempts, 0);
    assert!(report.passes.is_empty());
    assert!(report
        .datasets
        .iter()
        .all(|d| d.disposition == Disposition::AlreadyPresent));
    assert_eq!(report.artifacts.len(), 2);
}

#[tokio::test]
async fn yesterdays_artifact_does_not_count() {
    let temp = TempDir::new().unwrap();
    let gardens = dataset("All Gardens", NamingClass::Simple);
    let yesterday = today().pred_opt().unwrap();
    place_artifact(temp.path(), &gardens, yesterday);

    let browser = FakeBrowser::new(temp.path())
        .with_export(&gardens, Delivery::Immediate(artifact_name(&gardens, today())));
    let launcher = FakeLauncher::new(browser);
    let report = controller(vec![gardens.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(launcher.launches(), 1);
    assert_eq!(report.status, RunStatus::Complete);
    assert!(temp.path().join(artifact_name(&gardens, yesterday)).exists());
}

#[tokio::test]
async fn first_attempt_success_downloads_and_closes() {
    let temp = TempDir::new().unwrap();
    let visits = dataset("Visite Enfant", NamingClass::Created);
    let browser = FakeBrowser::new(temp.path())
        .with_export(&visits, Delivery::Immediate(artifact_name(&visits, today())));
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![visits.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert!(report.browser_launched);
    assert_eq!(
        report.dataset("Visite Enfant").unwrap().disposition,
        Disposition::Downloaded { pass: 1, attempt: 1 }
    );
    assert_eq!(report.total_attempts, 1);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(launcher.browser.closes(), 1);
    assert_eq!(launcher.browser.link_clicks(&visits), 1);
    assert_eq!(launcher.browser.date_ranges(), vec!["2021-01-01 to 2025-08-14".to_string()]);
    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.artifacts[0].filename, artifact_name(&visits, today()));
}

#[tokio::test]
async fn failing_dataset_does_not_block_the_others() {
    let temp = TempDir::new().unwrap();
    let good = dataset("Visite Enfant", NamingClass::Created);
    let bad = dataset("muso_beneficiaries", NamingClass::Simple);
    let browser = FakeBrowser::new(temp.path())
        .with_export(&good, Delivery::Immediate(artifact_name(&good, today())))
        .with_export(&bad, Delivery::NoLink);
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![good, bad], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(
        report.dataset("Visite Enfant").unwrap().disposition,
        Disposition::Downloaded { pass: 1, attempt: 1 }
    );
    assert_eq!(
        report.dataset("muso_beneficiaries").unwrap().disposition,
        Disposition::Failed { attempts: 9 }
    );
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), vec!["muso_beneficiaries"]);
    assert_eq!(report.total_attempts, 10);
    assert_eq!(report.passes.len(), 3);
    assert_eq!(
        report.passes[0],
        PassSummary {
            pass: 1,
            attempted: 2,
            succeeded: 1,
            failed: 1
        }
    );
    assert_eq!(report.passes[2].attempted, 1);
    assert!(report.artifacts.is_empty());
    assert_eq!(launcher.browser.closes(), 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "partial");
    assert_eq!(json["datasets"][1]["disposition"]["outcome"], "failed");
    assert!(json["elapsed_secs"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn attempts_are_bounded_per_pass_and_across_passes() {
    let temp = TempDir::new().unwrap();
    let silent = dataset("household_child", NamingClass::Simple);
    let browser = FakeBrowser::new(temp.path()).with_export(&silent, Delivery::Silent);
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![silent.clone()], temp.path(), &launcher)
        .with_policy(fast_policy().with_max_retries(2).with_max_passes(2))
        .run()
        .await
        .unwrap();

    assert_eq!(launcher.browser.link_clicks(&silent), 4);
    assert_eq!(
        report.dataset("household_child").unwrap().disposition,
        Disposition::Failed { attempts: 4 }
    );
    assert_eq!(report.passes.len(), 2);
}

#[tokio::test]
async fn heavy_datasets_get_two_attempts_per_pass() {
    let temp = TempDir::new().unwrap();
    let heavy = dataset("muso_household_2022", NamingClass::Simple).with_heavy(true);
    let browser = FakeBrowser::new(temp.path()).with_export(&heavy, Delivery::Silent);
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![heavy.clone()], temp.path(), &launcher)
        .with_policy(fast_policy().with_max_passes(2))
        .run()
        .await
        .unwrap();

    assert_eq!(launcher.browser.link_clicks(&heavy), 4);
    assert_eq!(report.total_attempts, 4);
}

#[tokio::test]
async fn retry_within_pass_recovers() {
    let temp = TempDir::new().unwrap();
    let calls = dataset("APPELS OEV", NamingClass::Created);
    let browser = FakeBrowser::new(temp.path()).with_export(
        &calls,
        Delivery::AfterFailures {
            filename: artifact_name(&calls, today()),
            failures: 1,
        },
    );
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![calls.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.dataset("APPELS OEV").unwrap().disposition,
        Disposition::Downloaded { pass: 1, attempt: 2 }
    );
    assert_eq!(report.total_attempts, 2);
    assert_eq!(launcher.browser.link_clicks(&calls), 2);
}

#[tokio::test]
async fn partial_download_is_awaited_until_final() {
    let temp = TempDir::new().unwrap();
    let gardens = dataset("All Gardens", NamingClass::Simple);
    let browser = FakeBrowser::new(temp.path()).with_export(
        &gardens,
        Delivery::Delayed {
            filename: artifact_name(&gardens, today()),
            delay: Duration::from_millis(40),
        },
    );
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![gardens.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.dataset("All Gardens").unwrap().disposition,
        Disposition::Downloaded { pass: 1, attempt: 1 }
    );
    assert_eq!(launcher.browser.link_clicks(&gardens), 1);
}

#[tokio::test]
async fn startup_keeps_only_the_newest_duplicate() {
    let temp = TempDir::new().unwrap();
    let mothers = dataset("Household mother", NamingClass::Simple);
    let names = [
        "Household mother 2025-08-14.xlsx",
        "Household mother 2025-08-14 (1).xlsx",
        "Household mother 2025-08-14 (2).xlsx",
    ];
    let base = SystemTime::now() - Duration::from_secs(3600);
    // The "(1)" copy is the newest
    for (name, age) in names.iter().zip([30u64, 10, 20]) {
        let path = temp.path().join(name);
        std::fs::write(&path, b"PK data").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(base + Duration::from_secs(3600 - age))
            .unwrap();
    }

    let launcher = FakeLauncher::new(FakeBrowser::new(temp.path()));
    let report = controller(vec![mothers], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::NothingToDo);
    assert_eq!(report.duplicates_removed, 2);
    assert!(temp.path().join(names[1]).exists());
    assert!(!temp.path().join(names[0]).exists());
    assert!(!temp.path().join(names[2]).exists());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn missing_download_directory_is_created() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("exports").join("today");
    let gardens = dataset("All Gardens", NamingClass::Simple);
    let browser = FakeBrowser::new(&root)
        .with_export(&gardens, Delivery::Immediate(artifact_name(&gardens, today())));
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![gardens], &root, &launcher)
        .run()
        .await
        .unwrap();

    assert!(root.is_dir());
    assert_eq!(report.status, RunStatus::Complete);
}

#[tokio::test]
async fn present_dataset_is_skipped_when_the_browser_runs() {
    let temp = TempDir::new().unwrap();
    let present = dataset("Household mother", NamingClass::Simple);
    let missing = dataset("All Gardens", NamingClass::Simple);
    place_artifact(temp.path(), &present, today());
    let browser = FakeBrowser::new(temp.path())
        .with_export(&present, Delivery::Immediate(artifact_name(&present, today())))
        .with_export(&missing, Delivery::Immediate(artifact_name(&missing, today())));
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![present.clone(), missing.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(
        report.dataset("Household mother").unwrap().disposition,
        Disposition::AlreadyPresent
    );
    assert_eq!(launcher.browser.link_clicks(&present), 0);
    assert!(!launcher
        .browser
        .navigations()
        .contains(&present.export_url));
    assert_eq!(report.total_attempts, 1);
}

#[tokio::test]
async fn file_landing_after_verification_counts_for_the_earlier_attempt() {
    let temp = TempDir::new().unwrap();
    let children = dataset("household_child", NamingClass::Simple);
    let browser = FakeBrowser::new(temp.path()).with_export(
        &children,
        Delivery::StrayMarker(artifact_name(&children, today())),
    );
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![children.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    // The stray marker holds verification back until the attempt gives up
    assert_eq!(
        report.dataset("household_child").unwrap().disposition,
        Disposition::Downloaded { pass: 1, attempt: 1 }
    );
    assert_eq!(report.total_attempts, 1);
    assert_eq!(launcher.browser.link_clicks(&children), 1);
    assert!(!temp.path().join(STRAY_MARKER).exists());
}

#[tokio::test]
async fn file_written_by_another_export_skips_the_attempt() {
    let temp = TempDir::new().unwrap();
    let gardens = dataset("All Gardens", NamingClass::Simple);
    let mothers = dataset("Household mother", NamingClass::Simple);
    let browser = FakeBrowser::new(temp.path())
        .with_export(
            &gardens,
            Delivery::Writes(vec![
                artifact_name(&gardens, today()),
                artifact_name(&mothers, today()),
            ]),
        )
        .with_export(&mothers, Delivery::Silent);
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![gardens.clone(), mothers.clone()], temp.path(), &launcher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(
        report.dataset("Household mother").unwrap().disposition,
        Disposition::SatisfiedOutOfBand { pass: 1 }
    );
    assert_eq!(launcher.browser.link_clicks(&mothers), 0);
    assert_eq!(report.total_attempts, 1);
}

#[tokio::test]
async fn file_appearing_between_passes_ends_the_run() {
    let temp = TempDir::new().unwrap();
    let mothers = dataset("Household mother", NamingClass::Simple);
    let gardens = dataset("All Gardens", NamingClass::Simple);
    let browser = FakeBrowser::new(temp.path())
        .with_export(&mothers, Delivery::Silent)
        .with_export(
            &gardens,
            Delivery::Writes(vec![
                artifact_name(&gardens, today()),
                artifact_name(&mothers, today()),
            ]),
        );
    let launcher = FakeLauncher::new(browser);

    let report = controller(vec![mothers.clone(), gardens.clone()], temp.path(), &launcher)
        .with_policy(fast_policy().with_max_retries(1))
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(
        report.dataset("Household mother").unwrap().disposition,
        Disposition::SatisfiedOutOfBand { pass: 1 }
    );
    assert_eq!(
        report.dataset("All Gardens").unwrap().disposition,
        Disposition::Downloaded { pass: 1, attempt: 1 }
    );
    assert_eq!(report.passes.len(), 1);
    assert_eq!(report.passes[0].failed, 1);
    assert_eq!(launcher.browser.link_clicks(&mothers), 1);
}
