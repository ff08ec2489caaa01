//! Completion verification against files that change under the verifier

use chrono::NaiveDate;
use commcare_downloader::config::Timings;
use commcare_downloader::dataset::{LogicalDataset, NamingClass, Program};
use commcare_downloader::inventory::DownloadDirectory;
use commcare_downloader::naming::FilenamePattern;
use commcare_downloader::verifier::{CompletionVerifier, VerifyOutcome};
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

fn setup(temp: &TempDir) -> (CompletionVerifier, FilenamePattern) {
    let timings = Timings {
        poll_interval: Duration::from_millis(5),
        stabilization_interval: Duration::from_millis(30),
        ..Timings::default()
    };
    let dataset = LogicalDataset::new("household_child", "https://example.org/x/", Program::Oev)
        .with_naming(NamingClass::Simple);
    let pattern = FilenamePattern::for_dataset(&dataset, NaiveDate::from_ymd_opt(2025, 8, 14).unwrap());
    (
        CompletionVerifier::new(DownloadDirectory::new(temp.path()), &timings),
        pattern,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn growing_file_is_not_verified_until_it_stops() {
    let temp = TempDir::new().unwrap();
    let (verifier, pattern) = setup(&temp);
    let path = temp.path().join("household_child 2025-08-14.xlsx");

    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        let mut file = std::fs::File::create(&writer_path).unwrap();
        for _ in 0..60 {
            file.write_all(&[0u8; 512]).unwrap();
            file.flush().unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let early = verifier.wait_for(&pattern, Duration::from_millis(120)).await;
    assert!(matches!(early, VerifyOutcome::NotFound { .. }));

    writer.await.unwrap();
    let settled = verifier.wait_for(&pattern, Duration::from_secs(2)).await;
    assert_eq!(settled.artifact().map(|a| a.size), Some(60 * 512));
}

#[tokio::test]
async fn file_appearing_mid_wait_is_verified() {
    let temp = TempDir::new().unwrap();
    let (verifier, pattern) = setup(&temp);
    let path = temp.path().join("Household_Child 2025-08-14 (1).xlsx");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(path, b"PK complete").unwrap();
    });

    let outcome = verifier.wait_for(&pattern, Duration::from_secs(2)).await;
    let artifact = outcome.artifact().expect("artifact should be verified");
    assert_eq!(artifact.filename, "Household_Child 2025-08-14 (1).xlsx");
}

#[tokio::test]
async fn lingering_partial_marker_holds_back_verification() {
    let temp = TempDir::new().unwrap();
    let (verifier, pattern) = setup(&temp);
    std::fs::write(temp.path().join("household_child 2025-08-14.xlsx"), b"PK stable").unwrap();
    let partial = temp.path().join("household_child 2025-08-14 (1).xlsx.crdownload");
    std::fs::write(&partial, b"PK").unwrap();

    let held = verifier.wait_for(&pattern, Duration::from_millis(200)).await;
    assert!(matches!(held, VerifyOutcome::NotFound { .. }));

    std::fs::remove_file(&partial).unwrap();
    let released = verifier.wait_for(&pattern, Duration::from_secs(2)).await;
    assert_eq!(
        released.artifact().map(|a| a.filename.as_str()),
        Some("household_child 2025-08-14.xlsx")
    );
}
