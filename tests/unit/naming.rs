//! Filename acceptance across naming classes

use chrono::NaiveDate;
use commcare_downloader::catalog::DatasetCatalog;
use commcare_downloader::dataset::NamingClass;
use commcare_downloader::naming::FilenamePattern;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 14).unwrap()
}

fn pattern(name: &str) -> FilenamePattern {
    let catalog = DatasetCatalog::load_embedded().unwrap();
    let dataset = catalog.get(name).unwrap();
    FilenamePattern::for_dataset(dataset, day())
}

#[test]
fn simple_class_accepts_date_and_collision_suffix() {
    let pattern = pattern("Household mother");
    assert!(pattern.matches("Household mother 2025-08-14.xlsx"));
    assert!(pattern.matches("Household mother 2025-08-14 (1).xlsx"));
    assert!(pattern.matches("HOUSEHOLD  MOTHER 2025-08-14.xlsx"));
    assert!(!pattern.matches("Household mother 2025-08-13.xlsx"));
    assert!(!pattern.matches("Household mother (created 2024-01-01) 2025-08-14.xlsx"));
}

#[test]
fn created_class_requires_a_created_token() {
    let pattern = pattern("Caris Health Agent - Enfant - Visite Enfant");
    assert!(pattern.matches(
        "Caris Health Agent - Enfant - Visite Enfant (created 2023-11-02) 2025-08-14.xlsx"
    ));
    assert!(pattern.matches(
        "Caris Health Agent - Enfant - Visite Enfant (created 2023-11-02) 2025-08-14 (2).xlsx"
    ));
    assert!(!pattern.matches("Caris Health Agent - Enfant - Visite Enfant 2025-08-14.xlsx"));
    assert!(!pattern.matches(
        "Caris Health Agent - Enfant - Visite Enfant (created 2023-11-02) 2025-08-15.xlsx"
    ));
}

#[test]
fn fixed_created_class_pins_the_created_date() {
    let pattern = pattern("muso_groupes");
    assert!(pattern.matches("muso_groupes (created 2025-03-25) 2025-08-14.xlsx"));
    assert!(pattern.matches("muso groupes (created 2025-03-25) 2025-08-14 (1).xlsx"));
    assert!(!pattern.matches("muso_groupes (created 2025-03-26) 2025-08-14.xlsx"));
    assert!(!pattern.matches("muso_groupes 2025-08-14.xlsx"));
}

#[test]
fn patterns_do_not_cross_datasets() {
    let enfant = pattern("Caris Health Agent - Enfant - Visite Enfant");
    let ration = pattern("Caris Health Agent - Enfant - Ration et autres visites");
    let file = "Caris Health Agent - Enfant - Ration et autres visites (created 2023-11-02) 2025-08-14.xlsx";
    assert!(ration.matches(file));
    assert!(!enfant.matches(file));

    let child = pattern("household_child");
    assert!(!child.matches("Household mother 2025-08-14.xlsx"));
}

#[test]
fn every_catalog_entry_has_a_usable_pattern() {
    let catalog = DatasetCatalog::load_embedded().unwrap();
    for dataset in catalog.datasets() {
        let pattern = FilenamePattern::for_dataset(dataset, day());
        let example = match dataset.naming {
            NamingClass::Simple => format!("{} 2025-08-14.xlsx", dataset.name),
            NamingClass::Created => format!("{} (created 2024-01-01) 2025-08-14.xlsx", dataset.name),
            NamingClass::FixedCreated { created } => {
                format!("{} (created {created}) 2025-08-14.xlsx", dataset.name)
            }
        };
        assert!(pattern.matches(&example), "{example} should match {}", dataset.name);
    }
}

#[test]
fn dataset_name_containing_created_is_matched_literally() {
    use commcare_downloader::dataset::{LogicalDataset, Program};

    let recent = LogicalDataset::new(
        "Members created recently",
        "https://example.org/export/members/",
        Program::Muso,
    );
    let simple = FilenamePattern::for_dataset(&recent.clone().with_naming(NamingClass::Simple), day());
    assert!(simple.matches("Members created recently 2025-08-14.xlsx"));
    assert!(!simple.matches("Members (created 2025-01-02) 2025-08-14.xlsx"));
    assert!(!simple.matches("Members created recently (created 2025-01-02) 2025-08-14.xlsx"));

    let created = FilenamePattern::for_dataset(&recent.with_naming(NamingClass::Created), day());
    assert!(created.matches("Members created recently (created 2025-01-02) 2025-08-14.xlsx"));
    assert!(!created.matches("Members created recently 2025-08-14.xlsx"));
}
