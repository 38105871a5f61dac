use std::path::{Path, PathBuf};

use tempfile::tempdir;
use zsync_core::{ANNOTATION_SHEET, DATA_SHEET};
use zsync_sheet::{read_data_rows, read_sheet_values, sheet_names};
use zsync_sync::{SyncConfig, SyncPipeline};
use zsync_zotero::FixtureLibrary;

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/zotero/sample/items.json")
}

fn pipeline_for(workbook: &Path, carry_over_annotations: bool) -> SyncPipeline {
    let mut config = SyncConfig::from_yaml_str("library_id: \"0\"\n").unwrap();
    config.workbook_path = workbook.to_path_buf();
    config.carry_over_annotations = carry_over_annotations;
    let library = FixtureLibrary::load(fixture_path()).unwrap();
    SyncPipeline::with_source(config, Box::new(library))
}

fn type_into_sheet(path: &Path, sheet: &str, coordinate: (u32, u32), value: &str) {
    let mut book = umya_spreadsheet::reader::xlsx::read(path).unwrap();
    book.get_sheet_by_name_mut(sheet)
        .unwrap()
        .get_cell_mut(coordinate)
        .set_value_string(value);
    umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
}

#[tokio::test]
async fn fixture_library_syncs_into_sorted_rows() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");

    let summary = pipeline_for(&workbook, false).run_once().await.unwrap();
    assert!(summary.workbook_created);
    assert_eq!(summary.fetched_items, 7);
    assert_eq!(summary.skipped_items, 3);
    assert_eq!(summary.url_lookups, 3);
    assert_eq!(summary.written_rows, 4);

    let rows = read_data_rows(&workbook).unwrap();
    let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["WEBPAGE1", "LEEBOOK1", "SMTH2019", "WHOREP01"]);

    let lee = &rows[1];
    assert_eq!(lee.authors, "Lee, Ann; Park, Bo");
    assert_eq!(lee.year, Some(2011));
    assert_eq!(lee.publication, "Verso");
    assert_eq!(lee.url, "https://books.google.com/books?id=lee2011");

    let smith = &rows[2];
    assert_eq!(smith.authors, "Smith, Jane");
    assert_eq!(smith.year, Some(1998));
    assert_eq!(smith.tags, "industrial policy; state capacity; to-read");
    assert_eq!(smith.url, "https://example.org/smith-1998");

    let who = &rows[3];
    assert_eq!(who.year, None);
    assert_eq!(who.publication, "WHO Regional Office");
    assert_eq!(who.url, "");

    assert_eq!(rows[0].year, Some(2010));
    assert_eq!(rows[0].publication, "Policy Blog Aggregator");
}

#[tokio::test]
async fn repeated_sync_is_idempotent_and_keeps_literature_sheet() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");
    let pipeline = pipeline_for(&workbook, false);

    pipeline.run_once().await.unwrap();
    type_into_sheet(&workbook, ANNOTATION_SHEET, (1, 2), "SMTH2019");
    type_into_sheet(&workbook, ANNOTATION_SHEET, (2, 2), "industrial policy");
    type_into_sheet(&workbook, ANNOTATION_SHEET, (3, 2), "central to chapter 3");
    let literature_before = read_sheet_values(&workbook, ANNOTATION_SHEET).unwrap();
    let data_before = read_sheet_values(&workbook, DATA_SHEET).unwrap();

    let second = pipeline.run_once().await.unwrap();
    assert!(!second.workbook_created);
    pipeline.run_once().await.unwrap();

    assert_eq!(read_sheet_values(&workbook, ANNOTATION_SHEET).unwrap(), literature_before);
    assert_eq!(read_sheet_values(&workbook, DATA_SHEET).unwrap(), data_before);
    assert_eq!(sheet_names(&workbook).unwrap(), vec![DATA_SHEET, ANNOTATION_SHEET]);
}

#[tokio::test]
async fn data_sheet_theme_is_reset_unless_carry_over_is_enabled() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");

    pipeline_for(&workbook, false).run_once().await.unwrap();
    // Row 4 holds SMTH2019 after sorting; column 6 is Theme.
    type_into_sheet(&workbook, DATA_SHEET, (6, 4), "state capacity");

    let summary = pipeline_for(&workbook, true).run_once().await.unwrap();
    assert_eq!(summary.carried_annotations, 1);
    let values = read_sheet_values(&workbook, DATA_SHEET).unwrap();
    assert_eq!(values[3][0], "SMTH2019");
    assert_eq!(values[3][5], "state capacity");

    pipeline_for(&workbook, false).run_once().await.unwrap();
    let values = read_sheet_values(&workbook, DATA_SHEET).unwrap();
    assert_eq!(values[3][5], "");
}

#[tokio::test]
async fn preview_leaves_the_workbook_alone() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");

    let normalized = pipeline_for(&workbook, false).preview().await.unwrap();
    assert_eq!(normalized.rows.len(), 4);
    assert!(!workbook.exists());
}

#[tokio::test]
async fn dump_round_trips_the_library() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");
    let dump = dir.path().join("dump/items.json");

    let count = pipeline_for(&workbook, false).dump(&dump).await.unwrap();
    assert_eq!(count, 7);

    let reloaded = FixtureLibrary::load(&dump).unwrap();
    let original = FixtureLibrary::load(fixture_path()).unwrap();
    assert_eq!(reloaded.items(), original.items());
}
