use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zsync_sync::{SyncConfig, SyncPipeline};
use zsync_zotero::FixtureLibrary;

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/zotero/sample/items.json")
}

fn live_config(server: &MockServer, workbook: &Path) -> SyncConfig {
    let mut config = SyncConfig::from_yaml_str("library_id: \"7\"\napi_key: secret\n").unwrap();
    config.api_base = server.uri();
    config.workbook_path = workbook.to_path_buf();
    config
}

#[tokio::test]
async fn failed_child_lookup_aborts_before_the_workbook_is_written() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");

    let mut seed = SyncConfig::from_yaml_str("library_id: \"0\"\n").unwrap();
    seed.workbook_path = workbook.clone();
    let library = FixtureLibrary::load(fixture_path()).unwrap();
    SyncPipeline::with_source(seed, Box::new(library))
        .run_once()
        .await
        .unwrap();
    let before = fs::read(&workbook).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/7/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Total-Results", "1")
                .set_body_json(json!([{
                    "key": "NOURL001",
                    "version": 3,
                    "data": {"key": "NOURL001", "itemType": "book", "title": "No Link"}
                }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/7/items/NOURL001/children"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = SyncPipeline::new(live_config(&server, &workbook)).unwrap();
    let err = pipeline.run_once().await.unwrap_err();
    assert!(format!("{err:#}").contains("NOURL001"));

    assert_eq!(fs::read(&workbook).unwrap(), before);
    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["literature.xlsx"]);
}

#[tokio::test]
async fn failed_listing_aborts_without_creating_data_rows() {
    let dir = tempdir().unwrap();
    let workbook = dir.path().join("literature.xlsx");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/7/items"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let pipeline = SyncPipeline::new(live_config(&server, &workbook)).unwrap();
    assert!(pipeline.run_once().await.is_err());
    assert!(pipeline.preview().await.is_err());
    assert!(zsync_sheet::read_data_rows(&workbook).unwrap().is_empty());
}
