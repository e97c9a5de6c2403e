//! Checkpoint backends exercised through the shared trait

use chrono::{Duration as ChronoDuration, Utc};
use std::path::Path;
use sumi_tide::checkpoint::{
    create_backend, inspect_checkpoint, CheckpointManager, CheckpointMetadata, CrawlTask,
    PageRecord, StartMode, StateBackend, CHECKPOINT_VERSION,
};
use sumi_tide::config::{BackendKind, Config};
use tempfile::TempDir;

const KINDS: [(BackendKind, &str); 2] = [
    (BackendKind::Json, "checkpoint.json"),
    (BackendKind::Sqlite, "checkpoint.db"),
];

fn metadata() -> CheckpointMetadata {
    CheckpointMetadata {
        version: CHECKPOINT_VERSION,
        config_name: "docs".to_string(),
        config_fingerprint: "ab".repeat(32),
        created_at: "2024-03-01T09:00:00+00:00".to_string(),
        last_updated_at: "2024-03-01T09:30:00+00:00".to_string(),
        stats: serde_json::json!({"pages_crawled": 3}),
    }
}

fn page(url: &str, fetched_at: &str) -> PageRecord {
    PageRecord {
        url: url.to_string(),
        content_hash: "11".repeat(32),
        last_fetched_at: fetched_at.to_string(),
        status_code: 200,
        output_path: "example.com/index.html".to_string(),
        etag: Some("\"e1\"".to_string()),
        last_modified: None,
    }
}

fn open(kind: BackendKind, path: &Path) -> Box<dyn StateBackend> {
    let backend = create_backend(kind, path);
    backend.initialize().expect("Failed to initialize backend");
    backend
}

#[test]
fn test_state_survives_reopen() {
    for (kind, file) in KINDS {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);
        let now = Utc::now().to_rfc3339();

        let backend = open(kind, &path);
        for url in ["https://example.com/", "https://example.com/a", "https://example.com/b"] {
            backend.add_page(page(url, &now)).unwrap();
        }
        backend
            .save_queue(&[
                CrawlTask::new("https://example.com/d", Some("https://example.com/".to_string())),
                CrawlTask::new("https://example.com/c", Some("https://example.com/a".to_string())),
            ])
            .unwrap();
        backend.save_metadata(&metadata()).unwrap();
        backend.commit().unwrap();
        backend.close().unwrap();

        let reopened = open(kind, &path);
        assert_eq!(reopened.load_metadata().unwrap(), Some(metadata()), "{:?}", kind);
        assert_eq!(reopened.page_count().unwrap(), 3, "{:?}", kind);
        assert!(reopened.has_page("https://example.com/a").unwrap());
        assert_eq!(
            reopened.get_page("https://example.com/b").unwrap(),
            Some(page("https://example.com/b", &now))
        );

        // Queue order is preserved exactly
        let queue = reopened.get_queue().unwrap();
        let urls: Vec<&str> = queue.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, ["https://example.com/d", "https://example.com/c"], "{:?}", kind);
        assert_eq!(queue[1].parent_url.as_deref(), Some("https://example.com/a"));
        reopened.close().unwrap();
    }
}

#[test]
fn test_iterate_pages_across_batches() {
    for (kind, file) in KINDS {
        let dir = TempDir::new().unwrap();
        let backend = open(kind, &dir.path().join(file));
        let now = Utc::now().to_rfc3339();

        for i in 0..2500 {
            backend
                .add_page(page(&format!("https://example.com/p{:05}", i), &now))
                .unwrap();
        }
        backend.commit().unwrap();

        let urls: Vec<String> = backend
            .iter_pages()
            .unwrap()
            .map(|page| page.unwrap().url)
            .collect();
        assert_eq!(urls.len(), 2500, "{:?}", kind);
        assert!(urls.windows(2).all(|w| w[0] < w[1]), "{:?}", kind);
        assert_eq!(urls[0], "https://example.com/p00000");
        backend.close().unwrap();
    }
}

#[test]
fn test_should_redownload_policy() {
    for (kind, file) in KINDS {
        let dir = TempDir::new().unwrap();
        let backend = open(kind, &dir.path().join(file));

        let old = (Utc::now() - ChronoDuration::days(10)).to_rfc3339();
        backend.add_page(page("https://example.com/old", &old)).unwrap();
        backend
            .add_page(page("https://example.com/broken", "yesterday-ish"))
            .unwrap();

        assert!(backend.should_redownload("https://example.com/new", None).unwrap());
        assert!(!backend.should_redownload("https://example.com/old", None).unwrap());
        assert!(backend.should_redownload("https://example.com/old", Some(7.0)).unwrap());
        assert!(!backend.should_redownload("https://example.com/old", Some(30.0)).unwrap());
        assert!(backend
            .should_redownload("https://example.com/broken", Some(30.0))
            .unwrap());
        backend.close().unwrap();
    }
}

#[test]
fn test_corrupted_checkpoint_starts_empty() {
    for (kind, file) in KINDS {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);
        std::fs::write(&path, b"this is definitely not a checkpoint {{{").unwrap();

        let backend = open(kind, &path);
        assert_eq!(backend.load_metadata().unwrap(), None, "{:?}", kind);
        assert_eq!(backend.page_count().unwrap(), 0, "{:?}", kind);

        // The backend is usable afterwards
        backend.add_page(page("https://example.com/", "2024-01-01T00:00:00+00:00")).unwrap();
        backend.save_metadata(&metadata()).unwrap();
        backend.commit().unwrap();
        backend.close().unwrap();

        let reopened = open(kind, &path);
        assert_eq!(reopened.page_count().unwrap(), 1, "{:?}", kind);
        reopened.close().unwrap();
    }
}

#[test]
fn test_manager_cold_starts_from_corrupted_file() {
    for (kind, file) in KINDS {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(
            "docs",
            vec!["https://example.com/".to_string()],
            vec!["example.com".to_string()],
        );
        config.checkpoint.path = dir.path().join(file);
        config.checkpoint.backend = Some(kind);
        std::fs::write(&config.checkpoint.path, b"\x00\x01garbage").unwrap();

        let manager = CheckpointManager::open(&config, StartMode::Resume).unwrap();
        assert!(!manager.is_resumed(), "{:?}", kind);
        assert!(manager.resume_state().unwrap().is_cold_start());
        manager.close().unwrap();
    }
}

#[test]
fn test_wrong_version_checkpoint_starts_empty() {
    for (kind, file) in KINDS {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);

        let backend = open(kind, &path);
        backend
            .add_page(page("https://example.com/", "2024-01-01T00:00:00+00:00"))
            .unwrap();
        backend.save_queue(&[CrawlTask::root("https://example.com/a")]).unwrap();
        backend
            .save_metadata(&CheckpointMetadata {
                version: 99,
                ..metadata()
            })
            .unwrap();
        backend.commit().unwrap();
        backend.close().unwrap();

        let reopened = open(kind, &path);
        assert_eq!(reopened.load_metadata().unwrap(), None, "{:?}", kind);
        assert_eq!(reopened.page_count().unwrap(), 0, "{:?}", kind);
        assert!(reopened.get_queue().unwrap().is_empty(), "{:?}", kind);
        reopened.close().unwrap();
    }
}

#[test]
fn test_sqlite_file_with_foreign_layout_starts_empty() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::new(
        "docs",
        vec!["https://example.com/".to_string()],
        vec!["example.com".to_string()],
    );
    config.checkpoint.path = dir.path().join("checkpoint.db");
    config.checkpoint.backend = Some(BackendKind::Sqlite);
    {
        let conn = rusqlite::Connection::open(&config.checkpoint.path).unwrap();
        conn.execute_batch(
            "CREATE TABLE metadata (id INTEGER PRIMARY KEY, version INTEGER);
            INSERT INTO metadata VALUES (1, 1);",
        )
        .unwrap();
    }

    let manager = CheckpointManager::open(&config, StartMode::Resume).unwrap();
    assert!(!manager.is_resumed());
    assert!(manager.resume_state().unwrap().is_cold_start());
    manager.close().unwrap();

    // The rebuilt file is a normal checkpoint afterwards
    let (metadata, pages) = inspect_checkpoint(&config).unwrap().unwrap();
    assert_eq!(metadata.config_name, "docs");
    assert_eq!(pages, 0);
}
