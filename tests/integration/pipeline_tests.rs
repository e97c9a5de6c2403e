//! Pipeline with the HTML snapshot writer

use std::sync::Arc;
use sumi_tide::config::PipelineConfig;
use sumi_tide::output::HtmlWriter;
use sumi_tide::pipeline::{Pipeline, StorageFailure};
use sumi_tide::FetchResult;
use tempfile::TempDir;

fn result(url: &str, output_path: &str) -> FetchResult {
    FetchResult {
        url: url.to_string(),
        final_url: url.to_string(),
        html: format!("<html><body>{}</body></html>", url),
        status_code: 200,
        content_type: "text/html".to_string(),
        links: Vec::new(),
        assets: Vec::new(),
        content_hash: String::new(),
        output_path: output_path.to_string(),
        queue_size: 0,
    }
}

fn pipeline_config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        queue_max_items: 2,
        queue_max_memory_mb: 1,
    }
}

#[tokio::test]
async fn test_pipeline_writes_every_result() {
    let dir = TempDir::new().unwrap();
    let writer = Arc::new(HtmlWriter::new(dir.path()));
    let pipeline: Pipeline<FetchResult> = Pipeline::start(&pipeline_config(3), writer);

    for i in 0..20 {
        let url = format!("https://example.com/page{}.html", i);
        pipeline
            .submit(result(&url, &format!("example.com/page{}.html", i)))
            .await;
    }
    let stats = pipeline.shutdown().await;

    assert_eq!(stats.items_queued, 20);
    assert_eq!(stats.items_processed, 20);
    assert_eq!(stats.items_failed, 0);
    assert_eq!(stats.current_queue_bytes, 0);
    for i in 0..20 {
        let written = std::fs::read_to_string(
            dir.path().join(format!("example.com/page{}.html", i)),
        )
        .unwrap();
        assert!(written.contains(&format!("page{}.html", i)));
    }
}

#[tokio::test]
async fn test_io_failures_do_not_stop_processing() {
    let dir = TempDir::new().unwrap();
    // A regular file where a host directory should be
    std::fs::write(dir.path().join("blocked.example"), "file").unwrap();
    let writer = Arc::new(HtmlWriter::new(dir.path()));
    let pipeline: Pipeline<FetchResult> = Pipeline::start(&pipeline_config(2), writer);

    for i in 0..10 {
        let host = if i % 2 == 0 { "ok.example" } else { "blocked.example" };
        let url = format!("https://{}/p{}", host, i);
        pipeline
            .submit(result(&url, &format!("{}/p{}", host, i)))
            .await;
    }
    assert!(!pipeline.should_abort());
    let stats = pipeline.shutdown().await;

    assert_eq!(stats.items_processed, 5);
    assert_eq!(stats.items_failed, 5);
    assert_eq!(stats.worker_errors.len(), 5);
    assert!(!stats.storage_failures.contains_key(&StorageFailure::Exhausted));
    assert!(dir.path().join("ok.example/p0").exists());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_full_disk_raises_abort() {
    if !std::path::Path::new("/dev/full").exists() {
        return;
    }
    // Every write to /dev/full fails with ENOSPC
    let writer = Arc::new(HtmlWriter::new("/dev"));
    let pipeline: Pipeline<FetchResult> = Pipeline::start(&pipeline_config(1), writer);
    pipeline.submit(result("https://example.com/", "full")).await;

    for _ in 0..100 {
        if pipeline.should_abort() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(pipeline.should_abort());

    let stats = pipeline.shutdown().await;
    assert_eq!(stats.storage_failures.get(&StorageFailure::Exhausted), Some(&1));
}
