//! Plain-text reports for the command line

use crate::checkpoint::CheckpointMetadata;
use crate::crawler::CrawlStats;
use crate::runner::RunSummary;

/// Formats the summary printed at the end of a run
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let crawl = &summary.crawl;
    let pipeline = &summary.pipeline;

    out.push_str("=== Crawl Summary ===\n\n");
    out.push_str(&format!("Stop reason: {}\n", summary.stop_reason));
    out.push_str(&format!(
        "Duration: {:.1}s{}\n",
        summary.elapsed.as_secs_f64(),
        if summary.resumed { " (resumed)" } else { "" }
    ));
    out.push_str(&format!("Left in queue: {}\n\n", summary.queue_remaining));

    push_crawl_stats(&mut out, crawl);

    out.push_str("Pipeline:\n");
    out.push_str(&format!("  Items queued: {}\n", pipeline.items_queued));
    out.push_str(&format!("  Items written: {}\n", pipeline.items_processed));
    out.push_str(&format!("  Items failed: {}\n", pipeline.items_failed));
    out.push_str(&format!("  Max queue depth: {}\n", pipeline.max_queue_depth));
    out.push_str(&format!(
        "  Max queued memory: {:.2} MB\n",
        pipeline.max_queue_bytes as f64 / (1024.0 * 1024.0)
    ));
    if !pipeline.storage_failures.is_empty() {
        out.push_str("  Storage failures:\n");
        for (class, count) in &pipeline.storage_failures {
            out.push_str(&format!("    {}: {}\n", class.as_str(), count));
        }
    }

    out
}

/// Formats stored checkpoint metadata for `--stats`
pub fn format_checkpoint_stats(metadata: &CheckpointMetadata, page_count: usize) -> String {
    let mut out = String::new();

    out.push_str("=== Checkpoint ===\n\n");
    out.push_str(&format!("Crawl name: {}\n", metadata.config_name));
    out.push_str(&format!("Fingerprint: {}\n", metadata.config_fingerprint));
    out.push_str(&format!("Created: {}\n", metadata.created_at));
    out.push_str(&format!("Last updated: {}\n", metadata.last_updated_at));
    out.push_str(&format!("Page records: {}\n\n", page_count));

    match serde_json::from_value::<CrawlStats>(metadata.stats.clone()) {
        Ok(stats) => push_crawl_stats(&mut out, &stats),
        Err(_) => out.push_str("No crawl statistics recorded yet\n"),
    }

    out
}

fn push_crawl_stats(out: &mut String, stats: &CrawlStats) {
    let attempted = stats.pages_crawled + stats.pages_failed;
    let success_rate = if attempted > 0 {
        (stats.pages_crawled as f64 / attempted as f64) * 100.0
    } else {
        0.0
    };

    out.push_str("Pages:\n");
    out.push_str(&format!("  Crawled: {}\n", stats.pages_crawled));
    out.push_str(&format!("  Failed: {}\n", stats.pages_failed));
    out.push_str(&format!("  Skipped (fresh): {}\n", stats.pages_skipped_fresh));
    out.push_str(&format!("  Not modified: {}\n", stats.pages_not_modified));
    out.push_str(&format!("  Not HTML: {}\n", stats.pages_not_html));
    out.push_str(&format!("  Denied by robots.txt: {}\n", stats.robots_denied));
    out.push_str(&format!(
        "  Downloaded: {:.2} MB, {} assets found\n",
        stats.total_bytes as f64 / (1024.0 * 1024.0),
        stats.assets_discovered
    ));
    out.push_str(&format!(
        "  Success rate: {:.1}% ({} / {})\n\n",
        success_rate, stats.pages_crawled, attempted
    ));

    if !stats.error_counts.is_empty() {
        out.push_str("Errors:\n");
        let mut errors: Vec<_> = stats.error_counts.iter().collect();
        errors.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (kind, count) in errors {
            out.push_str(&format!("  {}: {}\n", kind, count));
        }
        out.push('\n');
    }
}
