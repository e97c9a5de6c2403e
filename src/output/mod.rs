//! Output module for page snapshots and run reports
//!
//! This module handles:
//! - Mapping a crawled URL to its snapshot location on disk
//! - Writing HTML snapshots as the default pipeline processor
//! - Formatting run and checkpoint reports for the command line

mod report;
mod writer;

pub use report::{format_checkpoint_stats, format_run_summary};
pub use writer::HtmlWriter;

use sha2::{Digest, Sha256};
use url::Url;

/// File name used for directory-style URLs
const INDEX_FILE: &str = "index.html";

/// Snapshot names already ending in one of these are kept as they are
const HTML_EXTENSIONS: &[&str] = &[".html", ".htm", ".xhtml"];

/// Hex characters of the query hash appended to a snapshot name
const QUERY_HASH_LEN: usize = 8;

/// Maps a URL to its snapshot path, relative to the output directory
///
/// The first component is the host, with `_port` appended for non-default
/// ports. A path that is empty or ends in `/` maps to `index.html`. Any other
/// name gets `.html` appended unless it already carries an HTML extension, so
/// `/docs` and `/docs/intro` become `docs.html` and `docs/intro.html` and never
/// compete for the same name as file and directory. A query string becomes a
/// short hash inserted before the extension, so `/list?page=2` and
/// `/list?page=3` land in different files.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_tide::output::relative_output_path;
///
/// let url = Url::parse("https://example.com/docs/").unwrap();
/// assert_eq!(relative_output_path(&url), "example.com/docs/index.html");
/// ```
pub fn relative_output_path(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown-host").to_lowercase();
    let host_dir = match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host,
    };

    let mut path = url.path().trim_start_matches('/').to_string();
    if path.is_empty() || path.ends_with('/') {
        path.push_str(INDEX_FILE);
    } else if !has_html_extension(&path) {
        path.push_str(".html");
    }

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        let digest = hex::encode(Sha256::digest(query.as_bytes()));
        path = insert_suffix(&path, &format!("_{}", &digest[..QUERY_HASH_LEN]));
    }

    format!("{}/{}", host_dir, path)
}

fn has_html_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    HTML_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Inserts `suffix` before the extension of the last path segment
fn insert_suffix(path: &str, suffix: &str) -> String {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let split = name_start + dot;
            format!("{}{}{}", &path[..split], suffix, &path[split..])
        }
        _ => format!("{}{}", path, suffix),
    }
}
