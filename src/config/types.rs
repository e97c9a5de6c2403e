use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for Sumi-Tide
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Crawl name, recorded in checkpoint metadata
    pub name: String,

    pub site: SiteConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Builds a configuration with default tuning for the given site scope
    pub fn new(
        name: impl Into<String>,
        start_urls: Vec<String>,
        allowed_domains: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            site: SiteConfig {
                start_urls,
                allowed_domains,
            },
            crawler: CrawlerConfig::default(),
            user_agent: UserAgentConfig::default(),
            checkpoint: CheckpointConfig::default(),
            pipeline: PipelineConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// The site being crawled
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// URLs the crawl starts from
    #[serde(rename = "start-urls")]
    pub start_urls: Vec<String>,

    /// Hosts that may be crawled (subdomains included)
    #[serde(rename = "allowed-domains")]
    pub allowed_domains: Vec<String>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of simultaneous fetches across all hosts
    #[serde(rename = "global-concurrency", default = "default_global_concurrency")]
    pub global_concurrency: usize,

    /// Maximum number of simultaneous fetches against one host
    #[serde(rename = "per-host-concurrency", default = "default_per_host_concurrency")]
    pub per_host_concurrency: usize,

    /// Token bucket refill rate
    #[serde(rename = "requests-per-second", default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Token bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Multiplier applied to the backoff delay after each attempt
    #[serde(rename = "retry-backoff", default = "default_retry_backoff")]
    pub retry_backoff: f64,

    /// Random spread applied to each backoff delay, as a fraction (0.3 = ±30%)
    #[serde(rename = "retry-jitter", default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// Upper bound on a server-requested Retry-After delay
    #[serde(rename = "max-retry-after-secs", default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Responses declaring a larger body are skipped without downloading it
    #[serde(rename = "max-page-size-mb", default = "default_max_page_size_mb")]
    pub max_page_size_mb: Option<u64>,

    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: usize,

    #[serde(rename = "respect-robots-txt", default = "default_true")]
    pub respect_robots_txt: bool,

    /// Stop admitting new fetches after this many pages
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<usize>,

    /// Stop admitting new fetches after this many seconds
    #[serde(rename = "max-duration-secs", default)]
    pub max_duration_secs: Option<u64>,

    /// Maximum link distance from a start URL
    #[serde(rename = "depth-limit", default)]
    pub depth_limit: Option<u32>,

    /// CSS selectors whose `href` attributes are followed
    #[serde(rename = "link-selectors", default = "default_link_selectors")]
    pub link_selectors: Vec<String>,

    /// Whitelist of path patterns; empty means every path is allowed
    #[serde(default)]
    pub include: Vec<PathPatternConfig>,

    /// Path patterns that are never followed
    #[serde(default)]
    pub exclude: Vec<PathPatternConfig>,

    /// Send If-None-Match / If-Modified-Since from stored page records
    #[serde(rename = "conditional-requests", default = "default_true")]
    pub conditional_requests: bool,

    #[serde(rename = "fetch-strategy", default)]
    pub fetch_strategy: FetchStrategy,

    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    #[serde(default)]
    pub renderer: RendererConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            per_host_concurrency: default_per_host_concurrency(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_backoff: default_retry_backoff(),
            retry_jitter: default_retry_jitter(),
            max_retry_after_secs: default_max_retry_after_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_page_size_mb: default_max_page_size_mb(),
            max_redirects: default_max_redirects(),
            respect_robots_txt: true,
            max_pages: None,
            max_duration_secs: None,
            depth_limit: None,
            link_selectors: default_link_selectors(),
            include: Vec::new(),
            exclude: Vec::new(),
            conditional_requests: true,
            fetch_strategy: FetchStrategy::default(),
            adaptive: AdaptiveConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

/// How a page is retrieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Plain HTTP GET
    #[default]
    Http,
    /// Navigate a pooled rendering context and take its resulting HTML
    Rendered,
}

/// A path pattern used by include/exclude rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPatternConfig {
    pub pattern: String,

    #[serde(rename = "type", default)]
    pub kind: PatternKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    #[default]
    Prefix,
    Glob,
    Regex,
}

/// Adaptive rate limiting
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "min-rate", default = "default_min_rate")]
    pub min_rate: f64,

    #[serde(rename = "max-rate", default = "default_max_rate")]
    pub max_rate: f64,

    /// Responses slower than this count as slow
    #[serde(rename = "slow-response-ms", default = "default_slow_response_ms")]
    pub slow_response_ms: u64,

    /// Consecutive fast successes required before speeding up
    #[serde(rename = "speedup-after", default = "default_speedup_after")]
    pub speedup_after: u32,

    #[serde(rename = "increase-factor", default = "default_increase_factor")]
    pub increase_factor: f64,

    #[serde(rename = "decrease-factor", default = "default_decrease_factor")]
    pub decrease_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            slow_response_ms: default_slow_response_ms(),
            speedup_after: default_speedup_after(),
            increase_factor: default_increase_factor(),
            decrease_factor: default_decrease_factor(),
        }
    }
}

/// Rendering context pool used by the `rendered` fetch strategy
#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    #[serde(rename = "pool-size", default = "default_renderer_pool_size")]
    pub pool_size: usize,

    #[serde(rename = "navigation-timeout-ms", default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            pool_size: default_renderer_pool_size(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name", default = "default_crawler_name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version", default = "default_crawler_version")]
    pub crawler_version: String,

    #[serde(rename = "contact-url", default)]
    pub contact_url: Option<String>,

    #[serde(rename = "contact-email", default)]
    pub contact_email: Option<String>,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        let contact: Vec<String> = self
            .contact_url
            .iter()
            .map(|url| format!("+{}", url))
            .chain(self.contact_email.iter().cloned())
            .collect();

        if contact.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} ({})",
                self.crawler_name,
                self.crawler_version,
                contact.join("; ")
            )
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: default_crawler_name(),
            crawler_version: default_crawler_version(),
            contact_url: None,
            contact_email: None,
        }
    }
}

/// Checkpoint persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Storage backend; inferred from the file extension when absent
    #[serde(default)]
    pub backend: Option<BackendKind>,

    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,

    /// Save the queue and metadata after this many yielded pages
    #[serde(rename = "interval-pages", default = "default_interval_pages")]
    pub interval_pages: usize,

    /// Pages fetched longer ago than this are fetched again
    #[serde(rename = "max-age-days", default)]
    pub max_age_days: Option<f64>,

    #[serde(rename = "on-fingerprint-mismatch", default)]
    pub on_fingerprint_mismatch: FingerprintPolicy,
}

impl CheckpointConfig {
    /// Resolves the backend, falling back to the file extension
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.unwrap_or_else(|| {
            match self.path.extension().and_then(|ext| ext.to_str()) {
                Some("db") | Some("sqlite") | Some("sqlite3") => BackendKind::Sqlite,
                _ => BackendKind::Json,
            }
        })
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: None,
            path: default_checkpoint_path(),
            interval_pages: default_interval_pages(),
            max_age_days: None,
            on_fingerprint_mismatch: FingerprintPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Json,
    Sqlite,
}

/// What to do when a checkpoint was written under a different configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintPolicy {
    /// Discard the saved traversal and start from the configured start URLs
    #[default]
    Restart,
    /// Log a warning and resume anyway
    Advisory,
}

/// Process worker pool and queue bounds
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(rename = "queue-max-items", default = "default_queue_max_items")]
    pub queue_max_items: usize,

    #[serde(rename = "queue-max-memory-mb", default = "default_queue_max_memory_mb")]
    pub queue_max_memory_mb: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_max_items: default_queue_max_items(),
            queue_max_memory_mb: default_queue_max_memory_mb(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory that receives the HTML snapshots
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_global_concurrency() -> usize {
    200
}

fn default_per_host_concurrency() -> usize {
    25
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.3
}

fn default_max_retry_after_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_page_size_mb() -> Option<u64> {
    Some(10)
}

fn default_max_redirects() -> usize {
    10
}

fn default_link_selectors() -> Vec<String> {
    vec!["a[href]".to_string()]
}

fn default_min_rate() -> f64 {
    0.5
}

fn default_max_rate() -> f64 {
    50.0
}

fn default_slow_response_ms() -> u64 {
    2000
}

fn default_speedup_after() -> u32 {
    10
}

fn default_increase_factor() -> f64 {
    1.1
}

fn default_decrease_factor() -> f64 {
    0.5
}

fn default_renderer_pool_size() -> usize {
    10
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_crawler_name() -> String {
    "SumiTide".to_string()
}

fn default_crawler_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(".sumi_tide_checkpoint.json")
}

fn default_interval_pages() -> usize {
    10
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(10)
}

fn default_queue_max_items() -> usize {
    100
}

fn default_queue_max_memory_mb() -> u64 {
    500
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}
