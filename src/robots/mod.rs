//! Robots.txt handling module
//!
//! Fetches each origin's robots.txt once per run and answers allow/deny
//! questions from the cached copy. Politeness never blocks the crawl: an
//! unreachable robots.txt is treated as allowing everything.

use crate::url::origin_of;
use reqwest::{Client, StatusCode};
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use url::Url;

/// Parsed robots.txt rules for one origin
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// Raw robots.txt body; `None` allows everything
    body: Option<String>,
}

impl RobotsRules {
    pub fn from_content(content: &str) -> Self {
        Self {
            body: Some(content.to_string()),
        }
    }

    /// Rules that allow every URL
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Checks a full URL against the rules for the given user-agent token
    pub fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        match &self.body {
            Some(body) if !body.trim().is_empty() => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, user_agent, url.as_str())
            }
            _ => true,
        }
    }
}

/// Per-run robots.txt cache and policy check
pub struct RobotsChecker {
    client: Client,
    user_agent: String,
    cache: Mutex<HashMap<String, Arc<OnceCell<RobotsRules>>>>,
}

impl RobotsChecker {
    /// `user_agent` is the product token matched against `User-agent:` lines
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether `url` may be fetched
    ///
    /// Concurrent callers for the same origin share a single robots.txt fetch.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let Some(origin) = origin_of(url) else {
            return true;
        };

        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.entry(origin.clone()).or_default().clone()
        };

        let rules = cell.get_or_init(|| self.fetch_rules(&origin)).await;
        rules.is_allowed(url, &self.user_agent)
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{}/robots.txt", origin);
        tracing::debug!("Fetching {}", robots_url);

        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Could not fetch {} ({}), allowing all", robots_url, e);
                return RobotsRules::allow_all();
            }
        };

        if response.status() != StatusCode::OK {
            tracing::debug!(
                "{} returned {}, allowing all",
                robots_url,
                response.status()
            );
            return RobotsRules::allow_all();
        }

        match response.text().await {
            Ok(body) => RobotsRules::from_content(&body),
            Err(e) => {
                tracing::warn!("Could not read {} ({}), allowing all", robots_url, e);
                RobotsRules::allow_all()
            }
        }
    }
}
